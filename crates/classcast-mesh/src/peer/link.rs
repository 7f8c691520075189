//! One live connection to a remote participant.

use std::collections::BTreeMap;
use std::sync::Arc;

use classcast_common::{MeshError, ParticipantId};
use tokio::time::Instant;
use tracing::debug;

use crate::media::LocalTrack;
use crate::protocol::{IceCandidate, SessionDescription};

use super::backend::{LinkId, LinkState, PeerConnection};
use super::negotiation::{NegotiationState, NegotiationStateMachine};
use super::PeerRole;

pub struct PeerLink {
    pub(crate) link_id: LinkId,
    pub(crate) remote_id: ParticipantId,
    pub(crate) role: PeerRole,
    pub(crate) connection: Arc<dyn PeerConnection>,
    pub(crate) negotiation: NegotiationStateMachine,
    /// Candidates that arrived before any remote description, in arrival order.
    pub(crate) pending_candidates: Vec<IceCandidate>,
    pub(crate) remote_description_set: bool,
    /// Tracks currently added to the connection.
    applied_tracks: BTreeMap<String, LocalTrack>,
    /// Tracks the connection should carry after the next negotiation.
    desired_tracks: BTreeMap<String, LocalTrack>,
    pub(crate) link_state: LinkState,
}

impl PeerLink {
    pub(crate) fn new(
        link_id: LinkId,
        remote_id: ParticipantId,
        role: PeerRole,
        connection: Arc<dyn PeerConnection>,
        desired_tracks: BTreeMap<String, LocalTrack>,
        yields_on_glare: bool,
        now: Instant,
    ) -> Self {
        Self {
            link_id,
            remote_id,
            role,
            connection,
            negotiation: NegotiationStateMachine::new(role, now).with_glare_yield(yields_on_glare),
            pending_candidates: Vec::new(),
            remote_description_set: false,
            applied_tracks: BTreeMap::new(),
            desired_tracks,
            link_state: LinkState::New,
        }
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    pub fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.negotiation.state()
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Ids of the tracks the connection is currently sending.
    pub fn attached_track_ids(&self) -> Vec<&str> {
        self.applied_tracks.keys().map(String::as_str).collect()
    }

    pub(crate) fn stage_track(&mut self, track: LocalTrack) {
        self.desired_tracks.insert(track.id.clone(), track);
    }

    pub(crate) fn unstage_track(&mut self, track_id: &str) {
        self.desired_tracks.remove(track_id);
    }

    /// Bring the connection's tracks in line with the desired set.
    pub(crate) async fn sync_tracks(&mut self) -> Result<(), MeshError> {
        let stale: Vec<String> = self
            .applied_tracks
            .keys()
            .filter(|id| !self.desired_tracks.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            self.connection.remove_track(&id).await?;
            self.applied_tracks.remove(&id);
            debug!(remote_id = %self.remote_id, track_id = %id, "Track removed");
        }

        let fresh: Vec<LocalTrack> = self
            .desired_tracks
            .values()
            .filter(|t| !self.applied_tracks.contains_key(&t.id))
            .cloned()
            .collect();
        for track in fresh {
            self.connection.add_track(&track).await?;
            debug!(remote_id = %self.remote_id, track_id = %track.id, "Track added");
            self.applied_tracks.insert(track.id.clone(), track);
        }
        Ok(())
    }

    /// Apply the desired tracks and produce a local offer.
    pub(crate) async fn make_offer(
        &mut self,
        ice_restart: bool,
    ) -> Result<SessionDescription, MeshError> {
        self.sync_tracks().await?;
        let offer = self.connection.create_offer(ice_restart).await?;
        self.connection.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Apply a remote offer, flush buffered candidates and produce the answer.
    pub(crate) async fn answer_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, MeshError> {
        self.apply_remote_description(offer).await?;
        self.sync_tracks().await?;
        let answer = self.connection.create_answer().await?;
        self.connection.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    /// Set the remote description, then apply every buffered candidate in
    /// the order it arrived.
    pub(crate) async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), MeshError> {
        self.connection.set_remote_description(description).await?;
        self.remote_description_set = true;

        let buffered = std::mem::take(&mut self.pending_candidates);
        if !buffered.is_empty() {
            debug!(
                remote_id = %self.remote_id,
                count = buffered.len(),
                "Flushing buffered ICE candidates"
            );
        }
        for candidate in buffered {
            if let Err(e) = self.connection.add_ice_candidate(candidate).await {
                tracing::warn!(remote_id = %self.remote_id, error = %e, "Buffered candidate rejected");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("link_id", &self.link_id)
            .field("remote_id", &self.remote_id)
            .field("role", &self.role)
            .field("negotiation", &self.negotiation.state())
            .field("link_state", &self.link_state)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("tracks", &self.attached_track_ids())
            .finish()
    }
}
