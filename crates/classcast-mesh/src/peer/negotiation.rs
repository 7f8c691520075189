//! Per-link offer/answer state machine.
//!
//! ```text
//! Idle ──local offer──▶ OfferSent ──remote answer──▶ Stable
//! Idle ──remote offer─▶ OfferReceived ──local answer─▶ Stable
//! Stable ──local offer──▶ OfferSent      (renegotiation)
//! Stable ──remote offer─▶ OfferReceived  (renegotiation)
//! ```
//!
//! Renegotiation requests are never acted on outside `Idle`/`Stable`; they
//! are folded into a single pending request that the manager picks up once
//! the link settles.

use std::time::Duration;

use classcast_common::MeshError;
use tokio::time::Instant;

use super::PeerRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    OfferReceived,
    Stable,
}

impl NegotiationState {
    fn is_settled(self) -> bool {
        matches!(self, Self::Idle | Self::Stable)
    }
}

/// A request to (re)run offer/answer.
///
/// The track set is not part of the request: the link always applies its
/// latest desired tracks when the offer is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Renegotiation {
    pub ice_restart: bool,
}

impl Renegotiation {
    pub fn tracks_changed() -> Self {
        Self { ice_restart: false }
    }

    pub fn ice_restart() -> Self {
        Self { ice_restart: true }
    }

    /// Coalesce two requests into one.
    pub fn merge(self, other: Self) -> Self {
        Self {
            ice_restart: self.ice_restart || other.ice_restart,
        }
    }
}

/// How to treat an incoming offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    /// Apply it and answer.
    Accept,
    /// Glare and this side yields: roll back our own offer, then answer.
    AcceptAfterRollback,
    /// Glare and this side keeps its offer: the remote will yield.
    Ignore,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot apply {event} while {state:?}")]
pub struct InvalidTransition {
    pub state: NegotiationState,
    pub event: &'static str,
}

impl From<InvalidTransition> for MeshError {
    fn from(err: InvalidTransition) -> Self {
        MeshError::Protocol(err.to_string())
    }
}

#[derive(Debug)]
pub struct NegotiationStateMachine {
    role: PeerRole,
    /// Fixed at creation. Both ends of a pair must disagree on this.
    yields_on_glare: bool,
    state: NegotiationState,
    /// Where an aborted local offer returns to.
    settled: NegotiationState,
    pending: Option<Renegotiation>,
    /// The request our outstanding offer was built for.
    in_flight: Option<Renegotiation>,
    entered_at: Instant,
}

impl NegotiationStateMachine {
    /// A machine whose glare behaviour follows its role: the responder
    /// yields.
    pub fn new(role: PeerRole, now: Instant) -> Self {
        Self {
            role,
            yields_on_glare: role == PeerRole::Responder,
            state: NegotiationState::Idle,
            settled: NegotiationState::Idle,
            pending: None,
            in_flight: None,
            entered_at: now,
        }
    }

    /// Override which side gives way when both ends offer at once.
    pub fn with_glare_yield(mut self, yields: bool) -> Self {
        self.yields_on_glare = yields;
        self
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn yields_on_glare(&self) -> bool {
        self.yields_on_glare
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn pending(&self) -> Option<Renegotiation> {
        self.pending
    }

    pub fn is_settled(&self) -> bool {
        self.state.is_settled()
    }

    /// Queue a renegotiation, coalescing with any already pending.
    pub fn request(&mut self, request: Renegotiation) {
        self.pending = Some(match self.pending {
            Some(existing) => existing.merge(request),
            None => request,
        });
    }

    /// Take the pending request if the link is settled enough to act on it.
    pub fn take_ready(&mut self) -> Option<Renegotiation> {
        if self.state.is_settled() {
            self.pending.take()
        } else {
            None
        }
    }

    /// A local offer for `request` was applied and is about to be sent.
    pub fn local_offer_sent(
        &mut self,
        request: Renegotiation,
        now: Instant,
    ) -> Result<(), InvalidTransition> {
        if !self.state.is_settled() {
            return Err(self.invalid("local offer"));
        }
        self.settled = self.state;
        self.in_flight = Some(request);
        self.enter(NegotiationState::OfferSent, now);
        Ok(())
    }

    /// The outstanding offer never reached the remote. Returns to the
    /// previous settled state and re-queues the request.
    pub fn abort_local_offer(&mut self, now: Instant) -> Result<(), InvalidTransition> {
        if self.state != NegotiationState::OfferSent {
            return Err(self.invalid("offer abort"));
        }
        if let Some(request) = self.in_flight.take() {
            self.request(request);
        }
        let settled = self.settled;
        self.enter(settled, now);
        Ok(())
    }

    /// A remote offer arrived.
    pub fn remote_offer(&mut self, now: Instant) -> Result<OfferDecision, InvalidTransition> {
        match self.state {
            NegotiationState::Idle | NegotiationState::Stable => {
                self.settled = self.state;
                self.enter(NegotiationState::OfferReceived, now);
                Ok(OfferDecision::Accept)
            }
            NegotiationState::OfferSent if !self.yields_on_glare => Ok(OfferDecision::Ignore),
            NegotiationState::OfferSent => {
                if let Some(request) = self.in_flight.take() {
                    self.request(request);
                }
                self.enter(NegotiationState::OfferReceived, now);
                Ok(OfferDecision::AcceptAfterRollback)
            }
            NegotiationState::OfferReceived => Err(self.invalid("remote offer")),
        }
    }

    /// Our answer to the remote offer was applied and sent.
    pub fn local_answer_sent(&mut self, now: Instant) -> Result<(), InvalidTransition> {
        if self.state != NegotiationState::OfferReceived {
            return Err(self.invalid("local answer"));
        }
        self.enter(NegotiationState::Stable, now);
        Ok(())
    }

    /// The remote answered our outstanding offer.
    pub fn remote_answer(&mut self, now: Instant) -> Result<(), InvalidTransition> {
        if self.state != NegotiationState::OfferSent {
            return Err(self.invalid("remote answer"));
        }
        self.in_flight = None;
        self.enter(NegotiationState::Stable, now);
        Ok(())
    }

    /// Waiting on the remote for longer than `timeout`.
    pub fn is_stalled(&self, now: Instant, timeout: Duration) -> bool {
        !self.state.is_settled() && now.saturating_duration_since(self.entered_at) >= timeout
    }

    /// Restart the stall clock, e.g. after signaling came back.
    pub fn reset_timer(&mut self, now: Instant) {
        self.entered_at = now;
    }

    fn enter(&mut self, state: NegotiationState, now: Instant) {
        self.state = state;
        self.entered_at = now;
    }

    fn invalid(&self, event: &'static str) -> InvalidTransition {
        InvalidTransition {
            state: self.state,
            event,
        }
    }
}
