//! Local tracks and remote stream handles.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// A track produced by the local capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: TrackKind,
    /// Id of the stream this track belongs to.
    pub stream_id: String,
}

/// The stream produced by one capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStream {
    pub id: String,
    pub tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn track_ids(&self) -> Vec<&str> {
        self.tracks.iter().map(|t| t.id.as_str()).collect()
    }
}

/// A stream received from a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStreamHandle {
    pub id: String,
    pub tracks: Vec<TrackKind>,
}

impl MediaStreamHandle {
    pub fn has_video(&self) -> bool {
        self.tracks.contains(&TrackKind::Video)
    }

    pub fn has_audio(&self) -> bool {
        self.tracks.contains(&TrackKind::Audio)
    }
}
