//! Local screen/audio capture.
//!
//! `MediaCaptureSource` is the device seam; `ScreenCapture` holds the one
//! `LocalCaptureState` a client has and makes start/stop idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use classcast_common::MeshError;
use classcast_config::schema::ShareQuality;
use tracing::info;

use crate::media::LocalStream;

/// A capture device.
#[async_trait]
pub trait MediaCaptureSource: Send + Sync {
    /// Ask for the screen (and optionally system audio). Fails with
    /// `MeshError::CaptureDeviceDenied` when the user or OS refuses.
    async fn start(&self, quality: ShareQuality, audio: bool) -> Result<LocalStream, MeshError>;

    async fn stop(&self, stream: &LocalStream);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalCaptureState {
    active: bool,
    stream: Option<LocalStream>,
}

impl LocalCaptureState {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn stream(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }
}

pub struct ScreenCapture {
    source: Arc<dyn MediaCaptureSource>,
    quality: ShareQuality,
    audio: bool,
    state: LocalCaptureState,
}

impl ScreenCapture {
    pub fn new(source: Arc<dyn MediaCaptureSource>, quality: ShareQuality, audio: bool) -> Self {
        Self {
            source,
            quality,
            audio,
            state: LocalCaptureState::default(),
        }
    }

    pub fn state(&self) -> &LocalCaptureState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    /// Acquire the device, or return the stream already active.
    pub async fn start(&mut self) -> Result<LocalStream, MeshError> {
        if let Some(stream) = &self.state.stream {
            return Ok(stream.clone());
        }
        let stream = self.source.start(self.quality, self.audio).await?;
        if stream.tracks.is_empty() {
            self.source.stop(&stream).await;
            return Err(MeshError::Capture("capture produced no tracks".into()));
        }
        info!(
            stream_id = %stream.id,
            tracks = stream.tracks.len(),
            quality = ?self.quality,
            "Screen capture started"
        );
        self.state = LocalCaptureState {
            active: true,
            stream: Some(stream.clone()),
        };
        Ok(stream)
    }

    /// Release the device. Returns the stream that was active, if any.
    pub async fn stop(&mut self) -> Option<LocalStream> {
        let stream = self.state.stream.take()?;
        self.state.active = false;
        self.source.stop(&stream).await;
        info!(stream_id = %stream.id, "Screen capture stopped");
        Some(stream)
    }
}
