//! # WatchShare Media Module
//!
//! Handles to captured media and the capture seam. A [`MediaStream`] is a cheap,
//! cloneable handle: every clone observes the same tracks, so stopping a track
//! through one clone is visible to the host, the signaling layer and any viewer
//! holding the stream.
//!
//! The first track of a stream is its *primary* track. When the platform ends
//! that track (for example the user presses "Stop sharing" in the browser
//! chrome) the host treats the whole capture as finished.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// Unique identifier of one captured stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Why a track is no longer live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Stopped by our own code
    Stopped,
    /// Ended by the platform, outside of our control
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended(EndReason),
}

impl TrackState {
    pub fn is_live(&self) -> bool {
        matches!(self, TrackState::Live)
    }
}

struct TrackInner {
    kind: TrackKind,
    label: String,
    state: watch::Sender<TrackState>,
}

/// One audio or video track of a [`MediaStream`]
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        let (state, _) = watch::channel(TrackState::Live);
        Self {
            inner: Arc::new(TrackInner {
                kind,
                label: label.into(),
                state,
            }),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn state(&self) -> TrackState {
        *self.inner.state.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    /// Stops the track. Stopping an ended track keeps its original end reason.
    pub fn stop(&self) {
        self.finish(EndReason::Stopped);
    }

    /// Marks the track as ended by the platform.
    pub fn end(&self) {
        self.finish(EndReason::External);
    }

    fn finish(&self, reason: EndReason) {
        let changed = self.inner.state.send_if_modified(|state| {
            if state.is_live() {
                *state = TrackState::Ended(reason);
                true
            } else {
                false
            }
        });
        if changed {
            debug!("Track '{}' ended ({:?})", self.inner.label, reason);
        }
    }

    /// Resolves once the track is no longer live, whatever the reason.
    pub async fn ended(&self) -> EndReason {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|state| !state.is_live()).await {
            Ok(state) => match *state {
                TrackState::Ended(reason) => reason,
                TrackState::Live => EndReason::Stopped,
            },
            // The sender lives in `inner`, which we hold, so this is unreachable in practice.
            Err(_) => EndReason::Stopped,
        }
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}

struct StreamInner {
    id: StreamId,
    tracks: Vec<MediaTrack>,
}

/// Opaque handle to captured audio/video
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: StreamId::new(),
                tracks,
            }),
        }
    }

    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.inner.tracks
    }

    pub fn primary_track(&self) -> Option<&MediaTrack> {
        self.inner.tracks.first()
    }

    pub fn live_track_count(&self) -> usize {
        self.inner.tracks.iter().filter(|t| t.is_live()).count()
    }

    pub fn stop_all(&self) {
        for track in &self.inner.tracks {
            track.stop();
        }
    }
}

impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for MediaStream {}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("tracks", &self.inner.tracks)
            .finish()
    }
}

/// What to ask the platform to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub video: bool,
    pub audio: bool,
}

impl CaptureConstraints {
    /// Screen video together with tab/system audio
    pub fn screen_with_audio() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("screen capture permission denied")]
    PermissionDenied,
    #[error("no capture device available")]
    NoDevice,
    #[error("screen capture failed: {0}")]
    Failed(String),
}

/// The platform's screen-capture permission API
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn request_capture(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<MediaStream, CaptureError>;
}

/// Capture source producing live placeholder tracks
///
/// Used by the demo command and the tests in place of a real screen grab.
/// Every stream handed out is remembered so the caller can end it the way the
/// browser's "Stop sharing" button would.
#[derive(Debug, Default)]
pub struct SyntheticCapture {
    deny: bool,
    issued: Mutex<Vec<MediaStream>>,
}

impl SyntheticCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that refuses every request, as if the user dismissed the picker.
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn issued(&self) -> Vec<MediaStream> {
        self.issued
            .lock()
            .map(|issued| issued.clone())
            .unwrap_or_default()
    }

    pub fn last_issued(&self) -> Option<MediaStream> {
        self.issued().pop()
    }
}

#[async_trait]
impl CaptureProvider for SyntheticCapture {
    async fn request_capture(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<MediaStream, CaptureError> {
        if self.deny {
            return Err(CaptureError::PermissionDenied);
        }
        if !constraints.video && !constraints.audio {
            return Err(CaptureError::NoDevice);
        }

        let mut tracks = Vec::new();
        if constraints.video {
            tracks.push(MediaTrack::new(TrackKind::Video, "synthetic-screen"));
        }
        if constraints.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, "synthetic-audio"));
        }

        let stream = MediaStream::new(tracks);
        if let Ok(mut issued) = self.issued.lock() {
            issued.push(stream.clone());
        }
        info!(
            "Synthetic capture started: {} ({} tracks)",
            stream.id(),
            stream.tracks().len()
        );
        Ok(stream)
    }
}
