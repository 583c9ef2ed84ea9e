//! # WatchShare Host Module
//!
//! The host session controller owns one room: its peer identity, the set of
//! connected viewers and the single outbound screen capture. It runs as a tokio
//! task and is driven through a [`HostHandle`].
//!
//! ## Lifecycle
//!
//! ```text
//!  IdentityPending ──open──► Ready ──viewer──► AwaitingCapture
//!                                                 │      ▲
//!                                        consent  │      │ capture failed /
//!                                                 ▼      │ track ended
//!                                             Capturing ─┴──► Sharing
//!                                                               │
//!                                                  end_session  ▼
//!                                                           Terminated
//! ```
//!
//! Capture is never started automatically: while viewers are waiting and no
//! stream is active a persistent "Start Sharing" toast is kept on screen, and
//! only [`HostHandle::start_capture`] requests the capture.
//!
//! ## Resource release
//!
//! Ending the session, unmounting and dropping every handle all run the same
//! release path: tracks are stopped, calls closed and the peer destroyed.
//! Results of asynchronous requests that complete after teardown (a peer that
//! finally opens, a capture the user finally grants) are released on arrival.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::media::{CaptureConstraints, CaptureError, CaptureProvider, EndReason, MediaStream, StreamId};
use crate::signaling::{
    CallId, ConnectionId, EventSink, PeerEndpoint, PeerEnvelope, PeerEvent, PeerId, Signaling,
    SignalingError,
};
use crate::surface::{Navigator, Notifier, Toast, ToastAction, ToastId};

/// Where the host is sent once the session has ended
pub const HOME_PATH: &str = "/";

/// Platform collaborators of a host session
#[derive(Clone)]
pub struct HostContext {
    pub signaling: Arc<dyn Signaling>,
    pub capture: Arc<dyn CaptureProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub navigator: Arc<dyn Navigator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPhase {
    IdentityPending,
    Ready,
    AwaitingCapture,
    Capturing,
    Sharing,
    Terminated,
}

/// One connected viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerEntry {
    pub connection: ConnectionId,
    pub peer: PeerId,
    pub connected_at: DateTime<Utc>,
}

/// Viewers in arrival order, keyed by connection
///
/// Inserting a connection twice or removing an unknown one are no-ops, so the
/// size always equals opened minus closed connections.
#[derive(Debug, Clone, Default)]
pub struct ViewerSet {
    entries: Vec<ViewerEntry>,
}

impl ViewerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the connection is already present.
    pub fn insert(&mut self, connection: ConnectionId, peer: PeerId) -> bool {
        if self.contains(connection) {
            return false;
        }
        self.entries.push(ViewerEntry {
            connection,
            peer,
            connected_at: Utc::now(),
        });
        true
    }

    pub fn remove(&mut self, connection: ConnectionId) -> Option<ViewerEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.connection == connection)?;
        Some(self.entries.remove(index))
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.entries.iter().any(|entry| entry.connection == connection)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewerEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Published view of the host session
#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub phase: HostPhase,
    pub identity: Option<PeerId>,
    pub viewers: Vec<ViewerEntry>,
    pub stream: Option<StreamId>,
    pub live_tracks: usize,
    pub calls: usize,
    pub prompt_visible: bool,
}

impl HostSnapshot {
    fn initial() -> Self {
        Self {
            phase: HostPhase::IdentityPending,
            identity: None,
            viewers: Vec::new(),
            stream: None,
            live_tracks: 0,
            calls: 0,
            prompt_visible: false,
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// The "Stop sharing" control is only offered while a stream is active.
    pub fn can_end_session(&self) -> bool {
        self.stream.is_some()
    }
}

enum HostInput {
    StartCapture,
    EndSession,
    Unmount,
    PeerCreated {
        epoch: u64,
        result: Result<Arc<dyn PeerEndpoint>, SignalingError>,
    },
    CaptureFinished {
        result: Result<MediaStream, CaptureError>,
    },
    TrackEnded {
        stream: StreamId,
        reason: EndReason,
    },
}

/// Handle to a running host session
pub struct HostHandle {
    inputs: mpsc::UnboundedSender<HostInput>,
    state: watch::Receiver<HostSnapshot>,
    task: JoinHandle<()>,
}

impl HostHandle {
    /// User consent to begin screen capture (the prompt's "Start Sharing" action).
    pub fn start_capture(&self) {
        let _ = self.inputs.send(HostInput::StartCapture);
    }

    /// Explicit "Stop sharing": ends the session and releases everything.
    ///
    /// Honoured in every phase; the page only offers it while sharing
    /// (see [`HostSnapshot::can_end_session`]).
    pub fn end_session(&self) {
        let _ = self.inputs.send(HostInput::EndSession);
    }

    pub fn snapshot(&self) -> HostSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HostSnapshot> {
        self.state.clone()
    }

    /// Waits until a published snapshot satisfies `predicate`.
    ///
    /// Returns `None` if the session stopped without ever matching.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&HostSnapshot) -> bool,
    ) -> Option<HostSnapshot> {
        let mut rx = self.state.clone();
        rx.wait_for(|snapshot| predicate(snapshot))
            .await
            .ok()
            .map(|snapshot| snapshot.clone())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Unmounts the controller and waits for its resources to be released.
    pub async fn unmount(self) -> HostSnapshot {
        let _ = self.inputs.send(HostInput::Unmount);
        if let Err(e) = self.task.await {
            error!("Host session task failed: {}", e);
        }
        self.state.borrow().clone()
    }
}

pub struct HostController {
    ctx: HostContext,
    inputs: mpsc::WeakUnboundedSender<HostInput>,
    state: watch::Sender<HostSnapshot>,
    epoch: u64,
    peer: Option<Arc<dyn PeerEndpoint>>,
    identity: Option<PeerId>,
    viewers: ViewerSet,
    stream: Option<MediaStream>,
    calls: HashMap<ConnectionId, CallId>,
    prompt: Option<ToastId>,
    capture_pending: bool,
    terminated: bool,
}

impl HostController {
    /// Mounts a host session: requests a peer identity and starts the event loop.
    pub fn spawn(ctx: HostContext) -> HostHandle {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(HostSnapshot::initial());

        let controller = HostController {
            ctx,
            inputs: inputs_tx.downgrade(),
            state: state_tx,
            epoch: 0,
            peer: None,
            identity: None,
            viewers: ViewerSet::new(),
            stream: None,
            calls: HashMap::new(),
            prompt: None,
            capture_pending: false,
            terminated: false,
        };
        let task = tokio::spawn(controller.run(inputs_rx));

        HostHandle {
            inputs: inputs_tx,
            state: state_rx,
            task,
        }
    }

    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<HostInput>) {
        info!("Host session mounted");
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel::<PeerEnvelope>();
        self.request_identity(peer_tx);

        loop {
            tokio::select! {
                input = inputs.recv() => {
                    match input {
                        Some(HostInput::Unmount) | None => {
                            info!("Host session unmounting");
                            break;
                        }
                        Some(input) => self.handle_input(input).await,
                    }
                }

                Some(envelope) = peer_rx.recv() => {
                    self.handle_peer_event(envelope).await;
                }
            }

            self.publish();
            if self.terminated {
                break;
            }
        }

        inputs.close();
        while let Ok(input) = inputs.try_recv() {
            Self::discard(input).await;
        }

        self.release().await;
        self.publish();
        info!("Host session finished");
    }

    /// Releases resources carried by an input that arrived after the loop ended.
    async fn discard(input: HostInput) {
        match input {
            HostInput::CaptureFinished { result: Ok(stream) } => {
                debug!("Stopping capture {} that completed during teardown", stream.id());
                stream.stop_all();
            }
            HostInput::PeerCreated {
                result: Ok(peer), ..
            } => {
                debug!("Destroying peer created during teardown");
                peer.destroy().await;
            }
            _ => {}
        }
    }

    fn request_identity(&mut self, peer_tx: mpsc::UnboundedSender<PeerEnvelope>) {
        self.epoch += 1;
        let epoch = self.epoch;
        let sink = EventSink::new(epoch, peer_tx);
        let signaling = self.ctx.signaling.clone();
        let inputs = self.inputs.clone();

        tokio::spawn(async move {
            let result = signaling.create_peer(sink).await;
            let undelivered = match inputs.upgrade() {
                Some(tx) => tx
                    .send(HostInput::PeerCreated { epoch, result })
                    .err()
                    .map(|e| e.0),
                None => Some(HostInput::PeerCreated { epoch, result }),
            };
            if let Some(HostInput::PeerCreated {
                result: Ok(peer), ..
            }) = undelivered
            {
                debug!("Host session gone before its peer was created, destroying it");
                peer.destroy().await;
            }
        });
    }

    async fn handle_input(&mut self, input: HostInput) {
        match input {
            HostInput::StartCapture => self.start_capture(),
            HostInput::EndSession => self.terminate().await,
            HostInput::PeerCreated { epoch, result } => self.on_peer_created(epoch, result).await,
            HostInput::CaptureFinished { result } => self.on_capture_finished(result).await,
            HostInput::TrackEnded { stream, reason } => {
                let is_current = self.stream.as_ref().map(|s| s.id()) == Some(stream);
                if !is_current {
                    debug!("Ignoring end of inactive stream {}", stream);
                    return;
                }
                info!("Capture {} ended ({:?}), returning to awaiting capture", stream, reason);
                self.stop_capture().await;
                self.refresh_prompt();
            }
            HostInput::Unmount => {}
        }
    }

    async fn on_peer_created(
        &mut self,
        epoch: u64,
        result: Result<Arc<dyn PeerEndpoint>, SignalingError>,
    ) {
        match result {
            Ok(peer) if epoch != self.epoch || self.terminated => {
                debug!("Destroying peer from stale epoch {}", epoch);
                peer.destroy().await;
            }
            Ok(peer) => {
                self.peer = Some(peer);
                self.call_viewers().await;
            }
            Err(e) => {
                // No retry: the room stays without an identity until the page is reloaded.
                error!("Error initializing peer: {}", e);
            }
        }
    }

    fn start_capture(&mut self) {
        if self.terminated || self.stream.is_some() || self.capture_pending {
            debug!("Ignoring capture request: capture already active or pending");
            return;
        }

        self.capture_pending = true;
        self.dismiss_prompt();

        let capture = self.ctx.capture.clone();
        let inputs = self.inputs.clone();
        info!("Requesting screen capture");
        tokio::spawn(async move {
            let result = capture
                .request_capture(CaptureConstraints::screen_with_audio())
                .await;
            let undelivered = match inputs.upgrade() {
                Some(tx) => tx
                    .send(HostInput::CaptureFinished { result })
                    .err()
                    .map(|e| e.0),
                None => Some(HostInput::CaptureFinished { result }),
            };
            if let Some(HostInput::CaptureFinished { result: Ok(stream) }) = undelivered {
                debug!("Host session gone before capture completed, stopping tracks");
                stream.stop_all();
            }
        });
    }

    async fn on_capture_finished(&mut self, result: Result<MediaStream, CaptureError>) {
        self.capture_pending = false;

        match result {
            Ok(stream) if self.terminated || self.stream.is_some() => {
                stream.stop_all();
            }
            Ok(stream) => {
                info!(
                    "Screen capture started: {} ({} tracks)",
                    stream.id(),
                    stream.tracks().len()
                );
                self.watch_primary_track(&stream);
                self.stream = Some(stream);
                self.call_viewers().await;
            }
            Err(e) => {
                error!("Screen sharing error: {}", e);
                self.ctx.notifier.show(Toast::destructive(
                    "Screen sharing error",
                    "Failed to start screen sharing. Please try again.",
                ));
            }
        }
        self.refresh_prompt();
    }

    fn watch_primary_track(&self, stream: &MediaStream) {
        let Some(track) = stream.primary_track().cloned() else {
            warn!("Stream {} has no tracks to watch", stream.id());
            return;
        };
        let id = stream.id();
        let inputs = self.inputs.clone();

        tokio::spawn(async move {
            let reason = track.ended().await;
            if let Some(tx) = inputs.upgrade() {
                let _ = tx.send(HostInput::TrackEnded { stream: id, reason });
            }
        });
    }

    async fn handle_peer_event(&mut self, envelope: PeerEnvelope) {
        if envelope.epoch != self.epoch || self.terminated {
            debug!("Ignoring event from stale peer epoch {}", envelope.epoch);
            return;
        }

        match envelope.event {
            PeerEvent::Open(id) => {
                if let Some(current) = &self.identity {
                    debug!("Peer already open as {}, ignoring {}", current, id);
                    return;
                }
                info!("Room ready: {}", id);
                self.identity = Some(id);
            }
            PeerEvent::Connection { connection, remote } => {
                if !self.viewers.insert(connection, remote.clone()) {
                    debug!("Duplicate connection event for {}", connection);
                    return;
                }
                info!(
                    "Viewer {} connected via {} (total viewers: {})",
                    remote,
                    connection,
                    self.viewers.len()
                );
                self.call_viewers().await;
                self.refresh_prompt();
            }
            PeerEvent::ConnectionClose { connection } => {
                let Some(entry) = self.viewers.remove(connection) else {
                    debug!("Close for unknown connection {}", connection);
                    return;
                };
                info!(
                    "Viewer {} disconnected (total viewers: {})",
                    entry.peer,
                    self.viewers.len()
                );
                if let Some(call) = self.calls.remove(&connection) {
                    if let Some(peer) = &self.peer {
                        peer.close_call(call).await;
                    }
                }
                self.refresh_prompt();
            }
            PeerEvent::Error(e) => {
                warn!("Signaling error on host peer: {}", e);
            }
            PeerEvent::ConnectionOpen { .. } | PeerEvent::Call { .. } | PeerEvent::Stream { .. } => {
                debug!("Host ignoring viewer-side event");
            }
        }
    }

    /// Places a call with the active stream to every viewer that has none yet.
    async fn call_viewers(&mut self) {
        let (Some(stream), Some(peer)) = (self.stream.clone(), self.peer.clone()) else {
            return;
        };

        let uncalled: Vec<(ConnectionId, PeerId)> = self
            .viewers
            .iter()
            .filter(|entry| !self.calls.contains_key(&entry.connection))
            .map(|entry| (entry.connection, entry.peer.clone()))
            .collect();

        for (connection, viewer) in uncalled {
            match peer.call(&viewer, stream.clone()).await {
                Ok(call) => {
                    info!("Calling viewer {} with stream {} ({})", viewer, stream.id(), call);
                    self.calls.insert(connection, call);
                }
                Err(e) => warn!("Failed to call viewer {}: {}", viewer, e),
            }
        }
    }

    /// Closes every call tied to the active stream and stops its tracks.
    async fn stop_capture(&mut self) {
        if let Some(peer) = &self.peer {
            for (_, call) in self.calls.drain() {
                peer.close_call(call).await;
            }
        } else {
            self.calls.clear();
        }

        if let Some(stream) = self.stream.take() {
            stream.stop_all();
            info!("Stopped all tracks of stream {}", stream.id());
        }
    }

    fn refresh_prompt(&mut self) {
        let wanted = !self.terminated
            && !self.viewers.is_empty()
            && self.stream.is_none()
            && !self.capture_pending;

        match (wanted, self.prompt) {
            (true, None) => {
                let toast = Toast::info("New viewer connected", "Click to start sharing your screen.")
                    .persistent()
                    .with_action(ToastAction::StartSharing);
                self.prompt = Some(self.ctx.notifier.show(toast));
            }
            (false, Some(_)) => self.dismiss_prompt(),
            _ => {}
        }
    }

    fn dismiss_prompt(&mut self) {
        if let Some(id) = self.prompt.take() {
            self.ctx.notifier.dismiss(id);
        }
    }

    async fn terminate(&mut self) {
        info!("Ending host session");
        self.release().await;
        self.viewers.clear();
        self.identity = None;

        self.ctx.notifier.show(Toast::info(
            "Session ended",
            "Your screen sharing session has been terminated.",
        ));
        self.ctx.navigator.navigate(HOME_PATH);
    }

    /// Stops capture, closes calls and destroys the peer. Safe to call twice.
    async fn release(&mut self) {
        self.stop_capture().await;
        self.dismiss_prompt();
        if let Some(peer) = self.peer.take() {
            peer.destroy().await;
            info!("Destroyed host peer");
        }
        self.terminated = true;
        self.viewers.clear();
        self.identity = None;
    }

    fn phase(&self) -> HostPhase {
        if self.terminated {
            HostPhase::Terminated
        } else if self.identity.is_none() {
            HostPhase::IdentityPending
        } else if self.stream.is_some() {
            HostPhase::Sharing
        } else if self.capture_pending {
            HostPhase::Capturing
        } else if !self.viewers.is_empty() {
            HostPhase::AwaitingCapture
        } else {
            HostPhase::Ready
        }
    }

    fn publish(&self) {
        self.state.send_replace(HostSnapshot {
            phase: self.phase(),
            identity: self.identity.clone(),
            viewers: self.viewers.iter().cloned().collect(),
            stream: self.stream.as_ref().map(|s| s.id()),
            live_tracks: self.stream.as_ref().map_or(0, |s| s.live_track_count()),
            calls: self.calls.len(),
            prompt_visible: self.prompt.is_some(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_set_size_tracks_connects_minus_disconnects() {
        let mut set = ViewerSet::new();
        assert!(set.insert(ConnectionId(1), PeerId::from("a")));
        assert!(set.insert(ConnectionId(2), PeerId::from("b")));
        assert!(set.insert(ConnectionId(3), PeerId::from("a")));
        assert_eq!(set.len(), 3);

        assert!(set.remove(ConnectionId(2)).is_some());
        assert_eq!(set.len(), 2);

        // duplicate close and unknown close are both no-ops
        assert!(set.remove(ConnectionId(2)).is_none());
        assert!(set.remove(ConnectionId(42)).is_none());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn viewer_set_ignores_duplicate_connection_events() {
        let mut set = ViewerSet::new();
        assert!(set.insert(ConnectionId(1), PeerId::from("a")));
        assert!(!set.insert(ConnectionId(1), PeerId::from("a")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn viewer_set_keeps_arrival_order() {
        let mut set = ViewerSet::new();
        set.insert(ConnectionId(5), PeerId::from("first"));
        set.insert(ConnectionId(2), PeerId::from("second"));
        set.insert(ConnectionId(9), PeerId::from("third"));
        set.remove(ConnectionId(2));

        let peers: Vec<_> = set.iter().map(|e| e.peer.as_str().to_string()).collect();
        assert_eq!(peers, vec!["first", "third"]);
    }

    #[test]
    fn random_connect_disconnect_sequences_never_go_negative() {
        // deterministic pseudo-random walk over a small connection space
        let mut set = ViewerSet::new();
        let mut opened = std::collections::HashSet::new();
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;

        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let connection = ConnectionId(seed % 16);
            if seed % 3 == 0 {
                set.remove(connection);
                opened.remove(&connection);
            } else {
                set.insert(connection, PeerId::from("viewer"));
                opened.insert(connection);
            }
            assert_eq!(set.len(), opened.len());
        }
    }
}
