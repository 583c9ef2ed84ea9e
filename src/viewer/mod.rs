//! # WatchShare Viewer Module
//!
//! The viewer session controller joins a room and renders whatever stream the
//! host sends. Like the host side it runs as a tokio task driven through a
//! [`ViewerHandle`].
//!
//! ```text
//!  Idle ──join──► Connecting ──connection open──► Waiting ──stream──► Streaming
//!   ▲                 │                              │                   │
//!   └─────────────────┴──── signaling error ─────────┴──── host left ────┘
//! ```
//!
//! Every failure lands back in `Idle` with the join control enabled again;
//! nothing is retried automatically.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::media::{MediaStream, StreamId};
use crate::share::room_from_url;
use crate::signaling::{
    ConnectionId, EventSink, PeerEndpoint, PeerEnvelope, PeerEvent, PeerId, Signaling,
    SignalingError,
};
use crate::surface::{Notifier, Toast, VideoSink};

/// Platform collaborators of a viewer session
#[derive(Clone)]
pub struct ViewerContext {
    pub signaling: Arc<dyn Signaling>,
    pub notifier: Arc<dyn Notifier>,
    pub video: Arc<dyn VideoSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerPhase {
    Idle,
    Connecting,
    /// Connected to the host, which has not started sharing yet
    Waiting,
    Streaming,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewerSnapshot {
    pub phase: ViewerPhase,
    pub room_input: String,
    pub identity: Option<PeerId>,
    pub stream: Option<StreamId>,
}

impl ViewerSnapshot {
    /// Whether the join button is clickable.
    pub fn join_enabled(&self) -> bool {
        self.phase == ViewerPhase::Idle && !self.room_input.trim().is_empty()
    }

    /// Whether the room input accepts edits.
    pub fn input_enabled(&self) -> bool {
        self.phase == ViewerPhase::Idle
    }
}

enum ViewerInput {
    SetRoom(String),
    Join,
    Unmount,
    PeerCreated {
        epoch: u64,
        result: Result<Arc<dyn PeerEndpoint>, SignalingError>,
    },
}

pub struct ViewerHandle {
    inputs: mpsc::UnboundedSender<ViewerInput>,
    state: watch::Receiver<ViewerSnapshot>,
    task: JoinHandle<()>,
}

impl ViewerHandle {
    pub fn set_room(&self, room: impl Into<String>) {
        let _ = self.inputs.send(ViewerInput::SetRoom(room.into()));
    }

    pub fn join(&self) {
        let _ = self.inputs.send(ViewerInput::Join);
    }

    pub fn snapshot(&self) -> ViewerSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewerSnapshot> {
        self.state.clone()
    }

    /// Waits until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&ViewerSnapshot) -> bool,
    ) -> Option<ViewerSnapshot> {
        let mut rx = self.state.clone();
        rx.wait_for(|snapshot| predicate(snapshot))
            .await
            .ok()
            .map(|snapshot| snapshot.clone())
    }

    pub async fn unmount(self) -> ViewerSnapshot {
        let _ = self.inputs.send(ViewerInput::Unmount);
        if let Err(e) = self.task.await {
            error!("Viewer session task failed: {}", e);
        }
        self.state.borrow().clone()
    }
}

pub struct ViewerController {
    ctx: ViewerContext,
    inputs: mpsc::WeakUnboundedSender<ViewerInput>,
    peer_tx: mpsc::UnboundedSender<PeerEnvelope>,
    state: watch::Sender<ViewerSnapshot>,
    phase: ViewerPhase,
    room_input: String,
    target: Option<PeerId>,
    epoch: u64,
    peer: Option<Arc<dyn PeerEndpoint>>,
    identity: Option<PeerId>,
    connection: Option<ConnectionId>,
    connect_started: bool,
    stream: Option<MediaStream>,
}

impl ViewerController {
    /// Mounts the join page. The `room` query parameter of `page`, when present,
    /// pre-fills the room input.
    pub fn spawn(ctx: ViewerContext, page: Option<&Url>) -> ViewerHandle {
        let room_input = page.and_then(room_from_url).unwrap_or_default();
        if !room_input.is_empty() {
            info!("Room pre-filled from URL: {}", room_input);
        }

        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ViewerSnapshot {
            phase: ViewerPhase::Idle,
            room_input: room_input.clone(),
            identity: None,
            stream: None,
        });

        let controller = ViewerController {
            ctx,
            inputs: inputs_tx.downgrade(),
            peer_tx,
            state: state_tx,
            phase: ViewerPhase::Idle,
            room_input,
            target: None,
            epoch: 0,
            peer: None,
            identity: None,
            connection: None,
            connect_started: false,
            stream: None,
        };
        let task = tokio::spawn(controller.run(inputs_rx, peer_rx));

        ViewerHandle {
            inputs: inputs_tx,
            state: state_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<ViewerInput>,
        mut peer_rx: mpsc::UnboundedReceiver<PeerEnvelope>,
    ) {
        loop {
            tokio::select! {
                input = inputs.recv() => {
                    match input {
                        Some(ViewerInput::Unmount) | None => break,
                        Some(input) => self.handle_input(input).await,
                    }
                }

                Some(envelope) = peer_rx.recv() => {
                    self.handle_peer_event(envelope).await;
                }
            }
            self.publish();
        }

        inputs.close();
        while let Ok(input) = inputs.try_recv() {
            if let ViewerInput::PeerCreated {
                result: Ok(peer), ..
            } = input
            {
                debug!("Destroying peer created during teardown");
                peer.destroy().await;
            }
        }

        self.release().await;
        self.phase = ViewerPhase::Idle;
        self.publish();
        info!("Viewer session unmounted");
    }

    async fn handle_input(&mut self, input: ViewerInput) {
        match input {
            ViewerInput::SetRoom(room) => {
                if self.phase != ViewerPhase::Idle {
                    debug!("Room input is disabled while {:?}", self.phase);
                    return;
                }
                self.room_input = room;
            }
            ViewerInput::Join => self.join(),
            ViewerInput::PeerCreated { epoch, result } => {
                self.on_peer_created(epoch, result).await
            }
            ViewerInput::Unmount => {}
        }
    }

    fn join(&mut self) {
        if self.phase != ViewerPhase::Idle {
            debug!("Ignoring join while {:?}", self.phase);
            return;
        }

        let room = self.room_input.trim();
        if room.is_empty() {
            self.ctx.notifier.show(Toast::destructive(
                "Room code required",
                "Please enter a valid room code.",
            ));
            return;
        }

        let target = PeerId::from(room);
        info!("Joining room {}", target);
        self.target = Some(target);
        self.phase = ViewerPhase::Connecting;
        self.epoch += 1;

        let epoch = self.epoch;
        let sink = EventSink::new(epoch, self.peer_tx.clone());
        let signaling = self.ctx.signaling.clone();
        let inputs = self.inputs.clone();

        tokio::spawn(async move {
            let result = signaling.create_peer(sink).await;
            let undelivered = match inputs.upgrade() {
                Some(tx) => tx
                    .send(ViewerInput::PeerCreated { epoch, result })
                    .err()
                    .map(|e| e.0),
                None => Some(ViewerInput::PeerCreated { epoch, result }),
            };
            if let Some(ViewerInput::PeerCreated {
                result: Ok(peer), ..
            }) = undelivered
            {
                debug!("Viewer session gone before its peer was created, destroying it");
                peer.destroy().await;
            }
        });
    }

    async fn on_peer_created(
        &mut self,
        epoch: u64,
        result: Result<Arc<dyn PeerEndpoint>, SignalingError>,
    ) {
        match result {
            Ok(peer) if epoch != self.epoch || self.phase == ViewerPhase::Idle => {
                debug!("Destroying peer from abandoned join attempt {}", epoch);
                peer.destroy().await;
            }
            Ok(peer) => {
                self.peer = Some(peer);
                self.connect_if_ready().await;
            }
            Err(e) if epoch == self.epoch => self.fail(e).await,
            Err(e) => debug!("Ignoring failure of abandoned join attempt {}: {}", epoch, e),
        }
    }

    /// Connects to the room once the peer both exists and has opened.
    async fn connect_if_ready(&mut self) {
        if self.connect_started || self.identity.is_none() {
            return;
        }
        let (Some(peer), Some(target)) = (self.peer.clone(), self.target.clone()) else {
            return;
        };

        self.connect_started = true;
        match peer.connect(&target).await {
            Ok(connection) => {
                debug!("Connection {} to room {} requested", connection, target);
                self.connection = Some(connection);
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn handle_peer_event(&mut self, envelope: PeerEnvelope) {
        if envelope.epoch != self.epoch || self.phase == ViewerPhase::Idle {
            debug!("Ignoring event from stale peer epoch {}", envelope.epoch);
            return;
        }

        match envelope.event {
            PeerEvent::Open(id) => {
                if self.identity.is_some() {
                    debug!("Duplicate open event for {}", id);
                    return;
                }
                info!("Viewer peer open as {}", id);
                self.identity = Some(id);
                self.connect_if_ready().await;
            }
            PeerEvent::ConnectionOpen { connection } => {
                if self.phase != ViewerPhase::Connecting {
                    debug!("Duplicate open for {}", connection);
                    return;
                }
                info!("Connected to room via {}", connection);
                self.connection = Some(connection);
                self.phase = ViewerPhase::Waiting;
                self.ctx.notifier.show(Toast::info(
                    "Connected!",
                    "Waiting for host to share their screen...",
                ));
            }
            PeerEvent::Call { call, remote } => {
                let Some(peer) = self.peer.clone() else {
                    warn!("Call {} from {} arrived before the peer was ready", call, remote);
                    return;
                };
                info!("Answering {} from {}", call, remote);
                if let Err(e) = peer.answer(call).await {
                    warn!("Failed to answer {}: {}", call, e);
                }
            }
            PeerEvent::Stream { call, stream } => {
                if self.stream.as_ref() == Some(&stream) {
                    debug!("Stream {} already attached", stream.id());
                    return;
                }
                info!("Receiving stream {} on {}", stream.id(), call);
                self.ctx.video.attach(&stream);
                self.stream = Some(stream);
                self.phase = ViewerPhase::Streaming;
            }
            PeerEvent::ConnectionClose { connection } => {
                if self.connection != Some(connection) {
                    debug!("Close for unrelated connection {}", connection);
                    return;
                }
                info!("Host closed the room");
                self.release().await;
                self.phase = ViewerPhase::Idle;
                self.ctx.notifier.show(Toast::info(
                    "Host left",
                    "The host has ended the session.",
                ));
            }
            PeerEvent::Error(e) => self.fail(e).await,
            PeerEvent::Connection { remote, .. } => {
                debug!("Viewer ignoring inbound connection from {}", remote);
            }
        }
    }

    async fn fail(&mut self, e: SignalingError) {
        error!("Connection failed: {}", e);
        self.release().await;
        self.phase = ViewerPhase::Idle;
        self.ctx.notifier.show(Toast::destructive(
            "Connection failed",
            "Could not connect to the room. Please try again.",
        ));
    }

    async fn release(&mut self) {
        if self.stream.take().is_some() {
            self.ctx.video.detach();
        }
        if let Some(peer) = self.peer.take() {
            peer.destroy().await;
            debug!("Destroyed viewer peer");
        }
        self.identity = None;
        self.connection = None;
        self.connect_started = false;
        self.target = None;
    }

    fn publish(&self) {
        self.state.send_replace(ViewerSnapshot {
            phase: self.phase,
            room_input: self.room_input.clone(),
            identity: self.identity.clone(),
            stream: self.stream.as_ref().map(|s| s.id()),
        });
    }
}
