//! # WatchShare Signaling Module
//!
//! The seam between the session controllers and the peer-connection library.
//! The library owns NAT traversal, SDP negotiation and the media transport; the
//! controllers only ever see identities, connections, calls and the events
//! described by [`PeerEvent`].
//!
//! ## Event delivery
//!
//! Libraries of this kind report progress through callbacks. Here every
//! callback becomes a [`PeerEvent`] pushed into an [`EventSink`] handed over at
//! [`Signaling::create_peer`]. The sink tags each event with the epoch of the
//! peer it was created for, which lets a controller drop events from a peer it
//! has already destroyed, and sending into a torn-down controller is a no-op.
//!
//! ```text
//! ┌──────────────┐  create_peer(sink)  ┌──────────────┐
//! │  Controller  │────────────────────►│  Signaling   │
//! │  event loop  │◄────────────────────│  (library)   │
//! └──────────────┘  PeerEnvelope{epoch,│              │
//!                        event}        └──────────────┘
//! ```

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::MediaStream;

/// Opaque identity assigned to a peer endpoint by the signaling layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalingError {
    #[error("signaling server unavailable: {0}")]
    ServerUnavailable(String),
    #[error("peer {0} is unavailable")]
    PeerUnavailable(PeerId),
    #[error("peer endpoint has been destroyed")]
    Destroyed,
    #[error("unknown call {0}")]
    UnknownCall(CallId),
    #[error("network error: {0}")]
    Network(String),
}

/// Callback surface of a peer endpoint
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The endpoint is registered and reachable under this identity
    Open(PeerId),
    /// A remote peer opened a connection to us
    Connection {
        connection: ConnectionId,
        remote: PeerId,
    },
    /// A connection we opened is ready
    ConnectionOpen { connection: ConnectionId },
    /// Either side closed the connection
    ConnectionClose { connection: ConnectionId },
    /// A remote peer is calling us with media
    Call { call: CallId, remote: PeerId },
    /// Remote media for an answered call
    Stream { call: CallId, stream: MediaStream },
    Error(SignalingError),
}

/// A [`PeerEvent`] tagged with the epoch of the peer that produced it
#[derive(Debug, Clone)]
pub struct PeerEnvelope {
    pub epoch: u64,
    pub event: PeerEvent,
}

/// Where a peer endpoint delivers its events
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<PeerEnvelope>,
}

impl EventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<PeerEnvelope>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Delivers an event. Returns `false` when the receiving controller is gone.
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx
            .send(PeerEnvelope {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// Factory for peer endpoints
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Creates a new endpoint. Its identity arrives later as [`PeerEvent::Open`].
    async fn create_peer(&self, events: EventSink)
    -> Result<Arc<dyn PeerEndpoint>, SignalingError>;
}

/// One endpoint created by [`Signaling::create_peer`]
#[async_trait]
pub trait PeerEndpoint: Send + Sync {
    /// Opens a connection; readiness is reported by [`PeerEvent::ConnectionOpen`].
    async fn connect(&self, target: &PeerId) -> Result<ConnectionId, SignalingError>;

    /// Places a media call carrying `stream` to `target`.
    async fn call(&self, target: &PeerId, stream: MediaStream) -> Result<CallId, SignalingError>;

    /// Accepts an inbound call without sending media back.
    async fn answer(&self, call: CallId) -> Result<(), SignalingError>;

    async fn close_call(&self, call: CallId);

    /// Tears the endpoint down and closes every connection it holds.
    async fn destroy(&self);
}
