//! In-process signaling.
//!
//! [`MemorySignaling`] brokers identities, connections and calls between peer
//! endpoints living in the same process. Media is handed over by cloning the
//! [`MediaStream`] handle, so a viewer observes the exact tracks the host
//! captured. Nothing here touches the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    CallId, ConnectionId, EventSink, PeerEndpoint, PeerEvent, PeerId, Signaling, SignalingError,
};
use crate::media::MediaStream;

/// Concurrent registry of live endpoints
type PeerMap = Arc<DashMap<PeerId, EventSink>>;

#[derive(Debug, Clone)]
struct Link {
    /// Side that called `connect`
    initiator: PeerId,
    /// Side that received the connection
    acceptor: PeerId,
}

#[derive(Debug, Clone)]
struct PendingCall {
    caller: PeerId,
    callee: PeerId,
    stream: MediaStream,
}

#[derive(Default)]
struct Broker {
    peers: PeerMap,
    links: DashMap<ConnectionId, Link>,
    calls: DashMap<CallId, PendingCall>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

impl Broker {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn emit_to(&self, peer: &PeerId, event: PeerEvent) {
        let Some(sink) = self.peers.get(peer).map(|entry| entry.value().clone()) else {
            debug!("Dropping event for departed peer {}", peer);
            return;
        };
        if !sink.emit(event) {
            debug!("Controller for peer {} is gone", peer);
        }
    }
}

/// Loopback signaling layer shared by every endpoint it creates
#[derive(Clone, Default)]
pub struct MemorySignaling {
    broker: Arc<Broker>,
}

impl MemorySignaling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `create_peer` calls fail as if the signaling server were down.
    pub fn set_offline(&self, offline: bool) {
        self.broker.offline.store(offline, Ordering::Relaxed);
    }

    pub fn peer_count(&self) -> usize {
        self.broker.peers.len()
    }

    pub fn open_connection_count(&self) -> usize {
        self.broker.links.len()
    }

    pub fn active_call_count(&self) -> usize {
        self.broker.calls.len()
    }

    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.broker.peers.contains_key(peer)
    }
}

#[async_trait]
impl Signaling for MemorySignaling {
    async fn create_peer(
        &self,
        events: EventSink,
    ) -> Result<Arc<dyn PeerEndpoint>, SignalingError> {
        if self.broker.offline.load(Ordering::Relaxed) {
            return Err(SignalingError::ServerUnavailable(
                "in-process broker is offline".to_string(),
            ));
        }

        let id = PeerId::new(Uuid::new_v4().to_string());
        self.broker.peers.insert(id.clone(), events.clone());

        info!(
            "Registered peer {} (total peers: {})",
            id,
            self.broker.peers.len()
        );
        events.emit(PeerEvent::Open(id.clone()));

        Ok(Arc::new(MemoryPeer {
            id,
            broker: self.broker.clone(),
            destroyed: AtomicBool::new(false),
        }))
    }
}

struct MemoryPeer {
    id: PeerId,
    broker: Arc<Broker>,
    destroyed: AtomicBool,
}

impl MemoryPeer {
    fn ensure_alive(&self) -> Result<(), SignalingError> {
        if self.destroyed.load(Ordering::Relaxed) {
            Err(SignalingError::Destroyed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerEndpoint for MemoryPeer {
    async fn connect(&self, target: &PeerId) -> Result<ConnectionId, SignalingError> {
        self.ensure_alive()?;
        if !self.broker.peers.contains_key(target) {
            warn!("Peer {} tried to connect to unknown peer {}", self.id, target);
            return Err(SignalingError::PeerUnavailable(target.clone()));
        }

        let connection = ConnectionId(self.broker.next_id());
        self.broker.links.insert(
            connection,
            Link {
                initiator: self.id.clone(),
                acceptor: target.clone(),
            },
        );

        info!("Connection {} opened: {} -> {}", connection, self.id, target);
        self.broker.emit_to(
            target,
            PeerEvent::Connection {
                connection,
                remote: self.id.clone(),
            },
        );
        self.broker
            .emit_to(&self.id, PeerEvent::ConnectionOpen { connection });

        Ok(connection)
    }

    async fn call(&self, target: &PeerId, stream: MediaStream) -> Result<CallId, SignalingError> {
        self.ensure_alive()?;
        if !self.broker.peers.contains_key(target) {
            return Err(SignalingError::PeerUnavailable(target.clone()));
        }

        let call = CallId(self.broker.next_id());
        debug!(
            "Peer {} calling {} with stream {} ({})",
            self.id,
            target,
            stream.id(),
            call
        );
        self.broker.calls.insert(
            call,
            PendingCall {
                caller: self.id.clone(),
                callee: target.clone(),
                stream,
            },
        );
        self.broker.emit_to(
            target,
            PeerEvent::Call {
                call,
                remote: self.id.clone(),
            },
        );

        Ok(call)
    }

    async fn answer(&self, call: CallId) -> Result<(), SignalingError> {
        self.ensure_alive()?;
        let pending = self
            .broker
            .calls
            .get(&call)
            .map(|entry| entry.value().clone())
            .ok_or(SignalingError::UnknownCall(call))?;

        if pending.callee != self.id {
            return Err(SignalingError::UnknownCall(call));
        }

        debug!("Peer {} answered {} from {}", self.id, call, pending.caller);
        self.broker.emit_to(
            &self.id,
            PeerEvent::Stream {
                call,
                stream: pending.stream,
            },
        );
        Ok(())
    }

    async fn close_call(&self, call: CallId) {
        if self.broker.calls.remove(&call).is_some() {
            debug!("Peer {} closed {}", self.id, call);
        }
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::Relaxed) {
            return;
        }

        self.broker.peers.remove(&self.id);
        self.broker
            .calls
            .retain(|_, pending| pending.caller != self.id && pending.callee != self.id);

        let closed: Vec<(ConnectionId, Link)> = self
            .broker
            .links
            .iter()
            .filter(|entry| entry.initiator == self.id || entry.acceptor == self.id)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (connection, link) in closed {
            self.broker.links.remove(&connection);
            let other = if link.initiator == self.id {
                link.acceptor
            } else {
                link.initiator
            };
            self.broker
                .emit_to(&other, PeerEvent::ConnectionClose { connection });
        }

        info!(
            "Destroyed peer {} (remaining peers: {})",
            self.id,
            self.broker.peers.len()
        );
    }
}
