//! Shared doubles and helpers for the integration tests.
//!
//! - [`RecordingSurface`] - records toasts, navigations and the video element
//! - [`TestPeer`] - a bare endpoint on the in-process broker, driven by hand
//! - [`GatedCapture`] - capture that completes only when the test opens the gate
//! - [`GatedSignaling`] - peer creation that completes only when the test opens the gate

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tracing::Level;

use watchshare::host::{HostContext, HostController, HostHandle};
use watchshare::media::{
    CaptureConstraints, CaptureError, CaptureProvider, MediaStream, StreamId, SyntheticCapture,
};
use watchshare::signaling::memory::MemorySignaling;
use watchshare::signaling::{
    CallId, ConnectionId, EventSink, PeerEndpoint, PeerEnvelope, PeerEvent, PeerId, Signaling,
    SignalingError,
};
use watchshare::surface::{
    Clipboard, ClipboardError, Navigator, Notifier, Toast, ToastDuration, ToastId, VideoSink,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Initialize tracing for tests (call once per test).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Awaits `fut`, failing the test if it takes longer than [`WAIT`].
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Polls `condition` until it holds, failing the test after [`WAIT`].
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    within(what, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

#[derive(Debug, Clone)]
pub struct ShownToast {
    pub id: ToastId,
    pub toast: Toast,
    pub dismissed: bool,
}

#[derive(Default)]
struct SurfaceLog {
    toasts: Vec<ShownToast>,
    navigations: Vec<String>,
    attached: Vec<StreamId>,
    detached: usize,
    copied: Vec<String>,
}

/// Records every interaction a controller has with its page.
#[derive(Default)]
pub struct RecordingSurface {
    log: Mutex<SurfaceLog>,
    reject_clipboard: bool,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting_clipboard() -> Arc<Self> {
        Arc::new(Self {
            reject_clipboard: true,
            ..Self::default()
        })
    }

    pub fn toasts(&self) -> Vec<ShownToast> {
        self.log.lock().unwrap().toasts.clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.toasts().into_iter().map(|t| t.toast.title).collect()
    }

    pub fn has_toast(&self, title: &str) -> bool {
        self.toasts().iter().any(|t| t.toast.title == title)
    }

    pub fn count_toasts(&self, title: &str) -> usize {
        self.toasts().iter().filter(|t| t.toast.title == title).count()
    }

    /// Persistent toasts still on screen.
    pub fn visible_persistent(&self) -> Vec<Toast> {
        self.toasts()
            .into_iter()
            .filter(|t| !t.dismissed && t.toast.duration == ToastDuration::Persistent)
            .map(|t| t.toast)
            .collect()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.log.lock().unwrap().navigations.clone()
    }

    pub fn attached(&self) -> Vec<StreamId> {
        self.log.lock().unwrap().attached.clone()
    }

    pub fn detached(&self) -> usize {
        self.log.lock().unwrap().detached
    }

    pub fn copied(&self) -> Vec<String> {
        self.log.lock().unwrap().copied.clone()
    }
}

impl Notifier for RecordingSurface {
    fn show(&self, toast: Toast) -> ToastId {
        let mut log = self.log.lock().unwrap();
        let id = ToastId(log.toasts.len() as u64 + 1);
        log.toasts.push(ShownToast {
            id,
            toast,
            dismissed: false,
        });
        id
    }

    fn dismiss(&self, id: ToastId) {
        let mut log = self.log.lock().unwrap();
        if let Some(shown) = log.toasts.iter_mut().find(|t| t.id == id) {
            shown.dismissed = true;
        }
    }
}

impl Navigator for RecordingSurface {
    fn navigate(&self, path: &str) {
        self.log.lock().unwrap().navigations.push(path.to_string());
    }
}

impl VideoSink for RecordingSurface {
    fn attach(&self, stream: &MediaStream) {
        self.log.lock().unwrap().attached.push(stream.id());
    }

    fn detach(&self) {
        self.log.lock().unwrap().detached += 1;
    }
}

impl Clipboard for RecordingSurface {
    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        if self.reject_clipboard {
            return Err(ClipboardError::Denied);
        }
        self.log.lock().unwrap().copied.push(text.to_string());
        Ok(())
    }
}

/// Capture that blocks until [`GatedCapture::open`] is called.
#[derive(Default)]
pub struct GatedCapture {
    gate: Notify,
    inner: SyntheticCapture,
}

impl GatedCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        self.gate.notify_one();
    }

    pub fn issued(&self) -> Vec<MediaStream> {
        self.inner.issued()
    }
}

#[async_trait]
impl CaptureProvider for GatedCapture {
    async fn request_capture(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<MediaStream, CaptureError> {
        self.gate.notified().await;
        self.inner.request_capture(constraints).await
    }
}

/// Broker whose `create_peer` blocks until [`GatedSignaling::open`] is called.
pub struct GatedSignaling {
    gate: Notify,
    inner: MemorySignaling,
}

impl GatedSignaling {
    pub fn new(inner: MemorySignaling) -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            inner,
        })
    }

    pub fn open(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Signaling for GatedSignaling {
    async fn create_peer(
        &self,
        events: EventSink,
    ) -> Result<Arc<dyn PeerEndpoint>, SignalingError> {
        self.gate.notified().await;
        self.inner.create_peer(events).await
    }
}

/// A bare endpoint on the broker, standing in for the other side of a session.
pub struct TestPeer {
    pub id: PeerId,
    pub endpoint: Arc<dyn PeerEndpoint>,
    events: mpsc::UnboundedReceiver<PeerEnvelope>,
}

impl TestPeer {
    pub async fn register(signaling: &MemorySignaling) -> Self {
        let (tx, mut events) = mpsc::unbounded_channel();
        let endpoint = signaling
            .create_peer(EventSink::new(1, tx))
            .await
            .expect("test peer registration failed");
        let id = match within("test peer open", events.recv()).await.map(|e| e.event) {
            Some(PeerEvent::Open(id)) => id,
            other => panic!("expected Open, got {other:?}"),
        };
        Self {
            id,
            endpoint,
            events,
        }
    }

    pub async fn next_event(&mut self) -> PeerEvent {
        within("test peer event", self.events.recv())
            .await
            .expect("test peer event channel closed")
            .event
    }

    /// Connects to `target` and waits until the connection is open.
    pub async fn join(&mut self, target: &PeerId) -> ConnectionId {
        let connection = self
            .endpoint
            .connect(target)
            .await
            .expect("test peer connect failed");
        loop {
            if let PeerEvent::ConnectionOpen { connection: c } = self.next_event().await {
                if c == connection {
                    return connection;
                }
            }
        }
    }

    /// Skips events until an inbound call arrives.
    pub async fn next_call(&mut self) -> (CallId, PeerId) {
        loop {
            if let PeerEvent::Call { call, remote } = self.next_event().await {
                return (call, remote);
            }
        }
    }

    /// Skips events until an inbound connection arrives.
    pub async fn next_connection(&mut self) -> (ConnectionId, PeerId) {
        loop {
            if let PeerEvent::Connection { connection, remote } = self.next_event().await {
                return (connection, remote);
            }
        }
    }

    /// Skips events until a connection closes.
    pub async fn next_close(&mut self) -> ConnectionId {
        loop {
            if let PeerEvent::ConnectionClose { connection } = self.next_event().await {
                return connection;
            }
        }
    }
}

pub struct HostFixture {
    pub host: HostHandle,
    pub signaling: MemorySignaling,
    pub surface: Arc<RecordingSurface>,
}

/// Mounts a host session over a fresh broker.
pub fn spawn_host(capture: Arc<dyn CaptureProvider>) -> HostFixture {
    spawn_host_on(MemorySignaling::new(), capture)
}

pub fn spawn_host_on(signaling: MemorySignaling, capture: Arc<dyn CaptureProvider>) -> HostFixture {
    let surface = RecordingSurface::new();
    let host = HostController::spawn(HostContext {
        signaling: Arc::new(signaling.clone()),
        capture,
        notifier: surface.clone(),
        navigator: surface.clone(),
    });
    HostFixture {
        host,
        signaling,
        surface,
    }
}

/// Waits for the host identity to be published.
pub async fn host_identity(host: &HostHandle) -> PeerId {
    within("host identity", host.wait_for(|s| s.identity.is_some()))
        .await
        .and_then(|s| s.identity)
        .expect("host stopped before publishing an identity")
}
