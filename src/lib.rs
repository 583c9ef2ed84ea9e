//! # WatchShare - Screen Sharing Library
//!
//! WatchShare lets a host share their screen with anyone holding a room code or
//! link. A host opens a room, viewers join it, and once the host agrees to
//! capture, the screen is streamed peer-to-peer to every viewer. Connection
//! setup, NAT traversal and media transport belong to the peer-connection
//! library behind the [`signaling`] seam; this crate owns the session logic
//! around it.
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve the pages
//! watchshare web --host 0.0.0.0 --port 8386 --public-url https://watch.example.com
//!
//! # Walk through a full session in process
//! watchshare demo
//! ```
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use watchshare::host::{HostContext, HostController, HostPhase};
//! use watchshare::media::SyntheticCapture;
//! use watchshare::signaling::memory::MemorySignaling;
//! use watchshare::surface::LogSurface;
//!
//! # async fn example() {
//! let surface = Arc::new(LogSurface::new());
//! let host = HostController::spawn(HostContext {
//!     signaling: Arc::new(MemorySignaling::new()),
//!     capture: Arc::new(SyntheticCapture::new()),
//!     notifier: surface.clone(),
//!     navigator: surface,
//! });
//!
//! let ready = host.wait_for(|s| s.identity.is_some()).await;
//! println!("Room: {:?}", ready.and_then(|s| s.identity));
//!
//! // once a viewer has connected and the user accepted the prompt
//! host.start_capture();
//! host.wait_for(|s| s.phase == HostPhase::Sharing).await;
//! host.end_session();
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **[Host](host)**: owns the room identity, the viewer set and the outbound capture
//! - **[Viewer](viewer)**: joins a room and renders the host's stream
//! - **[Share](share)**: room code and deep link with clipboard actions
//! - **[Signaling](signaling)**: peer-connection seam, plus an in-process implementation
//! - **[Media](media)**: stream and track handles, capture seam
//! - **[Surface](surface)**: toasts, clipboard, navigation and video sink
//! - **[Web](web)**: serves the landing, host and join pages

pub mod demo;
pub mod host;
pub mod media;
pub mod share;
pub mod signaling;
pub mod surface;
pub mod viewer;
pub mod web;
