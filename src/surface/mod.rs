//! # WatchShare Surface Module
//!
//! Everything the controllers need from the page they are mounted in: toast
//! notifications, the clipboard, navigation and the video element. Each concern
//! is a small trait so a controller can run against a browser binding, the
//! tracing-backed [`LogSurface`] used by the demo, or a test double.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::media::MediaStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ToastId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastVariant {
    Default,
    Destructive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastDuration {
    /// Dismissed automatically after the renderer's default delay
    Transient,
    /// Stays until dismissed by code or by the user
    Persistent,
}

/// Action button attached to a toast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastAction {
    StartSharing,
}

impl ToastAction {
    pub fn label(&self) -> &'static str {
        match self {
            ToastAction::StartSharing => "Start Sharing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub variant: ToastVariant,
    pub duration: ToastDuration,
    pub action: Option<ToastAction>,
}

impl Toast {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: ToastVariant::Default,
            duration: ToastDuration::Transient,
            action: None,
        }
    }

    pub fn destructive(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            variant: ToastVariant::Destructive,
            ..Self::info(title, description)
        }
    }

    pub fn persistent(mut self) -> Self {
        self.duration = ToastDuration::Persistent;
        self
    }

    pub fn with_action(mut self, action: ToastAction) -> Self {
        self.action = Some(action);
        self
    }
}

pub trait Notifier: Send + Sync {
    fn show(&self, toast: Toast) -> ToastId;
    fn dismiss(&self, id: ToastId);
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClipboardError {
    #[error("clipboard access denied")]
    Denied,
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
}

pub trait Clipboard: Send + Sync {
    fn write_text(&self, text: &str) -> Result<(), ClipboardError>;
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// The element rendering a received stream
pub trait VideoSink: Send + Sync {
    fn attach(&self, stream: &MediaStream);
    fn detach(&self);
}

/// Surface that reports every interaction through `tracing`
///
/// Backs the demo command. The clipboard keeps the last written text so it can
/// be read back.
#[derive(Default)]
pub struct LogSurface {
    next_toast: AtomicU64,
    clipboard: Mutex<Option<String>>,
}

impl LogSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clipboard_text(&self) -> Option<String> {
        self.clipboard
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().cloned())
    }
}

impl Notifier for LogSurface {
    fn show(&self, toast: Toast) -> ToastId {
        let id = ToastId(self.next_toast.fetch_add(1, Ordering::Relaxed) + 1);
        match toast.variant {
            ToastVariant::Default => info!(
                "[toast {}] {}: {}{}",
                id.0,
                toast.title,
                toast.description,
                toast
                    .action
                    .map(|a| format!(" [{}]", a.label()))
                    .unwrap_or_default()
            ),
            ToastVariant::Destructive => {
                warn!("[toast {}] {}: {}", id.0, toast.title, toast.description)
            }
        }
        id
    }

    fn dismiss(&self, id: ToastId) {
        info!("[toast {}] dismissed", id.0);
    }
}

impl Clipboard for LogSurface {
    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        let mut guard = self
            .clipboard
            .lock()
            .map_err(|_| ClipboardError::Unavailable("clipboard lock poisoned".to_string()))?;
        *guard = Some(text.to_string());
        info!("Copied to clipboard: {}", text);
        Ok(())
    }
}

impl Navigator for LogSurface {
    fn navigate(&self, path: &str) {
        info!("Navigating to {}", path);
    }
}

impl VideoSink for LogSurface {
    fn attach(&self, stream: &MediaStream) {
        info!(
            "Rendering stream {} ({} live tracks)",
            stream.id(),
            stream.live_track_count()
        );
    }

    fn detach(&self) {
        info!("Video element cleared");
    }
}
