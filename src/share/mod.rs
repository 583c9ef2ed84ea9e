//! # WatchShare Share Module
//!
//! Presents a host's identity as a room code and as a deep link viewers can
//! open directly. The link is always derived from the page origin and the
//! current identity:
//!
//! ```text
//! <origin>/join-room?room=<identity>
//! ```
//!
//! While the identity has not been assigned yet both copy actions are disabled
//! and placeholder labels are shown instead.

use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::surface::{Clipboard, ClipboardError, Notifier, Toast};

/// Path of the viewer page that deep links point to
pub const JOIN_PATH: &str = "/join-room";
/// Query parameter carrying the room identity
pub const ROOM_PARAM: &str = "room";

const ROOM_PLACEHOLDER: &str = "Creating room ID...";
const LINK_PLACEHOLDER: &str = "Generating URL...";

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("room identity has not been assigned yet")]
    MissingIdentity,
    #[error("origin cannot be used as a base for links: {0}")]
    InvalidOrigin(#[from] url::ParseError),
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
}

/// Builds the deep link for `identity` on `origin`.
///
/// Path and query of `origin` are discarded; the identity is query-encoded so
/// the link parses back to exactly one `room` parameter equal to it.
pub fn deep_link(origin: &Url, identity: &str) -> Result<Url, ShareError> {
    if identity.is_empty() {
        return Err(ShareError::MissingIdentity);
    }
    let mut link = origin.join(JOIN_PATH)?;
    link.set_query(None);
    link.set_fragment(None);
    link.query_pairs_mut().append_pair(ROOM_PARAM, identity);
    Ok(link)
}

/// Extracts the room identity from a page URL, ignoring empty values.
pub fn room_from_url(page: &Url) -> Option<String> {
    page.query_pairs()
        .find(|(key, _)| key == ROOM_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.trim().is_empty())
}

/// Serializable view of the share widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareView {
    pub room_label: String,
    pub link_label: String,
    pub link: Option<String>,
    pub can_copy: bool,
}

/// Share widget over one identity
pub struct ShareSurface<'a> {
    origin: &'a Url,
    identity: &'a str,
}

impl<'a> ShareSurface<'a> {
    /// `identity` may be empty while the signaling layer has not opened the peer.
    pub fn new(origin: &'a Url, identity: &'a str) -> Self {
        Self { origin, identity }
    }

    pub fn can_copy(&self) -> bool {
        !self.identity.is_empty()
    }

    pub fn room_label(&self) -> &str {
        if self.identity.is_empty() {
            ROOM_PLACEHOLDER
        } else {
            self.identity
        }
    }

    pub fn deep_link(&self) -> Option<Url> {
        deep_link(self.origin, self.identity).ok()
    }

    pub fn link_label(&self) -> String {
        self.deep_link()
            .map(String::from)
            .unwrap_or_else(|| LINK_PLACEHOLDER.to_string())
    }

    pub fn view(&self) -> ShareView {
        let link = self.deep_link().map(String::from);
        ShareView {
            room_label: self.room_label().to_string(),
            link_label: link.clone().unwrap_or_else(|| LINK_PLACEHOLDER.to_string()),
            link,
            can_copy: self.can_copy(),
        }
    }

    pub fn copy_room_id(
        &self,
        clipboard: &dyn Clipboard,
        notifier: &dyn Notifier,
    ) -> Result<(), ShareError> {
        if !self.can_copy() {
            return Err(ShareError::MissingIdentity);
        }
        self.copy(
            clipboard,
            notifier,
            self.identity,
            Toast::info(
                "Room code copied!",
                "Use this code to let others join your room.",
            ),
        )
    }

    pub fn copy_link(
        &self,
        clipboard: &dyn Clipboard,
        notifier: &dyn Notifier,
    ) -> Result<(), ShareError> {
        let link = deep_link(self.origin, self.identity)?;
        self.copy(
            clipboard,
            notifier,
            link.as_str(),
            Toast::info(
                "Shareable link copied!",
                "Use this link to allow others to directly join your room.",
            ),
        )
    }

    fn copy(
        &self,
        clipboard: &dyn Clipboard,
        notifier: &dyn Notifier,
        text: &str,
        confirmation: Toast,
    ) -> Result<(), ShareError> {
        if let Err(e) = clipboard.write_text(text) {
            warn!("Clipboard write rejected: {}", e);
            notifier.show(Toast::destructive(
                "Copy failed",
                "Your browser blocked clipboard access.",
            ));
            return Err(e.into());
        }
        notifier.show(confirmation);
        Ok(())
    }
}
