//! Popup window collaborators
//!
//! The client never touches a window system: popup flows go through a
//! host-provided [`PopupDriver`], and callbacks that land inside a popup
//! hand their parameters back through an [`OpenerRelay`]. The message
//! protocol between the two is [`PopupMessage`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;

/// Default popup width in pixels.
pub const DEFAULT_POPUP_WIDTH: u32 = 500;

/// Default popup height in pixels.
pub const DEFAULT_POPUP_HEIGHT: u32 = 600;

/// Requested popup window dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupGeometry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Default for PopupGeometry {
    fn default() -> Self {
        Self { width: DEFAULT_POPUP_WIDTH, height: DEFAULT_POPUP_HEIGHT }
    }
}

/// Message relayed from the popup's callback page to the opener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PopupMessage {
    /// The authorization succeeded inside the popup.
    #[serde(rename = "NYLAS_CONNECT_SUCCESS")]
    Success {
        /// Authorization code from the callback.
        code: String,
        /// Echoed CSRF state.
        state: String,
    },
    /// The authorization failed inside the popup.
    #[serde(rename = "NYLAS_CONNECT_ERROR")]
    Error {
        /// OAuth error code.
        error: String,
        /// Server-provided detail, when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_description: Option<String>,
    },
}

/// Host-provided popup window driver.
///
/// `open` shows the window; `recv` resolves with the first relayed message
/// or fails with a popup error when the window closes first. The client
/// wraps `recv` in its own five-minute timeout and always calls `close`
/// afterwards, so drivers need not time out on their own.
#[async_trait]
pub trait PopupDriver: Send + Sync {
    /// Open a popup at `url` with the requested geometry.
    ///
    /// # Errors
    /// Returns a popup error when the window cannot be opened (e.g. the
    /// host blocks popups).
    async fn open(&self, url: &str, geometry: PopupGeometry) -> Result<(), ConnectError>;

    /// Wait for the popup's relayed message.
    ///
    /// # Errors
    /// Returns a popup error mentioning "closed" when the window was
    /// closed before a message arrived, so the client can classify the
    /// failure as a cancellation.
    async fn recv(&self) -> Result<PopupMessage, ConnectError>;

    /// Close the popup window. Idempotent.
    fn close(&self);
}

/// Host-provided relay from a popup callback page to its opener.
pub trait OpenerRelay: Send + Sync {
    /// Deliver a message to the opener window, restricted to
    /// `target_origin`.
    fn post(&self, message: &PopupMessage, target_origin: &str);

    /// Close the popup window the callback page is running in.
    fn close_window(&self);
}
