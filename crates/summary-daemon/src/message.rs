//! Presence hub wire frames.
//!
//! Every frame is a JSON text message. Control frames manage channel
//! membership; everything else is a `PresenceEnvelope`.

use serde::{Deserialize, Serialize};
use summary_core::PresenceEnvelope;

/// Maximum frame size (1 MiB). Typing deltas are tiny; anything larger is
/// dropped rather than buffered.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Channel membership request sent to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// "subscribe" or "unsubscribe"
    #[serde(rename = "type")]
    pub msg_type: String,

    pub channel: String,
}

impl ControlMessage {
    pub fn subscribe(channel: &str) -> Self {
        Self {
            msg_type: "subscribe".to_string(),
            channel: channel.to_string(),
        }
    }

    pub fn unsubscribe(channel: &str) -> Self {
        Self {
            msg_type: "unsubscribe".to_string(),
            channel: channel.to_string(),
        }
    }

    pub fn to_text(&self) -> String {
        // Two string fields cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Try to parse a control frame.
    ///
    /// Returns None for anything that is not a subscribe/unsubscribe frame.
    pub fn from_text(text: &str) -> Option<Self> {
        let msg: Self = serde_json::from_str(text).ok()?;
        if msg.msg_type == "subscribe" || msg.msg_type == "unsubscribe" {
            Some(msg)
        } else {
            None
        }
    }
}

/// Parse an incoming frame into an envelope, if it is one.
pub fn parse_envelope(text: &str) -> Option<PresenceEnvelope> {
    if text.len() > MAX_MESSAGE_SIZE {
        return None;
    }
    PresenceEnvelope::from_json(text).ok()
}
