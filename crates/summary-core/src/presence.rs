//! Presence channel: ephemeral pub/sub for typing and save notices.
//!
//! Nothing sent here is authoritative. Document state only changes through
//! the checksum-guarded store path; presence is how peers hear about it
//! sooner.
//!
//! Implementations:
//! - `LoopbackHub` / `LoopbackPresence` - In-process hub for tests
//! - `WsPresence` (in summary-daemon) - WebSocket client

use crate::delta::Delta;
use crate::store::CaseId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("Presence unavailable: {0}")]
    Unavailable(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PresenceError>;

/// Channel carrying notices for one case summary.
pub fn channel_name(case_id: CaseId) -> String {
    format!("doc-{}", case_id)
}

/// Payload of a presence notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceMessage {
    /// A peer opened the summary
    Join,
    /// A peer closed the summary
    Leave,
    /// Raw editor delta, used to show who is typing
    Change { delta: Delta },
    /// Administrative request to empty every open editor
    ClearBuffer,
    /// The sender saved; peers should refetch
    Save,
}

impl PresenceMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PresenceMessage::Join => "join",
            PresenceMessage::Leave => "leave",
            PresenceMessage::Change { .. } => "change",
            PresenceMessage::ClearBuffer => "clear_buffer",
            PresenceMessage::Save => "save",
        }
    }
}

/// A notice addressed to a channel.
///
/// Sent as one JSON object: `{"channel", "sender", "actor", "type", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEnvelope {
    pub channel: String,
    /// Session id of the publishing client
    pub sender: String,
    /// Display name of the user behind the session
    pub actor: String,
    #[serde(flatten)]
    pub message: PresenceMessage,
}

impl PresenceEnvelope {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Event delivered on a transport's inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Message(PresenceEnvelope),
    /// The transport lost its connection; no more messages will arrive
    Closed,
}

/// Publish/subscribe transport for presence notices.
///
/// Incoming envelopes are pushed to the `mpsc` sender handed to the
/// transport when it was created, so the owner can `select!` on them.
#[async_trait]
pub trait PresenceTransport: Send + Sync {
    /// Start receiving envelopes published on `channel`.
    async fn join(&self, channel: &str) -> Result<()>;

    /// Stop receiving envelopes from `channel`.
    async fn leave(&self, channel: &str) -> Result<()>;

    /// Publish to every other subscriber of `envelope.channel`.
    async fn publish(&self, envelope: &PresenceEnvelope) -> Result<()>;
}

struct Member {
    id: usize,
    channels: HashSet<String>,
    tx: mpsc::UnboundedSender<PresenceEvent>,
}

#[derive(Default)]
struct HubState {
    members: Vec<Member>,
    next_id: usize,
}

/// In-process presence hub for testing.
///
/// Relays each published envelope to every other member joined on the
/// channel, like a socket server broadcasting to a room.
#[derive(Clone)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
    available: Arc<AtomicBool>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Connect a new member, returning its transport and inbound queue.
    pub fn connect(&self) -> (LoopbackPresence, mpsc::UnboundedReceiver<PresenceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.next_id;
        state.next_id += 1;
        state.members.push(Member {
            id,
            channels: HashSet::new(),
            tx,
        });

        let presence = LoopbackPresence {
            hub: self.clone(),
            id,
        };
        (presence, rx)
    }

    /// Simulate the hub going down (every call fails) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of members joined on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .members
            .iter()
            .filter(|m| m.channels.contains(channel))
            .count()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PresenceError::Unavailable("hub down".to_string()))
        }
    }

    fn with_member(&self, id: usize, f: impl FnOnce(&mut Member)) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(member) = state.members.iter_mut().find(|m| m.id == id) {
            f(member);
        }
    }

    fn disconnect(&self, id: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(index) = state.members.iter().position(|m| m.id == id) {
            let member = state.members.remove(index);
            let _ = member.tx.send(PresenceEvent::Closed);
        }
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One member's handle on a `LoopbackHub`.
pub struct LoopbackPresence {
    hub: LoopbackHub,
    id: usize,
}

#[async_trait]
impl PresenceTransport for LoopbackPresence {
    async fn join(&self, channel: &str) -> Result<()> {
        self.hub.check_available()?;
        self.hub.with_member(self.id, |m| {
            m.channels.insert(channel.to_string());
        });
        Ok(())
    }

    async fn leave(&self, channel: &str) -> Result<()> {
        self.hub.check_available()?;
        self.hub.with_member(self.id, |m| {
            m.channels.remove(channel);
        });
        Ok(())
    }

    async fn publish(&self, envelope: &PresenceEnvelope) -> Result<()> {
        self.hub.check_available()?;
        let state = self.hub.state.lock().unwrap_or_else(|e| e.into_inner());
        for member in &state.members {
            if member.id != self.id && member.channels.contains(&envelope.channel) {
                // Receiver gone means that member is shutting down
                let _ = member.tx.send(PresenceEvent::Message(envelope.clone()));
            }
        }
        Ok(())
    }
}

impl Drop for LoopbackPresence {
    fn drop(&mut self) {
        self.hub.disconnect(self.id);
    }
}
