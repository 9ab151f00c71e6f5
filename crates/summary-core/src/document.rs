//! Summary document and per-editor session state.

use crate::checksum::Checksum;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// The server's authoritative copy of a case summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub checksum: Checksum,
}

impl Document {
    /// Build a document, computing its checksum.
    pub fn from_content(content: impl Into<String>) -> Self {
        let content = content.into();
        let checksum = Checksum::of(&content);
        Self { content, checksum }
    }
}

/// Reconciliation state shown in the status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    /// Local text matches the last reconciled checksum
    Idle,
    /// Local edits waiting for the next reconcile
    Pending,
    /// Fetch or push in flight
    Syncing,
    /// Remote text replaced diverged local edits
    Conflict,
    /// Last fetch or push failed
    Error,
}

impl SyncState {
    pub fn label(&self) -> &'static str {
        match self {
            SyncState::Idle => "Saved",
            SyncState::Pending => "Unsaved changes",
            SyncState::Syncing => "Syncing...",
            SyncState::Conflict => "Conflict",
            SyncState::Error => "Error saving",
        }
    }
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One editor's view of the reconciliation state.
///
/// The live text itself lives in the editor; the session only tracks what
/// was last agreed with the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    /// Checksum of the last content reconciled with the server (None before
    /// the first fetch)
    pub last_known: Option<Checksum>,
    pub state: SyncState,
    /// Last successful sync, in milliseconds since Unix epoch
    pub last_synced_at: Option<f64>,
    /// Actor named in the most recent remote save notice
    pub last_saved_by: Option<String>,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self {
            last_known: None,
            state: SyncState::Pending,
            last_synced_at: None,
            last_saved_by: None,
        }
    }
}

impl SyncSession {
    /// Whether `text` is what the server held at the last reconcile.
    pub fn is_reconciled(&self, text: &str) -> bool {
        self.last_known.is_some_and(|known| known.matches(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_checksum() {
        let doc = Document::from_content("a");
        assert_eq!(doc.checksum.as_u32(), 0xE8B7BE43);
    }

    #[test]
    fn test_document_wire_shape() {
        let doc = Document::from_content("");
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"content":"","checksum":0}"#);
    }

    #[test]
    fn test_labels() {
        assert_eq!(SyncState::Idle.to_string(), "Saved");
        assert_eq!(SyncState::Error.to_string(), "Error saving");
        assert_eq!(SyncState::Syncing.label(), "Syncing...");
    }

    #[test]
    fn test_new_session_not_reconciled() {
        let session = SyncSession::default();
        assert!(!session.is_reconciled(""));
        assert_ne!(session.state, SyncState::Idle);
    }

    #[test]
    fn test_is_reconciled() {
        let session = SyncSession {
            last_known: Some(Checksum::of("text")),
            ..Default::default()
        };
        assert!(session.is_reconciled("text"));
        assert!(!session.is_reconciled("text2"));
    }

    #[test]
    fn test_session_compares_with_sync_time() {
        let session = SyncSession {
            last_synced_at: Some(1_700_000_000_000.5),
            state: SyncState::Idle,
            ..Default::default()
        };
        let copy = session.clone();
        assert_eq!(copy, session);

        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"lastSyncedAt\":1700000000000.5"));
    }
}
