//! summary-core: Checksum-guarded synchronization of a case summary.
//!
//! This crate provides the protocol without any network code:
//! - CRC-32 checksums matching the server's
//! - The reconcile decision table and `SummarySync` session
//! - Editor, DocumentStore, PresenceTransport and Clipboard abstractions
//! - Debounced reconcile scheduling and an event bus for UI state

pub mod checksum;
pub mod clipboard;
pub mod debounce;
pub mod decision;
pub mod delta;
pub mod document;
pub mod editor;
pub mod events;
pub mod presence;
pub mod store;
pub mod summary_sync;

pub use checksum::Checksum;
pub use clipboard::{Clipboard, ClipboardError, MemoryClipboard};
pub use debounce::Debouncer;
pub use decision::{decide, ReconcileAction};
pub use delta::{Delta, DeltaAction, Position};
pub use document::{Document, SyncSession, SyncState};
pub use editor::{BufferEditor, Editor, EditorError};
pub use events::{EventBus, EventLog, Subscription, SummaryEvent};
pub use presence::{
    LoopbackHub, PresenceEnvelope, PresenceError, PresenceEvent, PresenceMessage,
    PresenceTransport,
};
pub use store::{CaseId, DocumentStore, InMemoryStore, StoreError};
pub use summary_sync::{ReconcileOutcome, SummarySync, SyncError, SyncSettings};
