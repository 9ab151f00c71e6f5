//! summary-daemon library: Exposes the daemon's adapters for testing.
//!
//! A thin layer over the network, filesystem and clipboard adapters the
//! `summary-sync` binary plugs into `summary_core::SummarySync`.

pub mod clipboard;
pub mod config;
pub mod file_editor;
pub mod http_store;
pub mod message;
pub mod presence;
pub mod watcher;

// Re-export key types for convenience
pub use clipboard::SystemClipboard;
pub use config::Config;
pub use file_editor::FileEditor;
pub use http_store::HttpStore;
pub use message::{ControlMessage, MAX_MESSAGE_SIZE};
pub use presence::{HubLink, WsPresence};
pub use watcher::{FileEvent, FileWatcher};
