//! Editor capability: the text surface a session keeps in sync.
//!
//! Implementations:
//! - `BufferEditor` - In-memory buffer, for tests and embedding
//! - `FileEditor` (in summary-daemon) - A text file on disk

use crate::delta::{Delta, DeltaError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("Delta rejected: {0}")]
    Delta(#[from] DeltaError),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, EditorError>;

/// A text surface that can be read, replaced and patched.
pub trait Editor: Send + Sync {
    /// Full current text.
    fn content(&self) -> String;

    /// Replace the full text.
    fn set_content(&mut self, text: &str) -> Result<()>;

    /// Apply a single remote delta.
    fn apply_delta(&mut self, delta: &Delta) -> Result<()>;
}

/// In-memory editor buffer.
#[derive(Debug, Default, Clone)]
pub struct BufferEditor {
    text: String,
}

impl BufferEditor {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Apply a local edit, returning the delta to announce.
    ///
    /// Simulates a keystroke: callers forward the returned deltas to
    /// `SummarySync::on_local_change`.
    pub fn type_text(&mut self, new_text: &str) -> Vec<Delta> {
        let deltas = Delta::diff(&self.text, new_text);
        self.text = new_text.to_string();
        deltas
    }
}

impl Editor for BufferEditor {
    fn content(&self) -> String {
        self.text.clone()
    }

    fn set_content(&mut self, text: &str) -> Result<()> {
        self.text = text.to_string();
        Ok(())
    }

    fn apply_delta(&mut self, delta: &Delta) -> Result<()> {
        // Patch a copy so a rejected delta leaves the buffer untouched
        let mut patched = self.text.clone();
        delta.apply_to(&mut patched)?;
        self.text = patched;
        Ok(())
    }
}
