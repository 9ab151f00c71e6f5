//! System clipboard with a file fallback.
//!
//! Headless hosts often have no clipboard at all, so text that cannot be
//! put on the clipboard is written next to the summary file as
//! `<file>.conflict-<millis>` instead.

use std::path::{Path, PathBuf};
use summary_core::events::now_millis;
use summary_core::{Clipboard, ClipboardError};
use tracing::{debug, warn};

pub struct SystemClipboard {
    /// Summary file the fallback copies are named after
    summary_path: PathBuf,
    use_system: bool,
    last_fallback: Option<PathBuf>,
}

impl SystemClipboard {
    pub fn new(summary_path: &Path) -> Self {
        Self {
            summary_path: summary_path.to_path_buf(),
            use_system: true,
            last_fallback: None,
        }
    }

    /// Skip the system clipboard and always write fallback files.
    pub fn file_only(summary_path: &Path) -> Self {
        Self {
            use_system: false,
            ..Self::new(summary_path)
        }
    }

    /// Path of the most recent fallback file, if any was written.
    pub fn last_fallback(&self) -> Option<&Path> {
        self.last_fallback.as_deref()
    }

    fn fallback_path(&self) -> PathBuf {
        let mut name = self
            .summary_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "summary".into());
        name.push(format!(".conflict-{}", now_millis() as u64));
        self.summary_path.with_file_name(name)
    }

    fn write_fallback(&mut self, text: &str) -> Result<(), ClipboardError> {
        let path = self.fallback_path();
        std::fs::write(&path, text).map_err(|e| ClipboardError(e.to_string()))?;
        warn!("Local summary text saved to {}", path.display());
        self.last_fallback = Some(path);
        Ok(())
    }
}

impl Clipboard for SystemClipboard {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        if self.use_system {
            match arboard::Clipboard::new().and_then(|mut cb| cb.set_text(text)) {
                Ok(()) => {
                    debug!("Local summary text copied to the system clipboard");
                    return Ok(());
                }
                Err(e) => debug!("System clipboard unavailable: {}", e),
            }
        }
        self.write_fallback(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fallback_file_written_next_to_summary() {
        let dir = TempDir::new().unwrap();
        let summary = dir.path().join("case-12.md");
        let mut clipboard = SystemClipboard::file_only(&summary);

        clipboard.write_text("my lost edit").unwrap();

        let path = clipboard.last_fallback().unwrap().to_path_buf();
        assert_eq!(path.parent(), Some(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("case-12.md.conflict-"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "my lost edit");
    }

    #[test]
    fn test_unwritable_fallback_is_error() {
        let dir = TempDir::new().unwrap();
        let summary = dir.path().join("missing-dir").join("case.md");
        let mut clipboard = SystemClipboard::file_only(&summary);

        assert!(clipboard.write_text("text").is_err());
        assert!(clipboard.last_fallback().is_none());
    }
}
