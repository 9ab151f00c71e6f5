//! Editor backed by a text file on disk.
//!
//! The file is the user's editing surface: they change it in any text
//! editor, the watcher notices, and `refresh` turns the change into deltas.
//! Writes from the sync session go straight to disk and update the cached
//! text, so the watcher event they cause refreshes to nothing. A write is
//! refused while the file holds changes `refresh` has not picked up yet.

use std::path::{Path, PathBuf};
use summary_core::editor::Result;
use summary_core::{Delta, DocumentStore, Editor, EditorError, SummarySync};
use tracing::{debug, info};

use crate::watcher::FileEvent;

pub struct FileEditor {
    path: PathBuf,
    /// Text as last read from or written to disk
    text: String,
}

impl FileEditor {
    /// Open `path`, creating an empty file if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::write(&path, "")?;
                String::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self { path, text })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file after an outside change.
    ///
    /// Returns the deltas from the cached text to the file's text, or None
    /// if nothing changed (including our own writes coming back around).
    pub fn refresh(&mut self) -> std::io::Result<Option<Vec<Delta>>> {
        let on_disk = std::fs::read_to_string(&self.path)?;
        if on_disk == self.text {
            return Ok(None);
        }
        let deltas = Delta::diff(&self.text, &on_disk);
        debug!(
            "{} changed on disk ({} delta(s))",
            self.path.display(),
            deltas.len()
        );
        self.text = on_disk;
        Ok(Some(deltas))
    }

    /// Write the cached text back after the file was removed.
    pub fn restore(&mut self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, &self.text)?;
        info!("Recreated {}", self.path.display());
        Ok(())
    }

    /// Fail if the file holds text the cache has not seen. A missing file
    /// has nothing to lose.
    fn check_unchanged_on_disk(&self) -> Result<()> {
        match std::fs::read_to_string(&self.path) {
            Ok(on_disk) if on_disk != self.text => Err(EditorError::Io(format!(
                "{} has changes that were not read yet",
                self.path.display()
            ))),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EditorError::Io(e.to_string())),
        }
    }

    fn write(&mut self, text: String) -> Result<()> {
        self.check_unchanged_on_disk()?;
        std::fs::write(&self.path, &text).map_err(|e| EditorError::Io(e.to_string()))?;
        self.text = text;
        Ok(())
    }
}

impl Editor for FileEditor {
    fn content(&self) -> String {
        self.text.clone()
    }

    fn set_content(&mut self, text: &str) -> Result<()> {
        if text == self.text {
            return Ok(());
        }
        self.write(text.to_string())
    }

    fn apply_delta(&mut self, delta: &Delta) -> Result<()> {
        let mut patched = self.text.clone();
        delta.apply_to(&mut patched)?;
        self.write(patched)
    }
}

/// Feed edits sitting on disk into `sync` as local changes.
///
/// Call before reconciling so the decision sees what the user saved even
/// when the watcher has not reported it yet. Returns whether anything
/// changed.
pub async fn pull_disk_edits<S: DocumentStore>(
    sync: &mut SummarySync<FileEditor, S>,
) -> std::io::Result<bool> {
    let Some(deltas) = sync.editor_mut().refresh()? else {
        return Ok(false);
    };
    for delta in deltas {
        sync.on_local_change(delta).await;
    }
    Ok(true)
}

/// Bring `sync` up to date with a watcher event on its file.
///
/// A modified file is pulled in as local edits. A deleted file is written
/// back from the last text the session knows.
pub async fn apply_file_event<S: DocumentStore>(
    sync: &mut SummarySync<FileEditor, S>,
    event: FileEvent,
) -> std::io::Result<()> {
    match event {
        FileEvent::Modified => {
            if !pull_disk_edits(sync).await? {
                // Our own write coming back around
                debug!("Summary file unchanged");
            }
            Ok(())
        }
        FileEvent::Deleted => sync.editor_mut().restore(),
    }
}
