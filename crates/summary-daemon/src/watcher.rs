//! Watches the summary file for outside edits.
//!
//! Uses notify-debouncer-mini. The parent directory is watched rather than
//! the file itself, because most editors save by writing a new file and
//! renaming it over the old one.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// The summary file was touched on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    /// File was created or modified
    Modified,
    /// File was deleted or moved away
    Deleted,
}

pub struct FileWatcher {
    path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

/// Last seen mtime, to filter spurious events (Docker volume bug workaround)
type MtimeCache = Arc<Mutex<Option<SystemTime>>>;

impl FileWatcher {
    /// Watch `path`, which must already exist.
    ///
    /// Uses a 200ms debounce period to avoid rapid-fire events during saves.
    pub fn new(path: &Path) -> Result<Self> {
        // Canonicalize to resolve symlinks. FSEvents on macOS needs the real path.
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let target = path.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(
            std::fs::metadata(&path).and_then(|m| m.modified()).ok(),
        ));

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    // Several raw events on the file collapse into one
                    if events.iter().any(|event| event.path == target) {
                        if let Some(file_event) = Self::process_event(&target, &mtime_cache) {
                            let _ = event_tx.send(file_event);
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    fn process_event(path: &Path, mtime_cache: &MtimeCache) -> Option<FileEvent> {
        let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());

        if !path.exists() {
            *cache = None;
            debug!("Summary file deleted: {}", path.display());
            return Some(FileEvent::Deleted);
        }

        if let Ok(mtime) = std::fs::metadata(path).and_then(|m| m.modified()) {
            if *cache == Some(mtime) {
                // Mtime unchanged - spurious event, skip it
                return None;
            }
            *cache = Some(mtime);
        }

        debug!("Summary file modified: {}", path.display());
        Some(FileEvent::Modified)
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
