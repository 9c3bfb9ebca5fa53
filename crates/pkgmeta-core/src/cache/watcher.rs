//! File system watcher for a cache directory.
//!
//! Forwards create/remove/modify notifications for record files to the
//! loader queue. Notifications are hints: the loader re-checks the file
//! system, and periodic reconciliation covers anything the watcher drops.

use crate::error::{MetadataError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Non-recursive watcher over one cache directory.
pub struct RecordWatcher {
    _watcher: RecommendedWatcher,
}

impl RecordWatcher {
    /// Start watching `directory` for files with `extension`.
    ///
    /// Relevant paths are sent to `changes`; the watcher stops when dropped.
    pub fn start(
        directory: &Path,
        extension: &str,
        changes: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<Self> {
        let extension = extension.to_string();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if !is_relevant_kind(&event.kind) {
                        return;
                    }
                    for path in event.paths {
                        if is_record_path(&path, &extension) {
                            debug!("Cache directory change: {}", path.display());
                            // Receiver gone means the cache is shutting down
                            let _ = changes.send(path);
                        }
                    }
                }
                Err(e) => warn!("Cache watcher error: {}", e),
            }
        })
        .map_err(|e| MetadataError::Other(format!("Failed to create file watcher: {}", e)))?;

        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .map_err(|e| MetadataError::Other(format!("Failed to watch directory: {}", e)))?;

        info!("Started watching cache directory {}", directory.display());
        Ok(Self { _watcher: watcher })
    }
}

fn is_relevant_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_)
    )
}

/// Check whether a path names a record file with the given extension.
pub(crate) fn is_record_path(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
