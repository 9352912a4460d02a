//! File system watcher for the command build engine.
//!
//! Watches the project root recursively and filters out build outputs,
//! dependencies, hidden files and configured patterns.

use crate::error::{CliError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// File change event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Modified(PathBuf),
    Created(PathBuf),
    Removed(PathBuf),
}

/// Recursive watcher over the project root.
///
/// Dropping it stops the underlying notify watcher and closes the receiver.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root`.
    ///
    /// Repeated events for the same path inside `debounce_ms` are collapsed.
    ///
    /// # Errors
    ///
    /// Returns error if the root does not exist or the OS watcher cannot be
    /// created.
    pub fn new(
        root: &Path,
        ignore_patterns: Vec<String>,
        debounce_ms: u64,
    ) -> Result<(Self, mpsc::Receiver<FileChange>)> {
        if !root.exists() {
            return Err(CliError::FileNotFound(root.to_path_buf()));
        }
        // notify reports absolute paths
        let root = root.canonicalize()?;

        let (tx, rx) = mpsc::channel(100);

        let debounce = Duration::from_millis(debounce_ms);
        let mut last_event: Option<(PathBuf, Instant)> = None;
        let filter_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "File watcher error");
                    return;
                }
            };

            for path in &event.paths {
                if Self::should_ignore(path, &filter_root, &ignore_patterns) {
                    continue;
                }

                let now = Instant::now();
                if let Some((last_path, last_time)) = &last_event {
                    if last_path == path && now.duration_since(*last_time) < debounce {
                        continue;
                    }
                }
                last_event = Some((path.clone(), now));

                let change = match event.kind {
                    EventKind::Create(_) => FileChange::Created(path.clone()),
                    EventKind::Modify(_) => FileChange::Modified(path.clone()),
                    EventKind::Remove(_) => FileChange::Removed(path.clone()),
                    _ => continue,
                };

                // The receiver is gone once the engine stopped.
                if tx.blocking_send(change).is_err() {
                    return;
                }
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok((
            Self {
                _watcher: watcher,
                root,
            },
            rx,
        ))
    }

    /// Check if a path should be ignored.
    ///
    /// Patterns are matched against the root-relative path:
    /// - `*.ext` matches the file name suffix
    /// - `a/b` or `/a` matches when the relative path starts with those components
    /// - `name` matches any single component
    ///
    /// Paths outside the root and hidden entries are always ignored.
    fn should_ignore(path: &Path, root: &Path, ignore_patterns: &[String]) -> bool {
        let rel_path = match path.strip_prefix(root) {
            Ok(p) => p,
            Err(_) => return true,
        };

        for pattern in ignore_patterns {
            if let Some(suffix) = pattern.strip_prefix('*') {
                let matches = rel_path
                    .file_name()
                    .map(|name| name.to_string_lossy().ends_with(suffix))
                    .unwrap_or(false);
                if matches {
                    return true;
                }
            } else if pattern.contains('/') {
                if rel_path.starts_with(pattern.trim_matches('/')) {
                    return true;
                }
            } else if rel_path
                .components()
                .any(|c| c.as_os_str() == pattern.as_str())
            {
                return true;
            }
        }

        rel_path.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .map(|name| name.starts_with('.') && name != "." && name != "..")
                .unwrap_or(false)
        })
    }

    /// Canonical root directory being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
