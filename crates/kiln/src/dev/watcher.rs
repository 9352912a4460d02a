//! Rebuild watcher.
//!
//! Sits between a [`BuildEngine`] and the rest of the session. Every raw
//! engine event becomes a log line on the control channel, a successful
//! rebuild additionally becomes a `RELOAD`, and the session receives the
//! same events as an ordered stream of [`WatchEvent`]s.

use crate::config::DevConfig;
use crate::dev::{
    BuildEngine, BuildEvent, BuildGeneration, BuildOutcome, ControlChannel, Mode, ReloadEvent,
    WatchContext, WatchHandle,
};
use crate::error::DevError;
use crate::ui::format_duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const ENGINE_EVENT_BUFFER: usize = 64;

/// Lifecycle event delivered to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    InitialBuild { outcome: BuildOutcome },
    RebuildStart,
    /// `outcome.duration` is measured from the matching `RebuildStart`.
    RebuildFinish { outcome: BuildOutcome },
    FileCreated(PathBuf),
    FileChanged(PathBuf),
    FileDeleted(PathBuf),
}

/// Translates engine events into broadcasts and session events.
pub struct RebuildWatcher {
    channel: ControlChannel,
    generation: BuildGeneration,
    root: PathBuf,
    rebuild_started: Option<Instant>,
}

impl RebuildWatcher {
    pub fn new(channel: ControlChannel, generation: BuildGeneration, root: PathBuf) -> Self {
        Self {
            channel,
            generation,
            root,
            rebuild_started: None,
        }
    }

    /// Start `engine` and the translation task.
    ///
    /// `cancel` is handed to the engine; the returned handle cancels it and
    /// waits for the engine to finish. Errors from the engine's setup are
    /// returned directly.
    pub fn start(
        engine: Arc<dyn BuildEngine>,
        config: &DevConfig,
        mode: Mode,
        channel: ControlChannel,
        generation: BuildGeneration,
        cancel: CancellationToken,
    ) -> Result<(WatchHandle, mpsc::UnboundedReceiver<WatchEvent>), DevError> {
        let (engine_tx, mut engine_rx) = mpsc::channel(ENGINE_EVENT_BUFFER);
        let (session_tx, session_rx) = mpsc::unbounded_channel();

        let ctx = WatchContext {
            config: config.clone(),
            mode,
            events: engine_tx,
            cancel: cancel.clone(),
        };
        let engine_task = engine.watch(ctx)?;

        let mut watcher = Self::new(channel, generation, config.root_directory.clone());
        let adapter = tokio::spawn(async move {
            while let Some(event) = engine_rx.recv().await {
                let event = watcher.translate(event);
                // The session may already be draining.
                let _ = session_tx.send(event);
            }
        });

        Ok((WatchHandle::new(cancel, engine_task, Some(adapter)), session_rx))
    }

    /// Apply the side effects of one engine event.
    pub fn translate(&mut self, event: BuildEvent) -> WatchEvent {
        match event {
            BuildEvent::InitialBuild(outcome) => {
                if outcome.is_success() {
                    self.generation.advance();
                }
                WatchEvent::InitialBuild { outcome }
            }
            BuildEvent::RebuildStarted => {
                self.rebuild_started = Some(Instant::now());
                self.channel.log("Rebuilding...");
                WatchEvent::RebuildStart
            }
            BuildEvent::RebuildFinished(outcome) => {
                let duration = self.elapsed_since_start(outcome.duration);
                let outcome = BuildOutcome {
                    duration,
                    failure: outcome.failure,
                };

                match &outcome.failure {
                    None => {
                        let generation = self.generation.advance();
                        tracing::debug!(generation, "Rebuild succeeded");
                        self.channel
                            .log(format!("Rebuilt in {}", format_duration(duration)));
                        self.channel.broadcast(&ReloadEvent::Reload);
                    }
                    Some(detail) => {
                        self.channel.log(format!(
                            "Rebuild failed after {}: {}",
                            format_duration(duration),
                            detail
                        ));
                    }
                }

                WatchEvent::RebuildFinish { outcome }
            }
            BuildEvent::FileCreated(path) => {
                self.channel
                    .log(format!("File created: {}", self.relative(&path)));
                WatchEvent::FileCreated(path)
            }
            BuildEvent::FileChanged(path) => {
                self.channel
                    .log(format!("File changed: {}", self.relative(&path)));
                WatchEvent::FileChanged(path)
            }
            BuildEvent::FileDeleted(path) => {
                self.channel
                    .log(format!("File deleted: {}", self.relative(&path)));
                WatchEvent::FileDeleted(path)
            }
        }
    }

    fn elapsed_since_start(&mut self, reported: Duration) -> Duration {
        match self.rebuild_started.take() {
            Some(started) => started.elapsed(),
            None => reported,
        }
    }

    fn relative(&self, path: &Path) -> String {
        if let Ok(rel) = path.strip_prefix(&self.root) {
            return rel.display().to_string();
        }
        // Engines may report canonical paths for a relative root.
        if let Ok(root) = self.root.canonicalize() {
            if let Ok(rel) = path.strip_prefix(&root) {
                return rel.display().to_string();
            }
        }
        path.display().to_string()
    }
}
