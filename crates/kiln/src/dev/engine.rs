//! Build engine interface.
//!
//! A build engine performs the initial build, then watches the project and
//! rebuilds on change. It reports what happens as an ordered stream of
//! [`BuildEvent`]s; it never talks to browsers or the app server itself.

use crate::config::DevConfig;
use crate::error::DevError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Build mode handed to the build engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    /// Parse a mode name, falling back to `default` for anything unknown.
    ///
    /// ```
    /// use kiln::dev::Mode;
    ///
    /// assert_eq!(Mode::parse("production", Mode::Development), Mode::Production);
    /// assert_eq!(Mode::parse("", Mode::Development), Mode::Development);
    /// ```
    pub fn parse(raw: &str, default: Mode) -> Mode {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" => Mode::Development,
            "production" => Mode::Production,
            _ => default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one compile cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// How long the build took
    pub duration: Duration,
    /// Failure detail, `None` on success
    pub failure: Option<String>,
}

impl BuildOutcome {
    pub fn success(duration: Duration) -> Self {
        Self {
            duration,
            failure: None,
        }
    }

    pub fn failed(duration: Duration, detail: impl Into<String>) -> Self {
        Self {
            duration,
            failure: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Raw events reported by a build engine, in the order they happen.
///
/// Rebuilds are serialized: a `RebuildStarted` is always followed by its
/// `RebuildFinished` before the next `RebuildStarted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// The first full build finished
    InitialBuild(BuildOutcome),
    RebuildStarted,
    RebuildFinished(BuildOutcome),
    FileCreated(PathBuf),
    FileChanged(PathBuf),
    FileDeleted(PathBuf),
}

/// Everything an engine needs to start watching.
#[derive(Debug, Clone)]
pub struct WatchContext {
    pub config: DevConfig,
    pub mode: Mode,
    /// Where to report events
    pub events: mpsc::Sender<BuildEvent>,
    /// Cancelled when the session stops the watch
    pub cancel: CancellationToken,
}

impl WatchContext {
    /// Report an event. Returns `false` once nobody is listening anymore.
    pub async fn emit(&self, event: BuildEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// A build engine.
///
/// `watch` sets up watching and returns the task that drives it. Errors
/// returned from `watch` itself are fatal for the session. The task must
/// return promptly once `ctx.cancel` fires, and must not leave a build
/// writing to disk after it returns.
pub trait BuildEngine: Send + Sync + 'static {
    fn watch(&self, ctx: WatchContext) -> Result<JoinHandle<Result<(), DevError>>, DevError>;
}

/// Handle used to stop a running watch.
pub struct WatchHandle {
    cancel: CancellationToken,
    engine: JoinHandle<Result<(), DevError>>,
    adapter: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub(crate) fn new(
        cancel: CancellationToken,
        engine: JoinHandle<Result<(), DevError>>,
        adapter: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            cancel,
            engine,
            adapter,
        }
    }

    /// Stop watching.
    ///
    /// Resolves only after the engine task has returned, so the caller can
    /// safely clean build outputs afterwards.
    pub async fn stop(self) -> Result<(), DevError> {
        self.cancel.cancel();

        let result = match self.engine.await {
            Ok(result) => result,
            Err(e) => Err(DevError::Server(format!("build engine task failed: {}", e))),
        };

        // The adapter ends once the engine drops its event sender.
        if let Some(adapter) = self.adapter {
            let _ = adapter.await;
        }

        result
    }

    /// Whether the engine task has already returned.
    pub fn is_finished(&self) -> bool {
        self.engine.is_finished()
    }
}
