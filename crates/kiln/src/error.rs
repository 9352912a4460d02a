//! Error handling for the Kiln CLI.
//!
//! This module provides a hierarchical error type system using `thiserror`.
//! The variants follow the failure classes of a dev session:
//!
//! - **Configuration errors** (`ConfigError`) abort before any resource exists
//! - **Session errors** (`DevError`) abort a session that already started
//! - **Top-level errors** (`CliError`) wrap both plus I/O and watcher failures
//!
//! Recoverable failures (a rebuild that does not compile, a browser tab that
//! disconnects mid-broadcast) never surface as errors; they are logged.
//!
//! # Example
//!
//! ```rust,no_run
//! use kiln::error::{Result, ResultExt};
//! use std::path::Path;
//!
//! fn read_artifact(path: &Path) -> Result<String> {
//!     std::fs::read_to_string(path)
//!         .with_path(path)
//!         .with_hint("Run the build once before starting the dev server")
//! }
//! ```

mod report;

use std::path::PathBuf;
use thiserror::Error;

pub use report::cli_error_to_miette;

/// Top-level CLI error type.
///
/// Converts automatically from the domain-specific errors via `From`.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration-related errors (fatal, reported before any side effect)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dev session failures after the session started
    #[error("Dev server error: {0}")]
    Dev(#[from] DevError),

    /// File or directory not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// I/O errors from file system operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watching errors
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with custom messages
    #[error("{0}")]
    Custom(String),
}

/// Configuration-specific errors.
///
/// All of these are fatal and are raised while the session is still in its
/// `init` state, so no port, socket or watcher has been allocated yet.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The project declares a custom server entry point
    #[error("Custom server entry point '{0}' is not supported by the dev server\n\nHint: Remove 'serverEntryPoint' from kiln.config.json and run your custom server separately")]
    CustomServerEntry(String),

    /// No port could be bound
    #[error("No free port found (tried {tried})\n\nHint: Pass --port or set PORT to a port that is not in use")]
    NoFreePort {
        /// Human-readable list or range of the ports that were tried
        tried: String,
    },

    /// Missing required configuration field
    #[error("Missing required field: {field}\n\nHint: {hint}")]
    MissingField {
        /// Name of the missing field
        field: String,
        /// Helpful hint for providing the field
        hint: String,
    },

    /// Invalid value for a configuration option
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The invalid value
        value: String,
        /// Helpful hint for correct values
        hint: String,
    },
}

/// Failures of a running dev session.
#[derive(Debug, Error)]
pub enum DevError {
    /// The build engine could not start watching
    #[error("Build engine failed to start: {0}")]
    EngineSetup(String),

    /// The first build failed, so there is nothing to serve
    #[error("Initial build failed: {0}\n\nHint: Fix the error above and restart the dev server")]
    InitialBuild(String),

    /// The build engine went away before reporting the first build
    #[error("Build engine stopped before the initial build completed")]
    EngineStopped,

    /// The control channel or the app server could not bind
    #[error("Failed to bind {what} to {addr}: {source}")]
    Bind {
        /// Which listener failed ("control channel", "app server")
        what: &'static str,
        /// Address that was requested
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// A server build generation could not be loaded
    #[error("Failed to load server build {}: {reason}", .path.display())]
    Load {
        /// Path of the server build artifact
        path: PathBuf,
        /// Reason reported by the loader
        reason: String,
    },

    /// The app server task failed
    #[error("Server error: {0}")]
    Server(String),
}

/// Result type alias using `CliError` as the default error type.
pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Extension trait for adding context to `Result` types.
pub trait ResultExt<T> {
    /// Add a file path to the error context.
    ///
    /// Not-found I/O errors become [`CliError::FileNotFound`] for `path`.
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T>;

    /// Add a helpful hint to the error context.
    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: Into<CliError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            match err {
                CliError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                    CliError::FileNotFound(path.as_ref().to_path_buf())
                }
                other => other,
            }
        })
    }

    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}\n\nHint: {}", err, hint))
        })
    }
}
