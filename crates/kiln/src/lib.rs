//! Kiln - a development server that watches, rebuilds and live-reloads a
//! web application.
//!
//! # Architecture
//!
//! - [`dev`] - The dev session: control channel, rebuild watcher, build
//!   generations, app server lifecycle and orchestration
//! - [`config`] - `kiln.config.json` loading and validation
//! - [`error`] - Error types with actionable messages
//! - [`logger`] - Structured logging with tracing
//! - [`ui`] - Terminal status lines and spinners
//! - `cli` / `commands` - Argument parsing and command entry points
//!
//! # Example
//!
//! ```rust,no_run
//! use kiln::config::DevConfig;
//! use kiln::dev::{CommandBuildEngine, DevSession, Mode};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> kiln::Result<()> {
//! let config = DevConfig::for_root("/path/to/app");
//! let shutdown = CancellationToken::new();
//!
//! let summary = DevSession::new(config, Mode::Development, Arc::new(CommandBuildEngine::new()))
//!     .run(shutdown)
//!     .await?;
//! println!("served on port {}", summary.port);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod dev;
pub mod error;
pub mod logger;
pub mod ui;

// Re-export commonly used types
pub use error::{CliError, ConfigError, DevError, Result, ResultExt};
