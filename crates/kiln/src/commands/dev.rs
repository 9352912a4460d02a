//! Dev command implementation.
//!
//! Loads the configuration, then hands over to [`DevSession`] with the
//! shell command build engine. Ctrl+C is the only way out of a healthy
//! session; it triggers the ordered teardown.

use crate::cli::DevArgs;
use crate::config::{ConfigOverrides, DevConfig};
use crate::dev::{CommandBuildEngine, DevSession, Mode};
use crate::error::{Result, ResultExt};
use crate::ui;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Execute the dev command.
///
/// # Errors
///
/// Returns errors for invalid configuration, an unusable port, a failed
/// initial build, or a listener that cannot bind.
pub async fn execute(args: DevArgs) -> Result<()> {
    let root = args
        .root
        .canonicalize()
        .with_path(&args.root)
        .with_hint("Pass the directory of the project to serve")?;

    let overrides = ConfigOverrides {
        port: args.port,
        dev_server_port: args.reload_port,
        build_command: args.build_command.clone(),
    };
    let config = DevConfig::load(&root, args.config.as_deref(), &overrides)?;
    let mode = Mode::parse(args.mode.as_deref().unwrap_or(""), Mode::Development);

    ui::info(&format!("Starting dev server in {} mode", mode));
    tracing::debug!(root = %config.root_directory.display(), "Project root");

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => ui::info("Shutting down..."),
            Err(e) => ui::warning(&format!("Failed to listen for Ctrl+C: {}", e)),
        }
        on_signal.cancel();
    });

    let summary = DevSession::new(config, mode, Arc::new(CommandBuildEngine::new()))
        .run(shutdown)
        .await?;

    tracing::debug!(
        port = summary.port,
        builds = summary.generation,
        steps = summary.teardown.len(),
        "Dev session finished"
    );
    ui::success("Dev server stopped");
    Ok(())
}
