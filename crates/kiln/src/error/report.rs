//! Miette diagnostic conversion for CLI errors.

use crate::error::{CliError, DevError};
use miette::Report;

/// Convert CliError to miette Report
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Config(e) => miette::miette!("Configuration error: {}", e),
        CliError::Dev(e) => dev_error_to_miette(e),
        _ => miette::miette!("{}", err),
    }
}

fn dev_error_to_miette(err: DevError) -> Report {
    match err {
        DevError::InitialBuild(detail) => miette::miette!(
            "Initial build failed:\n{}\n\nHint: Fix the error above and restart the dev server",
            detail
        ),
        DevError::Bind { what, addr, source } => miette::miette!(
            "Failed to bind {} to {}: {}\n\nHint: Another process may be using this port",
            what,
            addr,
            source
        ),
        _ => miette::miette!("{}", err),
    }
}
