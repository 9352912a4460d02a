//! Command-line interface definition for Kiln.
//!
//! # Command Structure
//!
//! - `kiln dev` - Build, watch and serve a project with live reload
//! - `kiln config-schema` - Print the JSON schema of `kiln.config.json`

mod commands;

use clap::Parser;

pub use commands::{Command, ConfigSchemaArgs, DevArgs};

/// Kiln - watch, rebuild and live-reload a web application
#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    version,
    about = "Watch, rebuild and live-reload a web application",
    long_about = "Kiln runs your build command, serves the result and reloads every\n\
                  connected browser when a rebuild finishes."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}
