use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Available Kiln subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the development server
    ///
    /// Runs the build command, serves the server build and pushes a reload
    /// to every connected browser after each successful rebuild.
    Dev(DevArgs),

    /// Print the JSON schema of kiln.config.json
    ConfigSchema(ConfigSchemaArgs),
}

/// Arguments for the dev command
#[derive(Args, Debug)]
pub struct DevArgs {
    /// Project root directory
    #[arg(value_name = "ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Build mode passed to the build command (development, production)
    ///
    /// Unknown values fall back to development.
    #[arg(short, long, value_name = "MODE")]
    pub mode: Option<String>,

    /// App server port
    ///
    /// Defaults to $PORT, then the first free port in 3000-3099.
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Port of the live reload channel (overrides devServerPort)
    #[arg(long, value_name = "PORT")]
    pub reload_port: Option<u16>,

    /// Build command (overrides buildCommand)
    #[arg(long, value_name = "COMMAND")]
    pub build_command: Option<String>,

    /// Path to a config file (defaults to ROOT/kiln.config.json)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Arguments for the config-schema command
#[derive(Args, Debug)]
pub struct ConfigSchemaArgs {
    /// Write the schema to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}
