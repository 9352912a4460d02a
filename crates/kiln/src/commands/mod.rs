//! Command implementations for the Kiln CLI.
//!
//! - [`dev`] - Development server with live reload
//! - [`schema`] - JSON schema of the config file
//!
//! Each command provides an `execute` function that takes the parsed
//! arguments and returns a Result.

pub mod dev;
pub mod schema;

pub use dev::execute as dev_execute;
pub use schema::execute as schema_execute;
