//! Config schema command implementation.

use crate::cli::ConfigSchemaArgs;
use crate::config::DevConfig;
use crate::error::{Result, ResultExt};
use crate::ui;

/// Print or write the JSON schema of `kiln.config.json`.
pub async fn execute(args: ConfigSchemaArgs) -> Result<()> {
    let schema = serde_json::to_string_pretty(&DevConfig::json_schema())?;

    match args.output {
        Some(path) => {
            tokio::fs::write(&path, schema)
                .await
                .with_path(&path)?;
            ui::success(&format!("Schema written to {}", path.display()));
        }
        None => println!("{}", schema),
    }

    Ok(())
}
