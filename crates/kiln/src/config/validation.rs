use crate::config::DevConfig;
use crate::error::{ConfigError, Result};

impl DevConfig {
    /// Validate configuration for logical consistency.
    ///
    /// A custom server entry point is rejected here, before a port is
    /// requested or any socket is opened.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref entry) = self.server_entry_point {
            return Err(ConfigError::CustomServerEntry(entry.clone()).into());
        }

        if !self.public_path.starts_with('/') || !self.public_path.ends_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "publicPath".to_string(),
                value: self.public_path.clone(),
                hint: "Public path must start and end with '/' (e.g. \"/build/\")".to_string(),
            }
            .into());
        }

        if self.dev_server_port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "devServerPort".to_string(),
                value: "0".to_string(),
                hint: "Browsers need a fixed port to reconnect to".to_string(),
            }
            .into());
        }

        if self.port.is_some() && self.port == Some(self.dev_server_port) {
            return Err(ConfigError::InvalidValue {
                field: "port".to_string(),
                value: self.dev_server_port.to_string(),
                hint: "The app server and the live-reload channel need different ports".to_string(),
            }
            .into());
        }

        if self.build_command.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "buildCommand".to_string(),
                hint: "Set the command that builds your project, e.g. \"npm run build\"".to_string(),
            }
            .into());
        }

        if self.server_build_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "serverBuildPath".to_string(),
                hint: "Point serverBuildPath at the file your build writes".to_string(),
            }
            .into());
        }

        Ok(())
    }
}
