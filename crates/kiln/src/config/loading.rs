use crate::config::DevConfig;
use crate::error::{CliError, ConfigError, Result};
use figment::{
    providers::{Env, Format as _, Json, Serialized},
    Figment,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Config file looked up in the project root.
pub const CONFIG_FILE_NAME: &str = "kiln.config.json";

/// Prefix of environment variables that override config fields
/// (`KILN_DEV_SERVER_PORT`, `KILN_BUILD_COMMAND`, ...).
pub const ENV_PREFIX: &str = "KILN_";

/// Fields that may be set through `KILN_*` variables. Other variables with
/// the prefix belong to someone else and are skipped.
const ENV_FIELDS: &[&str] = &[
    "rootDirectory",
    "serverBuildPath",
    "assetsBuildDirectory",
    "publicPath",
    "devServerPort",
    "devServerBroadcastDelay",
    "serverEntryPoint",
    "buildCommand",
    "watchIgnore",
    "debounceMs",
    "port",
];

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_server_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
}

impl DevConfig {
    /// Load configuration from multiple sources.
    /// Priority: CLI args > environment variables > config file > defaults
    ///
    /// `root` is the project root. A relative `rootDirectory` in the config
    /// file is resolved against it.
    pub fn load(
        root: &Path,
        config_path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let config_file = match config_path {
            Some(path) if !path.exists() => {
                return Err(CliError::FileNotFound(path.to_path_buf()));
            }
            Some(path) => Some(path.to_path_buf()),
            None => {
                let default_path = root.join(CONFIG_FILE_NAME);
                default_path.exists().then_some(default_path)
            }
        };

        if let Some(path) = config_file {
            tracing::debug!(path = %path.display(), "Loading config file");
            figment = figment.merge(Json::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).filter_map(|key| {
            let field = env_key_to_camel(key.as_str());
            ENV_FIELDS.contains(&field.as_str()).then(|| field.into())
        }));

        figment = figment.merge(Serialized::defaults(overrides));

        let mut config: Self = figment.extract().map_err(|e| {
            CliError::from(ConfigError::InvalidValue {
                field: "configuration".to_string(),
                value: e.to_string(),
                hint: format!("Check {} syntax and field types", CONFIG_FILE_NAME),
            })
        })?;

        config.root_directory = resolve_root(root, &config.root_directory);
        Ok(config)
    }
}

fn resolve_root(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else if configured == Path::new(".") {
        root.to_path_buf()
    } else {
        root.join(configured)
    }
}

/// `DEV_SERVER_PORT` -> `devServerPort`.
fn env_key_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_key_to_camel() {
        assert_eq!(env_key_to_camel("DEV_SERVER_PORT"), "devServerPort");
        assert_eq!(env_key_to_camel("BUILD_COMMAND"), "buildCommand");
        assert_eq!(env_key_to_camel("port"), "port");
        assert_eq!(env_key_to_camel("_LEADING"), "leading");
    }

    #[test]
    fn test_env_fields_match_schema() {
        let schema = DevConfig::json_schema();
        let properties = schema.get("properties").and_then(|p| p.as_object()).unwrap();

        let mut fields: Vec<&str> = properties.keys().map(String::as_str).collect();
        let mut known = ENV_FIELDS.to_vec();
        fields.sort_unstable();
        known.sort_unstable();
        assert_eq!(fields, known);
    }

    #[test]
    fn test_resolve_root() {
        let root = Path::new("/project");
        assert_eq!(resolve_root(root, Path::new(".")), PathBuf::from("/project"));
        assert_eq!(resolve_root(root, Path::new("app")), PathBuf::from("/project/app"));
        assert_eq!(resolve_root(root, Path::new("/elsewhere")), PathBuf::from("/elsewhere"));
    }
}
