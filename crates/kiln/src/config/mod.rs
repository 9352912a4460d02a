//! Configuration for the Kiln dev server with multi-source loading.
//!
//! Merges settings from CLI args, environment variables, and
//! `kiln.config.json`. Priority: CLI > Environment > File > Defaults

mod defaults;
mod loading;
mod validation;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use defaults::*;
pub use loading::{ConfigOverrides, CONFIG_FILE_NAME, ENV_PREFIX};

/// Dev server configuration, loaded from `kiln.config.json` or CLI args.
///
/// Read-only once loaded: the session never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DevConfig {
    /// Project root; relative paths below are resolved against it
    #[serde(default = "default_root_directory")]
    pub root_directory: PathBuf,

    /// Server build artifact loaded by the app server
    #[serde(default = "default_server_build_path")]
    pub server_build_path: PathBuf,

    /// Directory the build writes browser assets into
    #[serde(default = "default_assets_build_directory")]
    pub assets_build_directory: PathBuf,

    /// URL prefix the assets directory is served under
    #[serde(default = "default_public_path")]
    pub public_path: String,

    /// Port of the live-reload control channel
    #[serde(default = "default_dev_server_port")]
    pub dev_server_port: u16,

    /// Delay in milliseconds before a broadcast is sent to browsers
    #[serde(default)]
    pub dev_server_broadcast_delay: u64,

    /// Custom server entry point (not supported by the dev server)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_entry_point: Option<String>,

    /// Shell command that builds the project
    #[serde(default = "default_build_command")]
    pub build_command: String,

    /// Patterns ignored by the file watcher
    #[serde(default = "default_watch_ignore")]
    pub watch_ignore: Vec<String>,

    /// Window in milliseconds for batching file changes into one rebuild
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Preferred app server port (CLI `--port`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            root_directory: default_root_directory(),
            server_build_path: default_server_build_path(),
            assets_build_directory: default_assets_build_directory(),
            public_path: default_public_path(),
            dev_server_port: default_dev_server_port(),
            dev_server_broadcast_delay: 0,
            server_entry_point: None,
            build_command: default_build_command(),
            watch_ignore: default_watch_ignore(),
            debounce_ms: default_debounce_ms(),
            port: None,
        }
    }
}

impl DevConfig {
    /// Default configuration rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root.into(),
            ..Self::default()
        }
    }

    /// Absolute (root-relative) path of the server build artifact.
    pub fn server_build_file(&self) -> PathBuf {
        self.resolve(&self.server_build_path)
    }

    /// Absolute (root-relative) path of the assets build directory.
    pub fn assets_dir(&self) -> PathBuf {
        self.resolve(&self.assets_build_directory)
    }

    /// Directory containing the server build artifact.
    ///
    /// This is the prefix purged from the module cache between generations.
    pub fn server_build_dir(&self) -> PathBuf {
        let file = self.server_build_file();
        file.parent().map(Path::to_path_buf).unwrap_or(file)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_directory.join(path)
        }
    }

    /// Generate JSON Schema for kiln.config.json.
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(DevConfig);
        serde_json::to_value(schema).unwrap_or_default()
    }
}
