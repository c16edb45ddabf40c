use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Workspace opened at start-up, before any `workspace.select`
    #[serde(default)]
    pub workspace: Option<PathBuf>,

    /// Seed the default emulator feature catalog into empty workspaces
    #[serde(default = "default_seed_catalog")]
    pub seed_catalog: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_seed_catalog() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            workspace: None,
            seed_catalog: default_seed_catalog(),
        }
    }
}

impl DaemonConfig {
    /// Reads `SCHOOLADMIND_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("SCHOOLADMIND").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
