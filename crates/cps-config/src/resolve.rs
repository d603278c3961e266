//! Config resolution: explicit path → `CPS_CONFIG` env → XDG → defaults.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::store::StoreConfig;
use crate::validate::ValidationError;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "CPS_CONFIG";

/// Directory name under the user config dir.
const CONFIG_DIR_NAME: &str = "compaction_pass_store";

/// Config file name inside the config dir.
const CONFIG_FILE_NAME: &str = "config.json";

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Environment(PathBuf),
    UserConfigDir(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Explicit(p) => write!(f, "explicit:{}", p.display()),
            ConfigSource::Environment(p) => write!(f, "env:{}", p.display()),
            ConfigSource::UserConfigDir(p) => write!(f, "user:{}", p.display()),
            ConfigSource::Defaults => write!(f, "defaults"),
        }
    }
}

/// Candidate config locations, in priority order.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub explicit: Option<PathBuf>,
    pub env: Option<PathBuf>,
    pub user: Option<PathBuf>,
}

impl ConfigPaths {
    /// Discover candidate paths from the process environment.
    pub fn discover(explicit: Option<&Path>) -> Self {
        Self {
            explicit: explicit.map(Path::to_path_buf),
            env: std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from),
            user: dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)),
        }
    }
}

/// A validated configuration and its origin.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: StoreConfig,
    pub source: ConfigSource,
}

/// Resolve the effective configuration.
///
/// An explicit or env path that does not exist is an error; a missing user
/// config file silently falls through to defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<ResolvedConfig, ValidationError> {
    resolve_from(&ConfigPaths::discover(explicit))
}

/// Resolve against a fixed set of candidate paths.
pub fn resolve_from(paths: &ConfigPaths) -> Result<ResolvedConfig, ValidationError> {
    let (config, source) = if let Some(path) = &paths.explicit {
        (StoreConfig::from_file(path)?, ConfigSource::Explicit(path.clone()))
    } else if let Some(path) = &paths.env {
        (
            StoreConfig::from_file(path)?,
            ConfigSource::Environment(path.clone()),
        )
    } else if let Some(path) = paths.user.as_ref().filter(|p| p.exists()) {
        (
            StoreConfig::from_file(path)?,
            ConfigSource::UserConfigDir(path.clone()),
        )
    } else {
        debug!("no config file found, using defaults");
        (StoreConfig::default(), ConfigSource::Defaults)
    };

    let config = config.validated()?;
    info!(source = %source, levels = config.tree.levels, cell_size = config.tree.cell_size, "store configuration resolved");
    Ok(ResolvedConfig { config, source })
}
