//! Configuration loading and config file resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "SEISMO_CONFIG";

/// Service configuration read from TOML
///
/// Every field has a compiled default, so a partial file (or no file at all)
/// still yields a usable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Maximum accepted size of a request body (the fault-parameter file)
    pub max_body_bytes: usize,

    /// Number of blocking jobs (model preparation, extraction) allowed to run at once
    pub blocking_workers: usize,

    /// Number of per-receiver chunks buffered between the orchestrator and the socket
    pub stream_buffer_chunks: usize,

    /// Optional TOML station list used for `network`/`station` receiver queries
    pub station_inventory: Option<PathBuf>,

    /// Filename prefix used when the request does not provide a `label`
    pub default_label: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8765".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
            blocking_workers: 4,
            stream_buffer_chunks: 4,
            station_inventory: None,
            default_label: "finite_source_seismogram".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ServiceConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    ///
    /// A missing file is not an error: defaults are used and a warning is logged.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file {} not found, using compiled defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the config file location and load it
    pub fn resolve_and_load(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) => Self::load(&path),
            None => {
                info!("No config file found, using compiled defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.blocking_workers == 0 {
            return Err(Error::Config("blocking_workers must be at least 1".to_string()));
        }
        if self.stream_buffer_chunks == 0 {
            return Err(Error::Config(
                "stream_buffer_chunks must be at least 1".to_string(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(Error::Config("max_body_bytes must be at least 1".to_string()));
        }
        if self.default_label.trim().is_empty() {
            return Err(Error::Config("default_label must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Config file resolution, in priority order:
/// 1. Explicit path (e.g. a command-line argument)
/// 2. `SEISMO_CONFIG` environment variable
/// 3. `<user config dir>/seismo/seismo-fs.toml` if it exists
///
/// Returns `None` when nothing applies and compiled defaults should be used.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("seismo").join("seismo-fs.toml"))
        .filter(|p| p.exists())
}
