//! Configuration loading and root folder resolution
//!
//! Startup configuration comes from an optional TOML file. A missing file is
//! never fatal: defaults are used and a warning is logged. Pipeline tunables
//! are not stored here; they live in the database `settings` table.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "COHORT_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "cohort.db";

/// Logging section of the TOML config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Compatibility scorer endpoint settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Scoring endpoint URL (POST)
    pub endpoint: Option<String>,
    /// Bearer token sent with each scoring request
    pub api_token: Option<String>,
}

/// Contents of the TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    /// Explicit database file; defaults to `<root_folder>/cohort.db`
    pub database: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub scorer: ScorerConfig,
}

impl TomlConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load from file
    ///
    /// A missing file yields defaults with a warning; an unreadable or
    /// malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Default config file location (`<config dir>/cohort/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cohort").join("config.toml"))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cohort"))
        .unwrap_or_else(|| PathBuf::from("./cohort_data"))
}

/// Root folder resolution in priority order:
/// 1. Command-line argument
/// 2. Environment variable (`COHORT_ROOT_FOLDER`)
/// 3. TOML config file
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// Database path: CLI argument, then TOML `database`, then `<root>/cohort.db`
pub fn resolve_database_path(
    cli_arg: Option<&Path>,
    toml_config: &TomlConfig,
    root_folder: &Path,
) -> PathBuf {
    cli_arg
        .map(Path::to_path_buf)
        .or_else(|| toml_config.database.clone())
        .unwrap_or_else(|| root_folder.join(DATABASE_FILE_NAME))
}
