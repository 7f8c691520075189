//! Core TOML config loading: read from path or platform default.

use crate::schema::ClasscastConfig;
use crate::validation;
use classcast_common::ConfigError;
use std::path::Path;
use tracing::{info, warn};

use super::paths::{create_default_config, default_config_path};

/// Parse config from TOML text. Missing fields take their defaults.
pub fn load_from_str(content: &str) -> Result<ClasscastConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))
}

/// Load config from a specific TOML file path.
///
/// Validation failures are logged, not returned; callers that need a
/// strictly valid config run `validation::validate` themselves.
pub fn load_from_path(path: &Path) -> Result<ClasscastConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("failed to read {}: {e}", path.display())))?;

    let config = load_from_str(&content)?;

    if let Err(e) = validation::validate(&config) {
        warn!("config validation warning: {e}");
    }

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Load config from the platform-specific default path.
///
/// On Linux: `~/.config/classcast/config.toml`
/// On macOS: `~/Library/Application Support/classcast/config.toml`
///
/// If the file does not exist, writes a commented default and returns defaults.
pub fn load_default() -> Result<ClasscastConfig, ConfigError> {
    let path = default_config_path()?;

    match load_from_path(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(_)) => {
            info!("no config found at {}, creating default", path.display());
            create_default_config(&path)?;
            Ok(ClasscastConfig::default())
        }
        Err(e) => Err(e),
    }
}
