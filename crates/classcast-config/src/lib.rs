//! Classcast configuration system.
//!
//! TOML-based configuration shared by the classroom client and the relay.
//! Every section uses serde defaults so a partial (or missing) config file
//! works out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use classcast_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{ClasscastConfig, CONFIG_SCHEMA_VERSION};
pub use toml_loader::{load_default, load_from_path};

use classcast_common::ConfigError;

/// Load config from the platform default path and validate it.
///
/// Creates a commented default file if none exists yet.
pub fn load_config() -> Result<ClasscastConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &ClasscastConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
