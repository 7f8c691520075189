//! Full configuration validation.
//!
//! Each section has its own validator; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod helpers;
mod sections;


use crate::schema::ClasscastConfig;
use classcast_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &ClasscastConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    sections::validate_signaling(&mut errors, config);
    sections::validate_ice(&mut errors, config);
    sections::validate_negotiation(&mut errors, config);
    sections::validate_messages(&mut errors, config);
    sections::validate_relay(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
