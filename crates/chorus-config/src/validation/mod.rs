//! Full configuration validation.
//!
//! Each section has its own submodule; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod client;
mod helpers;
mod server;

#[cfg(test)]
mod tests;

use chorus_common::ConfigError;

use crate::schema::ChorusConfig;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &ChorusConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    server::validate_listener(&mut errors, config);
    server::validate_auth(&mut errors, config);
    server::validate_rooms(&mut errors, config);
    server::validate_messages(&mut errors, config);
    client::validate_connection(&mut errors, config);
    client::validate_speaking(&mut errors, config);

    if config.logging.level.trim().is_empty() {
        errors.push("logging.level must not be empty".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
