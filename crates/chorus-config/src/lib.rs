//! Chorus configuration system.
//!
//! TOML-based configuration for the presence server and the client
//! connection stack. Every section uses `serde(default)` so partial files
//! work out of the box.
//!
//! ```rust,no_run
//! use chorus_config::load_config;
//!
//! let config = load_config(None).expect("failed to load config");
//! println!("listening on {}", config.server.bind);
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    AuthConfig, AuthMode, ChorusConfig, ClientConfig, ConnectionConfig, LoggingConfig,
    MessagesConfig, RelayPolicyConfig, RoomsConfig, ServerConfig, SpeakingConfig, StaticUser,
};

use std::path::Path;

use chorus_common::ConfigError;

/// Load and validate config.
///
/// With an explicit `path` the file must exist. Without one, `config.toml`
/// is read from the platform config directory and created with defaults if
/// missing.
pub fn load_config(path: Option<&Path>) -> Result<ChorusConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            toml_loader::load_from_path(path)?
        }
        None => toml_loader::load_default()?,
    };

    validation::validate(&config)?;
    Ok(config)
}
