//! Configuration schema types for Chorus.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod client;
mod logging;
mod server;

pub use client::*;
pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root configuration shared by the server binary and client library.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

// =============================================================================
// Tests
// =============================================================================
