//! Configuration file loading and parsing.
//!
//! This module handles loading the provider configuration file from disk and
//! parsing it into validated, type-safe structures.
//!
//! # Configuration File Location
//!
//! The path comes from the `CONFIG_FILE` CLI argument or, failing that, the
//! `MCP_CONFIG_PATH` environment variable. There is no default location: a
//! bridge without a configuration file simply has no providers.
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "files": {
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/srv"],
//!       "env": {"NODE_ENV": "production"}
//!     }
//!   },
//!   "bridge": {"handshakeTimeoutSecs": 10, "callTimeoutSecs": 30}
//! }
//! ```

mod settings;

pub use settings::{
    BridgeSection, BridgeSettings, Config, LoggingConfig, ProviderConfig, ServerEntry,
    CLIENT_NAME, DEFAULT_PROTOCOL_VERSION,
};

use std::path::Path;

use crate::error::ConfigError;

/// Environment variable consulted when no configuration path is given.
pub const CONFIG_PATH_ENV: &str = "MCP_CONFIG_PATH";

/// Loads and parses the configuration file.
///
/// # Errors
///
/// Returns an error if:
/// - The configuration file cannot be found
/// - The file cannot be read
/// - The JSON is malformed
/// - Validation fails
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    config.validate()?;

    Ok(config)
}

/// Loads the configuration file, falling back to an empty configuration.
///
/// A missing path, a missing file, unreadable or invalid JSON, and failed
/// validation all yield [`Config::default`], which has no providers. The
/// reason is logged at `warn` level.
#[must_use]
pub fn load_config_or_default(path: Option<&Path>) -> Config {
    load_optional_config(path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Ignoring configuration, starting without providers");
        Config::default()
    })
}

/// Loads the configuration file if a path was given.
///
/// No path yields [`Config::default`].
///
/// # Errors
///
/// Returns the same errors as [`load_config`].
pub fn load_optional_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    path.map_or_else(
        || {
            tracing::debug!("No configuration path given, starting without providers");
            Ok(Config::default())
        },
        load_config,
    )
}
