//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format, which
//! is the `mcpServers` document understood by most MCP clients, optionally
//! extended with `bridge` and `logging` sections.

use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::ConfigError;

/// Protocol version announced in the `initialize` request.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

/// Client name announced in the `initialize` request.
pub const CLIENT_NAME: &str = "stdio-mcp-bridge";

/// Root configuration structure.
///
/// Unknown top-level keys are ignored so that configuration files shared with
/// other MCP clients can be used unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Provider definitions keyed by provider name, in file order.
    #[serde(default)]
    pub mcp_servers: IndexMap<String, ServerEntry>,

    /// Bridge tunables.
    #[serde(default)]
    pub bridge: BridgeSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mcp_servers.keys().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::ValidationError {
                message: "provider names in mcpServers cannot be empty".to_string(),
            });
        }
        if self.bridge.handshake_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "bridge.handshakeTimeoutSecs must be greater than zero".to_string(),
            });
        }
        if self.bridge.call_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "bridge.callTimeoutSecs must be greater than zero".to_string(),
            });
        }
        if self.bridge.protocol_version.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "bridge.protocolVersion cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the provider definitions in file order.
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderConfig> {
        self.mcp_servers
            .iter()
            .map(|(name, entry)| ProviderConfig {
                name: name.clone(),
                command: entry.command.clone().unwrap_or_default(),
                args: entry.args.clone(),
                env: entry.env.clone(),
            })
            .collect()
    }

    /// Returns the runtime settings derived from the `bridge` section.
    #[must_use]
    pub fn settings(&self) -> BridgeSettings {
        BridgeSettings {
            handshake_timeout: Duration::from_secs(self.bridge.handshake_timeout_secs),
            call_timeout: Duration::from_secs(self.bridge.call_timeout_secs),
            protocol_version: self.bridge.protocol_version.clone(),
            ..BridgeSettings::default()
        }
    }
}

/// One entry of the `mcpServers` map as written in the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerEntry {
    /// Executable to launch.
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides merged onto the bridge's own environment.
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

/// Definition of one provider process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Unique provider name.
    pub name: String,
    /// Executable to launch. Empty when the file did not specify one.
    pub command: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Environment overrides.
    pub env: IndexMap<String, String>,
}

impl ProviderConfig {
    /// Creates a provider definition with no arguments or environment overrides.
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: IndexMap::new(),
        }
    }

    /// Sets the argument list.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Adds one environment override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// The `bridge` section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BridgeSection {
    /// Bound on each handshake read, in seconds.
    /// Default: 10
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Bound on waiting for a tool call response, in seconds.
    /// Default: 30
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Protocol version sent in `initialize`.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            call_timeout_secs: default_call_timeout(),
            protocol_version: default_protocol_version(),
        }
    }
}

const fn default_handshake_timeout() -> u64 {
    10
}

const fn default_call_timeout() -> u64 {
    30
}

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.to_string()
}

/// Runtime settings shared by the handshake and the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Bound on each handshake read.
    pub handshake_timeout: Duration,
    /// Bound on waiting for one tool call response.
    pub call_timeout: Duration,
    /// Protocol version sent in `initialize`.
    pub protocol_version: String,
    /// Client name sent in `initialize`.
    pub client_name: String,
    /// Client version sent in `initialize`.
    pub client_version: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(default_handshake_timeout()),
            call_timeout: Duration::from_secs(default_call_timeout()),
            protocol_version: default_protocol_version(),
            client_name: CLIENT_NAME.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl BridgeSettings {
    /// Overrides both timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, handshake: Duration, call: Duration) -> Self {
        self.handshake_timeout = handshake;
        self.call_timeout = call;
        self
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
