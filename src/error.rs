//! Error types for stdio-mcp-bridge.
//!
//! Two families live here:
//!
//! - [`ConfigError`] for loading the provider configuration file.
//! - [`BridgeError`] for everything that can go wrong between the bridge and
//!   a provider process: spawning, the handshake, and tool invocation.
//!
//! Tool invocation never surfaces a [`BridgeError`] to its caller directly.
//! The router renders it with [`BridgeError::to_tool_text`] so that every call
//! yields text, while [`BridgeError::kind`] keeps the structured kind
//! available to code that wants to branch on it.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Discriminant of a [`BridgeError`], for matching without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeErrorKind {
    /// The provider process could not be started.
    Spawn,
    /// The initialize / tools/list exchange failed.
    Handshake,
    /// No live provider process is registered under the requested name.
    UnknownProvider,
    /// The provider did not answer a tool call in time.
    InvocationTimeout,
    /// The provider answered a tool call with a JSON-RPC `error`.
    RemoteTool,
    /// Pipe I/O failed or the provider went away mid-call.
    Transport,
    /// A line read from the provider was not a JSON-RPC message.
    MalformedMessage,
    /// Arguments did not satisfy the tool's input schema.
    InvalidArguments,
}

/// Errors raised while talking to provider processes.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The provider process could not be created or exited immediately.
    #[error("failed to start provider '{provider}': {reason}")]
    Spawn {
        /// Name of the provider.
        provider: String,
        /// What went wrong, including captured stderr when available.
        reason: String,
    },

    /// The handshake did not complete.
    #[error(
        "handshake with provider '{provider}' failed: {reason}{}",
        stderr_suffix(stderr.as_deref())
    )]
    Handshake {
        /// Name of the provider.
        provider: String,
        /// What went wrong.
        reason: String,
        /// Text buffered from the provider's stderr at the time of failure.
        stderr: Option<String>,
    },

    /// The invocation references a provider without a live process.
    #[error("MCP process '{provider}' not found")]
    UnknownProvider {
        /// Name of the provider.
        provider: String,
    },

    /// No response arrived within the call deadline.
    #[error("Tool execution timed out after {}s", timeout.as_secs_f64())]
    InvocationTimeout {
        /// Name of the tool that was called.
        tool: String,
        /// The deadline that expired.
        timeout: Duration,
    },

    /// The provider reported an error for the call.
    #[error("{error}")]
    RemoteTool {
        /// Name of the tool that was called.
        tool: String,
        /// The JSON-RPC `error` member, rendered as compact JSON.
        error: String,
    },

    /// Reading from or writing to the provider failed.
    #[error("transport failure: {reason}")]
    Transport {
        /// What went wrong.
        reason: String,
    },

    /// A line from the provider could not be decoded.
    #[error("malformed JSON-RPC message: {reason}")]
    MalformedMessage {
        /// Why decoding failed.
        reason: String,
    },

    /// Arguments were rejected before anything was sent.
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments {
        /// Name of the tool.
        tool: String,
        /// Why the arguments were rejected.
        reason: String,
    },
}

impl BridgeError {
    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> BridgeErrorKind {
        match self {
            Self::Spawn { .. } => BridgeErrorKind::Spawn,
            Self::Handshake { .. } => BridgeErrorKind::Handshake,
            Self::UnknownProvider { .. } => BridgeErrorKind::UnknownProvider,
            Self::InvocationTimeout { .. } => BridgeErrorKind::InvocationTimeout,
            Self::RemoteTool { .. } => BridgeErrorKind::RemoteTool,
            Self::Transport { .. } => BridgeErrorKind::Transport,
            Self::MalformedMessage { .. } => BridgeErrorKind::MalformedMessage,
            Self::InvalidArguments { .. } => BridgeErrorKind::InvalidArguments,
        }
    }

    /// Creates a transport error from anything displayable.
    #[must_use]
    pub fn transport(reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            reason: reason.to_string(),
        }
    }

    /// Renders the error as the text returned from a tool invocation.
    #[must_use]
    pub fn to_tool_text(&self) -> String {
        format!("Error: {self}")
    }
}

fn stderr_suffix(stderr: Option<&str>) -> String {
    stderr.map_or_else(String::new, |text| format!(". Stderr: {text}"))
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err)
    }
}
