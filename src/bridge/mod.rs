//! The MCP client bridge.
//!
//! This module starts MCP provider processes, discovers their tools, and
//! exposes each remote tool as a local [`ToolProxy`].
//!
//! # Architecture
//!
//! - [`process`]: provider child processes, their pipes and their lifecycle
//! - [`handshake`]: the `initialize` / `tools/list` opening exchange
//! - [`proxy`]: typed parameter slots and the per-tool proxy
//! - [`router`]: one serialised `tools/call` exchange per invocation
//! - [`registry`]: the provider table, concurrent discovery and shutdown
//!
//! # Example
//!
//! ```no_run
//! use stdio_mcp_bridge::bridge::Registry;
//! use stdio_mcp_bridge::config::{BridgeSettings, ProviderConfig};
//!
//! # async fn demo() {
//! let registry = Registry::new(BridgeSettings::default());
//! let tools = registry
//!     .load_all(vec![ProviderConfig::new("echo", "echo-mcp-server")], false)
//!     .await
//!     .into_flat();
//!
//! for tool in &tools {
//!     println!("{}: {}", tool.name(), tool.description());
//! }
//! registry.shutdown().await;
//! # }
//! ```

pub mod handshake;
pub mod process;
pub mod proxy;
pub mod registry;
pub mod router;

pub use process::{ManagedProcess, ProcessState};
pub use proxy::{materialize, ParamSpec, ParamType, ParamValue, ToolCall, ToolDescriptor, ToolProxy};
pub use registry::{LoadedTools, Registry};
pub use router::Router;
