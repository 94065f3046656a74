//! Model Context Protocol (MCP) plumbing.
//!
//! The bridge speaks MCP in two directions. As a client it drives provider
//! processes over their stdin/stdout; as a server it can offer the tools it
//! discovered to an upstream client on its own stdio. Both directions use
//! newline-delimited JSON-RPC 2.0.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐        ┌───────────────────────────┐        ┌────────────┐
//! │   upstream   │ stdio  │          bridge           │ pipes  │  provider  │
//! │    client    │◀──────▶│  server ──▶ tool proxies  │◀──────▶│  processes │
//! └──────────────┘        │      (transport/protocol) │        └────────────┘
//!                         └───────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! The handshake sends MCP protocol version 2025-03-26 unless configured
//! otherwise.

pub mod protocol;
pub mod server;
pub mod transport;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, ProviderMessage};
pub use server::BridgeServer;
pub use transport::LineChannel;
