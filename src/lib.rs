//! stdio-mcp-bridge: use tools from MCP servers that run as child processes
//!
//! This library starts Model Context Protocol servers as subprocesses, talks to
//! them over newline-delimited JSON-RPC on their stdin/stdout, and turns every
//! tool they declare into a local, typed, callable proxy.
//!
//! # Architecture
//!
//! - **Discovery**: each configured provider is started and handshaken
//!   concurrently; failures are isolated to the provider that failed
//! - **Proxies**: a tool's JSON input schema becomes typed parameter slots
//! - **Routing**: calls to one provider are serialised, calls to different
//!   providers run in parallel, and every call has a deadline
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: JSON-RPC codec, line transport and the re-export server
//! - [`bridge`]: Provider processes, handshake, proxies, routing and registry

pub mod bridge;
pub mod config;
pub mod error;
pub mod mcp;
