//! MCP client handshake.
//!
//! Runs the fixed opening exchange against a freshly started provider:
//!
//! 1. `initialize` request (ID 1) with protocol version, client info and
//!    empty capabilities
//! 2. read the initialize response
//! 3. `notifications/initialized`
//! 4. `tools/list` request (ID 2)
//! 5. read the tool listing
//!
//! Every read is bounded by the handshake timeout.

use std::time::Duration;

use serde_json::{json, Value};

use crate::bridge::process::{ManagedProcess, ProcessState};
use crate::bridge::proxy::ToolDescriptor;
use crate::bridge::router::read_response;
use crate::config::BridgeSettings;
use crate::error::BridgeError;
use crate::mcp::protocol::{JsonRpcNotification, JsonRpcRequest, ProviderMessage, RequestId};
use crate::mcp::transport::LineChannel;

/// Request ID of `initialize`.
pub const INITIALIZE_ID: i64 = 1;

/// Request ID of `tools/list`.
pub const TOOLS_LIST_ID: i64 = 2;

/// Time given to the stderr reader to catch up before a failure is reported.
const STDERR_SETTLE: Duration = Duration::from_millis(50);

/// Performs the handshake and returns the tools the provider declares.
///
/// Moves the process to `Handshaking`, then to `Ready` on success or `Failed`
/// on error. A listing without a usable `tools` array is not an error: the
/// provider becomes ready with no tools.
///
/// # Errors
///
/// Returns [`BridgeError::Handshake`] if a write fails, a response is missing,
/// empty or undecodable, or a read exceeds the handshake timeout. The error
/// carries the provider's recent stderr output.
pub async fn handshake(
    process: &ManagedProcess,
    settings: &BridgeSettings,
) -> Result<Vec<ToolDescriptor>, BridgeError> {
    process.set_state(ProcessState::Handshaking);
    tracing::debug!(provider = %process.name(), "Starting handshake");

    match exchange(process, settings).await {
        Ok(listing) => {
            let tools = parse_tool_listing(process.name(), &listing);
            process.set_state(ProcessState::Ready);
            Ok(tools)
        }
        Err(reason) => {
            tokio::time::sleep(STDERR_SETTLE).await;
            let error = BridgeError::Handshake {
                provider: process.name().to_string(),
                reason,
                stderr: process.stderr(),
            };
            process.fail(error.to_string());
            Err(error)
        }
    }
}

/// Runs steps 1 to 5 and returns the `tools/list` response.
async fn exchange(
    process: &ManagedProcess,
    settings: &BridgeSettings,
) -> Result<ProviderMessage, String> {
    let mut guard = process.channel().await;
    let channel = guard
        .as_mut()
        .ok_or_else(|| "provider has no open streams".to_string())?;

    let initialize = JsonRpcRequest::new(
        INITIALIZE_ID,
        "initialize",
        Some(json!({
            "protocolVersion": settings.protocol_version,
            "capabilities": {},
            "clientInfo": {
                "name": settings.client_name,
                "version": settings.client_version,
            },
        })),
    );
    send(channel, &initialize, "initialize").await?;

    let response = receive(channel, process.name(), INITIALIZE_ID, settings, "initialize").await?;
    if let Some(error) = response.error {
        return Err(format!("initialize rejected: {error}"));
    }
    if let Some(server) = response.result.as_ref().and_then(|r| r.get("serverInfo")) {
        tracing::debug!(provider = %process.name(), %server, "Provider initialised");
    }

    let initialized = JsonRpcNotification::new("notifications/initialized", None);
    send(channel, &initialized, "notifications/initialized").await?;

    let list = JsonRpcRequest::new(TOOLS_LIST_ID, "tools/list", None);
    send(channel, &list, "tools/list").await?;

    receive(channel, process.name(), TOOLS_LIST_ID, settings, "tools/list").await
}

async fn send<T: serde::Serialize>(
    channel: &mut LineChannel,
    message: &T,
    step: &str,
) -> Result<(), String> {
    channel
        .write_message(message)
        .await
        .map_err(|e| format!("sending {step} failed: {e}"))
}

async fn receive(
    channel: &mut LineChannel,
    provider: &str,
    id: i64,
    settings: &BridgeSettings,
    step: &str,
) -> Result<ProviderMessage, String> {
    let id = RequestId::Number(id);
    match tokio::time::timeout(settings.handshake_timeout, read_response(channel, &id, provider))
        .await
    {
        Ok(Ok(message)) => Ok(message),
        Ok(Err(e)) => Err(format!("no valid {step} response: {e}")),
        Err(_) => Err(format!(
            "timed out after {}s waiting for {step} response",
            settings.handshake_timeout.as_secs_f64()
        )),
    }
}

/// Extracts tool descriptors from a `tools/list` response.
///
/// Entries without a name are skipped, as are repeated names after the first.
pub fn parse_tool_listing(provider: &str, listing: &ProviderMessage) -> Vec<ToolDescriptor> {
    let Some(entries) = listing
        .result
        .as_ref()
        .and_then(|r| r.get("tools"))
        .and_then(Value::as_array)
    else {
        let shown = listing
            .result
            .as_ref()
            .or(listing.error.as_ref())
            .map_or_else(|| "null".to_string(), Value::to_string);
        tracing::warn!("No tools found in '{provider}' response: {shown}");
        return Vec::new();
    };

    let mut tools: Vec<ToolDescriptor> = Vec::with_capacity(entries.len());
    for entry in entries {
        match ToolDescriptor::from_listing(entry) {
            Ok(tool) if tools.iter().any(|t| t.name == tool.name) => {
                tracing::warn!(provider, tool = %tool.name, "Ignoring repeated tool name");
            }
            Ok(tool) => tools.push(tool),
            Err(reason) => tracing::warn!(provider, %reason, "Skipping tool entry"),
        }
    }

    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    tracing::info!("Found {} tools in '{provider}': {names:?}", tools.len());
    tools
}
