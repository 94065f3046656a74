//! MCP server that re-exports bridged tools.
//!
//! This module implements the server side of the MCP lifecycle so that the
//! tools discovered from every provider can be offered to a single upstream
//! client over stdio:
//!
//! 1. **Initialisation**: Capability negotiation and version agreement
//! 2. **Operation**: `tools/list` and `tools/call`, forwarded to the providers
//! 3. **Shutdown**: EOF on stdin or a termination signal
//!
//! Tool names are flat. When two providers declare the same name, the first
//! provider in configuration order wins.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::bridge::ToolProxy;
use crate::config::DEFAULT_PROTOCOL_VERSION;
use crate::mcp::protocol::{
    ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RequestId, SERVER_NAME,
};
use crate::mcp::transport::LineChannel;

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Shutdown in progress.
    ShuttingDown,
}

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ToolCapabilities::default()),
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session.
    #[serde(rename = "listChanged", skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires fn(&T) -> bool
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// A tool definition for tools/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

impl From<&ToolProxy> for ToolDefinition {
    fn from(tool: &ToolProxy) -> Self {
        let schema = tool.input_schema();
        Self {
            name: tool.name().to_string(),
            description: Some(tool.description().to_string()).filter(|d| !d.is_empty()),
            input_schema: if schema.is_object() {
                schema.clone()
            } else {
                json!({"type": "object"})
            },
        }
    }
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }
}

/// MCP server offering the bridged tools to one upstream client.
pub struct BridgeServer {
    /// Current server state.
    state: ServerState,
    /// Upstream client channel.
    channel: LineChannel,
    /// Negotiated protocol version (set after initialisation).
    protocol_version: Option<String>,
    /// Exported tools by name.
    tools: IndexMap<String, ToolProxy>,
}

impl BridgeServer {
    /// Creates a server on stdin/stdout exporting `tools`.
    #[must_use]
    pub fn new(tools: Vec<ToolProxy>) -> Self {
        Self::with_channel(tools, LineChannel::stdio())
    }

    /// Creates a server on an arbitrary channel.
    #[must_use]
    pub fn with_channel(tools: Vec<ToolProxy>, channel: LineChannel) -> Self {
        let mut exported: IndexMap<String, ToolProxy> = IndexMap::with_capacity(tools.len());
        for tool in tools {
            if let Some(first) = exported.get(tool.name()) {
                tracing::warn!(
                    tool = %tool.name(),
                    provider = %tool.provider(),
                    kept = %first.provider(),
                    "Duplicate tool name, keeping the first provider's tool"
                );
                continue;
            }
            exported.insert(tool.name().to_string(), tool);
        }

        Self {
            state: ServerState::AwaitingInit,
            channel,
            protocol_version: None,
            tools: exported,
        }
    }

    /// Returns the current server state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Returns the negotiated protocol version, once initialised.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Returns the exported tool definitions.
    #[must_use]
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(ToolDefinition::from).collect()
    }

    /// Runs the MCP server main loop with graceful shutdown handling.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run(&mut self) -> std::io::Result<()> {
        self.run_with_shutdown().await
    }

    /// Serves requests until the client closes the channel.
    ///
    /// Unlike [`BridgeServer::run`], signals are not handled.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve(&mut self) -> std::io::Result<()> {
        loop {
            let line_result = self.channel.read_line().await;
            if self.handle_transport_result(line_result).await? {
                return Ok(());
            }
        }
    }

    /// Runs the main loop and handles shutdown.
    #[cfg(unix)]
    async fn run_with_shutdown(&mut self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(std::io::Error::other)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(std::io::Error::other)?;

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                    self.state = ServerState::ShuttingDown;
                    return Ok(());
                }

                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    self.state = ServerState::ShuttingDown;
                    return Ok(());
                }

                line_result = self.channel.read_line() => {
                    if self.handle_transport_result(line_result).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Runs the main loop and handles shutdown.
    #[cfg(windows)]
    async fn run_with_shutdown(&mut self) -> std::io::Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                    self.state = ServerState::ShuttingDown;
                    return Ok(());
                }

                line_result = self.channel.read_line() => {
                    if self.handle_transport_result(line_result).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Handles the result from transport read.
    ///
    /// Returns `true` if the server should shut down.
    async fn handle_transport_result(
        &mut self,
        line_result: std::io::Result<Option<String>>,
    ) -> std::io::Result<bool> {
        let Some(line) = line_result? else {
            self.state = ServerState::ShuttingDown;
            return Ok(true);
        };

        if line.trim().is_empty() {
            return Ok(false);
        }

        self.handle_line(&line).await?;

        Ok(self.state == ServerState::ShuttingDown)
    }

    /// Handles a single line of input.
    async fn handle_line(&mut self, line: &str) -> std::io::Result<()> {
        use crate::mcp::protocol::parse_message;

        match parse_message(line) {
            Ok(msg) => self.handle_message(msg).await,
            Err(error) => self.channel.write_message(&error).await,
        }
    }

    /// Handles a parsed incoming message.
    async fn handle_message(&mut self, msg: IncomingMessage) -> std::io::Result<()> {
        match msg {
            IncomingMessage::Request(req) => self.handle_request(req).await,
            IncomingMessage::Notification(ref notif) => {
                self.handle_notification(notif);
                Ok(())
            }
        }
    }

    /// Handles an incoming request.
    async fn handle_request(&mut self, req: JsonRpcRequest) -> std::io::Result<()> {
        tracing::debug!(method = %req.method, id = %req.id, "Request from client");
        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(&req),
            "tools/list" => self.handle_tools_list(&req),
            "tools/call" => self.handle_tools_call(&req).await,
            "ping" => Ok(Self::handle_ping(&req)),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        };

        match response {
            Ok(resp) => self.channel.write_message(&resp).await,
            Err(error) => self.channel.write_message(&error).await,
        }
    }

    /// Handles an incoming notification.
    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        if notif.method == "notifications/initialized" && self.state == ServerState::Initialising {
            self.state = ServerState::Running;
        }
    }

    /// Handles the initialize request.
    fn handle_initialize(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        if self.state != ServerState::AwaitingInit {
            return Err(JsonRpcError::new(
                Some(req.id.clone()),
                JsonRpcErrorData::with_message(
                    ErrorCode::InvalidRequest,
                    "Server already initialised",
                ),
            ));
        }

        let params: InitializeParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(
                    req.id.clone(),
                    format!("Invalid initialize params: {e}"),
                )
            })?
            .ok_or_else(|| {
                JsonRpcError::invalid_params(req.id.clone(), "Missing initialize params")
            })?;

        if let Some(client) = &params.client_info {
            tracing::info!(
                client = %client.name,
                version = client.version.as_deref().unwrap_or("unknown"),
                requested = %params.protocol_version,
                "Client connected"
            );
        }

        let negotiated_version = DEFAULT_PROTOCOL_VERSION.to_string();

        self.protocol_version = Some(negotiated_version.clone());
        self.state = ServerState::Initialising;

        let result = json!({
            "protocolVersion": negotiated_version,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": ServerInfo::default(),
        });

        Ok(JsonRpcResponse::success(req.id.clone(), result))
    }

    /// Handles the tools/list request.
    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;

        let result = json!({
            "tools": self.tool_definitions(),
        });

        Ok(JsonRpcResponse::success(req.id.clone(), result))
    }

    /// Handles the tools/call request by forwarding it to the owning provider.
    async fn handle_tools_call(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;

        let params: ToolCallParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(
                    req.id.clone(),
                    format!("Invalid tool call params: {e}"),
                )
            })?
            .ok_or_else(|| {
                JsonRpcError::invalid_params(req.id.clone(), "Missing tool call params")
            })?;

        let arguments = match params.arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(JsonRpcError::invalid_params(
                    req.id.clone(),
                    format!("Tool arguments must be an object, got {other}"),
                ));
            }
        };

        let result = match self.tools.get(&params.name) {
            Some(tool) => match tool.try_invoke(arguments).await {
                Ok(text) => ToolCallResult::text(text),
                Err(e) => {
                    tracing::warn!(tool = %params.name, error = %e, "Tool call failed");
                    ToolCallResult::error(e.to_tool_text())
                }
            },
            None => ToolCallResult::error(format!("Unknown tool: {}", params.name)),
        };

        let result_value = serde_json::to_value(&result).map_err(|e| {
            tracing::error!(error = %e, "Failed to serialise tool call result");
            JsonRpcError::internal_error(
                req.id.clone(),
                "Internal error: failed to serialise result",
            )
        })?;

        Ok(JsonRpcResponse::success(req.id.clone(), result_value))
    }

    /// Handles the ping request.
    fn handle_ping(req: &JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(req.id.clone(), json!({}))
    }

    /// Ensures the server is in the Running state.
    fn require_running(&self, id: &RequestId) -> Result<(), JsonRpcError> {
        if self.state != ServerState::Running {
            return Err(JsonRpcError::new(
                Some(id.clone()),
                JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Server not initialised"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::router::Router;
    use crate::bridge::{materialize, ToolDescriptor};

    fn detached_tool(name: &str, provider: &str) -> ToolProxy {
        let descriptor = ToolDescriptor::from_schema(
            name,
            format!("{name} from {provider}"),
            json!({"type": "object", "properties": {}}),
        );
        materialize(descriptor, provider, &Router::detached())
    }

    fn server_on_duplex(tools: Vec<ToolProxy>) -> (BridgeServer, LineChannel) {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server_end);
        let server = BridgeServer::with_channel(tools, LineChannel::new(reader, writer));
        let (client_reader, client_writer) = tokio::io::split(client_end);
        (server, LineChannel::new(client_reader, client_writer))
    }

    async fn reply(client: &mut LineChannel) -> Value {
        let line = client.read_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn server_initial_state() {
        let (server, _client) = server_on_duplex(Vec::new());
        assert_eq!(server.state(), ServerState::AwaitingInit);
    }

    #[test]
    fn first_provider_wins_on_duplicate_names() {
        let tools = vec![
            detached_tool("search", "alpha"),
            detached_tool("fetch", "alpha"),
            detached_tool("search", "beta"),
        ];
        let (server, _client) = server_on_duplex(tools);

        let definitions = server.tool_definitions();
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].name, "search");
        assert_eq!(
            definitions[0].description.as_deref(),
            Some("search from alpha")
        );
        for definition in &definitions {
            assert!(definition.input_schema.is_object());
        }
    }

    #[test]
    fn tool_call_result_text() {
        let result = ToolCallResult::text("Hello, world!");
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 1);

        match &result.content[0] {
            ToolContent::Text { text } => assert_eq!(text, "Hello, world!"),
        }
    }

    #[test]
    fn tool_call_result_error() {
        let result = ToolCallResult::error("Something went wrong");
        assert!(result.is_error);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["isError"], json!(true));
        assert_eq!(value["content"][0]["type"], json!("text"));
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let (mut server, mut client) = server_on_duplex(vec![detached_tool("search", "gone")]);
        let session = tokio::spawn(async move {
            server.serve().await.unwrap();
            server.state()
        });

        client
            .write_message(&JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap();
        let early = client.read_line().await.unwrap().unwrap();
        assert!(early.contains("Server not initialised"));

        client
            .write_message(&JsonRpcRequest::new(
                2,
                "initialize",
                Some(json!({
                    "protocolVersion": DEFAULT_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "test", "version": "0"}
                })),
            ))
            .await
            .unwrap();
        let init = reply(&mut client).await;
        assert_eq!(init["result"]["serverInfo"]["name"], json!(SERVER_NAME));

        client
            .write_message(&JsonRpcNotification::new("notifications/initialized", None))
            .await
            .unwrap();
        client
            .write_message(&JsonRpcRequest::new(3, "tools/list", None))
            .await
            .unwrap();
        let list = reply(&mut client).await;
        assert_eq!(list["result"]["tools"][0]["name"], json!("search"));

        client
            .write_message(&JsonRpcRequest::new(
                4,
                "tools/call",
                Some(json!({"name": "search", "arguments": {}})),
            ))
            .await
            .unwrap();
        let call = reply(&mut client).await;
        assert_eq!(call["result"]["isError"], json!(true));
        assert_eq!(
            call["result"]["content"][0]["text"],
            json!("Error: MCP process 'gone' not found")
        );

        client
            .write_message(&JsonRpcRequest::new(
                5,
                "tools/call",
                Some(json!({"name": "missing"})),
            ))
            .await
            .unwrap();
        let unknown = reply(&mut client).await;
        assert_eq!(
            unknown["result"]["content"][0]["text"],
            json!("Unknown tool: missing")
        );

        client.close().await.unwrap();
        assert_eq!(session.await.unwrap(), ServerState::ShuttingDown);
    }

    #[tokio::test]
    async fn malformed_input_gets_parse_error() {
        let (mut server, mut client) = server_on_duplex(Vec::new());
        let session = tokio::spawn(async move { server.serve().await });

        client.write_message(&json!("not an object")).await.unwrap();
        let error = reply(&mut client).await;
        assert_eq!(error["error"]["code"], json!(-32700));

        client
            .write_message(&JsonRpcRequest::new(7, "resources/list", None))
            .await
            .unwrap();
        let error = reply(&mut client).await;
        assert_eq!(error["id"], json!(7));
        assert_eq!(error["error"]["code"], json!(-32601));

        client.close().await.unwrap();
        session.await.unwrap().unwrap();
    }
}
