//! Invocation routing.
//!
//! The [`Router`] turns a proxy call into one `tools/call` exchange with the
//! owning provider. It holds the provider's serialisation lock from the moment
//! the request is written until the matching response is read (or the call
//! times out), so requests on one provider never overlap while calls to
//! different providers proceed independently.

use std::sync::Weak;

use serde_json::{json, Map, Value};

use crate::bridge::process::ProcessState;
use crate::bridge::registry::Registry;
use crate::error::{BridgeError, BridgeErrorKind};
use crate::mcp::protocol::{decode, JsonRpcRequest, ProviderMessage, RequestId};
use crate::mcp::transport::LineChannel;

/// Routes tool invocations to provider processes.
///
/// Holds only a weak reference to the [`Registry`]: once the registry is
/// dropped, every call fails with [`BridgeError::UnknownProvider`].
#[derive(Debug, Clone)]
pub struct Router {
    registry: Weak<Registry>,
}

impl Router {
    pub(crate) const fn new(registry: Weak<Registry>) -> Self {
        Self { registry }
    }

    /// A router attached to no registry.
    #[cfg(test)]
    pub(crate) const fn detached() -> Self {
        Self::new(Weak::new())
    }

    /// Invokes `tool` on `provider`, returning its text or an error text.
    ///
    /// Never fails: errors are rendered with [`BridgeError::to_tool_text`].
    pub async fn invoke(&self, provider: &str, tool: &str, arguments: Map<String, Value>) -> String {
        self.try_invoke(provider, tool, arguments)
            .await
            .unwrap_or_else(|e| e.to_tool_text())
    }

    /// Invokes `tool` on `provider` with ready-made `arguments`.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::UnknownProvider`] if no ready process has that name
    /// - [`BridgeError::InvocationTimeout`] if no response arrives in time
    /// - [`BridgeError::RemoteTool`] if the provider answers with an error
    /// - [`BridgeError::Transport`] if the pipes fail or the provider exits
    /// - [`BridgeError::MalformedMessage`] if the provider writes garbage
    pub async fn try_invoke(
        &self,
        provider: &str,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<String, BridgeError> {
        let unknown = || BridgeError::UnknownProvider {
            provider: provider.to_string(),
        };

        let registry = self.registry.upgrade().ok_or_else(unknown)?;
        let process = registry.process(provider).ok_or_else(unknown)?;
        let timeout = registry.settings().call_timeout;
        drop(registry);

        let mut guard = process.channel().await;
        if process.state() != ProcessState::Ready {
            return Err(unknown());
        }
        let channel = guard.as_mut().ok_or_else(unknown)?;

        let id = process.next_request_id();
        let request = JsonRpcRequest::new(
            id.clone(),
            "tools/call",
            Some(json!({ "name": tool, "arguments": arguments })),
        );
        tracing::debug!(provider, tool, %id, "Sending tools/call");

        let mut written = false;
        let exchange = async {
            if let Err(e) = channel.write_message(&request).await {
                return Err(BridgeError::from(e));
            }
            written = true;
            read_response(channel, &id, provider).await
        };
        let outcome = tokio::time::timeout(timeout, exchange).await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(provider, tool, %id, "Tool call timed out");
                if !written {
                    // A partial request line would corrupt the next frame.
                    tracing::error!(provider, "Request write cut off, provider no longer usable");
                    process.fail(format!("request to provider '{provider}' was cut off mid-write"));
                }
                return Err(BridgeError::InvocationTimeout {
                    tool: tool.to_string(),
                    timeout,
                });
            }
        };

        match outcome {
            Ok(message) => render_response(tool, message),
            Err(e) => {
                if e.kind() == BridgeErrorKind::Transport {
                    tracing::error!(provider, error = %e, "Provider I/O failed");
                    process.fail(e.to_string());
                }
                Err(e)
            }
        }
    }
}

/// Reads lines until the response to `id` arrives.
///
/// Notifications, provider-initiated requests and responses to other IDs are
/// logged and skipped.
pub(crate) async fn read_response(
    channel: &mut LineChannel,
    id: &RequestId,
    provider: &str,
) -> Result<ProviderMessage, BridgeError> {
    loop {
        let line = channel.read_line().await?.ok_or_else(|| {
            BridgeError::transport(format!("provider '{provider}' closed its output"))
        })?;
        let message = decode(&line)?;
        if message.answers(id) {
            return Ok(message);
        }
        tracing::debug!(provider, expected = %id, %line, "Skipping unrelated message");
    }
}

/// Renders a `tools/call` response as the text returned to the caller.
///
/// The `error` member becomes [`BridgeError::RemoteTool`]. Otherwise the
/// result's `content` is returned if present, else the whole result; strings
/// are returned as they are and anything else as compact JSON.
pub(crate) fn render_response(tool: &str, message: ProviderMessage) -> Result<String, BridgeError> {
    if let Some(error) = message.error {
        return Err(BridgeError::RemoteTool {
            tool: tool.to_string(),
            error: render_value(&error),
        });
    }

    let result = message.result.unwrap_or_else(|| Value::Object(Map::new()));
    Ok(match result.get("content") {
        Some(content) => render_value(content),
        None => render_value(&result),
    })
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(line: &str) -> ProviderMessage {
        decode(line).unwrap()
    }

    #[test]
    fn string_content_is_returned_verbatim() {
        let msg = response(r#"{"jsonrpc":"2.0","id":3,"result":{"content":"pong"}}"#);
        assert_eq!(render_response("ping", msg).unwrap(), "pong");
    }

    #[test]
    fn structured_content_is_compact_json() {
        let msg = response(
            r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"hi"}]}}"#,
        );
        assert_eq!(
            render_response("t", msg).unwrap(),
            r#"[{"type":"text","text":"hi"}]"#
        );
    }

    #[test]
    fn result_without_content_is_rendered_whole() {
        let msg = response(r#"{"jsonrpc":"2.0","id":3,"result":{"value":42}}"#);
        assert_eq!(render_response("t", msg).unwrap(), r#"{"value":42}"#);

        let msg = response(r#"{"jsonrpc":"2.0","id":3,"result":"plain"}"#);
        assert_eq!(render_response("t", msg).unwrap(), "plain");

        let msg = response(r#"{"jsonrpc":"2.0","id":3}"#);
        assert_eq!(render_response("t", msg).unwrap(), "{}");
    }

    #[test]
    fn error_member_becomes_remote_tool_error() {
        let msg = response(r#"{"jsonrpc":"2.0","id":3,"error":{"code":-1,"message":"boom"}}"#);
        let err = render_response("explode", msg).unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::RemoteTool);
        assert_eq!(err.to_tool_text(), r#"Error: {"code":-1,"message":"boom"}"#);
    }

    #[tokio::test]
    async fn read_response_skips_unrelated_messages() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"roots/list\"}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n")
            .read(b"{\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"content\":\"ok\"}}\n")
            .build();
        let (reader, writer) = tokio::io::split(mock);
        let mut channel = LineChannel::new(reader, writer);

        let msg = read_response(&mut channel, &RequestId::Number(3), "p")
            .await
            .unwrap();
        assert_eq!(msg.id, Some(RequestId::Number(3)));
    }

    #[tokio::test]
    async fn read_response_reports_eof_as_transport() {
        let mock = tokio_test::io::Builder::new().build();
        let (reader, writer) = tokio::io::split(mock);
        let mut channel = LineChannel::new(reader, writer);

        let err = read_response(&mut channel, &RequestId::Number(3), "p")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::Transport);
        assert!(err.to_string().contains("closed its output"));
    }

    #[tokio::test]
    async fn detached_router_reports_unknown_provider() {
        let text = Router::detached().invoke("gone", "t", Map::new()).await;
        assert_eq!(text, "Error: MCP process 'gone' not found");
    }
}
