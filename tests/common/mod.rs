//! Scripted MCP providers for integration tests.
//!
//! [`fake_provider`] runs a provider inside the test process over an
//! in-memory duplex pipe. [`script_provider`] builds a `sh` one-liner that
//! behaves like a minimal real provider process.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use stdio_mcp_bridge::bridge::ManagedProcess;
use stdio_mcp_bridge::config::ProviderConfig;
use stdio_mcp_bridge::mcp::LineChannel;

/// How a fake provider answers one `tools/call`.
pub enum Reply {
    /// `result.content` set to the value.
    Content(Value),
    /// JSON-RPC `error` member set to the value.
    Error(Value),
    /// No answer at all.
    Ignore,
    /// Answer with `result.content` after a delay.
    Delayed(Duration, Value),
    /// Close the pipes without answering.
    Hangup,
    /// Keep the pipes open but stop reading requests.
    Stall,
}

/// What a fake provider observed.
#[derive(Clone, Default)]
pub struct Observed {
    calls: Arc<Mutex<Vec<Value>>>,
    overlapped: Arc<AtomicBool>,
}

impl Observed {
    /// Every `tools/call` request received, in order.
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether a request arrived while an earlier one was still unanswered.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }
}

/// Builds a `tools/list` entry.
pub fn tool(name: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": format!("The {name} tool"),
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        }
    })
}

/// Starts an in-process provider that declares `tools` and answers calls
/// with `respond(tool_name, arguments)`.
///
/// Must be called from within a Tokio runtime.
pub fn fake_provider<F>(name: &str, tools: Value, respond: F) -> (ManagedProcess, Observed)
where
    F: Fn(&str, &Value) -> Reply + Send + 'static,
{
    let (bridge_end, provider_end) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(bridge_end);
    let process = ManagedProcess::from_streams(ProviderConfig::new(name, name), reader, writer);

    let (provider_reader, provider_writer) = tokio::io::split(provider_end);
    let mut channel = LineChannel::new(provider_reader, provider_writer);
    let observed = Observed::default();
    let seen = observed.clone();
    let server_name = name.to_string();

    tokio::spawn(async move {
        let mut backlog: VecDeque<String> = VecDeque::new();
        loop {
            let line = match backlog.pop_front() {
                Some(line) => line,
                None => match channel.read_line().await {
                    Ok(Some(line)) => line,
                    _ => break,
                },
            };
            let Ok(message) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let id = message.get("id").cloned().unwrap_or(Value::Null);
            let result = |result: Value| json!({"jsonrpc": "2.0", "id": id, "result": result});

            let reply = match message["method"].as_str().unwrap_or_default() {
                "initialize" => Some(result(json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": server_name, "version": "0.0.0"}
                }))),
                "tools/list" => Some(result(json!({"tools": tools}))),
                "tools/call" => {
                    seen.calls.lock().unwrap().push(message.clone());
                    let params = &message["params"];
                    let tool = params["name"].as_str().unwrap_or_default();
                    match respond(tool, &params["arguments"]) {
                        Reply::Content(content) => Some(result(json!({"content": content}))),
                        Reply::Error(error) => {
                            Some(json!({"jsonrpc": "2.0", "id": id, "error": error}))
                        }
                        Reply::Ignore => None,
                        Reply::Delayed(delay, content) => {
                            let deadline = tokio::time::Instant::now() + delay;
                            while let Ok(Ok(Some(next))) =
                                tokio::time::timeout_at(deadline, channel.read_line()).await
                            {
                                seen.overlapped.store(true, Ordering::SeqCst);
                                backlog.push_back(next);
                            }
                            Some(result(json!({"content": content})))
                        }
                        Reply::Hangup => break,
                        Reply::Stall => {
                            std::future::pending::<()>().await;
                            None
                        }
                    }
                }
                _ => None,
            };

            if let Some(reply) = reply {
                if channel.write_message(&reply).await.is_err() {
                    break;
                }
            }
        }
    });

    (process, observed)
}

/// A `sh` provider that declares `tools_json` and answers every call with
/// `content` as a string.
#[cfg(unix)]
pub fn script_provider(name: &str, tools_json: &str, content: &str) -> ProviderConfig {
    let script = r#"
read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"serverInfo":{"name":"script"}}}'
read -r line
read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":TOOLS}}'
while read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\).*/\1/p')
  printf '{"jsonrpc":"2.0","id":%s,"result":{"content":"%s"}}\n' "$id" 'CONTENT'
done
"#
    .replace("TOOLS", tools_json)
    .replace("CONTENT", content);

    ProviderConfig::new(name, "sh").with_args(["-c".to_string(), script])
}
