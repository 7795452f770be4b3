//! External tool servers over JSON-RPC 2.0 on child-process stdio.
//!
//! One JSON object per line in each direction. The client performs the
//! `initialize` handshake, lists the server's tools, and wraps each as a
//! registry [`Tool`] whose invocation is a `tools/call` round-trip.
//! Writes and the matching read are serialized under one lock, so calls
//! are sequential per server.

use axe_core::error::ToolError;
use axe_core::types::ToolDef;
use axe_tools::Tool;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "axe";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("start tool server: {0}")]
    Spawn(String),

    #[error("tool server io: {0}")]
    Io(#[from] std::io::Error),

    #[error("tool server protocol: {0}")]
    Protocol(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("tool error: {0}")]
    Tool(String),
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    params: Value,
}

#[derive(Serialize)]
struct RpcNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: i64,
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// A tool advertised by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolInfo>,
}

#[derive(Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<CallContent>,
    #[serde(rename = "isError", default)]
    is_error: bool,
}

#[derive(Deserialize)]
struct CallContent {
    #[serde(rename = "type", default)]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug)]
struct ServerIo {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

/// Client for one external tool server.
#[derive(Debug)]
pub struct McpClient {
    io: Mutex<ServerIo>,
    next_id: AtomicI64,
}

impl McpClient {
    /// Spawn the server and run the initialize handshake. On handshake
    /// failure the child is killed before the error is returned.
    pub async fn spawn(command: &str, args: &[String]) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| McpError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Spawn("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Spawn("no stdout pipe".to_string()))?;

        let client = Self {
            io: Mutex::new(ServerIo {
                child,
                stdin: Some(stdin),
                stdout: BufReader::new(stdout),
            }),
            next_id: AtomicI64::new(0),
        };

        let init = client
            .call(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": CLIENT_NAME, "version": CLIENT_VERSION}
                }),
            )
            .await;
        if let Err(e) = init {
            let mut io = client.io.lock().await;
            let _ = io.child.kill().await;
            return Err(McpError::Protocol(format!("initialize: {e}")));
        }
        client.notify("notifications/initialized", Value::Null).await;

        Ok(client)
    }

    /// List the server's tools.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        let raw = self.call("tools/list", Value::Null).await?;
        let result: ToolsListResult =
            serde_json::from_value(raw).map_err(|e| McpError::Protocol(e.to_string()))?;
        Ok(result.tools)
    }

    /// Invoke a tool, returning the concatenated text blocks of the result.
    pub async fn call_tool(&self, name: &str, args: &Value) -> Result<String, McpError> {
        let raw = self
            .call("tools/call", json!({"name": name, "arguments": args}))
            .await?;
        let result: CallToolResult =
            serde_json::from_value(raw).map_err(|e| McpError::Protocol(e.to_string()))?;
        let text: String = result
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect();
        if result.is_error {
            return Err(McpError::Tool(text));
        }
        Ok(text)
    }

    /// Wrap every server tool as a registry tool.
    pub async fn tools(self: &Arc<Self>) -> Result<Vec<McpTool>, McpError> {
        let infos = self.list_tools().await?;
        Ok(infos
            .into_iter()
            .map(|info| McpTool {
                client: Arc::clone(self),
                info,
            })
            .collect())
    }

    /// Cancel, close stdin, kill, reap.
    pub async fn close(&self) {
        self.notify("notifications/cancelled", Value::Null).await;
        let mut io = self.io.lock().await;
        io.stdin.take();
        if let Err(e) = io.child.kill().await {
            tracing::debug!("tool server kill: {e}");
        }
        let _ = io.child.wait().await;
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let mut io = self.io.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let mut line =
            serde_json::to_string(&request).map_err(|e| McpError::Protocol(e.to_string()))?;
        line.push('\n');
        let stdin = io
            .stdin
            .as_mut()
            .ok_or_else(|| McpError::Protocol("stdin closed".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;

        // Read until the matching id; drop notifications and stale lines.
        loop {
            let mut line = String::new();
            let n = io.stdout.read_line(&mut line).await?;
            if n == 0 {
                return Err(McpError::Protocol("server closed stdout".to_string()));
            }
            let Ok(resp) = serde_json::from_str::<RpcResponse>(&line) else {
                continue;
            };
            if resp.id == 0 || resp.id != id {
                continue;
            }
            if let Some(err) = resp.error {
                return Err(McpError::Rpc {
                    code: err.code,
                    message: err.message,
                });
            }
            return Ok(resp.result.unwrap_or(Value::Null));
        }
    }

    async fn notify(&self, method: &str, params: Value) {
        let notification = RpcNotification {
            jsonrpc: "2.0",
            method,
            params,
        };
        let Ok(mut line) = serde_json::to_string(&notification) else {
            return;
        };
        line.push('\n');
        let mut io = self.io.lock().await;
        if let Some(stdin) = io.stdin.as_mut() {
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                tracing::debug!("tool server notify {method}: {e}");
            }
            let _ = stdin.flush().await;
        }
    }
}

/// An external server tool registered like a built-in.
pub struct McpTool {
    client: Arc<McpClient>,
    info: ToolInfo,
}

#[async_trait::async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn execute(&self, input: &Value) -> Result<String, ToolError> {
        self.client
            .call_tool(&self.info.name, input)
            .await
            .map_err(|e| ToolError::execution(e.to_string()))
    }
}
