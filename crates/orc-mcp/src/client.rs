// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A connected MCP server session: handshake, tool listing, and tool
//! invocation with content-array flattening (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::McpError;
use crate::transport::{HttpTransport, StdioTransport, Transport};
use orc_config::schema::McpTransport;

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    tools: Vec<McpToolSchema>,
}

#[derive(Debug, Deserialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    #[allow(dead_code)]
    protocol_version: Option<String>,
}

const PROTOCOL_VERSION: &str = "2024-11-05";

/// A live connection to one MCP server: transport plus cached tool list.
pub struct McpClient {
    server_id: String,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    tools: RwLock<Vec<McpToolSchema>>,
}

impl McpClient {
    pub async fn connect(
        server_id: &str,
        transport_cfg: &McpTransport,
        timeout_ms: u64,
    ) -> Result<Self, McpError> {
        let transport: Arc<dyn Transport> = match transport_cfg {
            McpTransport::Stdio { command, args, env } => {
                Arc::new(StdioTransport::spawn(command, args, env).await?)
            }
            McpTransport::Http { url, headers } => Arc::new(HttpTransport::new(url, headers)?),
        };

        let client = Self {
            server_id: server_id.to_string(),
            transport,
            timeout: Duration::from_millis(timeout_ms),
            tools: RwLock::new(Vec::new()),
        };

        client.initialize().await?;
        client.refresh_tools().await?;
        Ok(client)
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "orcd", "version": env!("CARGO_PKG_VERSION") },
        });
        let result = self.call_with_timeout("initialize", Some(params)).await?;
        let _: InitializeResult = serde_json::from_value(result).unwrap_or(InitializeResult {
            protocol_version: None,
        });
        self.transport
            .notify("notifications/initialized", None)
            .await?;
        Ok(())
    }

    async fn refresh_tools(&self) -> Result<(), McpError> {
        let result = self.call_with_timeout("tools/list", None).await?;
        let parsed: ToolsListResult = serde_json::from_value(result)?;
        *self.tools.write().await = parsed.tools;
        Ok(())
    }

    pub async fn tools(&self) -> Vec<McpToolSchema> {
        self.tools.read().await.clone()
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        match tokio::time::timeout(self.timeout, self.transport.request(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout(self.timeout)),
        }
    }

    /// Invoke `tools/call` for `tool_name` with `arguments` and flatten the
    /// result's `content` array (content-array flattening: an all-text
    /// array is joined with newlines into a plain text payload; a mixed or
    /// non-text array is instead preserved verbatim as a JSON payload so no
    /// part — image, resource, or otherwise — is silently dropped).
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<CallToolOutcome, McpError> {
        let params = json!({ "name": tool_name, "arguments": arguments });
        let result = self.call_with_timeout("tools/call", Some(params)).await?;
        Ok(flatten_content(&result))
    }

    pub async fn close(&self) {
        if let Err(e) = self.transport.close().await {
            tracing::debug!(server = %self.server_id, error = %e, "error closing MCP transport");
        }
    }
}

/// Outcome of a `tools/call`: flattened text plus whether the server
/// reported `isError: true` (spec §4.3 — this maps to a tool failure, not a
/// transport failure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallToolOutcome {
    pub text: String,
    pub is_error: bool,
}

fn flatten_content(result: &Value) -> CallToolOutcome {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let parts = result.get("content").and_then(Value::as_array);
    let text = match parts {
        Some(parts) if parts.iter().all(is_text_part) => parts
            .iter()
            .map(render_text_part)
            .collect::<Vec<_>>()
            .join("\n"),
        // Mixed or non-text content (images, resources, embedded blobs):
        // preserve the raw array rather than discard the parts we can't
        // render as text.
        Some(parts) => serde_json::to_string(parts).unwrap_or_default(),
        None => result.to_string(),
    };

    CallToolOutcome { text, is_error }
}

fn is_text_part(part: &Value) -> bool {
    part.get("type").and_then(Value::as_str) == Some("text")
}

fn render_text_part(part: &Value) -> String {
    part.get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Handle to all currently-connected MCP servers.
#[derive(Default)]
pub struct McpClientPool {
    clients: HashMap<String, Arc<McpClient>>,
}

impl McpClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: McpClient) {
        self.clients
            .insert(client.server_id().to_string(), Arc::new(client));
    }

    pub fn get(&self, server_id: &str) -> Option<Arc<McpClient>> {
        self.clients.get(server_id).cloned()
    }

    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub async fn close_all(&self) {
        for client in self.clients.values() {
            client.close().await;
        }
    }
}
