// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bridges MCP-advertised tools into the orchestrator's [`orc_tools::Tool`]
//! trait so they compose with builtins in one [`ToolRegistry`] (spec §4.3
//! "registries compose: builtin + MCP-backed").

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use orc_config::{AgentMode, Config};
use orc_tools::{ApprovalPolicy, ErrorReason, Tool, ToolCall, ToolOutput, ToolRegistry};

use crate::client::{McpClient, McpClientPool};
use crate::sanitize::exposed_name;

/// Adapts one MCP-advertised tool on one connected server into a local
/// [`Tool`] impl. Calls are forwarded verbatim; failures map through
/// [`crate::error::McpError::reason`] so history compaction and retry
/// classification see the same closed vocabulary as builtin tools.
pub struct McpToolProxy {
    exposed_name: String,
    original_name: String,
    description: String,
    parameters_schema: serde_json::Value,
    client: Arc<McpClient>,
}

impl McpToolProxy {
    pub fn new(
        exposed_name: String,
        original_name: String,
        description: String,
        parameters_schema: serde_json::Value,
        client: Arc<McpClient>,
    ) -> Self {
        Self {
            exposed_name,
            original_name,
            description,
            parameters_schema,
            client,
        }
    }
}

#[async_trait]
impl Tool for McpToolProxy {
    fn name(&self) -> &str {
        &self.exposed_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        if self.parameters_schema.is_null() {
            json!({ "type": "object" })
        } else {
            self.parameters_schema.clone()
        }
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Research, AgentMode::Plan, AgentMode::Agent]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self
            .client
            .call_tool(&self.original_name, call.args.clone())
            .await
        {
            Ok(outcome) if outcome.is_error => {
                ToolOutput::err_with_reason(&call.id, outcome.text, ErrorReason::Unknown)
            }
            Ok(outcome) => ToolOutput::ok(&call.id, outcome.text),
            Err(e) => {
                let reason = e.reason();
                ToolOutput::err_with_reason(&call.id, e.to_string(), reason)
            }
        }
    }
}

/// Connect every enabled server in `config.mcp_servers`, register a proxy
/// tool per advertised tool into `registry`, and return the client pool so
/// callers can close it on shutdown. A server that fails to connect is
/// logged and skipped — one unreachable MCP server must never prevent
/// startup (spec §5 "a failing MCP server degrades gracefully").
pub async fn connect_and_register(
    config: &Config,
    registry: &mut ToolRegistry,
) -> McpClientPool {
    let mut pool = McpClientPool::new();

    for (server_id, server_cfg) in &config.mcp_servers {
        if !server_cfg.enabled {
            tracing::debug!(server = %server_id, "MCP server disabled, skipping");
            continue;
        }

        let client = match McpClient::connect(server_id, &server_cfg.transport, server_cfg.timeout_ms).await
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(server = %server_id, error = %e, "failed to connect to MCP server, skipping");
                continue;
            }
        };

        let tools = client.tools().await;
        pool.insert(client);
        let client = pool
            .get(server_id)
            .expect("server_id was just inserted into the pool");

        let prefix = server_cfg
            .prefix
            .clone()
            .unwrap_or_else(|| crate::sanitize::default_prefix(server_id));

        let server_overrides = config.tool_allowlist.get(server_id);

        for schema in tools {
            let exposed = exposed_name(&prefix, &schema.name);

            let allowed = server_overrides
                .and_then(|overrides| overrides.get(&schema.name))
                .copied()
                .unwrap_or(true);
            if !allowed {
                tracing::debug!(server = %server_id, tool = %schema.name, "MCP tool denied by tool_allowlist, not registering");
                continue;
            }

            let proxy = McpToolProxy::new(
                exposed,
                schema.name.clone(),
                schema
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("MCP tool `{}` from server `{server_id}`", schema.name)),
                schema.input_schema.clone(),
                client.clone(),
            );
            registry.register(proxy);
        }
    }

    pool
}
