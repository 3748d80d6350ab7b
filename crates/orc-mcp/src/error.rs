// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use orc_tools::ErrorReason;

/// Recoverable failure from the MCP client/transport layer (spec §4.3, §7).
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("failed to spawn MCP server process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("MCP transport error: {0}")]
    Transport(String),
    #[error("MCP server returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("MCP call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed JSON-RPC message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("MCP HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("MCP server connection closed unexpectedly")]
    Closed,
}

impl McpError {
    /// Classify into the closed error-reason vocabulary shared with tool
    /// execution results (spec §3, §7).
    pub fn reason(&self) -> ErrorReason {
        match self {
            McpError::Timeout(_) => ErrorReason::Timeout,
            McpError::Http(_) | McpError::Transport(_) | McpError::Closed => {
                ErrorReason::NetworkError
            }
            McpError::Spawn(_) => ErrorReason::Unknown,
            McpError::Rpc { .. } => ErrorReason::Unknown,
            McpError::Decode(_) => ErrorReason::InvalidInput,
        }
    }
}
