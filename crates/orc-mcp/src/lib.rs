// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! MCP (Model Context Protocol) client support: connects to external tool
//! servers over stdio or HTTP streamable transports and exposes their
//! tools through the same [`orc_tools::Tool`] trait as builtins.

pub mod adapter;
pub mod client;
pub mod error;
pub mod jsonrpc;
pub mod sanitize;
pub mod transport;

pub use adapter::{connect_and_register, McpToolProxy};
pub use client::{CallToolOutcome, McpClient, McpClientPool, McpToolSchema};
pub use error::McpError;
pub use sanitize::{default_prefix, exposed_name, sanitize_tool_name};
pub use transport::{HttpTransport, StdioTransport, Transport};
