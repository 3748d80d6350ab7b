// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic MCP tool-name sanitization and prefixing (spec §4.3, §9
//! "MCP tool naming"). Sanitization must be stable across restarts so
//! `tool_allowlist` entries keyed on the exposed name keep resolving.

/// Collapse every run of characters outside `[A-Za-z0-9_]` to a single `_`,
/// then trim leading/trailing underscores. Mirrors the spec's
/// `[^A-Za-z0-9_]+` → `_` rule exactly.
pub fn sanitize_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// Default exposed-tool prefix for a server id: `mcp_{server_id}_`.
pub fn default_prefix(server_id: &str) -> String {
    format!("mcp_{}_", sanitize_tool_name(server_id))
}

/// Combine a prefix with a sanitized original tool name.
pub fn exposed_name(prefix: &str, original_name: &str) -> String {
    format!("{prefix}{}", sanitize_tool_name(original_name))
}
