// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic history reduction passes.
//!
//! This module is distinct from [`crate::compact`], which drives an LLM call
//! to produce a short prose/structured summary when the context window is
//! nearly full. [`stale_traffic`] never calls a model: it is a purely
//! mechanical pass that removes tool traffic whose value has been
//! superseded by later events in the same history, and can be run
//! opportunistically before every context build.

pub mod stale_traffic {
    use std::collections::HashSet;

    use orc_model::{Message, MessageContent};

    /// Which tool names count as a "read", an "edit", or a "shell" operation
    /// for the purposes of the stale-traffic passes. Distinct from the
    /// abstract `file_read`/`file_edit`/`bash_tool` vocabulary used to
    /// describe the algorithm — callers map their own registry's tool names
    /// into these buckets.
    #[derive(Debug, Clone)]
    pub struct CompressionConfig {
        /// Tools whose invocation only observes a file (e.g. `read_file`).
        pub read_tool_names: HashSet<String>,
        /// Tools whose invocation mutates or creates a file (e.g.
        /// `edit_file`, `write`, `apply_patch`, `delete_file`).
        pub edit_tool_names: HashSet<String>,
        /// Tools that run a shell command (e.g. `run_terminal_command`, `shell`).
        pub shell_tool_names: HashSet<String>,
        /// JSON argument keys checked (in order) to find the file path an
        /// invocation targets.
        pub path_arg_keys: Vec<String>,
        /// JSON argument keys checked (in order) to find the command text a
        /// shell invocation ran.
        pub command_arg_keys: Vec<String>,
    }

    impl Default for CompressionConfig {
        fn default() -> Self {
            Self {
                read_tool_names: ["read_file"].iter().map(|s| s.to_string()).collect(),
                edit_tool_names: ["edit_file", "write", "apply_patch", "delete_file"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                shell_tool_names: ["run_terminal_command", "shell"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                path_arg_keys: vec!["path".to_string(), "file_path".to_string()],
                command_arg_keys: vec!["command".to_string(), "cmd".to_string()],
            }
        }
    }

    /// Outcome counters for one compression pass (spec §4.5).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct CompressionStats {
        /// Number of messages in the input history.
        pub original: usize,
        /// Number of messages in the output history.
        pub compressed: usize,
        /// Total messages removed (call + result pairs each count as 2).
        pub removed: usize,
        /// Tool-call/result pairs removed by the stale-file-read pass.
        pub stale_reads: usize,
        /// Tool-call/result pairs removed by the stale-file-edit pass.
        pub stale_edits: usize,
        /// Tool-call/result pairs removed because the shell call failed.
        pub failed_bash: usize,
        /// Tool-call/result pairs removed because a later shell call repeated
        /// the same command text.
        pub stale_bash: usize,
    }

    /// One assistant tool-call paired with its tool-result message, located
    /// by scanning the history once.
    struct CallSite {
        call_index: usize,
        result_index: usize,
        tool_name: String,
        arguments: String,
        is_error: bool,
    }

    fn find_call_sites(messages: &[Message]) -> Vec<CallSite> {
        let mut sites = Vec::new();
        for (call_index, msg) in messages.iter().enumerate() {
            let (tool_call_id, tool_name, arguments) = match &msg.content {
                MessageContent::ToolCall {
                    tool_call_id,
                    function,
                } => (tool_call_id.clone(), function.name.clone(), function.arguments.clone()),
                _ => continue,
            };
            // The paired result is the first later Tool-role message whose
            // tool_call_id matches; assistant text may intervene but the
            // spec's invariant guarantees the result is never more than one
            // tool-call batch away.
            let result_index = messages
                .iter()
                .enumerate()
                .skip(call_index + 1)
                .find(|(_, m)| {
                    matches!(&m.content, MessageContent::ToolResult { tool_call_id: id, .. } if *id == tool_call_id)
                })
                .map(|(i, _)| i);
            if let Some(result_index) = result_index {
                let is_error = match &messages[result_index].content {
                    MessageContent::ToolResult { is_error, .. } => *is_error,
                    _ => false,
                };
                sites.push(CallSite {
                    call_index,
                    result_index,
                    tool_name,
                    arguments,
                    is_error,
                });
            }
        }
        sites
    }

    fn extract_arg(arguments: &str, keys: &[String]) -> Option<String> {
        let parsed: serde_json::Value = serde_json::from_str(arguments).ok()?;
        for key in keys {
            if let Some(v) = parsed.get(key).and_then(|v| v.as_str()) {
                return Some(v.to_string());
            }
        }
        None
    }

    /// Run the four passes from spec §4.5 over `messages`, returning the
    /// reduced history and statistics. Message ordering of surviving
    /// messages is preserved; no assistant message is mutated; only whole
    /// tool-call/tool-result pairs are ever removed together, so every
    /// remaining tool message's `tool_call_id` still resolves to a tool-call
    /// in a preceding assistant message. Idempotent: running this again on
    /// its own output is a no-op, since a removed pair can never create a new
    /// staleness condition for a pair that survived.
    pub fn compress(messages: &[Message], config: &CompressionConfig) -> (Vec<Message>, CompressionStats) {
        let sites = find_call_sites(messages);

        let mut remove: HashSet<usize> = HashSet::new(); // call_index of sites to drop
        let mut stale_reads = 0usize;
        let mut stale_edits = 0usize;
        let mut failed_bash = 0usize;
        let mut stale_bash = 0usize;

        for (i, site) in sites.iter().enumerate() {
            if config.read_tool_names.contains(&site.tool_name) {
                let Some(path) = extract_arg(&site.arguments, &config.path_arg_keys) else { continue };
                let superseded = sites.iter().skip(i + 1).any(|later| {
                    config.edit_tool_names.contains(&later.tool_name)
                        && extract_arg(&later.arguments, &config.path_arg_keys).as_deref() == Some(path.as_str())
                });
                if superseded {
                    remove.insert(site.call_index);
                    stale_reads += 1;
                    continue;
                }
            }

            if config.edit_tool_names.contains(&site.tool_name) {
                let Some(path) = extract_arg(&site.arguments, &config.path_arg_keys) else { continue };
                let superseded = sites.iter().skip(i + 1).any(|later| {
                    config.edit_tool_names.contains(&later.tool_name)
                        && extract_arg(&later.arguments, &config.path_arg_keys).as_deref() == Some(path.as_str())
                });
                if superseded {
                    remove.insert(site.call_index);
                    stale_edits += 1;
                    continue;
                }
            }

            if config.shell_tool_names.contains(&site.tool_name) {
                if site.is_error {
                    remove.insert(site.call_index);
                    failed_bash += 1;
                    continue;
                }
                let command = extract_arg(&site.arguments, &config.command_arg_keys);
                if let Some(command) = command {
                    let repeated = sites.iter().skip(i + 1).any(|later| {
                        config.shell_tool_names.contains(&later.tool_name)
                            && extract_arg(&later.arguments, &config.command_arg_keys).as_deref()
                                == Some(command.as_str())
                    });
                    if repeated {
                        remove.insert(site.call_index);
                        stale_bash += 1;
                    }
                }
            }
        }

        // Map call_index -> result_index for the removed sites so both
        // members of the pair drop together.
        let removed_result_indices: HashSet<usize> = sites
            .iter()
            .filter(|s| remove.contains(&s.call_index))
            .map(|s| s.result_index)
            .collect();

        let mut out = Vec::with_capacity(messages.len());
        for (idx, msg) in messages.iter().enumerate() {
            if remove.contains(&idx) || removed_result_indices.contains(&idx) {
                continue;
            }
            out.push(msg.clone());
        }

        let removed = (remove.len() + removed_result_indices.len()).min(messages.len());
        let stats = CompressionStats {
            original: messages.len(),
            compressed: out.len(),
            removed,
            stale_reads,
            stale_edits,
            failed_bash,
            stale_bash,
        };
        (out, stats)
    }

}
