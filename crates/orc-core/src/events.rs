// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use orc_config::AgentMode;
use orc_model::Usage;
use orc_tools::{events::TodoItem, ToolCall};

/// Closed classification of recoverable error conditions the orchestrator can
/// surface to a consumer. Kept small and stable so callers can match on it
/// instead of parsing the accompanying message string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The turn was cancelled by the caller.
    Aborted,
    /// A tool call was denied during the approval gate.
    Denied,
    /// A tool call's arguments were edited during the approval gate instead
    /// of executed as requested.
    Edited,
    /// A tool call or model request exceeded its deadline.
    Timeout,
    /// A referenced resource (file, conversation, agent template) does not exist.
    NotFound,
    /// The operation is not permitted under the current sandbox/policy.
    PermissionDenied,
    /// Arguments failed schema validation or could not be parsed.
    InvalidInput,
    /// The underlying transport (HTTP, MCP, provider API) failed.
    NetworkError,
    /// The provider or an MCP server signalled a rate limit.
    RateLimit,
    /// A tool call referenced a name absent from the registry.
    ToolNotFound,
    /// Catch-all for conditions that don't fit the above.
    Unknown,
}

/// Which compaction strategy actually ran for a given `ContextCompacted` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyUsed {
    /// Bulleted, section-based summary.
    Structured,
    /// Prose narrative summary.
    Narrative,
    /// Deterministic drop of old messages with no model call.
    Emergency,
}

/// Events emitted by the agent during a single turn.
/// Consumers (CLI, tests, embedders) subscribe to these to drive their output.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The model has begun streaming a new assistant message.
    MessageStarted,
    /// A text chunk streamed from the model
    AssistantChunk(String),
    /// A complete text response from the model (after streaming finishes)
    AssistantMessage(String),
    /// A thinking/reasoning chunk from the model (extended thinking API).
    /// Consumers should accumulate deltas and finalise them into a Thinking
    /// segment when the model signals the end of the reasoning block.
    ThinkingDelta(String),
    /// A complete thinking/reasoning block (accumulated from ThinkingDelta events).
    ThinkingComplete(String),
    /// The model has requested one or more tool calls in this turn, emitted
    /// once per batch rather than once per call.
    ToolCalls(Vec<ToolCall>),
    /// A tool call finished
    ToolResult {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// A tool call is gated behind `require_tool_approval` and is waiting for
    /// a matching `ToolApprovalResponse` before it executes.
    ToolApprovalRequired {
        call_id: String,
        tool_name: String,
        arguments: String,
    },
    /// The caller's decision for a previously emitted `ToolApprovalRequired`.
    ToolApprovalResponse { call_id: String, approved: bool },
    /// Context was compacted; statistics for the consumer
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
        strategy: CompactionStrategyUsed,
        turn: u32,
    },
    /// Current token usage update
    TokenUsage {
        input: u32,
        output: u32,
        /// Tokens served from the provider's prompt cache this turn.
        cache_read: u32,
        /// Tokens written into the provider's prompt cache this turn.
        cache_write: u32,
        /// Running total of cache-read tokens across the whole session.
        cache_read_total: u64,
        /// Running total of cache-write tokens across the whole session.
        cache_write_total: u64,
        /// The session's configured context budget.
        max_tokens: usize,
    },
    /// A single model stream has finished; emitted once per LLM call, before
    /// any resulting tool calls execute. `Done` marks the whole turn instead.
    StreamFinish {
        finish_reason: String,
        usage: Option<Usage>,
    },
    /// The agent has finished processing the current user turn
    Done,
    /// The turn was cancelled before it completed; `partial_text` carries
    /// whatever assistant text had streamed before the cancellation landed.
    Aborted { partial_text: String },
    /// A recoverable error occurred
    Error { message: String, reason: ErrorKind },
    /// The todo list was updated
    TodoUpdate(Vec<TodoItem>),
    /// The agent mode was changed
    ModeChanged(AgentMode),
    /// The agent is asking the user a question (id links to QuestionAnswer)
    Question { id: String, questions: Vec<String> },
    /// Answer to a previous Question event
    QuestionAnswer { id: String, answer: String },
    /// A lifecycle update from a sub-agent spawned by `assign_task`, tagged
    /// with the originating tool-call id.
    SubAgentLifecycle(orc_tools::SubAgentLifecycle),
}
