// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Content part types ───────────────────────────────────────────────────────

/// A single content part in a multi-part message.
///
/// Used for user and assistant messages that mix text with images.
/// Images are always represented as data URLs (`data:<mime>;base64,<b64>`)
/// or HTTPS URLs for providers that accept remote references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image {
        /// Data URL (`data:image/png;base64,...`) or HTTPS URL.
        image_url: String,
        /// OpenAI vision detail level: `"low"`, `"high"`, or `"auto"`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(image_url: impl Into<String>) -> Self {
        Self::Image { image_url: image_url.into(), detail: None }
    }

    pub fn image_with_detail(image_url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Image { image_url: image_url.into(), detail: Some(detail.into()) }
    }
}

/// Content returned by a tool – either a plain string or structured parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Parts(Vec<ToolContentPart>),
}

impl ToolResultContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Parts(_) => None,
        }
    }

    pub fn image_urls(&self) -> Vec<&str> {
        match self {
            Self::Text(_) => vec![],
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ToolContentPart::Image { image_url } => Some(image_url.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

impl From<String> for ToolResultContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ToolResultContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Closed classification of why a tool execution did not succeed, mirrored
/// onto a materialized `ToolResult` message so history consumers (the
/// compactor, the TUI) can match on it instead of sniffing the result text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultReason {
    Aborted,
    Denied,
    Edited,
    Timeout,
    NotFound,
    PermissionDenied,
    InvalidInput,
    NetworkError,
    RateLimit,
    ToolNotFound,
    Unknown,
}

impl std::fmt::Display for ToolResultContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(t) => write!(f, "{t}"),
            Self::Parts(parts) => {
                let text = parts
                    .iter()
                    .filter_map(|p| match p {
                        ToolContentPart::Text { text } => Some(text.as_str()),
                        ToolContentPart::Image { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                write!(f, "{text}")
            }
        }
    }
}

/// A single content part in a tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContentPart {
    Text { text: String },
    Image { image_url: String },
}

/// Parse a data URL of the form `data:<mime>;base64,<b64>`.
pub fn parse_data_url_parts(url: &str) -> Result<(String, String), &'static str> {
    let rest = url.strip_prefix("data:").ok_or("not a data URL")?;
    let (meta, b64) = rest.split_once(',').ok_or("malformed data URL")?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta).to_string();
    Ok((mime, b64.to_string()))
}

// ─── Tool-call descriptor ─────────────────────────────────────────────────────

/// One tool invocation requested by the model.
///
/// Arguments are carried as a JSON-encoded string because the streaming
/// decoder may hand back a fragment-accumulated value whose validity as JSON
/// is only guaranteed once the stream finalizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallDescriptor {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// The function half of a single tool call carried on a [`MessageContent::ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

// ─── Message types ────────────────────────────────────────────────────────────

/// A single message in the conversation history.
///
/// Immutable once constructed: compaction and compression passes produce a
/// new `Vec<Message>` rather than mutating messages in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Message {
    fn new(role: Role, content: MessageContent) -> Self {
        Self { id: Uuid::new_v4(), role, content, timestamp: Utc::now(), usage: None }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    /// An assistant message carrying a batch of tool-calls (no text).
    pub fn assistant_tool_calls(calls: Vec<ToolCallDescriptor>) -> Self {
        Self::new(Role::Assistant, MessageContent::ToolCalls(calls))
    }

    /// An assistant message carrying a single tool call. Orcd appends one of
    /// these per call as tool calls are decided, rather than buffering a
    /// whole batch — wire adapters coalesce consecutive calls as needed for
    /// the target provider's API shape.
    pub fn assistant_tool_call(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::new(
            Role::Assistant,
            MessageContent::ToolCall {
                tool_call_id: tool_call_id.into(),
                function: FunctionCall { name: name.into(), arguments: arguments.into() },
            },
        )
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            Role::Tool,
            MessageContent::ToolResult {
                tool_call_id: id.into(),
                name: None,
                content: ToolResultContent::Text(content.into()),
                is_error: false,
                reason: None,
            },
        )
    }

    pub fn tool_result_named(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            Role::Tool,
            MessageContent::ToolResult {
                tool_call_id: id.into(),
                name: Some(name.into()),
                content: ToolResultContent::Text(content.into()),
                is_error: false,
                reason: None,
            },
        )
    }

    /// Construct a tool result that contains text plus one or more image parts.
    pub fn tool_result_with_parts(id: impl Into<String>, parts: Vec<ToolContentPart>) -> Self {
        let content = if parts.is_empty() {
            ToolResultContent::Text(String::new())
        } else if parts.len() == 1 {
            if let ToolContentPart::Text { text } = &parts[0] {
                ToolResultContent::Text(text.clone())
            } else {
                ToolResultContent::Parts(parts)
            }
        } else {
            ToolResultContent::Parts(parts)
        };
        Self::new(
            Role::Tool,
            MessageContent::ToolResult {
                tool_call_id: id.into(),
                name: None,
                content,
                is_error: false,
                reason: None,
            },
        )
    }

    /// Attach tool-execution status to an already-constructed `ToolResult`
    /// message (spec §3's status/reason data model). No-op on any other
    /// message kind.
    pub fn with_tool_status(mut self, is_error: bool, reason: Option<ToolResultReason>) -> Self {
        if let MessageContent::ToolResult {
            is_error: e,
            reason: r,
            ..
        } = &mut self.content
        {
            *e = is_error;
            *r = reason;
        }
        self
    }

    /// Construct a user message from a list of content parts (text + images).
    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        let content = if parts.is_empty() {
            MessageContent::Text(String::new())
        } else if parts.len() == 1 {
            if let ContentPart::Text { text } = &parts[0] {
                MessageContent::Text(text.clone())
            } else {
                MessageContent::ContentParts(parts)
            }
        } else {
            MessageContent::ContentParts(parts)
        };
        Self::new(Role::User, content)
    }

    /// Return the plain text of this message, if it has exactly one text part.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::ContentParts(parts) if parts.len() == 1 => match &parts[0] {
                ContentPart::Text { text } => Some(text),
                _ => None,
            },
            _ => None,
        }
    }

    /// Tool-call descriptors carried by this message, if any.
    pub fn tool_calls(&self) -> Option<&[ToolCallDescriptor]> {
        match &self.content {
            MessageContent::ToolCalls(calls) => Some(calls),
            _ => None,
        }
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        match &self.content {
            MessageContent::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            MessageContent::ToolCall { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    pub fn image_urls(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::ContentParts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Image { image_url, .. } => Some(image_url.as_str()),
                    _ => None,
                })
                .collect(),
            MessageContent::ToolResult { content, .. } => content.image_urls(),
            _ => vec![],
        }
    }

    /// Approximate token count used for context management (chars/4 heuristic).
    pub fn approx_tokens(&self) -> usize {
        let chars = match &self.content {
            MessageContent::Text(t) => t.len(),
            MessageContent::ContentParts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::Image { detail, .. } => {
                        let tokens = if detail.as_deref() == Some("low") { 85 } else { 765 };
                        tokens * 4
                    }
                })
                .sum(),
            MessageContent::ToolCalls(calls) => {
                calls.iter().map(|c| c.name.len() + c.arguments.len()).sum()
            }
            MessageContent::ToolCall { function, .. } => {
                function.name.len() + function.arguments.len()
            }
            MessageContent::ToolResult { content, .. } => match content {
                ToolResultContent::Text(t) => t.len(),
                ToolResultContent::Parts(parts) => parts
                    .iter()
                    .map(|p| match p {
                        ToolContentPart::Text { text } => text.len(),
                        ToolContentPart::Image { .. } => 765 * 4,
                    })
                    .sum(),
            },
        };
        (chars / 4).max(1)
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new(Role::User, MessageContent::Text(String::new()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The content of a message.
///
/// - `Text` – simple string (most messages)
/// - `ContentParts` – mixed text + image parts for multimodal user turns
/// - `ToolCall` – the assistant requests a single tool invocation; one of
///   these is appended per call as the orchestrator decides them
/// - `ToolCalls` – a whole batch of tool invocations carried on one message,
///   used where callers already have the full batch in hand
/// - `ToolResult` – the result of a tool call, optionally with image parts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ContentParts(Vec<ContentPart>),
    ToolCall {
        tool_call_id: String,
        function: FunctionCall,
    },
    ToolCalls(Vec<ToolCallDescriptor>),
    ToolResult {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        content: ToolResultContent,
        /// Whether the tool execution failed (spec §3 status ∈ {success, error}).
        #[serde(default)]
        is_error: bool,
        /// Classification of the failure, when `is_error` is set.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<ToolResultReason>,
    },
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub reasoning_effort: Option<String>,
    /// Dynamic context (e.g. git branch/commit, CI info) that should NOT be
    /// included in the cached portion of the system prompt.
    pub system_dynamic_suffix: Option<String>,
    /// Opaque key used by providers that support prompt/prefix caching keyed
    /// off something more stable than message content (e.g. OpenRouter's
    /// `prompt_cache_key`). Typically the session id.
    pub cache_key: Option<String>,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    TextDelta(String),
    ToolCall {
        index: usize,
        id: String,
        name: String,
        /// Accumulated JSON arguments (may arrive across multiple deltas)
        arguments: String,
    },
    ThinkingDelta(String),
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        cache_read_tokens: u32,
        cache_write_tokens: u32,
    },
    /// The model stopped because it hit the output token limit. Any
    /// in-flight tool-call arguments accumulated so far must be treated as
    /// truncated rather than valid JSON.
    MaxTokens,
    Done,
    Error(String),
}

/// Token usage from one turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_write_tokens: u32,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn message_assistant_sets_role_and_text() {
        let m = Message::assistant("reply");
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.as_text(), Some("reply"));
    }

    #[test]
    fn message_system_sets_role_and_text() {
        let m = Message::system("prompt");
        assert_eq!(m.role, Role::System);
        assert_eq!(m.as_text(), Some("prompt"));
    }

    #[test]
    fn message_ids_are_unique() {
        let a = Message::user("x");
        let b = Message::user("x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn message_tool_result_sets_role_and_content() {
        let m = Message::tool_result("id-1", "output");
        assert_eq!(m.role, Role::Tool);
        assert!(m.as_text().is_none());
        assert_eq!(m.tool_call_id(), Some("id-1"));
    }

    #[test]
    fn message_assistant_tool_calls_batch() {
        let calls = vec![
            ToolCallDescriptor { id: "a".into(), name: "file_read".into(), arguments: "{}".into() },
            ToolCallDescriptor { id: "b".into(), name: "file_read".into(), arguments: "{}".into() },
        ];
        let m = Message::assistant_tool_calls(calls);
        assert_eq!(m.tool_calls().unwrap().len(), 2);
    }

    #[test]
    fn message_tool_result_with_image_parts() {
        let parts = vec![
            ToolContentPart::Text { text: "here is the chart".into() },
            ToolContentPart::Image { image_url: "data:image/png;base64,ABC".into() },
        ];
        let m = Message::tool_result_with_parts("call-1", parts);
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.image_urls(), vec!["data:image/png;base64,ABC"]);
    }

    #[test]
    fn message_user_with_parts_image() {
        let parts = vec![
            ContentPart::Text { text: "what is this?".into() },
            ContentPart::image("data:image/png;base64,XYZ"),
        ];
        let m = Message::user_with_parts(parts);
        assert_eq!(m.role, Role::User);
        assert_eq!(m.image_urls(), vec!["data:image/png;base64,XYZ"]);
        assert!(m.as_text().is_none());
    }

    #[test]
    fn approx_tokens_text_divides_by_four() {
        let m = Message::user("12345678");
        assert_eq!(m.approx_tokens(), 2);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        let m = Message::user("hi");
        assert_eq!(m.approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_tool_calls_uses_name_plus_args() {
        let m = Message::assistant_tool_calls(vec![ToolCallDescriptor {
            id: "id".into(),
            name: "aaaa".into(),
            arguments: "bbbbbbbb".into(),
        }]);
        assert_eq!(m.approx_tokens(), 3);
    }

    #[test]
    fn approx_tokens_tool_result_uses_content() {
        let m = Message::tool_result("id", "1234567890123456");
        assert_eq!(m.approx_tokens(), 4);
    }

    #[test]
    fn approx_tokens_image_detail_low_uses_85_tokens() {
        let parts = vec![ContentPart::image_with_detail("data:image/png;base64,A", "low")];
        let m = Message::user_with_parts(parts);
        assert_eq!(m.approx_tokens(), 85);
    }

    #[test]
    fn message_serialises_and_deserialises() {
        let original = Message::user("test payload");
        let json = serde_json::to_string(&original).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.role, Role::User);
        assert_eq!(decoded.id, original.id);
        assert_eq!(decoded.as_text(), Some("test payload"));
    }

    #[test]
    fn tool_schema_serialises_correctly() {
        let ts = ToolSchema {
            name: "my_tool".into(),
            description: "desc".into(),
            parameters: serde_json::json!({ "type": "object" }),
        };
        let json = serde_json::to_string(&ts).unwrap();
        assert!(json.contains("my_tool"));
        assert!(json.contains("desc"));
    }

    #[test]
    fn tool_result_content_text_round_trip() {
        let c = ToolResultContent::Text("hello".into());
        let json = serde_json::to_string(&c).unwrap();
        let back: ToolResultContent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_text(), Some("hello"));
    }

    #[test]
    fn content_part_image_round_trip() {
        let p = ContentPart::image("data:image/png;base64,ABC");
        let json = serde_json::to_string(&p).unwrap();
        let back: ContentPart = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn tool_result_defaults_to_success() {
        let m = Message::tool_result("call-1", "ok");
        match &m.content {
            MessageContent::ToolResult { is_error, reason, .. } => {
                assert!(!is_error);
                assert!(reason.is_none());
            }
            _ => panic!("expected ToolResult"),
        }
    }

    #[test]
    fn with_tool_status_threads_error_and_reason() {
        let m = Message::tool_result("call-1", "boom")
            .with_tool_status(true, Some(ToolResultReason::Timeout));
        match &m.content {
            MessageContent::ToolResult { is_error, reason, .. } => {
                assert!(*is_error);
                assert_eq!(*reason, Some(ToolResultReason::Timeout));
            }
            _ => panic!("expected ToolResult"),
        }
    }

    #[test]
    fn with_tool_status_is_noop_on_other_message_kinds() {
        let m = Message::user("hi").with_tool_status(true, Some(ToolResultReason::Unknown));
        assert_eq!(m.as_text(), Some("hi"));
    }
}
