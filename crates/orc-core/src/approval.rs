// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The approval gate: when `require_tool_approval` is set, a tool call not
//! already covered by the session's approve-all set suspends and waits for
//! an external decision before the scheduler ever sees it.

use serde_json::Value;
use tokio::sync::oneshot;

/// A caller's decision for one pending [`ApprovalRequest`].
#[derive(Debug)]
pub enum ApprovalDecision {
    /// Run the call as the model proposed it.
    Approve,
    /// Do not run it; synthesize a denied outcome.
    Deny,
    /// Run it, and add its tool name to the session's approve-all set so
    /// later calls to the same tool skip the gate for the rest of the run.
    ApproveAll,
    /// Do not run the original call; replace its arguments and synthesize
    /// an edited outcome.
    Edit { new_arguments: Value },
}

/// Sent to whatever is driving the approval UI (TUI, CLI prompt, desktop
/// client) when a tool call needs a decision; the answer comes back on
/// `decision_tx`.
pub struct ApprovalRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub decision_tx: oneshot::Sender<ApprovalDecision>,
}
