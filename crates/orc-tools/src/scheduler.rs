// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bounded-concurrency tool-call scheduler (spec §4.2, §5).
//!
//! [`ToolRegistry::execute`] dispatches one call by name. This module adds
//! the batch contract the orchestrator actually drives a turn with:
//! `execute_batch` runs a whole assistant tool-call batch in chunks of at
//! most `max_concurrent`, honours the approval gate's per-call edit/deny
//! decisions, and reacts to a shared [`AbortSignal`] by producing `aborted`
//! outcomes for calls that have not started and by racing in-flight calls
//! against the signal.

use tokio::sync::watch;

use crate::tool::{ErrorReason, ToolOutput};
use crate::{ToolCall, ToolRegistry};

/// What the approval gate decided for one call in the batch before handing
/// it to the scheduler. `Run` is the default when approval is not required
/// or the tool/session already allows it.
#[derive(Debug, Clone)]
pub enum ToolDecision {
    /// Execute the call against the registry as requested.
    Run,
    /// Do not execute; synthesize a `denied` outcome.
    Deny,
    /// Do not execute the original call; synthesize an `edited` outcome
    /// carrying the replacement arguments as a system-reminder envelope.
    Edit { new_arguments: serde_json::Value },
}

/// One scheduled invocation: the model's original call plus the gate's
/// decision for it.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call: ToolCall,
    pub decision: ToolDecision,
}

impl ToolInvocation {
    /// Convenience constructor for the common case: run every call as-is.
    pub fn run(call: ToolCall) -> Self {
        Self {
            call,
            decision: ToolDecision::Run,
        }
    }
}

/// The receiving half of a turn's abort signal. Cloneable; every holder
/// observes the same trip. Cheap to poll (`is_aborted`) or await
/// (`aborted`).
#[derive(Clone)]
pub struct AbortSignal(watch::Receiver<bool>);

/// The sending half; `trip()` is idempotent and wakes every clone of the
/// paired [`AbortSignal`].
#[derive(Clone)]
pub struct AbortHandle(watch::Sender<bool>);

/// Create a fresh, untripped abort signal pair for one turn.
pub fn abort_channel() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle(tx), AbortSignal(rx))
}

impl AbortHandle {
    /// Trip the signal. Safe to call more than once or after all
    /// [`AbortSignal`] clones have been dropped.
    pub fn abort(&self) {
        let _ = self.0.send(true);
    }

    /// Clear a previous trip so the paired signal (and anything still
    /// holding a clone of it, e.g. a long-lived sub-agent tool) can be
    /// reused for the next turn.
    pub fn reset(&self) {
        let _ = self.0.send(false);
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once the signal trips. Returns immediately if it already has.
    /// Resolves (rather than hangs forever) if the paired handle is dropped
    /// without tripping, since that can never happen again either way.
    pub async fn aborted(&mut self) {
        while !*self.0.borrow() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Synthesize the `denied` outcome for a tool call the approval gate
/// rejected (spec §4.2 "Editing & denial").
fn denied_outcome(call: &ToolCall) -> ToolOutput {
    ToolOutput::err_with_reason(
        &call.id,
        "This tool call was denied by the user and was not executed.",
        ErrorReason::Denied,
    )
}

/// Synthesize the `edited` outcome: the scheduler never calls the
/// underlying tool, it wraps the edit instruction in a system-reminder
/// envelope so the model sees what was substituted.
fn edited_outcome(call: &ToolCall, new_arguments: &serde_json::Value) -> ToolOutput {
    let envelope = format!(
        "<system-reminder>\nThe user edited this tool call's arguments before \
         it ran. It was NOT executed with the original arguments. The \
         approved arguments were:\n{new_arguments}\n</system-reminder>",
    );
    ToolOutput::err_with_reason(&call.id, envelope, ErrorReason::Edited)
}

fn aborted_outcome(call: &ToolCall) -> ToolOutput {
    ToolOutput::err_with_reason(
        &call.id,
        "This tool call was cancelled before it completed.",
        ErrorReason::Aborted,
    )
}

/// Execute a full tool-call batch against `registry`, honoring bounded
/// concurrency and the approval gate's per-call decisions.
///
/// Results are returned in input order regardless of completion order
/// (spec §5 "Ordering guarantees"). Invocations are grouped into chunks of
/// at most `max_concurrent` (clamped to at least 1); a chunk completes
/// before the next starts. If `abort` is already tripped when a chunk is
/// about to start, every remaining invocation in the batch — whether
/// `Run`, `Deny`, or `Edit` — produces an `aborted` outcome without being
/// dispatched. A `Run` invocation already in flight races the tool against
/// the abort signal and is cancelled (its future dropped) the instant the
/// signal trips.
pub async fn execute_batch(
    registry: &ToolRegistry,
    invocations: Vec<ToolInvocation>,
    max_concurrent: usize,
    abort: &AbortSignal,
) -> Vec<ToolOutput> {
    let max_concurrent = max_concurrent.max(1);
    let mut outputs: Vec<Option<ToolOutput>> = vec![None; invocations.len()];

    for chunk_indices in (0..invocations.len())
        .collect::<Vec<_>>()
        .chunks(max_concurrent)
    {
        if abort.is_aborted() {
            for &i in chunk_indices {
                outputs[i] = Some(aborted_outcome(&invocations[i].call));
            }
            continue;
        }

        let futures = chunk_indices.iter().map(|&i| {
            let inv = &invocations[i];
            run_one(registry, inv, abort)
        });
        let results: Vec<ToolOutput> = futures::future::join_all(futures).await;
        for (&i, out) in chunk_indices.iter().zip(results.into_iter()) {
            outputs[i] = Some(out);
        }
    }

    outputs
        .into_iter()
        .map(|o| o.expect("every invocation index is assigned exactly once"))
        .collect()
}

async fn run_one(registry: &ToolRegistry, inv: &ToolInvocation, abort: &AbortSignal) -> ToolOutput {
    match &inv.decision {
        ToolDecision::Deny => return denied_outcome(&inv.call),
        ToolDecision::Edit { new_arguments } => return edited_outcome(&inv.call, new_arguments),
        ToolDecision::Run => {}
    }

    let mut signal = abort.clone();
    tokio::select! {
        biased;
        _ = signal.aborted() => aborted_outcome(&inv.call),
        out = registry.execute(&inv.call) => out,
    }
}
