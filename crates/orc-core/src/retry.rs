// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Retry/backoff policy for transient LLM call failures (spec §4.1, §7).
//!
//! Applied only around the provider's `complete` call — never around tool
//! execution, where a retry would mean re-running a side-effecting command.
//! [`extract_n_ctx_from_error`]-style string sniffing in `agent.rs` handles
//! context-overflow recovery separately; this module handles everything else
//! a provider can fail with: rate limits, 5xx, and transport resets.

use std::time::Duration;

use orc_config::RetryConfig;
use rand::Rng;

use crate::events::ErrorKind;

/// Decides whether a failed LLM call is worth retrying, and how long to wait
/// before the next attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    retryable_status_codes: Vec<u16>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retryable_status_codes: config.retryable_status_codes.clone(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Classify an error surfaced from [`orc_model::ModelProvider::complete`]
    /// (or the stream it returns) into the closed [`ErrorKind`] vocabulary.
    ///
    /// Provider drivers report HTTP failures as plain `anyhow` errors shaped
    /// `"<driver> error <status>: <body>"` (see `openai_compat.rs`); network
    /// failures are wrapped reqwest errors with `"... request failed"`
    /// context. Both are string-sniffed here rather than carried as
    /// structured types, matching the existing `extract_n_ctx_from_error`
    /// convention in `agent.rs`.
    pub fn classify(&self, err: &anyhow::Error) -> ErrorKind {
        if let Some(status) = extract_status_code(err) {
            return if status == 429 {
                ErrorKind::RateLimit
            } else if (500..600).contains(&status) {
                ErrorKind::NetworkError
            } else {
                ErrorKind::InvalidInput
            };
        }
        if is_transport_reset(err) {
            return ErrorKind::NetworkError;
        }
        ErrorKind::Unknown
    }

    /// Whether `err`, having already failed `attempt` times (1-based), should
    /// be retried.
    pub fn should_retry(&self, err: &anyhow::Error, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match extract_status_code(err) {
            Some(status) => self.retryable_status_codes.contains(&status),
            None => is_transport_reset(err),
        }
    }
}

/// Exponential backoff with full jitter: `U(0, base * 2^(attempt-1))`,
/// capped at 30s so a misconfigured `max_attempts` can't stall a turn for
/// minutes.
pub fn backoff_delay(attempt: u32) -> Duration {
    const BASE_MS: u64 = 250;
    const CAP_MS: u64 = 30_000;
    let exp = BASE_MS.saturating_mul(1u64 << attempt.min(10).saturating_sub(1));
    let upper = exp.min(CAP_MS);
    let jittered = rand::thread_rng().gen_range(0..=upper.max(1));
    Duration::from_millis(jittered)
}

/// Retry `f` under `policy`, sleeping with jittered backoff between
/// attempts. Returns the first success or the final failure.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !policy.should_retry(&e, attempt) {
                    return Err(e);
                }
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying LLM completion after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn extract_status_code(err: &anyhow::Error) -> Option<u16> {
    let msg = err.to_string();
    // "<driver> error <status>: <body>"
    let idx = msg.find(" error ")?;
    let rest = &msg[idx + " error ".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn is_transport_reset(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("request failed")
        || msg.contains("connection reset")
        || msg.contains("connection refused")
        || msg.contains("timed out")
        || msg.contains("broken pipe")
}
