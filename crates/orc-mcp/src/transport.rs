// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Transport implementations for the two MCP wire forms (spec §4.3, §6):
//! stdio (subprocess) and HTTP streamable.
//!
//! Both hide request/response correlation behind a single
//! `request(method, params) -> Value` call; the caller never sees JSON-RPC
//! ids. [`StdioTransport`] frames its subprocess's stdout with
//! `tokio_util::codec::LinesCodec` and drains stderr continuously on a
//! separate task so a chatty server can never block a tool call.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex};
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::error::McpError;
use crate::jsonrpc::{RpcNotification, RpcRequest, RpcResponse};

/// A JSON-RPC transport to one MCP server. Implementations own
/// request/response correlation; callers only see method + params in,
/// result `Value` out (spec §6 "Request/response correlation by JSON-RPC id").
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError>;
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;
    /// Close the transport. Must never fail loudly — callers log and
    /// discard the error (spec §4.3 "failure to close cleanly is logged
    /// but never propagated").
    async fn close(&self) -> Result<(), McpError>;
}

/// Spawns a subprocess and speaks newline-delimited JSON-RPC over its
/// stdin/stdout. stderr is drained continuously and forwarded to `tracing`
/// (spec §5 "subprocess stderr ... forwarded as MCPStderr events").
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    stdin: Mutex<ChildStdin>,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>,
    reader_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    stderr_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StdioTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(McpError::Spawn)?;
        let stdin = child.stdin.take().ok_or(McpError::Closed)?;
        let stdout = child.stdout.take().ok_or(McpError::Closed)?;
        let stderr = child.stderr.take().ok_or(McpError::Closed)?;

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let pending_reader = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut framed = FramedRead::new(stdout, LinesCodec::new());
            while let Some(line) = framed.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        tracing::debug!(error = %e, "mcp stdio: frame read error");
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RpcResponse>(&line) {
                    Ok(resp) => {
                        if let Some(id) = resp.id {
                            if let Some(tx) = pending_reader.lock().await.remove(&id) {
                                let _ = tx.send(resp);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, line = %line, "mcp stdio: unparsable message");
                    }
                }
            }
        });

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => tracing::debug!(target: "mcp_stderr", "{line}"),
                    Ok(None) | Err(_) => break,
                }
            }
        });

        Ok(Self {
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(stdin),
            next_id: AtomicU64::new(1),
            pending,
            reader_task: Mutex::new(Some(reader_task)),
            stderr_task: Mutex::new(Some(stderr_task)),
        })
    }

    async fn write_line(&self, line: String) -> Result<(), McpError> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let req = RpcRequest::new(id, method, params);
        let line = serde_json::to_string(&req)?;
        if let Err(e) = self.write_line(line).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let resp = rx.await.map_err(|_| McpError::Closed)?;
        if let Some(err) = resp.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(resp.result.unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let note = RpcNotification::new(method, params);
        let line = serde_json::to_string(&note)?;
        self.write_line(line).await
    }

    async fn close(&self) -> Result<(), McpError> {
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.lock().await.take() {
            task.abort();
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await;
        }
        Ok(())
    }
}

/// Speaks JSON-RPC over an HTTP streamable endpoint: a POST per call whose
/// response is either a plain JSON body or a `text/event-stream` of `data:`
/// lines (spec §6 "HTTP streamable").
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: &str, headers: &HashMap<String, String>) -> Result<Self, McpError> {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| McpError::Transport(format!("invalid header name {k}: {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| McpError::Transport(format!("invalid header value for {k}: {e}")))?;
            map.insert(name, value);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            headers: map,
            next_id: AtomicU64::new(1),
        })
    }
}

/// Parse an SSE body (`data: {...}\n\n` frames) and return the last frame
/// that decodes as a JSON-RPC response, preferring one whose `id` matches.
fn parse_sse_body(body: &str, expect_id: u64) -> Result<RpcResponse, McpError> {
    let mut last: Option<RpcResponse> = None;
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        match serde_json::from_str::<RpcResponse>(data) {
            Ok(resp) => {
                if resp.id == Some(expect_id) {
                    return Ok(resp);
                }
                last = Some(resp);
            }
            Err(e) => tracing::debug!(error = %e, "mcp http: unparsable SSE frame"),
        }
    }
    last.ok_or(McpError::Closed)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = RpcRequest::new(id, method, params);
        let resp = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&req)
            .send()
            .await?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp.text().await?;

        let rpc_resp = if content_type.contains("text/event-stream") {
            parse_sse_body(&body, id)?
        } else {
            serde_json::from_str(&body)?
        };

        if let Some(err) = rpc_resp.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(rpc_resp.result.unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let note = RpcNotification::new(method, params);
        self.client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&note)
            .send()
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        // No persistent connection to tear down beyond the pooled reqwest
        // client, which drops with `self`.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_body_returns_frame_matching_requested_id() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"a\":1}}\n\n\
                     data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"a\":2}}\n\n";
        let resp = parse_sse_body(body, 2).unwrap();
        assert_eq!(resp.result.unwrap()["a"], 2);
    }

    #[test]
    fn sse_body_falls_back_to_last_frame_when_id_absent() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"result\":{\"a\":1}}\n\n";
        let resp = parse_sse_body(body, 99).unwrap();
        assert_eq!(resp.result.unwrap()["a"], 1);
    }

    #[test]
    fn sse_body_with_no_data_lines_errors() {
        let body = ": comment only\n\n";
        assert!(parse_sse_body(body, 1).is_err());
    }

    #[test]
    fn http_transport_rejects_invalid_header_name() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "value".to_string());
        assert!(HttpTransport::new("http://example.com", &headers).is_err());
    }

    #[test]
    fn http_transport_accepts_valid_headers() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer xyz".to_string());
        assert!(HttpTransport::new("http://example.com", &headers).is_ok());
    }
}
