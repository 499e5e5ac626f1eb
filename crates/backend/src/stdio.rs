//! Decision backend running as a child process (spawn, communicate, lifecycle).
//!
//! The child reads one JSON-RPC request per line on stdin and writes one
//! response per line on stdout.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use permitter::BackendError;
use permitter::policies::{BackendQuery, BackendVerdict, DecisionBackend};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::{DECIDE_METHOD, JsonRpcRequest, JsonRpcResponse, RequestId};

/// Default timeout for a single backend round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum size of one response line (1MB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Configuration for a stdio backend.
#[derive(Debug, Clone, Deserialize)]
pub struct StdioConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

struct Pipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Handle to a running backend process.
pub struct StdioBackend {
    config: StdioConfig,
    // Killed when the backend is dropped.
    _process: Child,
    // One round trip at a time so responses pair with their requests.
    pipes: Mutex<Pipes>,
    next_id: AtomicI64,
    timeout: Duration,
}

impl StdioBackend {
    /// Spawn the backend process.
    pub async fn spawn(config: StdioConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn()?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdin")))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdout")))?;

        debug!(command = %config.command, "decision backend spawned");
        Ok(Self {
            config,
            _process: process,
            pipes: Mutex::new(Pipes {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            next_id: AtomicI64::new(1),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.config.command
    }

    /// Ask the backend for a verdict.
    pub async fn query(&self, query: &BackendQuery) -> Result<BackendVerdict> {
        self.request(DECIDE_METHOD, query).await
    }

    // --- Internal methods ---

    fn next_request_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, method).with_params(params)?;
        let request_json = serde_json::to_string(&request)?;

        let mut pipes = self.pipes.lock().await;
        pipes.stdin.write_all(request_json.as_bytes()).await?;
        pipes.stdin.write_all(b"\n").await?;
        pipes.stdin.flush().await?;

        let response = timeout(self.timeout, Self::read_response(&mut pipes.stdout, id))
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;

        let result_value = response.into_result()?;
        serde_json::from_value(result_value).map_err(|e| Error::InvalidResponse(e.to_string()))
    }

    /// Read until the response for `id` arrives.
    ///
    /// Responses to earlier requests whose callers gave up are discarded.
    async fn read_response(
        stdout: &mut BufReader<ChildStdout>,
        id: i64,
    ) -> Result<JsonRpcResponse> {
        let limit = MAX_OUTPUT_SIZE as u64 + 1;
        loop {
            let mut line = Vec::new();
            let bytes_read = (&mut *stdout)
                .take(limit)
                .read_until(b'\n', &mut line)
                .await?;
            if bytes_read == 0 {
                return Err(Error::BackendExited);
            }

            if bytes_read as u64 == limit && !line.ends_with(b"\n") {
                let skipped = Self::skip_line(stdout).await?;
                return Err(Error::OutputTooLarge {
                    size: line.len() + skipped,
                    max: MAX_OUTPUT_SIZE,
                });
            }

            let response: JsonRpcResponse = serde_json::from_slice(&line)
                .map_err(|e| Error::InvalidResponse(e.to_string()))?;
            match response.id {
                RequestId::Number(n) if n == id => return Ok(response),
                RequestId::Number(n) if n < id => {
                    trace!(stale = n, expected = id, "discarding stale response");
                }
                other => {
                    return Err(Error::InvalidResponse(format!(
                        "response ID mismatch: expected {id}, got {other:?}"
                    )));
                }
            }
        }
    }
}

impl StdioBackend {
    /// Discard the rest of the current line without buffering it. Returns
    /// the number of bytes skipped before the newline.
    async fn skip_line(stdout: &mut BufReader<ChildStdout>) -> Result<usize> {
        let mut skipped = 0;
        loop {
            let buf = stdout.fill_buf().await?;
            if buf.is_empty() {
                return Ok(skipped);
            }
            match buf.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    stdout.consume(end + 1);
                    return Ok(skipped + end);
                }
                None => {
                    let len = buf.len();
                    stdout.consume(len);
                    skipped += len;
                }
            }
        }
    }
}

impl DecisionBackend for StdioBackend {
    async fn decide(
        &self,
        query: &BackendQuery,
    ) -> std::result::Result<BackendVerdict, BackendError> {
        self.query(query).await.map_err(BackendError::from)
    }
}
