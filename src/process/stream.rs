//! Streaming CLI process plumbing
//!
//! A [`CliStream`] owns one spawned CLI process running with stream-json
//! input and output. A reader task drains stdout line by line, accounts the
//! bytes, parses events and pushes them onto the manager's bounded event
//! queue without ever waiting on it.

use super::context::ContextMonitor;
use super::events::{parse_stream_line, InvocationId, StreamEvent, ToolRequest};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What the stream revealed about the conversation
#[derive(Debug, Clone, Default)]
pub(crate) struct StreamObservation {
    pub session_id: Option<String>,
    pub last_result: Option<String>,
    pub files_touched: Vec<String>,
    pub saw_error: bool,
}

impl StreamObservation {
    fn observe(&mut self, event: &StreamEvent) {
        if let Some(sid) = event.session_id() {
            self.session_id = Some(sid.to_string());
        }
        match event {
            StreamEvent::ToolUse { name, input, .. } => {
                let req = ToolRequest::from_tool_use(name, input);
                if req.modifies_files() {
                    for path in req.paths {
                        if !self.files_touched.contains(&path) {
                            self.files_touched.push(path);
                        }
                    }
                }
            }
            StreamEvent::Result {
                is_error, result, ..
            } => {
                if *is_error {
                    self.saw_error = true;
                } else if result.is_some() {
                    self.last_result = result.clone();
                }
            }
            StreamEvent::Error { .. } => self.saw_error = true,
            _ => {}
        }
    }
}

/// Push an event without waiting. A full queue drops the event.
pub(crate) fn forward(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(ev)) => {
            tracing::warn!(kind = ev.kind(), "Event queue full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(ev)) => {
            tracing::debug!(kind = ev.kind(), "Event queue closed, dropping event");
        }
    }
}

/// One running CLI process with stream-json stdio
pub(crate) struct CliStream {
    id: InvocationId,
    child: Mutex<Child>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    observation: Arc<Mutex<StreamObservation>>,
    turns: watch::Receiver<u64>,
    reader: Mutex<Option<JoinHandle<()>>>,
    stderr: Mutex<Option<JoinHandle<String>>>,
}

impl CliStream {
    /// Spawn the CLI and start draining its stdout.
    ///
    /// Every `tool_use` event is tagged with `id`. With `close_on_result`
    /// the stdin pipe is closed as soon as a `result` event arrives, which
    /// lets a one-shot invocation exit.
    pub fn spawn(
        id: InvocationId,
        mut cmd: Command,
        events: mpsc::Sender<StreamEvent>,
        monitor: Arc<ContextMonitor>,
        close_on_result: bool,
    ) -> Result<Self> {
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to spawn AI CLI: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Process("AI CLI stdout not captured".to_string()))?;
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf).await;
                buf
            })
        });

        let stdin = Arc::new(Mutex::new(child.stdin.take()));
        let observation = Arc::new(Mutex::new(StreamObservation::default()));
        let (turns_tx, turns) = watch::channel(0u64);

        let reader = {
            let stdin = stdin.clone();
            let observation = observation.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            monitor.track_output(line.len() + 1);
                            for mut event in parse_stream_line(&line) {
                                if let StreamEvent::ToolUse { invocation, .. } = &mut event {
                                    *invocation = id;
                                }
                                observation.lock().await.observe(&event);
                                let is_result = matches!(event, StreamEvent::Result { .. });
                                forward(&events, event);
                                if is_result {
                                    if close_on_result {
                                        stdin.lock().await.take();
                                    }
                                    turns_tx.send_modify(|n| *n += 1);
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Failed reading AI CLI stdout: {}", e);
                            break;
                        }
                    }
                }
            })
        };

        tracing::debug!(invocation = %id, "AI CLI process spawned");
        Ok(Self {
            id,
            child: Mutex::new(child),
            stdin,
            observation,
            turns,
            reader: Mutex::new(Some(reader)),
            stderr: Mutex::new(stderr),
        })
    }

    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Write one NDJSON line to the CLI's stdin.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| Error::Process("AI CLI stdin is closed".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Receiver counting `result` events seen so far.
    pub fn turns(&self) -> watch::Receiver<u64> {
        self.turns.clone()
    }

    pub async fn observation(&self) -> StreamObservation {
        self.observation.lock().await.clone()
    }

    pub async fn is_finished(&self) -> bool {
        match self.reader.lock().await.as_ref() {
            Some(handle) => handle.is_finished(),
            None => true,
        }
    }

    /// Wait until stdout is exhausted and the process has exited.
    ///
    /// Cancellation kills the process. A failed exit without an error event
    /// in the stream is logged, never returned.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<StreamObservation> {
        let reader = self.reader.lock().await.take();
        let mut cancelled = false;
        if let Some(mut handle) = reader {
            tokio::select! {
                _ = &mut handle => {}
                _ = cancel.cancelled() => {
                    cancelled = true;
                    tracing::warn!("AI CLI invocation cancelled, killing process");
                    let _ = self.child.lock().await.start_kill();
                    let _ = handle.await;
                }
            }
        }
        self.stdin.lock().await.take();

        let status = self.child.lock().await.wait().await?;
        let stderr = match self.stderr.lock().await.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let observation = self.observation().await;

        if !status.success() && !cancelled {
            if observation.saw_error {
                tracing::debug!(
                    exit_code = ?status.code(),
                    "AI CLI exited after reporting an error"
                );
            } else {
                tracing::warn!(
                    exit_code = ?status.code(),
                    stderr = %stderr.trim(),
                    "AI CLI exited with failure but no error event"
                );
            }
        }
        Ok(observation)
    }

    /// Close stdin, give the process a moment to exit, then kill it.
    pub async fn shutdown(&self) {
        self.stdin.lock().await.take();
        let mut child = self.child.lock().await;
        let exited = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
        if exited.is_err() {
            tracing::warn!("AI CLI did not exit after stdin closed, killing it");
            let _ = child.kill().await;
        }
        drop(child);
        if let Some(handle) = self.reader.lock().await.take() {
            let _ = handle.await;
        }
    }
}

/// Run the one-shot bootstrap invocation and return its session id.
pub(crate) async fn run_bootstrap(
    mut cmd: Command,
    monitor: &ContextMonitor,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    cmd.stdin(std::process::Stdio::null());
    let child = cmd
        .spawn()
        .map_err(|e| Error::Process(format!("Failed to spawn AI CLI: {}", e)))?;

    let output = tokio::select! {
        out = child.wait_with_output() => out?,
        _ = cancel.cancelled() => {
            return Err(Error::Process("bootstrap invocation cancelled".to_string()));
        }
    };
    monitor.track_output(output.stdout.len());

    if !output.status.success() {
        return Err(Error::Process(format!(
            "bootstrap invocation failed ({:?}): {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(bootstrap_session_id(&String::from_utf8_lossy(&output.stdout)))
}

/// Session id from bootstrap output: one JSON document, or the last line
/// of NDJSON carrying one.
fn bootstrap_session_id(stdout: &str) -> Option<String> {
    let from_value = |v: serde_json::Value| {
        v.get("session_id")
            .and_then(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    if let Ok(v) = serde_json::from_str::<serde_json::Value>(stdout.trim()) {
        return from_value(v);
    }
    stdout
        .lines()
        .rev()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .find_map(from_value)
}
