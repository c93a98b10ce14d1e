//! Agent process lifecycle
//!
//! [`ProcessManager`] owns one agent's conversation with the AI CLI. In
//! per-invocation mode every input spawns a fresh CLI process that resumes
//! the stored session; in persistent mode one process lives across inputs.
//! Both modes push parsed stream events onto the same bounded queue.

use super::command::{resolve_cli_binary, InvocationMode, ProcessConfig};
use super::context::ContextMonitor;
use super::events::{tool_result_line, user_message_line, InvocationId, StreamEvent};
use super::resume::{build_resume_prompt, ResumeContext};
use super::stream::{run_bootstrap, CliStream, StreamObservation};
use super::AgentProcess;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Lifecycle state of the managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Stopped,
    Running,
    Error,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Error => write!(f, "error"),
        }
    }
}

struct ManagerState {
    /// Lifecycle state reported to callers
    status: ProcessStatus,
    /// Current settings; `restart` swaps in a new system prompt
    config: ProcessConfig,
    /// Session resumed by the next invocation
    session_id: Option<String>,
    /// Producer side of the event queue, `None` once stopped
    events_tx: Option<mpsc::Sender<StreamEvent>>,
    /// CLI binary resolved at start
    binary: Option<PathBuf>,
    /// Long-lived process (persistent mode)
    persistent: Option<Arc<CliStream>>,
    /// Per-invocation processes still running, by id
    invocations: HashMap<InvocationId, Arc<CliStream>>,
    /// Source of invocation ids
    next_invocation: u64,
    /// Bumped by every stop; work begun under an older value must not
    /// bring the process back
    generation: u64,
    /// First input since start, kept for the resumption prompt
    original_task: Option<String>,
    /// Text of the latest successful result
    last_result: Option<String>,
    /// Files written by tool calls since start
    files_touched: Vec<String>,
}

impl ManagerState {
    fn next_invocation_id(&mut self) -> InvocationId {
        self.next_invocation += 1;
        InvocationId(self.next_invocation)
    }

    fn record(&mut self, obs: StreamObservation) {
        if let Some(sid) = obs.session_id {
            if self.session_id.as_deref() != Some(sid.as_str()) {
                tracing::info!(
                    old = ?self.session_id,
                    new = %sid,
                    "AI CLI session rotated"
                );
                self.session_id = Some(sid);
            }
        }
        if obs.last_result.is_some() {
            self.last_result = obs.last_result;
        }
        for path in obs.files_touched {
            if !self.files_touched.contains(&path) {
                self.files_touched.push(path);
            }
        }
    }
}

/// Manages one agent's AI-CLI process
pub struct ProcessManager {
    state: Mutex<ManagerState>,
    events_rx: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
    monitor: Arc<ContextMonitor>,
}

impl ProcessManager {
    /// Create a stopped manager. The event queue exists from the start so
    /// the bridge can take it before the first `start`.
    pub fn new(config: ProcessConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let monitor = Arc::new(ContextMonitor::new(
            config.max_tokens,
            config.compaction_threshold,
        ));
        Self {
            state: Mutex::new(ManagerState {
                status: ProcessStatus::Stopped,
                config,
                session_id: None,
                events_tx: Some(tx),
                binary: None,
                persistent: None,
                invocations: HashMap::new(),
                next_invocation: 0,
                generation: 0,
                original_task: None,
                last_result: None,
                files_touched: Vec::new(),
            }),
            events_rx: Mutex::new(Some(rx)),
            monitor,
        }
    }

    pub async fn status(&self) -> ProcessStatus {
        self.state.lock().await.status
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.lock().await.session_id.clone()
    }

    pub async fn config(&self) -> ProcessConfig {
        self.state.lock().await.config.clone()
    }

    pub fn monitor(&self) -> &ContextMonitor {
        &self.monitor
    }

    /// Start the agent. Runs the bootstrap invocation when a system prompt
    /// is configured; otherwise the session is created by the first input.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        self.start_inner(cancel, None).await
    }

    /// Start unless a stop happened since `expected` was observed.
    async fn start_inner(&self, cancel: &CancellationToken, expected: Option<u64>) -> Result<()> {
        let (config, session_id, generation) = {
            let mut state = self.state.lock().await;
            if expected.map_or(false, |g| g != state.generation) {
                tracing::info!("Agent process stopped meanwhile, not starting");
                return Ok(());
            }
            if state.status == ProcessStatus::Running {
                return Err(Error::Process("agent process already running".to_string()));
            }
            if state.events_tx.as_ref().map_or(true, |tx| tx.is_closed()) {
                let (tx, rx) = mpsc::channel(state.config.event_buffer.max(1));
                state.events_tx = Some(tx);
                *self.events_rx.lock().await = Some(rx);
            }
            (
                state.config.clone(),
                state.session_id.clone(),
                state.generation,
            )
        };

        match self.launch(&config, session_id, cancel).await {
            Ok((binary, session_id, persistent)) => {
                let mut state = self.state.lock().await;
                if state.generation != generation {
                    drop(state);
                    tracing::info!("Agent process stopped while starting");
                    if let Some(stream) = persistent {
                        stream.shutdown().await;
                    }
                    return Ok(());
                }
                state.binary = Some(binary);
                if session_id.is_some() {
                    state.session_id = session_id;
                }
                state.persistent = persistent;
                state.status = ProcessStatus::Running;
                tracing::info!(
                    mode = ?config.mode,
                    session_id = ?state.session_id,
                    "Agent process started"
                );
                Ok(())
            }
            Err(e) => {
                self.state.lock().await.status = ProcessStatus::Error;
                tracing::error!("Agent process failed to start: {}", e);
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        config: &ProcessConfig,
        mut session_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, Option<String>, Option<Arc<CliStream>>)> {
        let binary = resolve_cli_binary(config.cli_path.as_deref())?;

        if let Some(ref prompt) = config.system_prompt {
            self.monitor.track_input(prompt.len());
            let cmd = config.command(&binary, &config.bootstrap_args(prompt));
            let sid = run_bootstrap(cmd, &self.monitor, cancel).await?;
            if sid.is_none() {
                tracing::warn!("Bootstrap invocation returned no session id");
            }
            session_id = sid.or(session_id);
        }

        let persistent = match config.mode {
            InvocationMode::PerInvocation => None,
            InvocationMode::Persistent => {
                let (id, tx) = {
                    let mut state = self.state.lock().await;
                    let tx = state
                        .events_tx
                        .clone()
                        .ok_or_else(|| Error::Process("event queue is closed".to_string()))?;
                    (state.next_invocation_id(), tx)
                };
                let cmd = config.command(&binary, &config.stream_args(session_id.as_deref()));
                Some(Arc::new(CliStream::spawn(id, cmd, tx, self.monitor.clone(), false)?))
            }
        };

        Ok((binary, session_id, persistent))
    }

    /// Stop the agent. Stopping a stopped manager is a no-op.
    ///
    /// The event queue closes once in-flight invocations finish draining.
    pub async fn stop(&self) -> Result<()> {
        self.stop_inner(true, None).await;
        Ok(())
    }

    /// Stop unless a stop already happened since `expected` was observed.
    /// Returns the new generation, or `None` when superseded.
    async fn stop_inner(&self, close_queue: bool, expected: Option<u64>) -> Option<u64> {
        let (persistent, generation) = {
            let mut state = self.state.lock().await;
            if expected.map_or(false, |g| g != state.generation) {
                return None;
            }
            state.generation += 1;
            if close_queue {
                state.events_tx = None;
                state.original_task = None;
            }
            if state.status == ProcessStatus::Stopped && state.persistent.is_none() {
                return Some(state.generation);
            }
            state.status = ProcessStatus::Stopped;
            (state.persistent.take(), state.generation)
        };

        if let Some(stream) = persistent {
            stream.shutdown().await;
        }
        tracing::info!("Agent process stopped");
        Some(generation)
    }

    /// Stop, forget the session, install `resume_prompt` as the system
    /// prompt and start again.
    pub async fn restart(&self, resume_prompt: &str, cancel: &CancellationToken) -> Result<()> {
        self.restart_inner(resume_prompt, cancel, None).await
    }

    async fn restart_inner(
        &self,
        resume_prompt: &str,
        cancel: &CancellationToken,
        expected: Option<u64>,
    ) -> Result<()> {
        let Some(generation) = self.stop_inner(false, expected).await else {
            tracing::info!("Agent process stopped meanwhile, not restarting");
            return Ok(());
        };
        {
            let mut state = self.state.lock().await;
            state.session_id = None;
            state.config = state.config.with_system_prompt(resume_prompt);
            state.last_result = None;
            state.files_touched.clear();
        }
        self.monitor.reset();
        tracing::info!("Restarting agent process with resume prompt");
        self.start_inner(cancel, Some(generation)).await
    }

    /// Send one input to the agent and block until the CLI finishes the turn.
    ///
    /// Stream events are the outcome; a failing CLI exit is only logged.
    pub async fn send_input(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        let (config, binary, session_id, tx, persistent, generation) = {
            let mut state = self.state.lock().await;
            if state.status != ProcessStatus::Running {
                return Err(Error::Process(format!(
                    "agent process is not running ({})",
                    state.status
                )));
            }
            if state.original_task.is_none() {
                state.original_task = Some(text.to_string());
            }
            let binary = state
                .binary
                .clone()
                .ok_or_else(|| Error::Internal("running without a CLI binary".to_string()))?;
            let tx = state
                .events_tx
                .clone()
                .ok_or_else(|| Error::Process("event queue is closed".to_string()))?;
            (
                state.config.clone(),
                binary,
                state.session_id.clone(),
                tx,
                state.persistent.clone(),
                state.generation,
            )
        };

        let line = user_message_line(text, session_id.as_deref());
        self.monitor.track_input(text.len());

        let observation = match persistent {
            Some(stream) => self.send_persistent(&stream, &line, cancel).await?,
            None => self.send_one_shot(&config, &binary, session_id, tx, &line, cancel).await?,
        };

        let compact = {
            let mut state = self.state.lock().await;
            state.record(observation);
            config.auto_compact
                && !cancel.is_cancelled()
                && self.monitor.needs_compaction()
                && state.status == ProcessStatus::Running
                && state.generation == generation
        };
        if compact {
            self.compact(cancel, generation).await?;
        }
        Ok(())
    }

    async fn send_one_shot(
        &self,
        config: &ProcessConfig,
        binary: &Path,
        session_id: Option<String>,
        tx: mpsc::Sender<StreamEvent>,
        line: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamObservation> {
        let cmd = config.command(binary, &config.stream_args(session_id.as_deref()));
        let id = self.state.lock().await.next_invocation_id();
        let stream = Arc::new(CliStream::spawn(id, cmd, tx, self.monitor.clone(), true)?);
        self.state.lock().await.invocations.insert(id, stream.clone());

        if let Err(e) = stream.write_line(line).await {
            tracing::warn!(invocation = %id, "Failed to write prompt to AI CLI: {}", e);
        }
        let observation = stream.wait(cancel).await;
        self.state.lock().await.invocations.remove(&id);
        observation
    }

    async fn send_persistent(
        &self,
        stream: &CliStream,
        line: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamObservation> {
        let mut turns = stream.turns();
        turns.borrow_and_update();

        if let Err(e) = stream.write_line(line).await {
            tracing::warn!("AI CLI process is gone: {}", e);
            self.state.lock().await.status = ProcessStatus::Error;
            return Ok(stream.observation().await);
        }

        tokio::select! {
            changed = turns.changed() => {
                if changed.is_err() {
                    tracing::warn!("AI CLI process exited before finishing the turn");
                    self.state.lock().await.status = ProcessStatus::Error;
                }
            }
            _ = cancel.cancelled() => {
                tracing::warn!("Input cancelled while waiting for the AI CLI");
            }
        }
        Ok(stream.observation().await)
    }

    /// Replace the exhausted session with a fresh one primed by a summary,
    /// unless the process was stopped after `generation` was observed.
    async fn compact(&self, cancel: &CancellationToken, generation: u64) -> Result<()> {
        let ctx = {
            let state = self.state.lock().await;
            ResumeContext {
                original_task: state.original_task.clone().unwrap_or_default(),
                progress: state.last_result.clone(),
                files_touched: state.files_touched.clone(),
            }
        };
        tracing::info!(
            usage_pct = self.monitor.usage_percent(),
            "Context threshold reached, compacting"
        );
        self.restart_inner(&build_resume_prompt(&ctx), cancel, Some(generation))
            .await
    }

    /// Answer the pending tool call of `invocation`.
    pub async fn send_tool_result(
        &self,
        invocation: InvocationId,
        output: &str,
        is_error: bool,
    ) -> Result<()> {
        let target = {
            let state = self.state.lock().await;
            state
                .persistent
                .clone()
                .filter(|p| p.id() == invocation)
                .or_else(|| state.invocations.get(&invocation).cloned())
        };
        let stream = target.ok_or_else(|| {
            Error::Process(format!(
                "invocation {} is not running, cannot deliver tool result",
                invocation
            ))
        })?;
        let line = tool_result_line(output, is_error);
        self.monitor.track_input(line.len());
        stream.write_line(&line).await
    }

    /// Hand out the event queue receiver. Only the first caller after each
    /// queue creation gets it.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<StreamEvent>> {
        self.events_rx.lock().await.take()
    }
}

#[async_trait]
impl AgentProcess for ProcessManager {
    async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        ProcessManager::start(self, cancel).await
    }

    async fn stop(&self) -> Result<()> {
        ProcessManager::stop(self).await
    }

    async fn restart(&self, resume_prompt: &str, cancel: &CancellationToken) -> Result<()> {
        ProcessManager::restart(self, resume_prompt, cancel).await
    }

    async fn send_input(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        ProcessManager::send_input(self, text, cancel).await
    }

    async fn send_tool_result(
        &self,
        invocation: InvocationId,
        output: &str,
        is_error: bool,
    ) -> Result<()> {
        ProcessManager::send_tool_result(self, invocation, output, is_error).await
    }

    async fn take_events(&self) -> Option<mpsc::Receiver<StreamEvent>> {
        ProcessManager::take_events(self).await
    }

    fn context_usage(&self) -> u8 {
        self.monitor.usage_percent()
    }
}
