//! AI-CLI command construction
//!
//! Builds the argument vector and environment for each kind of CLI
//! invocation, and locates the CLI binary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// How the manager drives the CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// One CLI process per input, conversation carried by `--resume`
    #[default]
    PerInvocation,
    /// One long-lived CLI process fed over stdin
    Persistent,
}

/// Configuration for one agent's CLI process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    pub system_prompt: Option<String>,
    pub allowed_tools: Vec<String>,
    pub work_dir: PathBuf,
    pub max_tokens: u64,
    pub compaction_threshold: f64,
    pub auto_compact: bool,
    pub mode: InvocationMode,
    pub cli_path: Option<PathBuf>,
    pub model: Option<String>,
    pub env: BTreeMap<String, String>,
    pub event_buffer: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            allowed_tools: Vec::new(),
            work_dir: PathBuf::from("."),
            max_tokens: 200_000,
            compaction_threshold: 0.8,
            auto_compact: true,
            mode: InvocationMode::PerInvocation,
            cli_path: None,
            model: None,
            env: BTreeMap::new(),
            event_buffer: 256,
        }
    }
}

impl ProcessConfig {
    /// Same config with a different system prompt.
    pub fn with_system_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(prompt.into()),
            ..self.clone()
        }
    }

    /// Flags shared by every invocation kind.
    fn common_args(&self, args: &mut Vec<String>) {
        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.allowed_tools.join(","));
        }
        if let Some(ref model) = self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
    }

    /// One-shot bootstrap with structured (non-streaming) output.
    pub fn bootstrap_args(&self, prompt: &str) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ];
        self.common_args(&mut args);
        args
    }

    /// Streamed invocation reading user messages from stdin, resuming
    /// `session_id` when known. Used by both invocation modes; they differ
    /// only in how long the process lives.
    pub fn stream_args(&self, session_id: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--input-format".to_string(),
            "stream-json".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if let Some(sid) = session_id {
            args.push("--resume".to_string());
            args.push(sid.to_string());
        }
        self.common_args(&mut args);
        args
    }

    /// Build a command with piped stdio, the agent's work dir and env.
    pub fn command(&self, binary: &Path, args: &[String]) -> Command {
        let mut cmd = Command::new(binary);
        cmd.args(args)
            .current_dir(&self.work_dir)
            .envs(&self.env)
            .env("CLAUDECODE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Resolve the AI-CLI binary path.
///
/// An explicit path wins. Otherwise `claude` is looked up on `PATH` and in
/// the usual install locations.
pub fn resolve_cli_binary(explicit: Option<&Path>) -> crate::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.components().count() > 1 || path.exists() {
            return Ok(path.to_path_buf());
        }
        return which(path.as_os_str()).ok_or_else(|| {
            crate::Error::Process(format!("CLI binary not found on PATH: {}", path.display()))
        });
    }

    if let Some(found) = which(std::ffi::OsStr::new("claude")) {
        return Ok(found);
    }

    let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let candidates = [
        home.join(".claude").join("local").join("claude"),
        PathBuf::from("/usr/local/bin/claude"),
        PathBuf::from("/opt/homebrew/bin/claude"),
    ];

    candidates
        .into_iter()
        .find(|candidate| candidate.exists())
        .ok_or_else(|| {
            crate::Error::Process(
                "AI CLI not found. Install Claude Code or set process.cli_path".to_string(),
            )
        })
}

fn which(name: &std::ffi::OsStr) -> Option<PathBuf> {
    let output = std::process::Command::new("which").arg(name).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}
