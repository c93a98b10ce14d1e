//! Agent Process Manager
//!
//! Drives the external AI CLI for one agent: bootstrap with a system prompt,
//! per-input invocations resuming a stored session (or one persistent
//! process), NDJSON event parsing, context accounting and compaction.

pub mod command;
pub mod context;
pub mod events;
pub mod manager;
pub mod resume;
mod stream;

pub use command::{resolve_cli_binary, InvocationMode, ProcessConfig};
pub use context::{estimate_tokens, ContextMonitor};
pub use events::{
    extract_text, parse_ndjson, parse_stream_line, InvocationId, StreamEvent, ToolRequest,
};
pub use manager::{ProcessManager, ProcessStatus};
pub use resume::{build_resume_prompt, ResumeContext};

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the bridge needs from an agent process.
///
/// [`ProcessManager`] is the real implementation; tests substitute a
/// recording fake.
#[async_trait]
pub trait AgentProcess: Send + Sync {
    /// Start the process. Errors if it is already running.
    async fn start(&self, cancel: &CancellationToken) -> Result<()>;

    /// Stop the process. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Stop, drop the session, and start again primed with `resume_prompt`.
    async fn restart(&self, resume_prompt: &str, cancel: &CancellationToken) -> Result<()>;

    /// Feed one input and wait for the CLI to finish the turn.
    async fn send_input(&self, text: &str, cancel: &CancellationToken) -> Result<()>;

    /// Answer a pending tool call in place of the tool itself. The result
    /// goes to the invocation that reported the `tool_use`.
    async fn send_tool_result(
        &self,
        invocation: InvocationId,
        output: &str,
        is_error: bool,
    ) -> Result<()>;

    /// Take the outbound event queue. `None` once taken.
    async fn take_events(&self) -> Option<mpsc::Receiver<StreamEvent>>;

    /// Estimated context usage, 0-100.
    fn context_usage(&self) -> u8;
}
