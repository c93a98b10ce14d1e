//! Per-kind payload schemas
//!
//! Every [`MessageType`] has exactly one payload shape. [`Payload`] is the
//! closed union used by the bridge's dispatch table.

use super::message::MessageType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Payload structs
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMessagePayload {
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignmentPayload {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_seconds: Option<u64>,
}

/// Outcome of a task or leader turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultPayload {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderResponsePayload {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Agent lifecycle status as reported on the status subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Working,
    Idle,
    Error,
    Stopped,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Working => write!(f, "working"),
            Self::Idle => write!(f, "idle"),
            Self::Error => write!(f, "error"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdatePayload {
    pub agent: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_completed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_failed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_usage_pct: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemCommandKind {
    Shutdown,
    Restart,
    CompactContext,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemCommandPayload {
    pub command: SystemCommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<HashMap<String, String>>,
}

impl SystemCommandPayload {
    /// Look up one argument by name.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.as_ref()?.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityEventPayload {
    pub event_type: String,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerValidationPayload {
    pub agent_name: String,
    pub checks: Vec<ValidationCheck>,
    pub summary: String,
}

// =============================================================================
// Closed union
// =============================================================================

/// Decoded payload, one variant per message kind
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    UserMessage(UserMessagePayload),
    TaskAssignment(TaskAssignmentPayload),
    TaskResult(TaskResultPayload),
    LeaderResponse(LeaderResponsePayload),
    Question(QuestionPayload),
    /// Context shares carry arbitrary JSON from the sharing agent
    ContextShare(serde_json::Value),
    StatusUpdate(StatusUpdatePayload),
    SystemCommand(SystemCommandPayload),
    ActivityEvent(ActivityEventPayload),
    ContainerValidation(ContainerValidationPayload),
    Unknown,
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::UserMessage(_) => MessageType::UserMessage,
            Self::TaskAssignment(_) => MessageType::TaskAssignment,
            Self::TaskResult(_) => MessageType::TaskResult,
            Self::LeaderResponse(_) => MessageType::LeaderResponse,
            Self::Question(_) => MessageType::Question,
            Self::ContextShare(_) => MessageType::ContextShare,
            Self::StatusUpdate(_) => MessageType::StatusUpdate,
            Self::SystemCommand(_) => MessageType::SystemCommand,
            Self::ActivityEvent(_) => MessageType::ActivityEvent,
            Self::ContainerValidation(_) => MessageType::ContainerValidation,
            Self::Unknown => MessageType::Unknown,
        }
    }

    pub fn into_value(self) -> serde_json::Value {
        let value = match self {
            Self::UserMessage(p) => serde_json::to_value(p),
            Self::TaskAssignment(p) => serde_json::to_value(p),
            Self::TaskResult(p) => serde_json::to_value(p),
            Self::LeaderResponse(p) => serde_json::to_value(p),
            Self::Question(p) => serde_json::to_value(p),
            Self::ContextShare(v) => Ok(v),
            Self::StatusUpdate(p) => serde_json::to_value(p),
            Self::SystemCommand(p) => serde_json::to_value(p),
            Self::ActivityEvent(p) => serde_json::to_value(p),
            Self::ContainerValidation(p) => serde_json::to_value(p),
            Self::Unknown => Ok(serde_json::Value::Null),
        };
        value.unwrap_or_default()
    }

    /// Decode `value` as the payload schema of `kind`.
    pub fn decode(kind: MessageType, value: &serde_json::Value) -> crate::Result<Self> {
        let v = value.clone();
        Ok(match kind {
            MessageType::UserMessage => Self::UserMessage(serde_json::from_value(v)?),
            MessageType::TaskAssignment => Self::TaskAssignment(serde_json::from_value(v)?),
            MessageType::TaskResult => Self::TaskResult(serde_json::from_value(v)?),
            MessageType::LeaderResponse => Self::LeaderResponse(serde_json::from_value(v)?),
            MessageType::Question => Self::Question(serde_json::from_value(v)?),
            MessageType::ContextShare => Self::ContextShare(v),
            MessageType::StatusUpdate => Self::StatusUpdate(serde_json::from_value(v)?),
            MessageType::SystemCommand => Self::SystemCommand(serde_json::from_value(v)?),
            MessageType::ActivityEvent => Self::ActivityEvent(serde_json::from_value(v)?),
            MessageType::ContainerValidation => {
                Self::ContainerValidation(serde_json::from_value(v)?)
            }
            MessageType::Unknown => Self::Unknown,
        })
    }
}
