//! Bus envelope shared by every agent in a team

use super::payload::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of a protocol message. Unknown kinds deserialize to `Unknown`
/// so newer peers never break older sidecars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserMessage,
    TaskAssignment,
    TaskResult,
    LeaderResponse,
    Question,
    ContextShare,
    StatusUpdate,
    SystemCommand,
    ActivityEvent,
    ContainerValidation,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UserMessage => "user_message",
            Self::TaskAssignment => "task_assignment",
            Self::TaskResult => "task_result",
            Self::LeaderResponse => "leader_response",
            Self::Question => "question",
            Self::ContextShare => "context_share",
            Self::StatusUpdate => "status_update",
            Self::SystemCommand => "system_command",
            Self::ActivityEvent => "activity_event",
            Self::ContainerValidation => "container_validation",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One message on the team bus. Never mutated after construction;
/// state changes are expressed by publishing a new message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub message_id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, String>>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ProtocolMessage {
    /// Build a message whose `type` follows from the payload variant.
    pub fn new(from: impl Into<String>, to: impl Into<String>, payload: Payload) -> Self {
        let message_type = payload.message_type();
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            message_type,
            ref_message_id: None,
            context: None,
            payload: payload.into_value(),
            timestamp: Utc::now(),
        }
    }

    /// Same message, answering `ref_message_id`.
    pub fn in_reply_to(mut self, ref_message_id: Option<String>) -> Self {
        self.ref_message_id = ref_message_id;
        self
    }

    pub fn with_context(mut self, context: HashMap<String, String>) -> Self {
        self.context = Some(context);
        self
    }

    /// Decode the payload according to `message_type`.
    pub fn decode(&self) -> crate::Result<Payload> {
        Payload::decode(self.message_type, &self.payload)
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
