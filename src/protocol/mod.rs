//! Inter-agent protocol
//!
//! Envelope, per-kind payloads and the subject scheme shared by every
//! sidecar in a team.

pub mod message;
pub mod payload;
pub mod subject;

pub use message::{MessageType, ProtocolMessage};
pub use payload::*;
pub use subject::{validate_token, TeamSubjects};
