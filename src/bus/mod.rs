//! Team message bus
//!
//! The bridge talks to its team through [`MessageBus`]: publish, subscribe,
//! queue-group subscribe and request/reply over NATS-style dotted subjects.
//!
//! ## Implementations
//!
//! - [`MemoryBus`]: in-process, used by tests and as the local router
//! - [`StdioBus`]: NDJSON frames over stdin/stdout for running behind an
//!   external transport shim

pub mod memory;
pub mod stdio;

pub use memory::{subject_matches, MemoryBus};
pub use stdio::{Frame, StdioBus};

use crate::error::Result;
use crate::protocol::ProtocolMessage;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// A message as delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// Concrete subject the message was published on
    pub subject: String,
    /// Inbox to answer on, set for requests
    pub reply: Option<String>,
    pub message: ProtocolMessage,
}

/// Stream of messages matching one subscription
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    rx: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub(crate) fn new(subject: impl Into<String>, rx: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            subject: subject.into(),
            rx,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Already-delivered message, without waiting.
    pub fn try_next(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

/// Publish/subscribe transport used by the bridge
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `message` on a concrete subject.
    async fn publish(&self, subject: &str, message: &ProtocolMessage) -> Result<()>;

    /// Subscribe to a subject pattern (`*` and `>` wildcards allowed).
    async fn subscribe(&self, subject: &str) -> Result<Subscription>;

    /// Subscribe as one member of `group`; each message goes to one member.
    async fn queue_subscribe(&self, subject: &str, group: &str) -> Result<Subscription>;

    /// Publish with a fresh reply inbox and wait for the first answer.
    async fn request(
        &self,
        subject: &str,
        message: &ProtocolMessage,
        timeout: Duration,
    ) -> Result<BusMessage>;
}
