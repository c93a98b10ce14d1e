//! NDJSON bus adapter
//!
//! Lets the sidecar run behind any external transport (a NATS client, a
//! websocket relay, a test harness). Every publish and subscription is
//! written to the output as one JSON frame per line; `pub` frames read from
//! the input are routed to local subscribers.
//!
//! ```text
//! {"op":"sub","subject":"team.alpha.worker-1"}
//! {"op":"pub","subject":"team.alpha.status","message":{...}}
//! ```

use super::memory::{await_reply, new_inbox, MemoryBus};
use super::{BusMessage, MessageBus, Subscription};
use crate::error::{Error, Result};
use crate::protocol::ProtocolMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One line on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    Pub {
        subject: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply: Option<String>,
        message: ProtocolMessage,
    },
    Sub {
        subject: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
    },
}

/// Bus speaking NDJSON frames over a writer (stdout by default)
pub struct StdioBus<W> {
    local: MemoryBus,
    out: Mutex<W>,
}

impl StdioBus<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> StdioBus<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(out: W) -> Self {
        Self {
            local: MemoryBus::new(),
            out: Mutex::new(out),
        }
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }

    async fn send(
        &self,
        subject: &str,
        reply: Option<&str>,
        message: &ProtocolMessage,
    ) -> Result<()> {
        if subject.contains('*') || subject.contains('>') {
            return Err(Error::Bus(format!(
                "cannot publish to wildcard subject '{}'",
                subject
            )));
        }
        self.write_frame(&Frame::Pub {
            subject: subject.to_string(),
            reply: reply.map(String::from),
            message: message.clone(),
        })
        .await?;
        self.local.deliver(subject, reply, message).await;
        Ok(())
    }

    /// Route inbound `pub` frames to local subscribers until the input ends
    /// or `cancel` fires. Malformed lines are skipped.
    pub async fn pump<R>(&self, input: R, cancel: &CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(input).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = cancel.cancelled() => break,
            };
            let Some(line) = line else {
                tracing::info!("Bus input closed");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Frame>(&line) {
                Ok(Frame::Pub {
                    subject,
                    reply,
                    message,
                }) => {
                    self.local.deliver(&subject, reply.as_deref(), &message).await;
                }
                Ok(Frame::Sub { .. }) => {
                    tracing::debug!("Ignoring inbound sub frame");
                }
                Err(e) => {
                    tracing::debug!("Skipping malformed bus frame: {}", e);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<W> MessageBus for StdioBus<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, subject: &str, message: &ProtocolMessage) -> Result<()> {
        self.send(subject, None, message).await
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        let sub = self.local.subscribe(subject).await?;
        self.write_frame(&Frame::Sub {
            subject: subject.to_string(),
            queue: None,
        })
        .await?;
        Ok(sub)
    }

    async fn queue_subscribe(&self, subject: &str, group: &str) -> Result<Subscription> {
        let sub = self.local.queue_subscribe(subject, group).await?;
        self.write_frame(&Frame::Sub {
            subject: subject.to_string(),
            queue: Some(group.to_string()),
        })
        .await?;
        Ok(sub)
    }

    async fn request(
        &self,
        subject: &str,
        message: &ProtocolMessage,
        timeout: Duration,
    ) -> Result<BusMessage> {
        let inbox_subject = new_inbox();
        let inbox = self.subscribe(&inbox_subject).await?;
        self.send(subject, Some(&inbox_subject), message).await?;
        await_reply(inbox, subject, timeout).await
    }
}
