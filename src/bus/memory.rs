//! In-process message bus with NATS subject semantics

use super::{BusMessage, MessageBus, Subscription};
use crate::error::{Error, Result};
use crate::protocol::ProtocolMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Per-subscription buffer. A subscriber this far behind loses messages.
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Whether `subject` matches `pattern`.
///
/// `*` matches exactly one token, `>` (last token only) matches one or more.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn check_pattern(subject: &str) -> Result<()> {
    let bad_token = |t: &str| t.is_empty() || t.contains(char::is_whitespace);
    if subject.split('.').any(bad_token) {
        return Err(Error::Bus(format!("invalid subject '{}'", subject)));
    }
    Ok(())
}

fn check_publish_subject(subject: &str) -> Result<()> {
    check_pattern(subject)?;
    if subject.split('.').any(|t| t == "*" || t == ">") {
        return Err(Error::Bus(format!(
            "cannot publish to wildcard subject '{}'",
            subject
        )));
    }
    Ok(())
}

struct Subscriber {
    pattern: String,
    group: Option<String>,
    tx: mpsc::Sender<BusMessage>,
}

#[derive(Default)]
struct Routes {
    subscribers: Vec<Subscriber>,
    /// Round-robin cursor per (pattern, group)
    cursors: HashMap<(String, String), usize>,
}

/// In-process bus
#[derive(Default)]
pub struct MemoryBus {
    routes: RwLock<Routes>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    async fn add(&self, subject: &str, group: Option<&str>) -> Result<Subscription> {
        check_pattern(subject)?;
        if let Some(g) = group {
            if g.is_empty() || g.contains(char::is_whitespace) {
                return Err(Error::Bus(format!("invalid queue group '{}'", g)));
            }
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.routes.write().await.subscribers.push(Subscriber {
            pattern: subject.to_string(),
            group: group.map(String::from),
            tx,
        });
        Ok(Subscription::new(subject, rx))
    }

    /// Deliver to every plain subscriber and to one member per queue group.
    /// Returns the number of subscriptions reached.
    pub(crate) async fn deliver(
        &self,
        subject: &str,
        reply: Option<&str>,
        message: &ProtocolMessage,
    ) -> usize {
        let mut routes = self.routes.write().await;
        routes.subscribers.retain(|s| !s.tx.is_closed());

        let mut targets: Vec<mpsc::Sender<BusMessage>> = Vec::new();
        let mut groups: HashMap<(String, String), Vec<mpsc::Sender<BusMessage>>> = HashMap::new();
        for sub in routes
            .subscribers
            .iter()
            .filter(|s| subject_matches(&s.pattern, subject))
        {
            match sub.group {
                Some(ref g) => groups
                    .entry((sub.pattern.clone(), g.clone()))
                    .or_default()
                    .push(sub.tx.clone()),
                None => targets.push(sub.tx.clone()),
            }
        }
        for (key, members) in groups {
            let cursor = routes.cursors.entry(key).or_insert(0);
            let pick = *cursor % members.len();
            *cursor = cursor.wrapping_add(1);
            targets.push(members[pick].clone());
        }
        drop(routes);

        let delivered = BusMessage {
            subject: subject.to_string(),
            reply: reply.map(String::from),
            message: message.clone(),
        };
        let mut reached = 0;
        for tx in targets {
            match tx.try_send(delivered.clone()) {
                Ok(()) => reached += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subject = %subject, "Slow subscriber, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        reached
    }

    pub async fn subscriber_count(&self) -> usize {
        self.routes
            .read()
            .await
            .subscribers
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }
}

/// Fresh reply inbox subject.
pub(crate) fn new_inbox() -> String {
    format!("_INBOX.{}", uuid::Uuid::new_v4().simple())
}

/// Wait for the first message on an inbox subscription.
pub(crate) async fn await_reply(
    mut inbox: Subscription,
    subject: &str,
    timeout: Duration,
) -> Result<BusMessage> {
    match tokio::time::timeout(timeout, inbox.next()).await {
        Ok(Some(reply)) => Ok(reply),
        Ok(None) => Err(Error::Bus(format!("request to '{}' lost its inbox", subject))),
        Err(_) => Err(Error::Bus(format!(
            "request to '{}' timed out after {:?}",
            subject, timeout
        ))),
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, subject: &str, message: &ProtocolMessage) -> Result<()> {
        check_publish_subject(subject)?;
        let reached = self.deliver(subject, None, message).await;
        tracing::debug!(subject = %subject, reached, "Published");
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        self.add(subject, None).await
    }

    async fn queue_subscribe(&self, subject: &str, group: &str) -> Result<Subscription> {
        self.add(subject, Some(group)).await
    }

    async fn request(
        &self,
        subject: &str,
        message: &ProtocolMessage,
        timeout: Duration,
    ) -> Result<BusMessage> {
        check_publish_subject(subject)?;
        let inbox_subject = new_inbox();
        let inbox = self.add(&inbox_subject, None).await?;
        if self.deliver(subject, Some(&inbox_subject), message).await == 0 {
            return Err(Error::Bus(format!("no responders on '{}'", subject)));
        }
        await_reply(inbox, subject, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Payload, UserMessagePayload};

    fn msg(content: &str) -> ProtocolMessage {
        ProtocolMessage::new(
            "tester",
            "anyone",
            Payload::UserMessage(UserMessagePayload {
                content: content.to_string(),
            }),
        )
    }

    #[test]
    fn test_subject_matching() {
        assert!(subject_matches("team.a.leader", "team.a.leader"));
        assert!(!subject_matches("team.a.leader", "team.a.leader.x"));
        assert!(subject_matches("team.*.status", "team.a.status"));
        assert!(!subject_matches("team.*.status", "team.a.b.status"));
        assert!(subject_matches("team.a.>", "team.a.b.c"));
        assert!(!subject_matches("team.a.>", "team.a"));
        assert!(!subject_matches("team.b.>", "team.a.leader"));
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers() {
        let bus = MemoryBus::new();
        let mut exact = bus.subscribe("team.a.leader").await.unwrap();
        let mut wild = bus.subscribe("team.a.>").await.unwrap();
        let mut other = bus.subscribe("team.b.>").await.unwrap();

        let sent = msg("hi");
        bus.publish("team.a.leader", &sent).await.unwrap();

        assert_eq!(exact.next().await.unwrap().subject, "team.a.leader");
        let got = wild.next().await.unwrap();
        assert_eq!(got.message, sent);
        assert!(got.reply.is_none());
        assert!(other.try_next().is_none());
    }

    #[tokio::test]
    async fn test_publish_rejects_wildcards() {
        let bus = MemoryBus::new();
        assert!(bus.publish("team.a.*", &msg("x")).await.is_err());
        assert!(bus.publish("", &msg("x")).await.is_err());
        assert!(bus.subscribe("team..a").await.is_err());
    }

    #[tokio::test]
    async fn test_queue_group_round_robin() {
        let bus = MemoryBus::new();
        let mut w1 = bus.queue_subscribe("team.a.work", "workers").await.unwrap();
        let mut w2 = bus.queue_subscribe("team.a.work", "workers").await.unwrap();
        let mut watcher = bus.subscribe("team.a.work").await.unwrap();

        for i in 0..4 {
            bus.publish("team.a.work", &msg(&i.to_string())).await.unwrap();
        }

        let mut n1 = 0;
        while w1.try_next().is_some() {
            n1 += 1;
        }
        let mut n2 = 0;
        while w2.try_next().is_some() {
            n2 += 1;
        }
        let mut all = 0;
        while watcher.try_next().is_some() {
            all += 1;
        }
        assert_eq!((n1, n2, all), (2, 2, 4));
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = std::sync::Arc::new(MemoryBus::new());
        let mut service = bus.subscribe("team.a.ping").await.unwrap();

        let responder = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let req = service.next().await.unwrap();
                let inbox = req.reply.unwrap();
                bus.publish(&inbox, &msg("pong")).await.unwrap();
            })
        };

        let reply = bus
            .request("team.a.ping", &msg("ping"), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(reply.subject.starts_with("_INBOX."));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_without_responders() {
        let bus = MemoryBus::new();
        let err = bus
            .request("team.a.nobody", &msg("?"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no responders"));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let bus = MemoryBus::new();
        let _silent = bus.subscribe("team.a.slow").await.unwrap();
        let err = bus
            .request("team.a.slow", &msg("?"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_dropped_subscriptions_are_pruned() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe("team.a.x").await.unwrap();
        assert_eq!(bus.subscriber_count().await, 1);
        drop(sub);
        bus.publish("team.a.x", &msg("gone")).await.unwrap();
        assert_eq!(bus.subscriber_count().await, 0);
    }
}
