//! Message bridge between the team bus and one agent process
//!
//! Inbound bus messages are dispatched by type into the agent process.
//! A single forwarding task drains the process's event queue, enforces the
//! permission gate on every tool call and publishes results, statuses and
//! activity back onto the bus.

use super::errors::user_facing_error;
use crate::bus::{BusMessage, MessageBus, Subscription};
use crate::error::{Error, Result};
use crate::permission::PermissionGate;
use crate::process::{
    build_resume_prompt, extract_text, AgentProcess, InvocationId, ResumeContext, StreamEvent,
    ToolRequest,
};
use crate::protocol::{
    ActivityEventPayload, AgentStatus, LeaderResponsePayload, Payload, ProtocolMessage,
    QuestionPayload, StatusUpdatePayload, SystemCommandKind, SystemCommandPayload,
    TaskResultPayload, TaskStatus, TeamSubjects,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Role of the agent behind a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    /// Talks to the user on the leader channel
    Leader,
    /// Works on tasks handed out by the leader
    Delegate,
}

impl AgentRole {
    /// `"leader"` (any case) is the leader; every other role is a delegate.
    pub fn parse(role: &str) -> Self {
        if role.trim().eq_ignore_ascii_case("leader") {
            Self::Leader
        } else {
            Self::Delegate
        }
    }
}

/// Where the next result goes
struct ReplyTarget {
    destination: String,
    ref_message_id: String,
}

#[derive(Default)]
struct TaskState {
    current_task: Option<String>,
    tasks_completed: u32,
    tasks_failed: u32,
    reply: Option<ReplyTarget>,
}

struct Shared {
    /// Agent name, used as the `from` of everything published
    agent: String,
    role: AgentRole,
    subjects: TeamSubjects,
    /// This agent's own subject, `team.<team>.<agent>`
    direct: String,
    /// Checked on every `tool_use` before the tool may run
    gate: PermissionGate,
    process: Arc<dyn AgentProcess>,
    bus: Arc<dyn MessageBus>,
    /// Current task, counters and where the next result is sent
    tasks: Mutex<TaskState>,
    /// Bridge lifetime: subscription loops and the forwarding task
    cancel: CancellationToken,
    /// Handed to the process for each input; `stop` does not fire it
    invocations: CancellationToken,
    /// Drains the process event queue; replaced after a restart
    forwarder: Mutex<Option<JoinHandle<()>>>,
    /// One loop per subscribed subject
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

/// Couples one agent process to the team bus
pub struct MessageBridge {
    shared: Arc<Shared>,
}

impl MessageBridge {
    /// Build a bridge. Fails if the agent name cannot form a subject.
    pub fn new(
        agent: &str,
        role: AgentRole,
        subjects: TeamSubjects,
        gate: PermissionGate,
        process: Arc<dyn AgentProcess>,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self> {
        let direct = subjects.agent(agent)?;
        Ok(Self {
            shared: Arc::new(Shared {
                agent: agent.to_string(),
                role,
                subjects,
                direct,
                gate,
                process,
                bus,
                tasks: Mutex::new(TaskState::default()),
                cancel: CancellationToken::new(),
                invocations: CancellationToken::new(),
                forwarder: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn agent(&self) -> &str {
        &self.shared.agent
    }

    pub fn role(&self) -> AgentRole {
        self.shared.role
    }

    pub fn subjects(&self) -> &TeamSubjects {
        &self.shared.subjects
    }

    /// Token stopping the bridge's tasks.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Token handed to in-flight process invocations. The bridge never
    /// fires it; the orchestration layer may.
    pub fn invocation_token(&self) -> CancellationToken {
        self.shared.invocations.clone()
    }

    /// Subscribe to the agent's channels and start the forwarding task.
    pub async fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.cancel.is_cancelled() {
            return Err(Error::Bridge("bridge already stopped".to_string()));
        }
        if shared.forwarder.lock().await.is_some() {
            return Err(Error::Bridge("bridge already started".to_string()));
        }

        let mut subjects = vec![shared.direct.clone(), shared.subjects.broadcast()];
        if shared.role == AgentRole::Leader {
            subjects.push(shared.subjects.leader());
        }

        let mut subscriptions = Vec::with_capacity(subjects.len());
        for subject in &subjects {
            subscriptions.push(shared.bus.subscribe(subject).await?);
        }

        let events = shared
            .process
            .take_events()
            .await
            .ok_or_else(|| Error::Bridge("agent event queue already taken".to_string()))?;
        shared.spawn_forwarder(events).await;

        let mut listeners = shared.listeners.lock().await;
        for sub in subscriptions {
            listeners.push(tokio::spawn(shared.clone().listen(sub)));
        }
        drop(listeners);

        tracing::info!(
            agent = %shared.agent,
            team = %shared.subjects.team(),
            role = ?shared.role,
            "Message bridge started"
        );
        shared.publish_status(AgentStatus::Idle).await;
        Ok(())
    }

    /// Stop the bridge and wait for the forwarding task to exit.
    /// Stopping twice, or stopping a bridge never started, is a no-op.
    pub async fn stop(&self) {
        let shared = &self.shared;
        shared.cancel.cancel();

        let forwarder = shared.forwarder.lock().await.take();
        if let Some(handle) = forwarder {
            if let Err(e) = handle.await {
                tracing::warn!(agent = %shared.agent, "Forwarding task ended abnormally: {}", e);
            }
            tracing::info!(agent = %shared.agent, "Message bridge stopped");
        }
        shared.listeners.lock().await.clear();
    }

    /// Handle one inbound bus message as the subscription loops would.
    pub async fn handle_message(&self, delivered: BusMessage) {
        self.shared.handle_message(delivered).await
    }
}

impl Shared {
    // =========================================================================
    // Task plumbing
    // =========================================================================

    async fn spawn_forwarder(self: &Arc<Self>, events: mpsc::Receiver<StreamEvent>) {
        let handle = tokio::spawn(self.clone().forward_events(events));
        *self.forwarder.lock().await = Some(handle);
    }

    /// Re-attach to the process's event queue after it was recreated.
    async fn ensure_forwarder(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let running = self
            .forwarder
            .lock()
            .await
            .as_ref()
            .map_or(false, |h| !h.is_finished());
        if running {
            return;
        }
        if let Some(events) = self.process.take_events().await {
            tracing::debug!(agent = %self.agent, "Re-attaching to agent event queue");
            self.spawn_forwarder(events).await;
        }
    }

    async fn forward_events(self: Arc<Self>, mut events: mpsc::Receiver<StreamEvent>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!(agent = %self.agent, "Forwarding task cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::info!(agent = %self.agent, "Agent event queue closed");
                        self.publish_status(AgentStatus::Stopped).await;
                        break;
                    }
                },
            }
        }
    }

    async fn listen(self: Arc<Self>, mut sub: Subscription) {
        tracing::info!(
            agent = %self.agent,
            subject = %sub.subject(),
            "Bridge subscription started"
        );
        loop {
            let delivered = tokio::select! {
                _ = self.cancel.cancelled() => break,
                delivered = sub.next() => delivered,
            };
            match delivered {
                Some(delivered) => self.handle_message(delivered).await,
                None => {
                    tracing::warn!(subject = %sub.subject(), "Bridge subscription closed");
                    break;
                }
            }
        }
    }

    // =========================================================================
    // Inbound dispatch
    // =========================================================================

    async fn handle_message(self: &Arc<Self>, delivered: BusMessage) {
        let message = delivered.message;
        if message.from == self.agent {
            return;
        }

        let payload = match message.decode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    subject = %delivered.subject,
                    message_id = %message.message_id,
                    kind = %message.message_type,
                    "Dropping malformed message: {}",
                    e
                );
                return;
            }
        };

        match payload {
            Payload::TaskAssignment(task) => {
                {
                    let mut tasks = self.tasks.lock().await;
                    tasks.current_task = Some(task.instruction.clone());
                    tasks.reply = Some(ReplyTarget {
                        destination: message.from.clone(),
                        ref_message_id: message.message_id.clone(),
                    });
                }
                tracing::info!(agent = %self.agent, from = %message.from, "Task assigned");
                self.publish_status(AgentStatus::Working).await;
                self.forward_input(&task.instruction).await;
            }
            Payload::UserMessage(msg) => self.forward_input(&msg.content).await,
            Payload::Question(q) => self.forward_input(&format_question(&message.from, &q)).await,
            Payload::ContextShare(shared) => {
                self.forward_input(&format_context_share(&message.from, &shared)).await
            }
            Payload::SystemCommand(cmd) => self.handle_command(cmd).await,
            other => {
                tracing::debug!(
                    agent = %self.agent,
                    kind = %other.message_type(),
                    "Ignoring message"
                );
            }
        }
    }

    async fn forward_input(&self, text: &str) {
        if let Err(e) = self.process.send_input(text, &self.invocations).await {
            tracing::warn!(agent = %self.agent, "Failed to forward input to agent: {}", e);
            self.publish_status(AgentStatus::Error).await;
        }
    }

    async fn handle_command(self: &Arc<Self>, cmd: SystemCommandPayload) {
        match cmd.command {
            SystemCommandKind::Shutdown => {
                tracing::info!(agent = %self.agent, "Shutdown requested");
                if let Err(e) = self.process.stop().await {
                    tracing::warn!(agent = %self.agent, "Failed to stop agent: {}", e);
                }
            }
            SystemCommandKind::Restart => {
                let prompt = match cmd.arg("resume_prompt") {
                    Some(p) => p.to_string(),
                    None => {
                        let task = self.tasks.lock().await.current_task.clone();
                        build_resume_prompt(&ResumeContext {
                            original_task: task.unwrap_or_default(),
                            ..Default::default()
                        })
                    }
                };
                tracing::info!(agent = %self.agent, "Restart requested");
                match self.process.restart(&prompt, &self.invocations).await {
                    Ok(()) => self.ensure_forwarder().await,
                    Err(e) => {
                        tracing::warn!(agent = %self.agent, "Failed to restart agent: {}", e);
                        self.publish_status(AgentStatus::Error).await;
                    }
                }
            }
            SystemCommandKind::CompactContext => {
                tracing::debug!(
                    agent = %self.agent,
                    "compact_context is handled by the process manager"
                );
            }
            SystemCommandKind::Unknown => {
                tracing::debug!(agent = %self.agent, "Ignoring unknown system command");
            }
        }
    }

    // =========================================================================
    // Event forwarding
    // =========================================================================

    async fn handle_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::ToolUse {
                name,
                input,
                invocation,
                ..
            } => self.check_tool(invocation, &name, &input).await,
            StreamEvent::Result {
                is_error: false,
                message,
                result,
                ..
            } => {
                let text = message.as_ref().and_then(extract_text).or(result);
                self.publish_outcome(TaskStatus::Completed, text, None).await;
                self.publish_status(AgentStatus::Idle).await;
            }
            StreamEvent::Result {
                is_error: true,
                error_code,
                subtype,
                result,
                ..
            } => {
                let code = error_code.or(subtype);
                tracing::warn!(
                    agent = %self.agent,
                    code = ?code,
                    detail = ?result,
                    "Agent turn failed"
                );
                let error = user_facing_error(code.as_deref());
                self.publish_outcome(TaskStatus::Failed, None, Some(error)).await;
                self.publish_status(AgentStatus::Error).await;
            }
            StreamEvent::Error { error, message } => {
                tracing::warn!(agent = %self.agent, ?error, ?message, "Agent reported an error");
                self.publish_status(AgentStatus::Error).await;
            }
            other => {
                tracing::trace!(agent = %self.agent, kind = other.kind(), "Stream event");
            }
        }
    }

    /// The single permission enforcement point.
    async fn check_tool(&self, invocation: InvocationId, name: &str, input: &serde_json::Value) {
        let request = ToolRequest::from_tool_use(name, input);
        let decision = self
            .gate
            .evaluate(&request.tool_name, &request.command, &request.paths);
        let action = if decision.allowed { "allowed" } else { "denied" };

        let activity = ActivityEventPayload {
            event_type: "tool_use".to_string(),
            agent_name: self.agent.clone(),
            tool_name: Some(request.tool_name.clone()),
            action: Some(action.to_string()),
            payload: Some(serde_json::json!({
                "command": request.command,
                "paths": request.paths,
                "reason": decision.reason,
            })),
        };
        self.publish(&self.subjects.activity(), Payload::ActivityEvent(activity), None)
            .await;

        if decision.allowed {
            tracing::debug!(agent = %self.agent, tool = %name, "Tool call allowed");
            return;
        }

        tracing::info!(
            agent = %self.agent,
            tool = %name,
            invocation = %invocation,
            reason = %decision.reason,
            "Tool call denied"
        );
        let output = format!("Permission denied: {}", decision.reason);
        if let Err(e) = self.process.send_tool_result(invocation, &output, true).await {
            tracing::warn!(agent = %self.agent, "Failed to deliver denial to agent: {}", e);
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    async fn publish_outcome(
        &self,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) {
        let reply = {
            let mut tasks = self.tasks.lock().await;
            match status {
                TaskStatus::Completed => tasks.tasks_completed += 1,
                _ => tasks.tasks_failed += 1,
            }
            tasks.current_task = None;
            tasks.reply.take()
        };
        let ref_message_id = reply.as_ref().map(|r| r.ref_message_id.clone());

        match self.role {
            AgentRole::Leader => {
                let payload = Payload::LeaderResponse(LeaderResponsePayload {
                    status,
                    result,
                    error,
                });
                self.publish(&self.subjects.leader(), payload, ref_message_id)
                    .await;
            }
            AgentRole::Delegate => {
                let destination = reply
                    .map(|r| r.destination)
                    .unwrap_or_else(|| self.subjects.leader());
                let subject = match self.subjects.resolve_destination(&destination) {
                    Ok(subject) => subject,
                    Err(e) => {
                        tracing::warn!(
                            agent = %self.agent,
                            destination = %destination,
                            "Refusing to publish task result: {}",
                            e
                        );
                        return;
                    }
                };
                let payload = Payload::TaskResult(TaskResultPayload {
                    status,
                    result,
                    error,
                    artifacts: None,
                });
                self.publish(&subject, payload, ref_message_id).await;
            }
        }
    }

    async fn publish_status(&self, status: AgentStatus) {
        let payload = {
            let tasks = self.tasks.lock().await;
            StatusUpdatePayload {
                agent: self.agent.clone(),
                status,
                current_task: tasks.current_task.clone(),
                tasks_completed: Some(tasks.tasks_completed),
                tasks_failed: Some(tasks.tasks_failed),
                context_usage_pct: Some(self.process.context_usage()),
            }
        };
        self.publish(&self.subjects.status(), Payload::StatusUpdate(payload), None)
            .await;
    }

    async fn publish(&self, subject: &str, payload: Payload, ref_message_id: Option<String>) {
        let message =
            ProtocolMessage::new(&self.agent, subject, payload).in_reply_to(ref_message_id);
        if let Err(e) = self.bus.publish(subject, &message).await {
            tracing::warn!(
                agent = %self.agent,
                subject = %subject,
                kind = %message.message_type,
                "Publish failed: {}",
                e
            );
        }
    }
}

fn format_question(from: &str, q: &QuestionPayload) -> String {
    let mut text = format!("Question from {}: {}", from, q.question);
    if let Some(options) = q.options.as_ref().filter(|o| !o.is_empty()) {
        text.push_str(&format!("\nOptions: {}", options.join(", ")));
    }
    text
}

fn format_context_share(from: &str, shared: &serde_json::Value) -> String {
    let body = match shared {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!("Context shared by {}:\n{}", from, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::permission::PermissionPolicy;
    use crate::protocol::{
        QuestionPayload, TaskAssignmentPayload, UserMessagePayload,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Records every call and hands out a test-controlled event queue.
    struct FakeProcess {
        events_rx: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
        inputs: Mutex<Vec<String>>,
        tool_results: Mutex<Vec<(InvocationId, String, bool)>>,
        stops: Mutex<u32>,
        restarts: Mutex<Vec<String>>,
    }

    impl FakeProcess {
        fn new() -> (Arc<Self>, mpsc::Sender<StreamEvent>) {
            let (tx, rx) = mpsc::channel(64);
            let fake = Arc::new(Self {
                events_rx: Mutex::new(Some(rx)),
                inputs: Mutex::new(Vec::new()),
                tool_results: Mutex::new(Vec::new()),
                stops: Mutex::new(0),
                restarts: Mutex::new(Vec::new()),
            });
            (fake, tx)
        }
    }

    #[async_trait]
    impl AgentProcess for FakeProcess {
        async fn start(&self, _cancel: &CancellationToken) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            *self.stops.lock().await += 1;
            Ok(())
        }
        async fn restart(&self, resume_prompt: &str, _cancel: &CancellationToken) -> Result<()> {
            self.restarts.lock().await.push(resume_prompt.to_string());
            Ok(())
        }
        async fn send_input(&self, text: &str, _cancel: &CancellationToken) -> Result<()> {
            self.inputs.lock().await.push(text.to_string());
            Ok(())
        }
        async fn send_tool_result(
            &self,
            invocation: InvocationId,
            output: &str,
            is_error: bool,
        ) -> Result<()> {
            self.tool_results
                .lock()
                .await
                .push((invocation, output.to_string(), is_error));
            Ok(())
        }
        async fn take_events(&self) -> Option<mpsc::Receiver<StreamEvent>> {
            self.events_rx.lock().await.take()
        }
        fn context_usage(&self) -> u8 {
            42
        }
    }

    struct Harness {
        bridge: MessageBridge,
        bus: Arc<MemoryBus>,
        process: Arc<FakeProcess>,
        events: mpsc::Sender<StreamEvent>,
    }

    fn terraform_gate() -> PermissionGate {
        PermissionGate::new(PermissionPolicy::new(
            ["Bash"],
            ["terraform *"],
            ["terraform destroy *"],
            None,
        ))
    }

    async fn harness(role: AgentRole) -> Harness {
        let bus = Arc::new(MemoryBus::new());
        let (process, events) = FakeProcess::new();
        let bridge = MessageBridge::new(
            "worker-1",
            role,
            TeamSubjects::new("alpha").unwrap(),
            terraform_gate(),
            process.clone(),
            bus.clone(),
        )
        .unwrap();
        bridge.start().await.unwrap();
        Harness {
            bridge,
            bus,
            process,
            events,
        }
    }

    async fn next_of(
        sub: &mut Subscription,
        kind: crate::protocol::MessageType,
    ) -> ProtocolMessage {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let m = sub.next().await.unwrap().message;
                if m.message_type == kind {
                    return m;
                }
            }
        })
        .await
        .expect("message not published in time")
    }

    fn result_event(text: &str) -> StreamEvent {
        StreamEvent::Result {
            subtype: Some("success".to_string()),
            is_error: false,
            error_code: None,
            result: Some("fallback".to_string()),
            message: Some(serde_json::json!({"type": "text", "text": text})),
            session_id: None,
        }
    }

    fn from(sender: &str, payload: Payload) -> BusMessage {
        let message = ProtocolMessage::new(sender, "team.alpha.worker-1", payload);
        BusMessage {
            subject: "team.alpha.worker-1".to_string(),
            reply: None,
            message,
        }
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(AgentRole::parse("leader"), AgentRole::Leader);
        assert_eq!(AgentRole::parse(" Leader "), AgentRole::Leader);
        assert_eq!(AgentRole::parse("coder"), AgentRole::Delegate);
    }

    #[test]
    fn test_format_question() {
        let q = QuestionPayload {
            question: "Which region?".to_string(),
            options: Some(vec!["us-east-1".to_string(), "eu-west-1".to_string()]),
        };
        assert_eq!(
            format_question("leader", &q),
            "Question from leader: Which region?\nOptions: us-east-1, eu-west-1"
        );
    }

    #[tokio::test]
    async fn test_invalid_agent_name_fails_construction() {
        let (process, _tx) = FakeProcess::new();
        let result = MessageBridge::new(
            "bad.name",
            AgentRole::Delegate,
            TeamSubjects::new("alpha").unwrap(),
            terraform_gate(),
            process,
            Arc::new(MemoryBus::new()),
        );
        assert!(matches!(result, Err(Error::Subject(_))));
    }

    #[tokio::test]
    async fn test_leader_result_publishes_leader_response() {
        let h = harness(AgentRole::Leader).await;
        let mut leader = h.bus.subscribe("team.alpha.leader").await.unwrap();
        let mut status = h.bus.subscribe("team.alpha.status").await.unwrap();

        h.events.send(result_event("X")).await.unwrap();

        let msg = next_of(&mut leader, crate::protocol::MessageType::LeaderResponse).await;
        match msg.decode().unwrap() {
            Payload::LeaderResponse(p) => {
                assert_eq!(p.status, TaskStatus::Completed);
                assert_eq!(p.result.as_deref(), Some("X"));
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let st = next_of(&mut status, crate::protocol::MessageType::StatusUpdate).await;
        match st.decode().unwrap() {
            Payload::StatusUpdate(p) => {
                assert_eq!(p.status, AgentStatus::Idle);
                assert_eq!(p.tasks_completed, Some(1));
                assert_eq!(p.context_usage_pct, Some(42));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        // One result, one response: nothing else reached the leader channel.
        assert!(leader.try_next().is_none());
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_result_falls_back_to_plain_field() {
        let h = harness(AgentRole::Leader).await;
        let mut leader = h.bus.subscribe("team.alpha.leader").await.unwrap();

        h.events
            .send(StreamEvent::Result {
                subtype: None,
                is_error: false,
                error_code: None,
                result: Some("plain".to_string()),
                message: Some(serde_json::json!({"type": "tool_use"})),
                session_id: None,
            })
            .await
            .unwrap();

        let msg = next_of(&mut leader, crate::protocol::MessageType::LeaderResponse).await;
        assert_eq!(msg.payload["result"], "plain");
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_billing_error_publishes_failed_response() {
        let h = harness(AgentRole::Leader).await;
        let mut leader = h.bus.subscribe("team.alpha.leader").await.unwrap();
        let mut status = h.bus.subscribe("team.alpha.status").await.unwrap();

        h.events
            .send(StreamEvent::Result {
                subtype: Some("error".to_string()),
                is_error: true,
                error_code: Some("billing_error".to_string()),
                result: None,
                message: None,
                session_id: None,
            })
            .await
            .unwrap();

        let msg = next_of(&mut leader, crate::protocol::MessageType::LeaderResponse).await;
        match msg.decode().unwrap() {
            Payload::LeaderResponse(p) => {
                assert_eq!(p.status, TaskStatus::Failed);
                let err = p.error.unwrap();
                assert!(err.contains("credits"));
                assert_ne!(err, "billing_error");
            }
            other => panic!("unexpected payload {:?}", other),
        }
        let st = next_of(&mut status, crate::protocol::MessageType::StatusUpdate).await;
        assert_eq!(st.payload["status"], "error");
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_denied_tool_gets_synthesized_result() {
        let h = harness(AgentRole::Delegate).await;
        let mut activity = h.bus.subscribe("team.alpha.activity").await.unwrap();

        h.events
            .send(StreamEvent::ToolUse {
                id: Some("t1".to_string()),
                name: "Bash".to_string(),
                input: serde_json::json!({"command": "terraform destroy -auto-approve"}),
                invocation: InvocationId(7),
            })
            .await
            .unwrap();
        h.events
            .send(StreamEvent::ToolUse {
                id: Some("t2".to_string()),
                name: "Bash".to_string(),
                input: serde_json::json!({"command": "terraform plan"}),
                invocation: InvocationId(8),
            })
            .await
            .unwrap();

        let first = next_of(&mut activity, crate::protocol::MessageType::ActivityEvent).await;
        assert_eq!(first.payload["action"], "denied");
        let second = next_of(&mut activity, crate::protocol::MessageType::ActivityEvent).await;
        assert_eq!(second.payload["action"], "allowed");

        let results = h.process.tool_results.lock().await.clone();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, InvocationId(7));
        assert!(results[0].1.starts_with("Permission denied: "));
        assert!(results[0].2);
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_task_assignment_round_trip() {
        let h = harness(AgentRole::Delegate).await;
        let mut reply = h.bus.subscribe("team.alpha.planner").await.unwrap();
        let mut status = h.bus.subscribe("team.alpha.status").await.unwrap();

        let assignment = from(
            "planner",
            Payload::TaskAssignment(TaskAssignmentPayload {
                instruction: "Write the migration".to_string(),
                ..Default::default()
            }),
        );
        let assignment_id = assignment.message.message_id.clone();
        h.bridge.handle_message(assignment).await;

        let working = next_of(&mut status, crate::protocol::MessageType::StatusUpdate).await;
        assert_eq!(working.payload["status"], "working");
        assert_eq!(working.payload["current_task"], "Write the migration");
        assert_eq!(
            h.process.inputs.lock().await.clone(),
            vec!["Write the migration".to_string()]
        );

        h.events.send(result_event("migration written")).await.unwrap();
        let result = next_of(&mut reply, crate::protocol::MessageType::TaskResult).await;
        assert_eq!(result.ref_message_id.as_deref(), Some(assignment_id.as_str()));
        assert_eq!(result.payload["status"], "completed");
        assert_eq!(result.payload["result"], "migration written");
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_cross_team_destination_is_dropped() {
        let h = harness(AgentRole::Delegate).await;
        let mut foreign = h.bus.subscribe("team.other.>").await.unwrap();
        let mut status = h.bus.subscribe("team.alpha.status").await.unwrap();

        h.bridge
            .handle_message(from(
                "team.other.leader",
                Payload::TaskAssignment(TaskAssignmentPayload {
                    instruction: "exfiltrate".to_string(),
                    ..Default::default()
                }),
            ))
            .await;
        h.events.send(result_event("done")).await.unwrap();

        // The idle status follows the (dropped) result.
        loop {
            let st = next_of(&mut status, crate::protocol::MessageType::StatusUpdate).await;
            if st.payload["status"] == "idle" {
                break;
            }
        }
        assert!(foreign.try_next().is_none());
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_wildcard_destination_is_dropped() {
        let h = harness(AgentRole::Delegate).await;
        let mut team = h.bus.subscribe("team.alpha.>").await.unwrap();

        h.bridge
            .handle_message(from(
                "team.alpha.>",
                Payload::TaskAssignment(TaskAssignmentPayload {
                    instruction: "tell everyone".to_string(),
                    ..Default::default()
                }),
            ))
            .await;
        h.events.send(result_event("done")).await.unwrap();

        // Everything up to the idle status, which follows the (dropped) result.
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let m = team.next().await.unwrap().message;
                assert_ne!(m.message_type, crate::protocol::MessageType::TaskResult);
                if m.message_type == crate::protocol::MessageType::StatusUpdate
                    && m.payload["status"] == "idle"
                {
                    break;
                }
            }
        })
        .await
        .expect("idle status not published in time");
        assert!(team.try_next().is_none());
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_dispatch_forwards_inputs() {
        let h = harness(AgentRole::Delegate).await;
        h.bridge
            .handle_message(from(
                "leader",
                Payload::UserMessage(UserMessagePayload {
                    content: "hello".to_string(),
                }),
            ))
            .await;
        h.bridge
            .handle_message(from(
                "leader",
                Payload::Question(QuestionPayload {
                    question: "Ready?".to_string(),
                    options: None,
                }),
            ))
            .await;
        h.bridge
            .handle_message(from(
                "reviewer",
                Payload::ContextShare(serde_json::json!({"schema": "v2"})),
            ))
            .await;

        let inputs = h.process.inputs.lock().await.clone();
        assert_eq!(inputs[0], "hello");
        assert_eq!(inputs[1], "Question from leader: Ready?");
        assert!(inputs[2].starts_with("Context shared by reviewer:"));
        assert!(inputs[2].contains("\"schema\":\"v2\""));
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_messages_are_ignored() {
        let h = harness(AgentRole::Delegate).await;

        h.bridge.handle_message(from("leader", Payload::Unknown)).await;

        let mut malformed = from(
            "leader",
            Payload::UserMessage(UserMessagePayload::default()),
        );
        malformed.message.payload = serde_json::json!({"nope": 1});
        h.bridge.handle_message(malformed).await;

        assert!(h.process.inputs.lock().await.is_empty());
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_system_commands() {
        let h = harness(AgentRole::Delegate).await;
        let mut args = HashMap::new();
        args.insert("resume_prompt".to_string(), "pick up at step 3".to_string());

        h.bridge
            .handle_message(from(
                "leader",
                Payload::SystemCommand(SystemCommandPayload {
                    command: SystemCommandKind::Restart,
                    args: Some(args),
                }),
            ))
            .await;
        h.bridge
            .handle_message(from(
                "leader",
                Payload::SystemCommand(SystemCommandPayload {
                    command: SystemCommandKind::CompactContext,
                    args: None,
                }),
            ))
            .await;
        h.bridge
            .handle_message(from(
                "leader",
                Payload::SystemCommand(SystemCommandPayload {
                    command: SystemCommandKind::Shutdown,
                    args: None,
                }),
            ))
            .await;

        assert_eq!(
            h.process.restarts.lock().await.clone(),
            vec!["pick up at step 3".to_string()]
        );
        assert_eq!(*h.process.stops.lock().await, 1);
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_queue_close_publishes_stopped() {
        let h = harness(AgentRole::Delegate).await;
        let mut status = h.bus.subscribe("team.alpha.status").await.unwrap();
        drop(h.events);

        let st = next_of(&mut status, crate::protocol::MessageType::StatusUpdate).await;
        assert_eq!(st.payload["status"], "stopped");
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_bus_delivery_reaches_dispatch() {
        let h = harness(AgentRole::Leader).await;
        let msg = ProtocolMessage::new(
            "user",
            "team.alpha.leader",
            Payload::UserMessage(UserMessagePayload {
                content: "plan the sprint".to_string(),
            }),
        );
        h.bus.publish("team.alpha.leader", &msg).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while h.process.inputs.lock().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.process.inputs.lock().await[0], "plan the sprint");
        h.bridge.stop().await;
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let h = harness(AgentRole::Delegate).await;
        h.bridge.stop().await;
        h.bridge.stop().await;
        assert!(h.bridge.cancel_token().is_cancelled());

        // Events after stop are not forwarded.
        let mut activity = h.bus.subscribe("team.alpha.activity").await.unwrap();
        let _ = h
            .events
            .send(StreamEvent::ToolUse {
                id: None,
                name: "Bash".to_string(),
                input: serde_json::json!({"command": "ls"}),
                invocation: InvocationId(1),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(activity.try_next().is_none());
    }

    #[tokio::test]
    async fn test_stop_never_started() {
        let (process, _tx) = FakeProcess::new();
        let bridge = MessageBridge::new(
            "worker-1",
            AgentRole::Delegate,
            TeamSubjects::new("alpha").unwrap(),
            terraform_gate(),
            process,
            Arc::new(MemoryBus::new()),
        )
        .unwrap();
        bridge.stop().await;
        bridge.stop().await;
    }
}
