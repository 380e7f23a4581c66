//! Test-only helpers: deterministic task nodes, a scripted deliberator, and
//! hooks that record what the engine showed them.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::{
    AgentName, DeliberationHooks, PreDeliberation, ProposedUpdate, RetryWarning,
};
use crate::error::DeliberatorError;
use crate::io::deliberator::{Deliberator, Message, StreamTarget};
use crate::tree::{ROOT_ID, TaskNode, TaskStatus};

fn parent_of(id: &str) -> Option<String> {
    id.rsplit_once('.').map(|(parent, _)| parent.to_string())
}

fn node(id: &str, status: TaskStatus, attempted: Vec<TaskNode>, planned: Vec<TaskNode>) -> TaskNode {
    TaskNode {
        id: id.to_string(),
        parent_id: parent_of(id),
        task: format!("{id} task"),
        status,
        retrospective: None,
        attempted_subtasks: attempted,
        planned_subtasks: planned,
    }
}

/// In-progress root (`"1"`) with the given children.
pub fn root_with(attempted: Vec<TaskNode>, planned: Vec<TaskNode>) -> TaskNode {
    node(ROOT_ID, TaskStatus::InProgress, attempted, planned)
}

pub fn in_progress(id: &str, attempted: Vec<TaskNode>, planned: Vec<TaskNode>) -> TaskNode {
    node(id, TaskStatus::InProgress, attempted, planned)
}

/// Concluded leaf carrying a retrospective.
pub fn concluded(id: &str, status: TaskStatus) -> TaskNode {
    TaskNode {
        retrospective: Some(format!("{id} retrospective")),
        ..node(id, status, Vec::new(), Vec::new())
    }
}

pub fn planned(id: &str) -> TaskNode {
    node(id, TaskStatus::Planned, Vec::new(), Vec::new())
}

/// Backtracker stage reply.
pub fn answer(letter: &str, retrospective: &str) -> String {
    json!({"answer": letter, "retrospective": retrospective}).to_string()
}

/// Planner reply.
pub fn plan(tasks: &[&str]) -> String {
    json!({"new_planned_subtasks": tasks}).to_string()
}

/// Attempt summarizer reply.
pub fn summary(status: TaskStatus, retrospective: &str) -> String {
    json!({"status_to_assign": status.as_str(), "retrospective_to_assign": retrospective})
        .to_string()
}

/// Deliberator that replays canned replies in call order and records every
/// message list it was given. Once the script runs out every call fails.
#[derive(Default)]
pub struct ScriptedDeliberator {
    replies: Mutex<VecDeque<Result<String, DeliberatorError>>>,
    delays: Mutex<VecDeque<Duration>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedDeliberator {
    pub fn new(replies: impl IntoIterator<Item = String>) -> Self {
        let deliberator = Self::default();
        deliberator
            .replies
            .lock()
            .expect("replies lock")
            .extend(replies.into_iter().map(Ok));
        deliberator
    }

    /// Delay the first calls by the given durations, in order.
    pub fn with_delays(self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.delays.lock().expect("delays lock").extend(delays);
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, error: DeliberatorError) {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("replies lock").len()
    }
}

#[async_trait]
impl Deliberator for ScriptedDeliberator {
    async fn deliberate(
        &self,
        messages: &[Message],
        stream: Option<StreamTarget<'_>>,
    ) -> Result<String, DeliberatorError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(messages.to_vec());
        let reply = self
            .replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Err(DeliberatorError::Failed("script exhausted".to_string())));
        let delay = self.delays.lock().expect("delays lock").pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let (Ok(text), Some(target)) = (&reply, stream) {
            target.emit(text);
        }
        reply
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPre {
    pub agent: AgentName,
    pub current_node_id: Option<String>,
    pub messages: Vec<Message>,
    pub n_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedProposal {
    pub agent: AgentName,
    pub diff: Vec<String>,
    pub transcript: Vec<Message>,
}

/// Hooks that record every payload and answer approvals from a script.
/// Approves once the script runs out.
#[derive(Default)]
pub struct RecordingHooks {
    approvals: Mutex<VecDeque<bool>>,
    domain_context: Option<String>,
    pre: Mutex<Vec<RecordedPre>>,
    proposals: Mutex<Vec<RecordedProposal>>,
    retries: Mutex<Vec<u32>>,
}

impl RecordingHooks {
    pub fn with_approvals(approvals: impl IntoIterator<Item = bool>) -> Self {
        Self {
            approvals: Mutex::new(approvals.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_domain_context(mut self, context: impl Into<String>) -> Self {
        self.domain_context = Some(context.into());
        self
    }

    pub fn pre_deliberations(&self) -> Vec<RecordedPre> {
        self.pre.lock().expect("pre lock").clone()
    }

    /// Agents in the order they deliberated.
    pub fn agents(&self) -> Vec<AgentName> {
        self.pre_deliberations()
            .into_iter()
            .map(|event| event.agent)
            .collect()
    }

    pub fn proposals(&self) -> Vec<RecordedProposal> {
        self.proposals.lock().expect("proposals lock").clone()
    }

    /// Attempt numbers of every retry warning.
    pub fn retries(&self) -> Vec<u32> {
        self.retries.lock().expect("retries lock").clone()
    }
}

#[async_trait]
impl DeliberationHooks for RecordingHooks {
    async fn before_deliberation(&self, event: PreDeliberation<'_>) {
        self.pre.lock().expect("pre lock").push(RecordedPre {
            agent: event.agent,
            current_node_id: event.current_node_id.map(str::to_string),
            messages: event.messages.to_vec(),
            n_samples: event.n_samples,
        });
    }

    async fn on_retry(&self, warning: RetryWarning<'_>) {
        self.retries
            .lock()
            .expect("retries lock")
            .push(warning.attempt);
    }

    async fn approve(&self, proposal: ProposedUpdate<'_>) -> bool {
        self.proposals
            .lock()
            .expect("proposals lock")
            .push(RecordedProposal {
                agent: proposal.agent,
                diff: proposal.diff.iter().map(ToString::to_string).collect(),
                transcript: proposal.transcript.to_vec(),
            });
        self.approvals
            .lock()
            .expect("approvals lock")
            .pop_front()
            .unwrap_or(true)
    }

    async fn domain_context(&self, _agent: AgentName) -> Option<String> {
        self.domain_context.clone()
    }
}
