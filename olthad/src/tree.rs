//! Task hierarchy nodes.
//!
//! A [`TaskNode`] owns its subtasks in two ordered groups: attempted (or in
//! progress) followed by tentatively planned. Ids are dotted 1-based position
//! paths, so `1.3.2` is the second subtask of the third subtask of the root.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OlthadError, Result};

/// Id of the root task.
pub const ROOT_ID: &str = "1";

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "attempted (success)")]
    Success,
    #[serde(rename = "attempted (partial success)")]
    PartialSuccess,
    #[serde(rename = "attempted (failure)")]
    Failure,
    #[serde(rename = "dropped")]
    Dropped,
    #[serde(rename = "tentatively planned")]
    Planned,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Success => "attempted (success)",
            Self::PartialSuccess => "attempted (partial success)",
            Self::Failure => "attempted (failure)",
            Self::Dropped => "dropped",
            Self::Planned => "tentatively planned",
        }
    }

    /// True for the three "attempted" statuses.
    pub fn is_attempted(self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess | Self::Failure)
    }

    /// True for statuses that carry a retrospective (attempted or dropped).
    pub fn is_concluded(self) -> bool {
        self.is_attempted() || self == Self::Dropped
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    pub(crate) id: String,
    pub(crate) parent_id: Option<String>,
    pub(crate) task: String,
    pub(crate) status: TaskStatus,
    pub(crate) retrospective: Option<String>,
    pub(crate) attempted_subtasks: Vec<TaskNode>,
    pub(crate) planned_subtasks: Vec<TaskNode>,
}

impl TaskNode {
    /// New in-progress root with id [`ROOT_ID`].
    pub fn root(task: impl Into<String>) -> Self {
        Self {
            id: ROOT_ID.to_string(),
            parent_id: None,
            task: task.into(),
            status: TaskStatus::InProgress,
            retrospective: None,
            attempted_subtasks: Vec::new(),
            planned_subtasks: Vec::new(),
        }
    }

    pub(crate) fn planned(id: String, parent_id: &str, task: String) -> Self {
        Self {
            id,
            parent_id: Some(parent_id.to_string()),
            task,
            status: TaskStatus::Planned,
            retrospective: None,
            attempted_subtasks: Vec::new(),
            planned_subtasks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn retrospective(&self) -> Option<&str> {
        self.retrospective.as_deref()
    }

    pub fn attempted_subtasks(&self) -> &[TaskNode] {
        &self.attempted_subtasks
    }

    pub fn planned_subtasks(&self) -> &[TaskNode] {
        &self.planned_subtasks
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Attempted subtasks followed by planned subtasks.
    pub fn subtasks(&self) -> impl Iterator<Item = &TaskNode> {
        self.attempted_subtasks
            .iter()
            .chain(self.planned_subtasks.iter())
    }

    pub fn has_subtasks(&self) -> bool {
        !self.attempted_subtasks.is_empty() || !self.planned_subtasks.is_empty()
    }

    /// Last attempted subtask, if it is in progress.
    pub fn in_progress_subtask(&self) -> Option<&TaskNode> {
        self.attempted_subtasks
            .last()
            .filter(|node| node.status == TaskStatus::InProgress)
    }

    /// Head of the planned list, if it is planned.
    pub fn next_planned_subtask(&self) -> Option<&TaskNode> {
        self.planned_subtasks
            .first()
            .filter(|node| node.status == TaskStatus::Planned)
    }

    /// Subtask at 1-based position `k` among attempted followed by planned.
    pub(crate) fn subtask_at(&self, k: usize) -> Option<&TaskNode> {
        let idx = k.checked_sub(1)?;
        let attempted = self.attempted_subtasks.len();
        if idx < attempted {
            self.attempted_subtasks.get(idx)
        } else {
            self.planned_subtasks.get(idx - attempted)
        }
    }

    pub(crate) fn subtask_at_mut(&mut self, k: usize) -> Option<&mut TaskNode> {
        let idx = k.checked_sub(1)?;
        let attempted = self.attempted_subtasks.len();
        if idx < attempted {
            self.attempted_subtasks.get_mut(idx)
        } else {
            self.planned_subtasks.get_mut(idx - attempted)
        }
    }

    /// Find a descendant (or self) by walking the position segments of `id`.
    pub fn find(&self, id: &str) -> Option<&TaskNode> {
        let mut node = self;
        for k in relative_positions(&self.id, id)? {
            node = node.subtask_at(k)?;
        }
        Some(node)
    }

    pub(crate) fn find_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        let positions = relative_positions(&self.id, id)?;
        let mut node = self;
        for k in positions {
            node = node.subtask_at_mut(k)?;
        }
        Some(node)
    }

    /// Visit this node and all descendants in render order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a TaskNode)) {
        visit(self);
        for child in self.subtasks() {
            child.walk(visit);
        }
    }

    /// Copy of this node without any subtasks.
    pub(crate) fn shallow_copy(&self) -> TaskNode {
        TaskNode {
            attempted_subtasks: Vec::new(),
            planned_subtasks: Vec::new(),
            ..self.clone()
        }
    }

    /// Walk the in-progress spine from this node downwards.
    ///
    /// Each step yields a rebuilt tree that discloses the hierarchy only up to
    /// and including that step's frontier node, plus the id of the original
    /// frontier so decisions can be written back to the live tree.
    pub fn iter_in_progress_spine(&self) -> InProgressSpine<'_> {
        InProgressSpine {
            path: Vec::new(),
            next: Some(self),
        }
    }
}

/// Position segments of `id` below `base_id`, e.g. `("1", "1.3.2") -> [3, 2]`.
fn relative_positions(base_id: &str, id: &str) -> Option<Vec<usize>> {
    if id == base_id {
        return Some(Vec::new());
    }
    let rest = id.strip_prefix(base_id)?.strip_prefix('.')?;
    rest.split('.').map(|seg| seg.parse().ok()).collect()
}

/// One step of [`TaskNode::iter_in_progress_spine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineStep {
    /// Fresh copy of the tree, disclosed up to the frontier.
    pub rebuilt_root: TaskNode,
    /// Fresh copy of the frontier node (no subtasks).
    pub rebuilt_current: TaskNode,
    /// Id of the frontier node in the live tree.
    pub original_id: String,
}

pub struct InProgressSpine<'a> {
    path: Vec<&'a TaskNode>,
    next: Option<&'a TaskNode>,
}

impl<'a> InProgressSpine<'a> {
    fn rebuild(&self) -> (TaskNode, TaskNode) {
        let Some((frontier, ancestors)) = self.path.split_last() else {
            unreachable!("rebuild is only called after pushing a frontier");
        };
        let rebuilt_current = frontier.shallow_copy();
        let mut rebuilt = rebuilt_current.clone();
        for ancestor in ancestors.iter().rev() {
            let mut copy = ancestor.shallow_copy();
            let before = ancestor.attempted_subtasks.len().saturating_sub(1);
            copy.attempted_subtasks = ancestor.attempted_subtasks[..before].to_vec();
            copy.attempted_subtasks.push(rebuilt);
            rebuilt = copy;
        }
        (rebuilt, rebuilt_current)
    }
}

impl Iterator for InProgressSpine<'_> {
    type Item = Result<SpineStep>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next.take()?;
        if node.status != TaskStatus::InProgress {
            return Some(Err(OlthadError::corrupted(format!(
                "spine node '{}' has status '{}', expected in progress",
                node.id, node.status
            ))));
        }

        self.next = node.in_progress_subtask();
        if self.next.is_none()
            && node
                .attempted_subtasks
                .iter()
                .any(|child| !child.status.is_concluded())
        {
            return Some(Err(OlthadError::corrupted(format!(
                "node '{}' has unconcluded attempted subtasks but none in progress",
                node.id
            ))));
        }

        self.path.push(node);
        let (rebuilt_root, rebuilt_current) = self.rebuild();
        Some(Ok(SpineStep {
            rebuilt_root,
            rebuilt_current,
            original_id: node.id.clone(),
        }))
    }
}
