//! Ownership of the live task tree and its only legal mutations.
//!
//! Mutations decided by deliberation are returned as [`PendingUpdate`]s: the
//! change is captured by node id together with the diff it would produce, so
//! it can be reviewed before [`PendingUpdate::commit`] applies it.

use std::collections::BTreeSet;

use tracing::{debug, instrument};

use crate::core::diff::DiffLine;
use crate::core::stringify::{Overlay, StringifyOptions, diff_with_overlay, stringify};
use crate::error::{OlthadError, Result};
use crate::tree::{TaskNode, TaskStatus};

#[derive(Debug, Clone)]
pub struct Traversal {
    root: TaskNode,
    current: Option<String>,
    /// Ids of every live node.
    index: BTreeSet<String>,
}

impl Traversal {
    pub fn new(root_task: impl Into<String>) -> Self {
        Self::from_root(TaskNode::root(root_task))
    }

    /// Adopt an existing tree, positioned at its deepest in-progress node.
    pub fn from_root(root: TaskNode) -> Self {
        let mut index = BTreeSet::new();
        root.walk(&mut |node| {
            index.insert(node.id().to_string());
        });
        let mut current = &root;
        while let Some(child) = current.in_progress_subtask() {
            if child.in_progress_subtask().is_none() && !child.has_subtasks() {
                // A leaf in progress is an emitted skill, not a position.
                break;
            }
            current = child;
        }
        let current = Some(current.id().to_string());
        Self {
            root,
            current,
            index,
        }
    }

    pub fn root(&self) -> &TaskNode {
        &self.root
    }

    pub fn current(&self) -> Option<&TaskNode> {
        self.current.as_deref().and_then(|id| self.node(id))
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        if !self.index.contains(id) {
            return None;
        }
        self.root.find(id)
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        if !self.index.contains(id) {
            return None;
        }
        self.root.find_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Live node ids in lexicographic order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.index.iter().map(String::as_str)
    }

    pub fn stringify(&self, options: StringifyOptions<'_>) -> String {
        stringify(&self.root, options)
    }

    fn current_or_err(&self) -> Result<&TaskNode> {
        self.current()
            .ok_or_else(|| OlthadError::usage("traversal has no current node"))
    }

    /// Move `current` up to `target`, destroying the subtrees of every node
    /// left behind on the way. `None` ends the traversal.
    #[instrument(skip(self), fields(from = ?self.current))]
    pub fn backtrack_to(&mut self, target: Option<&str>) -> Result<()> {
        let Some(target) = target else {
            self.current = None;
            debug!("backtracked out of root");
            return Ok(());
        };
        let current = self.current_or_err()?.id().to_string();
        if !is_strict_ancestor(target, &current) || !self.index.contains(target) {
            return Err(OlthadError::usage(format!(
                "backtrack target '{target}' is not a strict ancestor of '{current}'"
            )));
        }

        let mut cursor = current;
        loop {
            let node = self
                .node_mut(&cursor)
                .ok_or_else(|| OlthadError::corrupted(format!("node '{cursor}' not in tree")))?;
            let attempted = std::mem::take(&mut node.attempted_subtasks);
            let planned = std::mem::take(&mut node.planned_subtasks);
            let parent = node.parent_id.clone().ok_or_else(|| {
                OlthadError::corrupted(format!("node '{cursor}' lost its parent"))
            })?;
            for child in attempted.iter().chain(planned.iter()) {
                child.walk(&mut |gone| {
                    self.index.remove(gone.id());
                });
            }
            cursor = parent;
            if cursor == target {
                break;
            }
        }

        debug!(to = target, "backtracked");
        self.current = Some(cursor);
        Ok(())
    }

    /// Promote the head planned subtask of `current` and descend into it.
    #[instrument(skip(self), fields(current = ?self.current))]
    pub fn recurse_inward(&mut self) -> Result<()> {
        let current = self.current_or_err()?.id().to_string();
        let node = self
            .node_mut(&current)
            .ok_or_else(|| OlthadError::corrupted(format!("node '{current}' not in tree")))?;
        let next = promote_next_planned(node)?;
        debug!(to = %next, "recursed inward");
        self.current = Some(next);
        Ok(())
    }

    /// Pending replacement of the whole planned list of `current`.
    pub fn replace_planned_subtasks_of_current(
        &self,
        new_tasks: Vec<String>,
    ) -> Result<PendingUpdate> {
        if new_tasks.is_empty() {
            return Err(OlthadError::usage("planned subtask list must not be empty"));
        }
        let current = self.current_or_err()?;
        let mut replacement = current.clone();
        replacement.planned_subtasks = planned_children(current, &new_tasks);
        let diff = self.overlay_diff(Overlay::from([(current.id().to_string(), replacement)]));
        Ok(PendingUpdate::new(
            TreeChange::ReplacePlanned {
                node_id: current.id().to_string(),
                tasks: new_tasks,
            },
            diff,
        ))
    }

    /// Pending status and retrospective change on `node_id`.
    ///
    /// Valid targets are `current`, its children, and its ancestors. Setting
    /// a planned node in progress moves it from the head of its parent's
    /// planned list to the tail of the attempted list without moving `current`.
    pub fn update_status_and_retrospective(
        &self,
        node_id: &str,
        status: TaskStatus,
        retrospective: Option<String>,
    ) -> Result<PendingUpdate> {
        let current = self.current_or_err()?;
        let target = self
            .node(node_id)
            .ok_or_else(|| OlthadError::usage(format!("unknown node '{node_id}'")))?;
        let in_reach = target.id() == current.id()
            || target.parent_id() == Some(current.id())
            || is_strict_ancestor(target.id(), current.id());
        if !in_reach {
            return Err(OlthadError::usage(format!(
                "node '{node_id}' is not current, a child of current, or an ancestor of current"
            )));
        }
        if status == TaskStatus::Planned {
            return Err(OlthadError::usage(
                "nodes cannot be returned to the planned status",
            ));
        }

        let overlay = if status == TaskStatus::InProgress {
            let parent = target
                .parent_id()
                .and_then(|id| self.node(id))
                .ok_or_else(|| OlthadError::usage("the root cannot be set in progress"))?;
            if parent.next_planned_subtask().map(TaskNode::id) != Some(node_id) {
                return Err(OlthadError::usage(format!(
                    "node '{node_id}' is not the next planned subtask of its parent"
                )));
            }
            let mut replacement = parent.clone();
            promote_next_planned(&mut replacement)?;
            Overlay::from([(parent.id().to_string(), replacement)])
        } else {
            let mut replacement = target.clone();
            replacement.status = status;
            replacement.retrospective = retrospective.clone();
            Overlay::from([(node_id.to_string(), replacement)])
        };

        Ok(PendingUpdate::new(
            TreeChange::SetStatus {
                node_id: node_id.to_string(),
                status,
                retrospective,
            },
            self.overlay_diff(overlay),
        ))
    }

    /// Pending update that changes nothing.
    pub fn no_op_update(&self) -> PendingUpdate {
        PendingUpdate::new(TreeChange::NoOp, self.overlay_diff(Overlay::new()))
    }

    fn overlay_diff(&self, overlay: Overlay) -> Vec<DiffLine> {
        diff_with_overlay(&self.root, &overlay, StringifyOptions::default())
    }

    fn apply(&mut self, change: &TreeChange) -> Result<()> {
        match change {
            TreeChange::NoOp => Ok(()),
            TreeChange::ReplacePlanned { node_id, tasks } => {
                let node = self.node_mut(node_id).ok_or_else(|| {
                    OlthadError::usage(format!("node '{node_id}' no longer exists"))
                })?;
                let planned = planned_children(node, tasks);
                let replaced = std::mem::replace(&mut node.planned_subtasks, planned);
                let added: Vec<String> = node
                    .planned_subtasks
                    .iter()
                    .map(|child| child.id.clone())
                    .collect();
                for gone in &replaced {
                    gone.walk(&mut |n| {
                        self.index.remove(n.id());
                    });
                }
                self.index.extend(added);
                Ok(())
            }
            TreeChange::SetStatus {
                node_id,
                status: TaskStatus::InProgress,
                ..
            } => {
                let parent_id = self
                    .node(node_id)
                    .and_then(TaskNode::parent_id)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        OlthadError::usage(format!("node '{node_id}' no longer exists"))
                    })?;
                let parent = self.node_mut(&parent_id).ok_or_else(|| {
                    OlthadError::corrupted(format!("parent '{parent_id}' not in tree"))
                })?;
                if parent.next_planned_subtask().map(TaskNode::id) != Some(node_id.as_str()) {
                    return Err(OlthadError::usage(format!(
                        "node '{node_id}' is no longer the next planned subtask of '{parent_id}'"
                    )));
                }
                promote_next_planned(parent).map(drop)
            }
            TreeChange::SetStatus {
                node_id,
                status,
                retrospective,
            } => {
                let node = self.node_mut(node_id).ok_or_else(|| {
                    OlthadError::usage(format!("node '{node_id}' no longer exists"))
                })?;
                node.status = *status;
                node.retrospective = retrospective.clone();
                Ok(())
            }
        }
    }
}

/// Move the head planned subtask to the attempted tail, in progress.
fn promote_next_planned(node: &mut TaskNode) -> Result<String> {
    if node.next_planned_subtask().is_none() {
        return Err(OlthadError::usage(format!(
            "node '{}' has no planned subtask to start",
            node.id
        )));
    }
    let mut next = node.planned_subtasks.remove(0);
    next.status = TaskStatus::InProgress;
    let id = next.id.clone();
    node.attempted_subtasks.push(next);
    Ok(id)
}

/// Fresh planned children of `parent`, with ids following its attempted list.
fn planned_children(parent: &TaskNode, tasks: &[String]) -> Vec<TaskNode> {
    let offset = parent.attempted_subtasks.len();
    tasks
        .iter()
        .enumerate()
        .map(|(i, task)| {
            TaskNode::planned(
                format!("{}.{}", parent.id, offset + i + 1),
                &parent.id,
                task.clone(),
            )
        })
        .collect()
}

fn is_strict_ancestor(ancestor: &str, id: &str) -> bool {
    id.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('.'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TreeChange {
    NoOp,
    ReplacePlanned {
        node_id: String,
        tasks: Vec<String>,
    },
    SetStatus {
        node_id: String,
        status: TaskStatus,
        retrospective: Option<String>,
    },
}

/// A captured mutation that can be previewed and committed once.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    change: TreeChange,
    diff: Vec<DiffLine>,
    committed: bool,
}

impl PendingUpdate {
    fn new(change: TreeChange, diff: Vec<DiffLine>) -> Self {
        Self {
            change,
            diff,
            committed: false,
        }
    }

    /// Diff between the tree at creation and the tree after commit.
    pub fn get_diff(&self) -> &[DiffLine] {
        &self.diff
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_no_op(&self) -> bool {
        self.change == TreeChange::NoOp
    }

    /// Apply the update. Later calls do nothing.
    #[instrument(skip_all, fields(change = ?self.change))]
    pub fn commit(&mut self, traversal: &mut Traversal) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        traversal.apply(&self.change)?;
        self.committed = true;
        debug!("committed update");
        Ok(())
    }
}
