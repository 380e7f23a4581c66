//! Structural invariants of the task hierarchy.

use std::collections::BTreeSet;

use crate::core::traversal::Traversal;
use crate::tree::{ROOT_ID, TaskNode, TaskStatus};

/// Check node invariants of the tree rooted at `root`:
/// - Root id is `1` with no parent
/// - Each child id is `parent.id + "." + k` (1-based, attempted then planned)
/// - All attempted subtasks but the last are concluded; the last of an
///   in-progress parent is in progress or concluded
/// - Every planned subtask is planned
/// - Retrospective present iff the status is concluded
/// - No duplicate ids
pub fn validate_invariants(root: &TaskNode) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = BTreeSet::new();

    if root.id() != ROOT_ID {
        errors.push(format!("root id is '{}', expected '{}'", root.id(), ROOT_ID));
    }
    if root.parent_id().is_some() {
        errors.push("root must not have a parent".to_string());
    }

    validate_node(root, &mut seen, &mut errors);
    errors
}

/// [`validate_invariants`] plus index consistency with the live tree.
pub fn validate_traversal(traversal: &Traversal) -> Vec<String> {
    let mut errors = validate_invariants(traversal.root());

    let mut live = BTreeSet::new();
    traversal.root().walk(&mut |node| {
        live.insert(node.id());
    });
    let indexed: BTreeSet<&str> = traversal.ids().collect();
    for missing in live.difference(&indexed) {
        errors.push(format!("node '{missing}' missing from index"));
    }
    for stale in indexed.difference(&live) {
        errors.push(format!("index holds removed node '{stale}'"));
    }

    if let Some(id) = traversal.current_id() {
        match traversal.current() {
            None => errors.push(format!("current node '{id}' is not in the tree")),
            Some(node) if node.status() != TaskStatus::InProgress => errors.push(format!(
                "current node '{id}' has status '{}'",
                node.status()
            )),
            Some(_) => {}
        }
    }

    errors
}

fn validate_node<'a>(node: &'a TaskNode, seen: &mut BTreeSet<&'a str>, errors: &mut Vec<String>) {
    if !seen.insert(node.id()) {
        errors.push(format!("duplicate id '{}'", node.id()));
    }

    let concluded = node.status().is_concluded();
    match (concluded, node.retrospective().is_some()) {
        (true, false) => errors.push(format!(
            "{}: status '{}' requires a retrospective",
            node.id(),
            node.status()
        )),
        (false, true) => errors.push(format!(
            "{}: status '{}' must not carry a retrospective",
            node.id(),
            node.status()
        )),
        _ => {}
    }

    for (k, child) in node.subtasks().enumerate() {
        let expected = format!("{}.{}", node.id(), k + 1);
        if child.id() != expected {
            errors.push(format!(
                "{}: child at position {} has id '{}', expected '{}'",
                node.id(),
                k + 1,
                child.id(),
                expected
            ));
        }
        if child.parent_id() != Some(node.id()) {
            errors.push(format!(
                "{}: parent link is {:?}, expected '{}'",
                child.id(),
                child.parent_id(),
                node.id()
            ));
        }
    }

    let attempted = node.attempted_subtasks();
    if let Some((last, earlier)) = attempted.split_last() {
        for child in earlier {
            if !child.status().is_concluded() {
                errors.push(format!(
                    "{}: attempted subtask '{}' before the last is '{}'",
                    node.id(),
                    child.id(),
                    child.status()
                ));
            }
        }
        let last_ok = last.status().is_concluded()
            || (last.status() == TaskStatus::InProgress
                && node.status() == TaskStatus::InProgress);
        if !last_ok {
            errors.push(format!(
                "{}: last attempted subtask '{}' is '{}'",
                node.id(),
                last.id(),
                last.status()
            ));
        }
    }

    for child in node.planned_subtasks() {
        if child.status() != TaskStatus::Planned {
            errors.push(format!(
                "{}: planned subtask '{}' is '{}'",
                node.id(),
                child.id(),
                child.status()
            ));
        }
    }

    for child in node.subtasks() {
        validate_node(child, seen, errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{concluded, in_progress, planned, root_with};

    #[test]
    fn well_formed_tree_has_no_errors() {
        let root = root_with(
            vec![
                concluded("1.1", TaskStatus::Success),
                in_progress("1.2", vec![], vec![planned("1.2.1")]),
            ],
            vec![planned("1.3")],
        );
        assert!(validate_invariants(&root).is_empty());
    }

    #[test]
    fn reports_positional_id_mismatch() {
        let root = root_with(vec![], vec![planned("1.2")]);
        let errors = validate_invariants(&root);
        assert!(errors.iter().any(|err| err.contains("expected '1.1'")));
    }

    #[test]
    fn reports_retrospective_mismatch() {
        let mut done = concluded("1.1", TaskStatus::Failure);
        done.retrospective = None;
        let mut fresh = planned("1.2");
        fresh.retrospective = Some("premature".to_string());
        let root = root_with(vec![done], vec![fresh]);

        let errors = validate_invariants(&root);
        assert!(errors.iter().any(|err| err.contains("requires a retrospective")));
        assert!(errors.iter().any(|err| err.contains("must not carry")));
    }

    #[test]
    fn reports_unconcluded_attempt_before_last() {
        let root = root_with(
            vec![
                in_progress("1.1", vec![], vec![]),
                in_progress("1.2", vec![], vec![]),
            ],
            vec![],
        );
        let errors = validate_invariants(&root);
        assert!(errors.iter().any(|err| err.contains("before the last")));
    }

    #[test]
    fn reports_non_planned_in_planned_list() {
        let mut odd = planned("1.1");
        odd.status = TaskStatus::InProgress;
        let root = root_with(vec![], vec![odd]);
        let errors = validate_invariants(&root);
        assert!(errors.iter().any(|err| err.contains("planned subtask '1.1'")));
    }

    #[test]
    fn reports_duplicate_ids() {
        let mut twin = planned("1.2");
        twin.id = "1.1".to_string();
        let root = root_with(vec![], vec![planned("1.1"), twin]);
        let errors = validate_invariants(&root);
        assert!(errors.iter().any(|err| err.contains("duplicate id '1.1'")));
    }
}
