//! Deterministic JSON-shaped rendering of a task tree.
//!
//! Key order per node is fixed: id, task, status, retrospective, subtasks.
//! The same renderer serves prompt views (with obfuscation and redaction) and
//! pending-update diffs (with an overlay of replacement nodes).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::diff::{DiffLine, line_diff};
use crate::tree::TaskNode;

/// Rendered in place of an obfuscated status.
pub const OBFUSCATED_STATUS: &str = "?";

/// Rendered in place of planned subtasks inside a redacted subtree.
pub const REDACTED_PLANNED_SUBTASKS: &str = "...planned subtasks redacted...";

/// Replacement nodes keyed by id, rendered instead of the live node.
pub type Overlay = BTreeMap<String, TaskNode>;

#[derive(Debug, Clone, Copy, Default)]
pub struct StringifyOptions<'a> {
    pub obfuscate_status_of: Option<&'a str>,
    pub redact_planned_subtasks_below: Option<&'a str>,
}

impl<'a> StringifyOptions<'a> {
    pub fn obfuscating(mut self, id: &'a str) -> Self {
        self.obfuscate_status_of = Some(id);
        self
    }

    pub fn redacting_below(mut self, id: &'a str) -> Self {
        self.redact_planned_subtasks_below = Some(id);
        self
    }
}

#[derive(Serialize)]
struct RenderedNode<'n> {
    id: &'n str,
    task: &'n str,
    status: &'n str,
    retrospective: Option<&'n str>,
    subtasks: Option<Vec<RenderedEntry<'n>>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RenderedEntry<'n> {
    Node(RenderedNode<'n>),
    Redacted(&'static str),
}

struct Renderer<'n, 'o> {
    overlay: Option<&'n Overlay>,
    options: StringifyOptions<'o>,
}

impl<'n> Renderer<'n, '_> {
    fn render(&self, live: &'n TaskNode, in_redacted: bool) -> RenderedNode<'n> {
        let node = self
            .overlay
            .and_then(|overlay| overlay.get(live.id()))
            .unwrap_or(live);
        let in_redacted =
            in_redacted || self.options.redact_planned_subtasks_below == Some(node.id());

        let status = if self.options.obfuscate_status_of == Some(node.id()) {
            OBFUSCATED_STATUS
        } else {
            node.status().as_str()
        };

        // A retasked node's old subtasks no longer describe it.
        let subtasks = if node.task() != live.task() || !node.has_subtasks() {
            None
        } else {
            let mut entries: Vec<RenderedEntry<'n>> = node
                .attempted_subtasks()
                .iter()
                .map(|child| RenderedEntry::Node(self.render(child, in_redacted)))
                .collect();
            if in_redacted {
                if !node.planned_subtasks().is_empty() {
                    entries.push(RenderedEntry::Redacted(REDACTED_PLANNED_SUBTASKS));
                }
            } else {
                entries.extend(
                    node.planned_subtasks()
                        .iter()
                        .map(|child| RenderedEntry::Node(self.render(child, in_redacted))),
                );
            }
            Some(entries)
        };

        RenderedNode {
            id: node.id(),
            task: node.task(),
            status,
            retrospective: node.retrospective(),
            subtasks,
        }
    }
}

fn to_text(rendered: &RenderedNode<'_>) -> String {
    // Only strings, nulls and arrays: serialization cannot fail.
    serde_json::to_string_pretty(rendered).unwrap_or_default()
}

/// Render `root` and its subtree.
pub fn stringify(root: &TaskNode, options: StringifyOptions<'_>) -> String {
    let renderer = Renderer {
        overlay: None,
        options,
    };
    to_text(&renderer.render(root, false))
}

/// Render `root` with the nodes in `overlay` substituted by id.
pub fn stringify_with_overlay(
    root: &TaskNode,
    overlay: &Overlay,
    options: StringifyOptions<'_>,
) -> String {
    let renderer = Renderer {
        overlay: Some(overlay),
        options,
    };
    to_text(&renderer.render(root, false))
}

/// Line diff between the live rendering and the overlaid rendering.
pub fn diff_with_overlay(
    root: &TaskNode,
    overlay: &Overlay,
    options: StringifyOptions<'_>,
) -> Vec<DiffLine> {
    let before = stringify(root, options);
    let after = stringify_with_overlay(root, overlay, options);
    line_diff(&before, &after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::DiffTag;
    use crate::test_support::{concluded, in_progress, planned, root_with};
    use crate::tree::TaskStatus;
    use serde_json::Value;

    fn sample_tree() -> TaskNode {
        root_with(
            vec![
                concluded("1.1", TaskStatus::Success),
                in_progress(
                    "1.2",
                    vec![concluded("1.2.1", TaskStatus::Failure)],
                    vec![planned("1.2.2")],
                ),
            ],
            vec![planned("1.3")],
        )
    }

    #[test]
    fn key_order_is_fixed() {
        let text = stringify(&TaskNode::root("Acquire iron"), StringifyOptions::default());
        let expected = "{\n  \"id\": \"1\",\n  \"task\": \"Acquire iron\",\n  \"status\": \"in progress\",\n  \"retrospective\": null,\n  \"subtasks\": null\n}";
        assert_eq!(text, expected);
    }

    #[test]
    fn output_is_stable_across_calls() {
        let tree = sample_tree();
        let a = stringify(&tree, StringifyOptions::default());
        let b = stringify(&tree.clone(), StringifyOptions::default());
        assert_eq!(a, b);
    }

    #[test]
    fn subtasks_render_attempted_then_planned() {
        let text = stringify(&sample_tree(), StringifyOptions::default());
        let value: Value = serde_json::from_str(&text).expect("json");
        let ids: Vec<&str> = value["subtasks"]
            .as_array()
            .expect("array")
            .iter()
            .map(|child| child["id"].as_str().expect("id"))
            .collect();
        assert_eq!(ids, vec!["1.1", "1.2", "1.3"]);
    }

    #[test]
    fn obfuscation_hides_only_the_target_status() {
        let tree = sample_tree();
        let text = stringify(&tree, StringifyOptions::default().obfuscating("1.2"));
        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["subtasks"][1]["status"], OBFUSCATED_STATUS);
        assert_eq!(value["subtasks"][0]["status"], "attempted (success)");
        assert_eq!(value["status"], "in progress");
    }

    #[test]
    fn redaction_truncates_planned_subtasks_in_subtree() {
        let tree = sample_tree();
        let text = stringify(&tree, StringifyOptions::default().redacting_below("1.2"));
        let value: Value = serde_json::from_str(&text).expect("json");

        let inner = value["subtasks"][1]["subtasks"].as_array().expect("array");
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[0]["id"], "1.2.1");
        assert_eq!(inner[1], REDACTED_PLANNED_SUBTASKS);

        // Outside the redacted subtree planned subtasks still render.
        assert_eq!(value["subtasks"][2]["id"], "1.3");
    }

    #[test]
    fn redaction_and_obfuscation_on_same_node_both_apply() {
        let tree = sample_tree();
        let options = StringifyOptions::default()
            .obfuscating("1.2")
            .redacting_below("1.2");
        let value: Value =
            serde_json::from_str(&stringify(&tree, options)).expect("json");
        assert_eq!(value["subtasks"][1]["status"], OBFUSCATED_STATUS);
        assert_eq!(value["subtasks"][1]["subtasks"][1], REDACTED_PLANNED_SUBTASKS);
    }

    #[test]
    fn unchanged_overlay_yields_all_unchanged_diff() {
        let tree = sample_tree();
        let diff = diff_with_overlay(&tree, &Overlay::new(), StringifyOptions::default());
        assert!(!diff.is_empty());
        assert!(diff.iter().all(|line| line.tag == DiffTag::Unchanged));
        assert!(diff.iter().all(|line| line.to_string().starts_with(' ')));
    }

    #[test]
    fn overlay_adding_subtasks_shows_added_array() {
        let tree = TaskNode::root("Acquire iron");
        let mut replacement = tree.clone();
        replacement.planned_subtasks = vec![planned("1.1")];
        let overlay = Overlay::from([("1".to_string(), replacement)]);

        let diff = diff_with_overlay(&tree, &overlay, StringifyOptions::default());
        assert!(
            diff.iter()
                .any(|line| line.tag == DiffTag::Removed && line.text.contains("\"subtasks\": null"))
        );
        assert!(
            diff.iter()
                .any(|line| line.tag == DiffTag::Added && line.text.contains("\"id\": \"1.1\""))
        );
    }

    #[test]
    fn overlay_changing_task_text_nulls_subtasks() {
        let tree = sample_tree();
        let mut replacement = tree.find("1.2").expect("node").clone();
        replacement.task = "Something else".to_string();
        let overlay = Overlay::from([("1.2".to_string(), replacement)]);

        let after = stringify_with_overlay(&tree, &overlay, StringifyOptions::default());
        let value: Value = serde_json::from_str(&after).expect("json");
        assert_eq!(value["subtasks"][1]["task"], "Something else");
        assert!(value["subtasks"][1]["subtasks"].is_null());

        let diff = diff_with_overlay(&tree, &overlay, StringifyOptions::default());
        assert!(diff.iter().any(|line| line.tag == DiffTag::Removed
            && line.text.contains("\"task\": \"1.2 task\"")));
        assert!(diff.iter().any(|line| line.tag == DiffTag::Added
            && line.text.contains("\"task\": \"Something else\"")));
    }
}
