//! Attempt summarizer: concludes the subtask that was in progress when the
//! previous skill invocation was emitted.

use serde_json::Value;

use crate::agents::{
    AgentName, DeliberationContext, DeliberationStep, TreeViews, deliberate, text_field,
};
use crate::core::response::ResponseSchema;
use crate::core::stringify::{StringifyOptions, stringify};
use crate::core::traversal::{PendingUpdate, Traversal};
use crate::error::{OlthadError, Result};
use crate::tree::{TaskNode, TaskStatus};

const SCHEMA: &str = include_str!("../../schemas/attempt_summarizer.schema.json");

pub struct AttemptSummarizer {
    schema: ResponseSchema,
}

impl Default for AttemptSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptSummarizer {
    pub fn new() -> Self {
        Self {
            schema: ResponseSchema::embedded(
                SCHEMA,
                "status_to_assign",
                Some("retrospective_to_assign"),
            ),
        }
    }

    /// Judge and conclude the in-progress child of `current`.
    pub async fn run(
        &self,
        ctx: &DeliberationContext<'_>,
        traversal: &mut Traversal,
        env_state: &str,
    ) -> Result<TaskStatus> {
        deliberate(self, ctx, traversal, env_state).await
    }
}

fn attempted_subtask(traversal: &Traversal) -> Result<&TaskNode> {
    traversal
        .current()
        .and_then(TaskNode::in_progress_subtask)
        .ok_or_else(|| OlthadError::usage("current node has no subtask in progress to summarize"))
}

impl DeliberationStep for AttemptSummarizer {
    type Decision = TaskStatus;

    fn agent(&self) -> AgentName {
        AgentName::AttemptSummarizer
    }

    fn schema(&self) -> &ResponseSchema {
        &self.schema
    }

    fn views(&self, traversal: &Traversal) -> Result<TreeViews> {
        let subtask = attempted_subtask(traversal)?;
        let options = StringifyOptions::default().obfuscating(subtask.id());
        Ok(TreeViews {
            olthad: traversal.stringify(options),
            task_in_question: stringify(subtask, options),
        })
    }

    fn interpret(
        &self,
        response: &Value,
        traversal: &Traversal,
    ) -> Result<(TaskStatus, PendingUpdate)> {
        let label = text_field(response, "status_to_assign")?;
        let status = [
            TaskStatus::Success,
            TaskStatus::PartialSuccess,
            TaskStatus::Failure,
        ]
        .into_iter()
        .find(|status| status.as_str() == label)
        .ok_or_else(|| OlthadError::usage(format!("'{label}' is not an attempted status")))?;
        let retrospective = text_field(response, "retrospective_to_assign")?.to_string();

        let subtask = attempted_subtask(traversal)?;
        let update =
            traversal.update_status_and_retrospective(subtask.id(), status, Some(retrospective))?;
        Ok((status, update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::core::stringify::OBFUSCATED_STATUS;
    use crate::test_support::{in_progress, planned, root_with};

    fn traversal() -> Traversal {
        Traversal::from_root(root_with(
            vec![in_progress("1.1", vec![in_progress("1.1.1", vec![], vec![])], vec![])],
            vec![planned("1.2")],
        ))
    }

    #[test]
    fn views_hide_the_judged_status() {
        let traversal = traversal();
        assert_eq!(traversal.current_id(), Some("1.1"));

        let views = AttemptSummarizer::new().views(&traversal).expect("views");
        let task: Value = serde_json::from_str(&views.task_in_question).expect("json");
        assert_eq!(task["id"], "1.1.1");
        assert_eq!(task["status"], OBFUSCATED_STATUS);
        assert!(views.olthad.contains("\"id\": \"1.2\""));
    }

    #[test]
    fn interprets_status_and_retrospective() {
        let mut traversal = traversal();
        let response = json!({
            "status_to_assign": "attempted (partial success)",
            "retrospective_to_assign": "Got two of three logs.",
        });

        let (status, mut update) = AttemptSummarizer::new()
            .interpret(&response, &traversal)
            .expect("interpret");
        assert_eq!(status, TaskStatus::PartialSuccess);
        update.commit(&mut traversal).expect("commit");

        let node = traversal.node("1.1.1").expect("node");
        assert_eq!(node.status(), TaskStatus::PartialSuccess);
        assert_eq!(node.retrospective(), Some("Got two of three logs."));
    }

    #[test]
    fn nothing_in_progress_is_usage_error() {
        let traversal = Traversal::new("Acquire iron");
        let err = AttemptSummarizer::new().views(&traversal).unwrap_err();
        assert!(matches!(err, OlthadError::Usage(_)));
    }
}
