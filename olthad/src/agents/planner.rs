//! Planner: replaces the planned subtasks of the current node.

use serde_json::Value;

use crate::agents::{AgentName, DeliberationContext, DeliberationStep, TreeViews, deliberate};
use crate::core::response::ResponseSchema;
use crate::core::stringify::{StringifyOptions, stringify};
use crate::core::traversal::{PendingUpdate, Traversal};
use crate::error::{OlthadError, Result};

const SCHEMA: &str = include_str!("../../schemas/planner.schema.json");

pub struct Planner {
    schema: ResponseSchema,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub fn new() -> Self {
        Self {
            schema: ResponseSchema::embedded(SCHEMA, "new_planned_subtasks", None),
        }
    }

    /// Deliberate a new plan for `current` and commit it. Returns the plan.
    pub async fn run(
        &self,
        ctx: &DeliberationContext<'_>,
        traversal: &mut Traversal,
        env_state: &str,
    ) -> Result<Vec<String>> {
        deliberate(self, ctx, traversal, env_state).await
    }
}

impl DeliberationStep for Planner {
    type Decision = Vec<String>;

    fn agent(&self) -> AgentName {
        AgentName::Planner
    }

    fn schema(&self) -> &ResponseSchema {
        &self.schema
    }

    fn views(&self, traversal: &Traversal) -> Result<TreeViews> {
        let current = traversal
            .current()
            .ok_or_else(|| OlthadError::usage("traversal has no current node"))?;
        Ok(TreeViews {
            olthad: traversal.stringify(StringifyOptions::default()),
            task_in_question: stringify(current, StringifyOptions::default()),
        })
    }

    fn interpret(
        &self,
        response: &Value,
        traversal: &Traversal,
    ) -> Result<(Vec<String>, PendingUpdate)> {
        let plan: Vec<String> = response
            .get("new_planned_subtasks")
            .and_then(Value::as_array)
            .ok_or_else(|| OlthadError::usage("response field 'new_planned_subtasks' is not a list"))?
            .iter()
            .map(|task| {
                task.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| OlthadError::usage("planned subtasks must be strings"))
            })
            .collect::<Result<_>>()?;
        let update = traversal.replace_planned_subtasks_of_current(plan.clone())?;
        Ok((plan, update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::core::diff::DiffTag;
    use crate::test_support::{concluded, planned, root_with};
    use crate::tree::TaskStatus;

    #[test]
    fn views_show_the_whole_tree() {
        let traversal = Traversal::from_root(root_with(
            vec![concluded("1.1", TaskStatus::Failure)],
            vec![planned("1.2")],
        ));
        let views = Planner::new().views(&traversal).expect("views");
        assert_eq!(views.olthad, views.task_in_question);
        assert!(views.olthad.contains("attempted (failure)"));
        assert!(views.olthad.contains("\"id\": \"1.2\""));
    }

    #[test]
    fn plan_replaces_planned_subtasks() {
        let mut traversal = Traversal::new("Acquire iron");
        let response = json!({"new_planned_subtasks": ["Mine oak logs", "Craft planks"]});

        let (plan, mut update) = Planner::new()
            .interpret(&response, &traversal)
            .expect("interpret");
        assert_eq!(plan, vec!["Mine oak logs", "Craft planks"]);
        assert!(update.get_diff().iter().any(|line| line.tag == DiffTag::Added));

        update.commit(&mut traversal).expect("commit");
        let root = traversal.root();
        assert_eq!(root.planned_subtasks().len(), 2);
        assert_eq!(root.planned_subtasks()[1].id(), "1.2");
        assert_eq!(root.planned_subtasks()[1].task(), "Craft planks");
    }

    #[test]
    fn empty_plan_is_usage_error() {
        let traversal = Traversal::new("Acquire iron");
        let err = Planner::new()
            .interpret(&json!({"new_planned_subtasks": []}), &traversal)
            .unwrap_err();
        assert!(matches!(err, OlthadError::Usage(_)));
    }
}
