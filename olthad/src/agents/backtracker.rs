//! Backtracker: decides whether to conclude or abandon the current node.
//!
//! Four multiple-choice stages are asked in turn:
//!
//! 1. Has the current task been completed successfully? `A` concludes it as a
//!    success and backtracks.
//! 2. Has every reasonable approach been exhausted? `A` goes to stage 3, `B`
//!    to stage 4.
//! 3. Partial success or failure? Either way the task is concluded and the
//!    traversal backtracks.
//! 4. Walking the in-progress spine from the root down to the current node,
//!    is each task still the most worthwhile pursuit? The first `B` drops that
//!    task and backtracks to its parent.

use serde_json::Value;
use tracing::{debug, instrument};

use crate::agents::{
    AgentName, DeliberationContext, DeliberationStep, TreeViews, deliberate, text_field,
};
use crate::core::choice::{BinaryChoice, ChoiceOption, resolve_binary, resolve_option};
use crate::core::response::ResponseSchema;
use crate::core::stringify::{StringifyOptions, stringify};
use crate::core::traversal::{PendingUpdate, Traversal};
use crate::core::vote::field_vote;
use crate::error::{OlthadError, Result};
use crate::io::prompt::SystemPrompt;
use crate::tree::{SpineStep, TaskNode, TaskStatus};

const SCHEMA: &str = include_str!("../../schemas/backtracker.schema.json");

pub const SUCCESSFUL_COMPLETION_OPTIONS: [ChoiceOption; 2] = [
    ChoiceOption {
        letter: "A",
        text: "Yes, the task has been completed successfully.",
    },
    ChoiceOption {
        letter: "B",
        text: "No, the task has not been completed successfully.",
    },
];

pub const EXHAUSTIVE_EFFORT_OPTIONS: [ChoiceOption; 2] = [
    ChoiceOption {
        letter: "A",
        text: "Yes, every reasonable approach has been exhausted.",
    },
    ChoiceOption {
        letter: "B",
        text: "No, there are still approaches worth trying.",
    },
];

pub const PARTIAL_SUCCESS_OPTIONS: [ChoiceOption; 2] = [
    ChoiceOption {
        letter: "A",
        text: "Partial success: meaningful progress was made.",
    },
    ChoiceOption {
        letter: "B",
        text: "Failure: nothing of lasting value was accomplished.",
    },
];

pub const MOST_WORTHWHILE_PURSUIT_OPTIONS: [ChoiceOption; 2] = [
    ChoiceOption {
        letter: "A",
        text: "Yes, it is still the most worthwhile pursuit.",
    },
    ChoiceOption {
        letter: "B",
        text: "No, it should be dropped.",
    },
];

pub struct Backtracker {
    schema: ResponseSchema,
}

impl Default for Backtracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageKind {
    SuccessfulCompletion,
    ExhaustiveEffort,
    PartialSuccess,
    MostWorthwhilePursuit,
}

/// One question asked about one node.
struct Stage<'a> {
    schema: &'a ResponseSchema,
    kind: StageKind,
    /// Spine frontier for the worthwhile-pursuit stage; the current node
    /// otherwise.
    frontier: Option<&'a SpineStep>,
}

impl Backtracker {
    pub fn new() -> Self {
        Self {
            schema: ResponseSchema::embedded(SCHEMA, "answer", Some("retrospective")),
        }
    }

    /// Run the stages against the current node. Returns whether the traversal
    /// backtracked.
    #[instrument(skip_all, fields(current = ?traversal.current_id()))]
    pub async fn run(
        &self,
        ctx: &DeliberationContext<'_>,
        traversal: &mut Traversal,
        env_state: &str,
    ) -> Result<bool> {
        let current = traversal
            .current()
            .ok_or_else(|| OlthadError::usage("traversal has no current node"))?;
        let current_id = current.id().to_string();
        let parent_id = current.parent_id().map(str::to_string);

        if self.ask(StageKind::SuccessfulCompletion, None, ctx, traversal, env_state).await?
            == BinaryChoice::A
        {
            debug!(node = %current_id, "concluded as success");
            traversal.backtrack_to(parent_id.as_deref())?;
            return Ok(true);
        }

        if self.ask(StageKind::ExhaustiveEffort, None, ctx, traversal, env_state).await?
            == BinaryChoice::A
        {
            self.ask(StageKind::PartialSuccess, None, ctx, traversal, env_state)
                .await?;
            debug!(node = %current_id, "concluded after exhaustive effort");
            traversal.backtrack_to(parent_id.as_deref())?;
            return Ok(true);
        }

        let spine = in_progress_spine_to(traversal.root(), &current_id)?;
        for step in &spine {
            let choice = self
                .ask(
                    StageKind::MostWorthwhilePursuit,
                    Some(step),
                    ctx,
                    traversal,
                    env_state,
                )
                .await?;
            if choice == BinaryChoice::B {
                let dropped_parent = traversal
                    .node(&step.original_id)
                    .and_then(TaskNode::parent_id)
                    .map(str::to_string);
                debug!(node = %step.original_id, "dropped");
                traversal.backtrack_to(dropped_parent.as_deref())?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn ask(
        &self,
        kind: StageKind,
        frontier: Option<&SpineStep>,
        ctx: &DeliberationContext<'_>,
        traversal: &mut Traversal,
        env_state: &str,
    ) -> Result<BinaryChoice> {
        let stage = Stage {
            schema: &self.schema,
            kind,
            frontier,
        };
        deliberate(&stage, ctx, traversal, env_state).await
    }
}

/// Spine steps from the root down to and including `current_id`.
fn in_progress_spine_to(root: &TaskNode, current_id: &str) -> Result<Vec<SpineStep>> {
    let mut steps = Vec::new();
    for step in root.iter_in_progress_spine() {
        let step = step?;
        let reached = step.original_id == current_id;
        steps.push(step);
        if reached {
            return Ok(steps);
        }
    }
    Err(OlthadError::corrupted(format!(
        "current node '{current_id}' is not on the in-progress spine"
    )))
}

impl Stage<'_> {
    fn options(&self) -> &'static [ChoiceOption; 2] {
        match self.kind {
            StageKind::SuccessfulCompletion => &SUCCESSFUL_COMPLETION_OPTIONS,
            StageKind::ExhaustiveEffort => &EXHAUSTIVE_EFFORT_OPTIONS,
            StageKind::PartialSuccess => &PARTIAL_SUCCESS_OPTIONS,
            StageKind::MostWorthwhilePursuit => &MOST_WORTHWHILE_PURSUIT_OPTIONS,
        }
    }

    /// Live id of the node the question is about.
    fn subject_id<'t>(&'t self, traversal: &'t Traversal) -> Result<&'t str> {
        match self.frontier {
            Some(step) => Ok(&step.original_id),
            None => traversal
                .current_id()
                .ok_or_else(|| OlthadError::usage("traversal has no current node")),
        }
    }
}

impl DeliberationStep for Stage<'_> {
    type Decision = BinaryChoice;

    fn agent(&self) -> AgentName {
        match self.kind {
            StageKind::SuccessfulCompletion => AgentName::SuccessfulCompletionClf,
            StageKind::ExhaustiveEffort => AgentName::ExhaustiveEffortClf,
            StageKind::PartialSuccess => AgentName::PartialSuccessClf,
            StageKind::MostWorthwhilePursuit => AgentName::MostWorthwhilePursuitClf,
        }
    }

    fn schema(&self) -> &ResponseSchema {
        self.schema
    }

    fn system_prompt(&self) -> SystemPrompt<'_> {
        SystemPrompt {
            options: self.options(),
            evaluating_root: self
                .frontier
                .is_some_and(|step| step.rebuilt_current.is_root()),
            ..SystemPrompt::default()
        }
    }

    fn views(&self, traversal: &Traversal) -> Result<TreeViews> {
        let subject = self.subject_id(traversal)?;
        let options = StringifyOptions::default()
            .obfuscating(subject)
            .redacting_below(subject);
        Ok(match self.frontier {
            Some(step) => TreeViews {
                olthad: stringify(&step.rebuilt_root, options),
                task_in_question: stringify(&step.rebuilt_current, options),
            },
            None => {
                let current = traversal
                    .current()
                    .ok_or_else(|| OlthadError::usage("traversal has no current node"))?;
                TreeViews {
                    olthad: traversal.stringify(options),
                    task_in_question: stringify(current, options),
                }
            }
        })
    }

    /// Spellings of the same option vote together.
    fn ballot(&self, response: &Value) -> String {
        text_field(response, "answer")
            .and_then(|answer| resolve_option(answer, self.options()))
            .map(|idx| format!("option {idx}"))
            .unwrap_or_else(|_| field_vote(response, self.schema.vote_field))
    }

    fn interpret(
        &self,
        response: &Value,
        traversal: &Traversal,
    ) -> Result<(BinaryChoice, PendingUpdate)> {
        let choice = resolve_binary(text_field(response, "answer")?, self.options())?;
        let retrospective = text_field(response, "retrospective")?.to_string();
        let subject = self.subject_id(traversal)?;

        let status = match (self.kind, choice) {
            (StageKind::SuccessfulCompletion, BinaryChoice::A) => Some(TaskStatus::Success),
            (StageKind::PartialSuccess, BinaryChoice::A) => Some(TaskStatus::PartialSuccess),
            (StageKind::PartialSuccess, BinaryChoice::B) => Some(TaskStatus::Failure),
            (StageKind::MostWorthwhilePursuit, BinaryChoice::B) => Some(TaskStatus::Dropped),
            _ => None,
        };
        let update = match status {
            Some(status) => {
                traversal.update_status_and_retrospective(subject, status, Some(retrospective))?
            }
            None => traversal.no_op_update(),
        };
        Ok((choice, update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::core::diff::DiffTag;
    use crate::core::stringify::{OBFUSCATED_STATUS, REDACTED_PLANNED_SUBTASKS};
    use crate::test_support::{concluded, in_progress, planned, root_with};

    fn traversal() -> Traversal {
        Traversal::from_root(root_with(
            vec![in_progress(
                "1.1",
                vec![concluded("1.1.1", TaskStatus::Success)],
                vec![planned("1.1.2")],
            )],
            vec![planned("1.2")],
        ))
    }

    fn stage(schema: &ResponseSchema, kind: StageKind) -> Stage<'_> {
        Stage {
            schema,
            kind,
            frontier: None,
        }
    }

    #[test]
    fn current_stage_views_obfuscate_and_redact() {
        let traversal = traversal();
        let schema = Backtracker::new().schema;
        let views = stage(&schema, StageKind::SuccessfulCompletion)
            .views(&traversal)
            .expect("views");

        let task: Value = serde_json::from_str(&views.task_in_question).expect("json");
        assert_eq!(task["id"], "1.1");
        assert_eq!(task["status"], OBFUSCATED_STATUS);
        assert_eq!(task["subtasks"][1], REDACTED_PLANNED_SUBTASKS);
        // Planned siblings outside the subtree stay visible.
        assert!(views.olthad.contains("\"id\": \"1.2\""));
    }

    #[test]
    fn answers_map_to_status_changes() {
        let traversal = traversal();
        let schema = Backtracker::new().schema;
        let cases = [
            (StageKind::SuccessfulCompletion, "A", Some(TaskStatus::Success)),
            (StageKind::SuccessfulCompletion, "B", None),
            (StageKind::ExhaustiveEffort, "A", None),
            (StageKind::ExhaustiveEffort, "B", None),
            (StageKind::PartialSuccess, "A", Some(TaskStatus::PartialSuccess)),
            (StageKind::PartialSuccess, "B", Some(TaskStatus::Failure)),
        ];
        for (kind, letter, expected) in cases {
            let response = json!({"answer": letter, "retrospective": "because"});
            let (_, mut update) = stage(&schema, kind)
                .interpret(&response, &traversal)
                .expect("interpret");
            assert_eq!(update.is_no_op(), expected.is_none(), "{kind:?} {letter}");

            let mut applied = traversal.clone();
            update.commit(&mut applied).expect("commit");
            let status = applied.node("1.1").expect("node").status();
            assert_eq!(status, expected.unwrap_or(TaskStatus::InProgress), "{kind:?} {letter}");
        }
    }

    #[test]
    fn spellings_of_one_option_share_a_ballot() {
        let schema = Backtracker::new().schema;
        let completion = stage(&schema, StageKind::SuccessfulCompletion);
        let ballot = |answer: &str| completion.ballot(&json!({"answer": answer, "retrospective": "r"}));

        let a = ballot("A");
        for spelling in [
            "a",
            "(A)",
            " A ",
            "A) Yes, the task has been completed successfully.",
            "Yes, the task has been completed successfully.",
        ] {
            assert_eq!(ballot(spelling), a, "{spelling}");
        }
        assert_ne!(ballot("b"), a);
        // Unresolvable answers keep their own ballot.
        assert_ne!(ballot("C"), a);
        assert_ne!(ballot("C"), ballot("D"));
    }

    #[test]
    fn unresolvable_answer_is_usage_error() {
        let traversal = traversal();
        let schema = Backtracker::new().schema;
        let response = json!({"answer": "C", "retrospective": "?"});
        let err = stage(&schema, StageKind::ExhaustiveEffort)
            .interpret(&response, &traversal)
            .unwrap_err();
        assert!(matches!(err, OlthadError::Usage(_)));
    }

    #[test]
    fn spine_walk_targets_original_nodes() {
        let traversal = traversal();
        let schema = Backtracker::new().schema;
        let spine = in_progress_spine_to(traversal.root(), "1.1").expect("spine");
        assert_eq!(spine.len(), 2);

        let root_stage = Stage {
            schema: &schema,
            kind: StageKind::MostWorthwhilePursuit,
            frontier: Some(&spine[0]),
        };
        assert!(root_stage.system_prompt().evaluating_root);
        let views = root_stage.views(&traversal).expect("views");
        assert!(!views.olthad.contains("1.1.1"));

        let inner_stage = Stage {
            frontier: Some(&spine[1]),
            ..root_stage
        };
        assert!(!inner_stage.system_prompt().evaluating_root);
        let response = json!({"answer": "b", "retrospective": "Not worth it."});
        let (choice, update) = inner_stage
            .interpret(&response, &traversal)
            .expect("interpret");
        assert_eq!(choice, BinaryChoice::B);
        assert!(
            update
                .get_diff()
                .iter()
                .any(|line| line.tag == DiffTag::Added && line.text.contains("dropped"))
        );
    }
}
