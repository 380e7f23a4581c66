//! Prompt rendering for every deliberating agent.

use minijinja::{Environment, context};
use tracing::debug;

use crate::agents::AgentName;
use crate::core::choice::ChoiceOption;
use crate::core::stringify::{OBFUSCATED_STATUS, REDACTED_PLANNED_SUBTASKS};
use crate::error::{OlthadError, Result};
use crate::io::deliberator::Message;

const TEMPLATES: &[(&str, &str)] = &[
    ("preamble", include_str!("prompts/preamble.md")),
    ("response_format", include_str!("prompts/response_format.md")),
    ("backtracker_stage", include_str!("prompts/backtracker_stage.md")),
    ("attempt_summarizer", include_str!("prompts/attempt_summarizer.md")),
    ("planner", include_str!("prompts/planner.md")),
    ("successful_completion", include_str!("prompts/successful_completion.md")),
    ("exhaustive_effort", include_str!("prompts/exhaustive_effort.md")),
    ("partial_success", include_str!("prompts/partial_success.md")),
    ("most_worthwhile_pursuit", include_str!("prompts/most_worthwhile_pursuit.md")),
    ("user", include_str!("prompts/user.md")),
];

/// Inputs of the system message.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPrompt<'a> {
    /// Domain-specific guidance from the caller.
    pub domain_context: Option<&'a str>,
    /// Multiple-choice options, for backtracker stages.
    pub options: &'a [ChoiceOption],
    /// The task in question is the root task.
    pub evaluating_root: bool,
}

/// Inputs of the user message.
#[derive(Debug, Clone, Copy)]
pub struct UserPrompt<'a> {
    pub env_state: &'a str,
    pub olthad: &'a str,
    pub task_in_question: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)
                .expect("embedded prompt template should be valid");
        }
        Self { env }
    }

    /// Render the (system, user) message pair for `agent`.
    pub fn render(
        &self,
        agent: AgentName,
        system: &SystemPrompt<'_>,
        user: &UserPrompt<'_>,
    ) -> Result<Vec<Message>> {
        let (template, response_format) = template_for(agent)?;

        let system_text = self.env.get_template(template)?.render(context! {
            domain_context => system.domain_context.map(str::trim).filter(|s| !s.is_empty()),
            options => system.options,
            evaluating_root => system.evaluating_root,
            response_format => response_format,
            obfuscated_status => OBFUSCATED_STATUS,
            redacted_planned_subtasks => REDACTED_PLANNED_SUBTASKS,
        })?;
        let user_text = self.env.get_template("user")?.render(context! {
            env_state => user.env_state.trim(),
            olthad => user.olthad,
            task_in_question => user.task_in_question,
        })?;

        debug!(
            agent = %agent,
            system_bytes = system_text.len(),
            user_bytes = user_text.len(),
            "rendered prompt"
        );
        Ok(vec![
            Message::system(system_text.trim()),
            Message::user(user_text.trim()),
        ])
    }
}

fn template_for(agent: AgentName) -> Result<(&'static str, &'static str)> {
    let binary = r#"{"answer": "A or B", "retrospective": "..."}"#;
    Ok(match agent {
        AgentName::AttemptSummarizer => (
            "attempt_summarizer",
            r#"{"status_to_assign": "attempted (success) | attempted (partial success) | attempted (failure)", "retrospective_to_assign": "..."}"#,
        ),
        AgentName::Planner => ("planner", r#"{"new_planned_subtasks": ["...", "..."]}"#),
        AgentName::SuccessfulCompletionClf => ("successful_completion", binary),
        AgentName::ExhaustiveEffortClf => ("exhaustive_effort", binary),
        AgentName::PartialSuccessClf => ("partial_success", binary),
        AgentName::MostWorthwhilePursuitClf => ("most_worthwhile_pursuit", binary),
        AgentName::Forgetter => {
            return Err(OlthadError::usage(format!("{agent} has no prompt template")));
        }
    })
}
