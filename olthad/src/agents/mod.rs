//! Deliberating agents and the protocol they share.
//!
//! Every agent is a [`DeliberationStep`]: it renders a prompt from the
//! current tree, asks the deliberator for one or more samples, votes, turns
//! the winning response into a [`PendingUpdate`], and commits it once the
//! hooks approve. [`deliberate`] drives that loop.

use std::fmt;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::core::diff::DiffLine;
use crate::core::response::ResponseSchema;
use crate::core::traversal::{PendingUpdate, Traversal};
use crate::core::vote::{ReasonAggregator, aggregate, field_vote};
use crate::error::{DeliberationError, DeliberatorError, OlthadError, Result};
use crate::io::config::OlthadConfig;
use crate::io::deliberator::{ChunkHandler, Deliberator, Message, StreamTarget};
use crate::io::prompt::{PromptEngine, SystemPrompt, UserPrompt};

pub mod backtracker;
pub mod planner;
pub mod summarizer;

/// Identity of a deliberating agent, as reported to hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentName {
    AttemptSummarizer,
    SuccessfulCompletionClf,
    ExhaustiveEffortClf,
    PartialSuccessClf,
    MostWorthwhilePursuitClf,
    Planner,
    /// Reserved for retrospective and subtree compaction. No step uses it yet.
    Forgetter,
}

impl AgentName {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentName::AttemptSummarizer => "ATTEMPT_SUMMARIZER",
            AgentName::SuccessfulCompletionClf => "SUCCESSFUL_COMPLETION_CLF",
            AgentName::ExhaustiveEffortClf => "EXHAUSTIVE_EFFORT_CLF",
            AgentName::PartialSuccessClf => "PARTIAL_SUCCESS_CLF",
            AgentName::MostWorthwhilePursuitClf => "MOST_WORTHWHILE_PURSUIT_CLF",
            AgentName::Planner => "PLANNER",
            AgentName::Forgetter => "FORGETTER",
        }
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted before the deliberator is called.
#[derive(Debug, Clone, Copy)]
pub struct PreDeliberation<'a> {
    pub agent: AgentName,
    pub current_node_id: Option<&'a str>,
    pub messages: &'a [Message],
    pub n_samples: usize,
}

/// Emitted when a sample attempt failed and will be retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryWarning<'a> {
    pub agent: AgentName,
    pub sample: usize,
    pub attempt: u32,
    pub max_tries: u32,
    pub error: &'a DeliberationError,
}

/// A decided update awaiting approval.
#[derive(Debug, Clone, Copy)]
pub struct ProposedUpdate<'a> {
    pub agent: AgentName,
    pub diff: &'a [DiffLine],
    /// Rendered messages followed by every sample's reply.
    pub transcript: &'a [Message],
}

/// Caller callbacks around each deliberation.
///
/// Every method has a default: no pre-hook or retry output, every update
/// approved, and no domain-specific system prompt.
#[async_trait]
pub trait DeliberationHooks: Send + Sync {
    async fn before_deliberation(&self, _event: PreDeliberation<'_>) {}

    async fn on_retry(&self, _warning: RetryWarning<'_>) {}

    async fn approve(&self, _proposal: ProposedUpdate<'_>) -> bool {
        true
    }

    async fn domain_context(&self, _agent: AgentName) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl DeliberationHooks for DefaultHooks {}

/// Collaborators shared by every step of one engine call.
pub struct DeliberationContext<'a> {
    pub deliberator: &'a dyn Deliberator,
    pub hooks: &'a dyn DeliberationHooks,
    pub prompts: &'a PromptEngine,
    pub aggregator: &'a ReasonAggregator,
    pub chunk_handler: Option<&'a ChunkHandler>,
    pub config: &'a OlthadConfig,
}

/// Pre-stringified tree views shown to the deliberator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeViews {
    pub olthad: String,
    pub task_in_question: String,
}

/// One kind of decision made by deliberation.
pub trait DeliberationStep {
    type Decision;

    fn agent(&self) -> AgentName;

    fn schema(&self) -> &ResponseSchema;

    /// Agent-specific system prompt inputs. Domain context is filled in by
    /// the driver.
    fn system_prompt(&self) -> SystemPrompt<'_> {
        SystemPrompt::default()
    }

    fn views(&self, traversal: &Traversal) -> Result<TreeViews>;

    /// Ballot cast by one decoded sample. Samples with equal ballots vote
    /// together.
    fn ballot(&self, response: &Value) -> String {
        field_vote(response, self.schema().vote_field)
    }

    /// Turn the (voted) response into a decision and the update it implies.
    fn interpret(
        &self,
        response: &Value,
        traversal: &Traversal,
    ) -> Result<(Self::Decision, PendingUpdate)>;
}

/// One successful sample: the raw reply and its decoded object.
#[derive(Debug, Clone)]
struct Sample {
    text: String,
    value: Value,
}

enum SampleFailure {
    Cancelled,
    Exhausted(DeliberationError),
}

/// Run `step` until the hooks approve its update, then commit it.
#[instrument(skip_all, fields(agent = %step.agent(), current = ?traversal.current_id()))]
pub async fn deliberate<S: DeliberationStep>(
    step: &S,
    ctx: &DeliberationContext<'_>,
    traversal: &mut Traversal,
    env_state: &str,
) -> Result<S::Decision> {
    let agent = step.agent();
    let n_samples = ctx.config.samples.for_agent(agent);

    loop {
        let domain_context = ctx.hooks.domain_context(agent).await;
        let system = SystemPrompt {
            domain_context: domain_context.as_deref(),
            ..step.system_prompt()
        };
        let views = step.views(traversal)?;
        let user = UserPrompt {
            env_state,
            olthad: &views.olthad,
            task_in_question: &views.task_in_question,
        };
        let messages = ctx.prompts.render(agent, &system, &user)?;

        ctx.hooks
            .before_deliberation(PreDeliberation {
                agent,
                current_node_id: traversal.current_id(),
                messages: &messages,
                n_samples,
            })
            .await;

        let samples = collect_samples(ctx, agent, step.schema(), &messages, n_samples).await?;
        let response = vote(ctx, step, &samples)?;
        let (decision, mut update) = step.interpret(&response, traversal)?;

        let mut transcript = messages;
        transcript.extend(samples.into_iter().map(|sample| Message::assistant(sample.text)));

        let approved = ctx
            .hooks
            .approve(ProposedUpdate {
                agent,
                diff: update.get_diff(),
                transcript: &transcript,
            })
            .await;
        if approved {
            update.commit(traversal)?;
            debug!(no_op = update.is_no_op(), "update approved");
            return Ok(decision);
        }
        info!("update rejected, deliberating again");
    }
}

fn vote<S: DeliberationStep>(
    ctx: &DeliberationContext<'_>,
    step: &S,
    samples: &[Sample],
) -> Result<Value> {
    if let [only] = samples {
        return Ok(only.value.clone());
    }
    let values: Vec<Value> = samples.iter().map(|sample| sample.value.clone()).collect();
    let ballots: Vec<String> = values.iter().map(|value| step.ballot(value)).collect();
    aggregate(&values, &ballots, step.schema().reason_field, ctx.aggregator)
        .ok_or_else(|| OlthadError::usage("no samples to vote on"))
}

async fn collect_samples(
    ctx: &DeliberationContext<'_>,
    agent: AgentName,
    schema: &ResponseSchema,
    messages: &[Message],
    n_samples: usize,
) -> Result<Vec<Sample>> {
    let semaphore = Semaphore::new(ctx.config.max_parallel);
    let streams_indexed = n_samples > 1;
    let results = join_all((0..n_samples).map(|idx| {
        let index = streams_indexed.then_some(idx);
        sample_with_retries(ctx, agent, schema, messages, index, &semaphore)
    }))
    .await;

    let mut samples = Vec::with_capacity(n_samples);
    let mut first_error = None;
    for result in results {
        match result {
            Ok(sample) => samples.push(sample),
            Err(SampleFailure::Cancelled) => return Err(OlthadError::Cancelled),
            Err(SampleFailure::Exhausted(error)) => {
                first_error.get_or_insert(error);
            }
        }
    }

    if samples.is_empty() {
        let first = first_error.ok_or_else(|| OlthadError::usage("sample count must be > 0"))?;
        return Err(if n_samples > 1 {
            OlthadError::VotingExhausted {
                samples: n_samples,
                first,
            }
        } else {
            OlthadError::Deliberation(first)
        });
    }
    debug!(ok = samples.len(), requested = n_samples, "collected samples");
    Ok(samples)
}

async fn sample_with_retries(
    ctx: &DeliberationContext<'_>,
    agent: AgentName,
    schema: &ResponseSchema,
    messages: &[Message],
    index: Option<usize>,
    semaphore: &Semaphore,
) -> std::result::Result<Sample, SampleFailure> {
    let max_tries = ctx.config.max_tries_per_sample;
    let mut first_error = None;

    for attempt in 1..=max_tries {
        let reply = {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| SampleFailure::Cancelled)?;
            call_once(ctx, messages, index).await
        };
        let error = match reply {
            Ok(text) => match schema.decode(&text) {
                Ok(value) => return Ok(Sample { text, value }),
                Err(error) => error,
            },
            Err(CallError::Cancelled) => return Err(SampleFailure::Cancelled),
            Err(CallError::Failed(error)) => error,
        };

        warn!(%agent, sample = ?index, attempt, max_tries, %error, "deliberation attempt failed");
        if attempt < max_tries {
            ctx.hooks
                .on_retry(RetryWarning {
                    agent,
                    sample: index.unwrap_or(0),
                    attempt,
                    max_tries,
                    error: &error,
                })
                .await;
        }
        first_error.get_or_insert(error);
    }

    Err(SampleFailure::Exhausted(first_error.unwrap_or(
        DeliberationError::Backend("no attempts were made".to_string()),
    )))
}

enum CallError {
    Cancelled,
    Failed(DeliberationError),
}

impl From<DeliberatorError> for CallError {
    fn from(error: DeliberatorError) -> Self {
        match error {
            DeliberatorError::Cancelled => Self::Cancelled,
            DeliberatorError::Failed(message) => Self::Failed(DeliberationError::Backend(message)),
        }
    }
}

/// One deliberator call. A timeout is reported as a failed call.
async fn call_once(
    ctx: &DeliberationContext<'_>,
    messages: &[Message],
    index: Option<usize>,
) -> std::result::Result<String, CallError> {
    let stream = ctx
        .chunk_handler
        .map(|handler| StreamTarget { handler, index });
    let call = ctx.deliberator.deliberate(messages, stream);
    let reply = match ctx.config.deliberation_timeout() {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| CallError::Failed(DeliberationError::TimedOut(limit)))?,
        None => call.await,
    };
    Ok(reply?)
}

/// Text value of a required response field.
pub(crate) fn text_field<'v>(response: &'v Value, field: &str) -> Result<&'v str> {
    response
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| OlthadError::usage(format!("response field '{field}' is not a string")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::core::vote::default_aggregator;
    use crate::test_support::{RecordingHooks, ScriptedDeliberator};

    const SCHEMA: &str = include_str!("../../schemas/backtracker.schema.json");

    /// Step that proposes a no-op and decides the voted answer.
    struct EchoStep {
        schema: ResponseSchema,
        agent: AgentName,
    }

    impl EchoStep {
        fn new(agent: AgentName) -> Self {
            Self {
                schema: ResponseSchema::embedded(SCHEMA, "answer", Some("retrospective")),
                agent,
            }
        }
    }

    impl DeliberationStep for EchoStep {
        type Decision = (String, String);

        fn agent(&self) -> AgentName {
            self.agent
        }

        fn schema(&self) -> &ResponseSchema {
            &self.schema
        }

        fn views(&self, traversal: &Traversal) -> Result<TreeViews> {
            Ok(TreeViews {
                olthad: traversal.stringify(Default::default()),
                task_in_question: "task".to_string(),
            })
        }

        fn interpret(
            &self,
            response: &Value,
            traversal: &Traversal,
        ) -> Result<(Self::Decision, PendingUpdate)> {
            let answer = text_field(response, "answer")?.to_string();
            let reason = text_field(response, "retrospective")?.to_string();
            Ok(((answer, reason), traversal.no_op_update()))
        }
    }

    fn answer(letter: &str, reason: &str) -> String {
        json!({"answer": letter, "retrospective": reason}).to_string()
    }

    fn config(samples: usize) -> OlthadConfig {
        let mut config = OlthadConfig::default();
        config.samples.successful_completion = samples;
        config
    }

    async fn run_echo(
        deliberator: &ScriptedDeliberator,
        hooks: &RecordingHooks,
        config: &OlthadConfig,
    ) -> Result<(String, String)> {
        let prompts = PromptEngine::new();
        let aggregator = default_aggregator();
        let ctx = DeliberationContext {
            deliberator,
            hooks,
            prompts: &prompts,
            aggregator: &aggregator,
            chunk_handler: None,
            config,
        };
        let mut traversal = Traversal::new("Acquire iron");
        deliberate(
            &EchoStep::new(AgentName::SuccessfulCompletionClf),
            &ctx,
            &mut traversal,
            "{}",
        )
        .await
    }

    #[test]
    fn agent_names_match_wire_names() {
        assert_eq!(
            serde_json::to_value(AgentName::MostWorthwhilePursuitClf).expect("json"),
            json!("MOST_WORTHWHILE_PURSUIT_CLF")
        );
        assert_eq!(AgentName::Forgetter.to_string(), "FORGETTER");
    }

    #[tokio::test]
    async fn single_sample_is_used_verbatim() {
        let deliberator = ScriptedDeliberator::new([format!("Sure. {}", answer("A", "done"))]);
        let hooks = RecordingHooks::default();

        let decision = run_echo(&deliberator, &hooks, &config(1)).await.expect("decision");

        assert_eq!(decision, ("A".to_string(), "done".to_string()));
        let pre = hooks.pre_deliberations();
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].agent, AgentName::SuccessfulCompletionClf);
        assert_eq!(pre[0].current_node_id.as_deref(), Some("1"));
        assert_eq!(pre[0].n_samples, 1);
        let proposals = hooks.proposals();
        assert_eq!(proposals.len(), 1);
        // System, user, and the assistant reply.
        assert_eq!(proposals[0].transcript.len(), 3);
    }

    #[tokio::test]
    async fn malformed_replies_are_retried() {
        let deliberator = ScriptedDeliberator::new([
            "no json at all".to_string(),
            r#"{"answer": "A"}"#.to_string(),
            answer("B", "third time"),
        ]);
        let hooks = RecordingHooks::default();

        let decision = run_echo(&deliberator, &hooks, &config(1)).await.expect("decision");

        assert_eq!(decision.0, "B");
        assert_eq!(hooks.retries(), vec![1, 2]);
        assert_eq!(deliberator.calls().len(), 3);
    }

    #[tokio::test]
    async fn single_sample_failure_surfaces_first_error() {
        let deliberator =
            ScriptedDeliberator::new(["nothing".to_string(), "{bad".to_string(), "{}".to_string()]);
        let hooks = RecordingHooks::default();

        let err = run_echo(&deliberator, &hooks, &config(1)).await.unwrap_err();

        assert!(matches!(
            err,
            OlthadError::Deliberation(DeliberationError::NoJsonObject)
        ));
        assert_eq!(hooks.retries().len(), 2);
    }

    #[tokio::test]
    async fn all_failing_samples_exhaust_voting() {
        let deliberator = ScriptedDeliberator::new(Vec::<String>::new());
        let hooks = RecordingHooks::default();

        let err = run_echo(&deliberator, &hooks, &config(2)).await.unwrap_err();

        match err {
            OlthadError::VotingExhausted { samples, first } => {
                assert_eq!(samples, 2);
                assert!(matches!(first, DeliberationError::Backend(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_is_not_retried() {
        let deliberator = ScriptedDeliberator::default();
        deliberator.push_error(DeliberatorError::Cancelled);
        let hooks = RecordingHooks::default();

        let err = run_echo(&deliberator, &hooks, &config(1)).await.unwrap_err();

        assert!(matches!(err, OlthadError::Cancelled));
        assert!(hooks.retries().is_empty());
    }

    #[tokio::test]
    async fn parallel_samples_vote_and_merge_reasons() {
        let deliberator = ScriptedDeliberator::new([
            answer("A", "short"),
            answer("B", "a very long dissenting reason"),
            answer("A", "the longer A reason"),
        ]);
        let hooks = RecordingHooks::default();

        let decision = run_echo(&deliberator, &hooks, &config(3)).await.expect("decision");

        assert_eq!(
            decision,
            ("A".to_string(), "the longer A reason".to_string())
        );
        assert_eq!(hooks.proposals()[0].transcript.len(), 5);
    }

    #[tokio::test]
    async fn rejection_reruns_the_whole_step() {
        let deliberator = ScriptedDeliberator::new([answer("B", "first"), answer("A", "second")]);
        let hooks = RecordingHooks::with_approvals([false, true]);

        let decision = run_echo(&deliberator, &hooks, &config(1)).await.expect("decision");

        assert_eq!(decision.0, "A");
        assert_eq!(hooks.pre_deliberations().len(), 2);
        assert_eq!(hooks.proposals().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_deliberator_times_out_as_a_failed_attempt() {
        let deliberator = ScriptedDeliberator::new([answer("A", "late"), answer("B", "on time")])
            .with_delays([Duration::from_secs(5)]);
        let hooks = RecordingHooks::default();
        let mut config = config(1);
        config.deliberation_timeout_secs = 1;

        let decision = run_echo(&deliberator, &hooks, &config).await.expect("decision");

        assert_eq!(decision.0, "B");
        assert_eq!(hooks.retries(), vec![1]);
    }

    #[tokio::test]
    async fn chunks_are_tagged_with_sample_index() {
        let deliberator = ScriptedDeliberator::new([answer("A", "x"), answer("A", "y")]);
        let hooks = RecordingHooks::default();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: ChunkHandler = Arc::new(move |_chunk: &str, index: Option<usize>| {
            sink.lock().expect("lock").push(index);
        });
        let prompts = PromptEngine::new();
        let aggregator = default_aggregator();
        let config = config(2);
        let ctx = DeliberationContext {
            deliberator: &deliberator,
            hooks: &hooks,
            prompts: &prompts,
            aggregator: &aggregator,
            chunk_handler: Some(&handler),
            config: &config,
        };
        let mut traversal = Traversal::new("Acquire iron");

        deliberate(
            &EchoStep::new(AgentName::SuccessfulCompletionClf),
            &ctx,
            &mut traversal,
            "{}",
        )
        .await
        .expect("decision");

        let mut seen = seen.lock().expect("lock").clone();
        seen.sort();
        assert_eq!(seen, vec![Some(0), Some(1)]);
    }
}
