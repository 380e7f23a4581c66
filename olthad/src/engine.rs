//! The traversal engine: turns environment snapshots into skill invocations.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::PrettyFormatter;
use tracing::{debug, info, instrument};

use crate::agents::backtracker::Backtracker;
use crate::agents::planner::Planner;
use crate::agents::summarizer::AttemptSummarizer;
use crate::agents::{DefaultHooks, DeliberationContext, DeliberationHooks};
use crate::core::classifier::{PatternClassifier, SkillClassifier};
use crate::core::stringify::StringifyOptions;
use crate::core::traversal::Traversal;
use crate::core::vote::{ReasonAggregator, default_aggregator};
use crate::error::{OlthadError, Result};
use crate::io::config::OlthadConfig;
use crate::io::deliberator::{ChunkHandler, Deliberator};
use crate::io::prompt::PromptEngine;
use crate::tree::{TaskNode, TaskStatus};

const SNAPSHOT_INDENT: &[u8] = b"   ";

/// Observation of the environment passed to each engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvSnapshot {
    Text(String),
    Json(Value),
}

impl EnvSnapshot {
    /// JSON when `line` parses as JSON, text otherwise.
    pub fn parse_lenient(line: &str) -> Self {
        serde_json::from_str(line)
            .map(Self::Json)
            .unwrap_or_else(|_| Self::Text(line.to_string()))
    }

    /// Text shown to deliberators. JSON is pretty-printed with a three-space
    /// indent and sorted keys.
    pub fn render(&self) -> Result<String> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Json(value) => {
                let mut buf = Vec::new();
                let mut serializer = serde_json::Serializer::with_formatter(
                    &mut buf,
                    PrettyFormatter::with_indent(SNAPSHOT_INDENT),
                );
                value
                    .serialize(&mut serializer)
                    .map_err(|err| OlthadError::usage(format!("serialize snapshot: {err}")))?;
                String::from_utf8(buf)
                    .map_err(|err| OlthadError::usage(format!("snapshot is not UTF-8: {err}")))
            }
        }
    }
}

impl From<String> for EnvSnapshot {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for EnvSnapshot {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for EnvSnapshot {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Configures and builds an [`Engine`].
pub struct EngineBuilder {
    root: TaskNode,
    deliberator: Arc<dyn Deliberator>,
    classifier: Box<dyn SkillClassifier>,
    hooks: Arc<dyn DeliberationHooks>,
    config: OlthadConfig,
    chunk_handler: Option<ChunkHandler>,
    aggregator: ReasonAggregator,
}

impl EngineBuilder {
    pub fn classifier(mut self, classifier: impl SkillClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn DeliberationHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(mut self, config: OlthadConfig) -> Self {
        self.config = config;
        self
    }

    pub fn chunk_handler(mut self, handler: ChunkHandler) -> Self {
        self.chunk_handler = Some(handler);
        self
    }

    pub fn reason_aggregator(mut self, aggregator: ReasonAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config
            .validate()
            .map_err(|err| OlthadError::usage(format!("invalid config: {err:#}")))?;
        Ok(Engine {
            traversal: Traversal::from_root(self.root),
            has_run_before: false,
            deliberator: self.deliberator,
            classifier: self.classifier,
            hooks: self.hooks,
            config: self.config,
            chunk_handler: self.chunk_handler,
            aggregator: self.aggregator,
            prompts: PromptEngine::new(),
            summarizer: AttemptSummarizer::new(),
            planner: Planner::new(),
            backtracker: Backtracker::new(),
        })
    }
}

/// Drives one task hierarchy from its root task to concluded.
pub struct Engine {
    traversal: Traversal,
    has_run_before: bool,
    deliberator: Arc<dyn Deliberator>,
    classifier: Box<dyn SkillClassifier>,
    hooks: Arc<dyn DeliberationHooks>,
    config: OlthadConfig,
    chunk_handler: Option<ChunkHandler>,
    aggregator: ReasonAggregator,
    prompts: PromptEngine,
    summarizer: AttemptSummarizer,
    planner: Planner,
    backtracker: Backtracker,
}

impl Engine {
    /// Builder for a fresh tree rooted at `root_task`.
    pub fn builder(root_task: impl Into<String>, deliberator: Arc<dyn Deliberator>) -> EngineBuilder {
        Self::builder_from_tree(TaskNode::root(root_task), deliberator)
    }

    /// Builder resuming an existing tree. If a subtask is in progress below
    /// the deepest in-progress task, the first call summarizes it.
    pub fn builder_from_tree(root: TaskNode, deliberator: Arc<dyn Deliberator>) -> EngineBuilder {
        EngineBuilder {
            root,
            deliberator,
            classifier: Box::new(PatternClassifier),
            hooks: Arc::new(DefaultHooks),
            config: OlthadConfig::default(),
            chunk_handler: None,
            aggregator: default_aggregator(),
        }
    }

    pub fn traversal(&self) -> &Traversal {
        &self.traversal
    }

    pub fn has_run_before(&self) -> bool {
        self.has_run_before
    }

    pub fn config(&self) -> &OlthadConfig {
        &self.config
    }

    /// The whole tree, rendered as deliberators see it unmasked.
    pub fn render_tree(&self) -> String {
        self.traversal.stringify(StringifyOptions::default())
    }

    /// Deliberate until a skill invocation is reached.
    ///
    /// Returns `None` once the root task has been concluded or dropped; every
    /// later call returns `None` as well.
    #[instrument(skip_all, fields(current = ?self.traversal.current_id()))]
    pub async fn next_skill_invocation(
        &mut self,
        snapshot: impl Into<EnvSnapshot>,
    ) -> Result<Option<String>> {
        let env_state = snapshot.into().render()?;
        let Self {
            traversal,
            has_run_before,
            deliberator,
            classifier,
            hooks,
            config,
            chunk_handler,
            aggregator,
            prompts,
            summarizer,
            planner,
            backtracker,
        } = self;
        let ctx = DeliberationContext {
            deliberator: deliberator.as_ref(),
            hooks: hooks.as_ref(),
            prompts,
            aggregator,
            chunk_handler: chunk_handler.as_ref(),
            config,
        };

        let Some(current) = traversal.current() else {
            return Ok(None);
        };
        let attempt_pending = current.in_progress_subtask().is_some();
        let resumed = *has_run_before || attempt_pending;
        if attempt_pending {
            let status = summarizer.run(&ctx, traversal, &env_state).await?;
            info!(%status, "summarized last attempt");
        }

        loop {
            let Some(current) = traversal.current() else {
                info!("root task concluded");
                return Ok(None);
            };
            debug!(node = %current.id(), "deliberating");
            if resumed && backtracker.run(&ctx, traversal, &env_state).await? {
                continue;
            }

            planner.run(&ctx, traversal, &env_state).await?;

            let next = traversal
                .current()
                .and_then(TaskNode::next_planned_subtask)
                .ok_or_else(|| OlthadError::corrupted("plan was committed but nothing is planned"))?;
            let (next_id, task) = (next.id().to_string(), next.task().to_string());

            if classifier.is_skill_invocation(&task).await {
                let mut update = traversal.update_status_and_retrospective(
                    &next_id,
                    TaskStatus::InProgress,
                    None,
                )?;
                update.commit(traversal)?;
                *has_run_before = true;
                info!(node = %next_id, skill = %task, "emitting skill invocation");
                return Ok(Some(task));
            }

            debug!(node = %next_id, "recursing into subtask");
            traversal.recurse_inward()?;
        }
    }
}
