//! Engine configuration stored under `.olthad/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::agents::AgentName;

/// Engine configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OlthadConfig {
    /// Attempts per sample before the sample counts as failed.
    pub max_tries_per_sample: u32,

    /// Upper bound on concurrent deliberator calls within one step.
    pub max_parallel: usize,

    /// Per-call timeout in seconds; 0 disables it.
    pub deliberation_timeout_secs: u64,

    /// Cap on a command deliberator's stdout and on its captured stderr.
    /// A reply over the cap fails the call.
    pub deliberator_output_limit_bytes: usize,

    pub samples: SampleCounts,

    pub deliberator: DeliberatorConfig,
}

/// Number of parallel samples voted on, per agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SampleCounts {
    pub attempt_summarizer: usize,
    pub planner: usize,
    pub successful_completion: usize,
    pub exhaustive_effort: usize,
    pub partial_success: usize,
    pub most_worthwhile_pursuit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeliberatorConfig {
    /// Command answering prompts (e.g. `["llm", "-m", "gpt-4o"]`).
    pub command: Vec<String>,
}

impl Default for SampleCounts {
    fn default() -> Self {
        Self {
            attempt_summarizer: 1,
            planner: 1,
            successful_completion: 1,
            exhaustive_effort: 1,
            partial_success: 1,
            most_worthwhile_pursuit: 1,
        }
    }
}

impl SampleCounts {
    /// Sample count for `agent`. Agents without a step take one sample.
    pub fn for_agent(&self, agent: AgentName) -> usize {
        match agent {
            AgentName::AttemptSummarizer => self.attempt_summarizer,
            AgentName::Planner => self.planner,
            AgentName::SuccessfulCompletionClf => self.successful_completion,
            AgentName::ExhaustiveEffortClf => self.exhaustive_effort,
            AgentName::PartialSuccessClf => self.partial_success,
            AgentName::MostWorthwhilePursuitClf => self.most_worthwhile_pursuit,
            AgentName::Forgetter => 1,
        }
    }

    fn all(&self) -> [(&'static str, usize); 6] {
        [
            ("attempt_summarizer", self.attempt_summarizer),
            ("planner", self.planner),
            ("successful_completion", self.successful_completion),
            ("exhaustive_effort", self.exhaustive_effort),
            ("partial_success", self.partial_success),
            ("most_worthwhile_pursuit", self.most_worthwhile_pursuit),
        ]
    }
}

impl Default for DeliberatorConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
        }
    }
}

impl Default for OlthadConfig {
    fn default() -> Self {
        Self {
            max_tries_per_sample: 3,
            max_parallel: 4,
            deliberation_timeout_secs: 0,
            deliberator_output_limit_bytes: 100_000,
            samples: SampleCounts::default(),
            deliberator: DeliberatorConfig::default(),
        }
    }
}

impl OlthadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tries_per_sample == 0 {
            return Err(anyhow!("max_tries_per_sample must be > 0"));
        }
        if self.max_parallel == 0 {
            return Err(anyhow!("max_parallel must be > 0"));
        }
        if self.deliberator_output_limit_bytes == 0 {
            return Err(anyhow!("deliberator_output_limit_bytes must be > 0"));
        }
        for (agent, count) in self.samples.all() {
            if count == 0 {
                return Err(anyhow!("samples.{agent} must be > 0"));
            }
        }
        if self.deliberator.command.is_empty() || self.deliberator.command[0].trim().is_empty() {
            return Err(anyhow!("deliberator.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn deliberation_timeout(&self) -> Option<Duration> {
        (self.deliberation_timeout_secs > 0)
            .then(|| Duration::from_secs(self.deliberation_timeout_secs))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OlthadConfig::default()`.
pub fn load_config(path: &Path) -> Result<OlthadConfig> {
    if !path.exists() {
        let cfg = OlthadConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OlthadConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OlthadConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, OlthadConfig::default());
        assert_eq!(cfg.deliberation_timeout(), None);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".olthad").join("config.toml");
        let mut cfg = OlthadConfig::default();
        cfg.samples.successful_completion = 3;
        cfg.deliberation_timeout_secs = 90;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.deliberation_timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_parallel = 2\n[samples]\nplanner = 5\n").expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_parallel, 2);
        assert_eq!(cfg.samples.planner, 5);
        assert_eq!(cfg.samples.for_agent(AgentName::Planner), 5);
        assert_eq!(cfg.samples.for_agent(AgentName::PartialSuccessClf), 1);
        assert_eq!(cfg.max_tries_per_sample, 3);
    }

    #[test]
    fn validate_rejects_zero_and_empty_values() {
        let mut cfg = OlthadConfig::default();
        cfg.samples.exhaustive_effort = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("samples.exhaustive_effort"));

        let mut cfg = OlthadConfig::default();
        cfg.max_tries_per_sample = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = OlthadConfig::default();
        cfg.deliberator.command = vec![" ".to_string()];
        assert!(cfg.validate().is_err());
    }
}
