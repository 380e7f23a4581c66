//! Deliberator abstraction: the external oracle that answers prompts.
//!
//! The [`Deliberator`] trait decouples deliberation steps from the actual
//! backend. The CLI uses [`CommandDeliberator`], which pipes the messages to a
//! configured command; tests use scripted deliberators that return canned
//! replies without spawning processes.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::DeliberatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message of a deliberation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Receives streamed response fragments, tagged with the sample index when
/// several samples run in parallel.
pub type ChunkHandler = Arc<dyn Fn(&str, Option<usize>) + Send + Sync>;

/// Where a single call should stream its fragments.
#[derive(Clone, Copy)]
pub struct StreamTarget<'a> {
    pub handler: &'a ChunkHandler,
    pub index: Option<usize>,
}

impl StreamTarget<'_> {
    pub fn emit(&self, chunk: &str) {
        (self.handler)(chunk, self.index);
    }
}

/// Text-in, text-out oracle. Must tolerate concurrent calls.
#[async_trait]
pub trait Deliberator: Send + Sync {
    async fn deliberate(
        &self,
        messages: &[Message],
        stream: Option<StreamTarget<'_>>,
    ) -> Result<String, DeliberatorError>;
}

/// Deliberator that runs a command per call.
///
/// The messages are written to the child's stdin as a JSON array of
/// `{"role", "content"}` objects; stdout is the reply. Each stdout line is
/// streamed as it arrives. The child is killed if the call is dropped.
#[derive(Debug, Clone)]
pub struct CommandDeliberator {
    program: String,
    args: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandDeliberator {
    pub fn new(command: &[String], output_limit_bytes: usize) -> Result<Self, DeliberatorError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| DeliberatorError::Failed("deliberator command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            output_limit_bytes,
        })
    }
}

#[async_trait]
impl Deliberator for CommandDeliberator {
    #[instrument(skip_all, fields(program = %self.program, messages = messages.len()))]
    async fn deliberate(
        &self,
        messages: &[Message],
        stream: Option<StreamTarget<'_>>,
    ) -> Result<String, DeliberatorError> {
        let payload = serde_json::to_vec(messages)
            .map_err(|err| DeliberatorError::Failed(format!("serialize messages: {err}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| DeliberatorError::Failed(format!("spawn {}: {err}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DeliberatorError::Failed("stdin was not piped".to_string()))?;
        stdin
            .write_all(&payload)
            .await
            .map_err(|err| DeliberatorError::Failed(format!("write stdin: {err}")))?;
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DeliberatorError::Failed("stdout was not piped".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DeliberatorError::Failed("stderr was not piped".to_string()))?;

        let limit = self.output_limit_bytes;
        let read_stdout = async {
            let mut reply = String::new();
            let mut dropped = 0usize;
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(target) = stream {
                    target.emit(&line);
                    target.emit("\n");
                }
                if dropped == 0 && reply.len() + line.len() < limit {
                    reply.push_str(&line);
                    reply.push('\n');
                } else {
                    dropped += line.len() + 1;
                }
            }
            Ok::<_, std::io::Error>((reply, dropped))
        };
        // Drained to the end so the child never blocks on a full pipe.
        let read_stderr = async {
            let mut kept = Vec::new();
            let mut dropped = 0usize;
            let mut chunk = [0u8; 4096];
            loop {
                let n = stderr.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                let room = limit.saturating_sub(kept.len()).min(n);
                kept.extend_from_slice(&chunk[..room]);
                dropped += n - room;
            }
            Ok::<_, std::io::Error>((String::from_utf8_lossy(&kept).into_owned(), dropped))
        };

        let ((reply, stdout_dropped), (diagnostics, stderr_dropped)) =
            tokio::try_join!(read_stdout, read_stderr)
                .map_err(|err| DeliberatorError::Failed(format!("read output: {err}")))?;
        let status = child
            .wait()
            .await
            .map_err(|err| DeliberatorError::Failed(format!("wait: {err}")))?;

        if !status.success() {
            warn!(exit_code = ?status.code(), stderr_dropped, "deliberator command failed");
            let notice = if stderr_dropped > 0 {
                format!(" [stderr truncated {stderr_dropped} bytes]")
            } else {
                String::new()
            };
            return Err(DeliberatorError::Failed(format!(
                "{} exited with {:?}: {}{notice}",
                self.program,
                status.code(),
                diagnostics.trim()
            )));
        }
        if stdout_dropped > 0 {
            warn!(limit, stdout_dropped, "deliberator output over limit");
            return Err(DeliberatorError::Failed(format!(
                "output exceeded {limit} bytes ({stdout_dropped} bytes over)"
            )));
        }

        debug!(bytes = reply.len(), "deliberator command completed");
        Ok(reply)
    }
}
