//! Error types surfaced by the traversal engine.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the engine, the traversal, and deliberation steps.
#[derive(Debug, Error)]
pub enum OlthadError {
    /// Illegal call against the engine or traversal. The tree is unchanged.
    #[error("usage error: {0}")]
    Usage(String),

    /// Detected invariant violation. Not auto-recovered.
    #[error("corrupted tree: {0}")]
    CorruptedTree(String),

    /// A single-sample deliberation exhausted its retry budget.
    #[error("deliberation failed: {0}")]
    Deliberation(#[from] DeliberationError),

    /// Every parallel sample exhausted its retry budget.
    #[error("all {samples} samples failed; first failure: {first}")]
    VotingExhausted {
        samples: usize,
        #[source]
        first: DeliberationError,
    },

    /// The deliberator call was cancelled. No tree mutation occurred.
    #[error("deliberation cancelled")]
    Cancelled,

    #[error("prompt rendering failed: {0}")]
    Prompt(#[from] minijinja::Error),
}

impl OlthadError {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub(crate) fn corrupted(message: impl Into<String>) -> Self {
        Self::CorruptedTree(message.into())
    }
}

/// Retryable failure of one deliberator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliberationError {
    #[error("response contains no balanced JSON object")]
    NoJsonObject,

    #[error("response object is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("response does not match schema: {0}")]
    SchemaMismatch(String),

    #[error("deliberator error: {0}")]
    Backend(String),

    #[error("deliberator timed out after {0:?}")]
    TimedOut(Duration),
}

/// Error reported by a [`crate::io::deliberator::Deliberator`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliberatorError {
    #[error("{0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T, E = OlthadError> = std::result::Result<T, E>;
