//! Task-hierarchy traversal driven by deliberation.
//!
//! An [`Engine`] owns an OLTHAD (Open-Language Task Hierarchy of Any Depth)
//! and, given a snapshot of the environment, deliberates its way to the next
//! executable skill invocation: it summarizes the last attempt, decides
//! whether to backtrack, plans, and descends until a planned subtask is a
//! skill call.
//!
//! - **[`core`]**: pure tree logic (traversal, rendering, diffing, voting).
//! - **[`agents`]**: the deliberation protocol and the agents built on it.
//! - **[`io`]**: prompts, configuration, and deliberator backends.

pub mod agents;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;

pub use engine::{Engine, EngineBuilder, EnvSnapshot};
pub use error::{OlthadError, Result};
