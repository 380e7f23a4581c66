//! Side-effecting collaborators: prompt rendering, configuration files, and
//! deliberator backends.

pub mod config;
pub mod deliberator;
pub mod prompt;
