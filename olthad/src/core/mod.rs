//! Deterministic, pure logic of the task hierarchy.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! trees and return deterministic outputs suitable for tests.

pub mod choice;
pub mod classifier;
pub mod diff;
pub mod invariants;
pub mod response;
pub mod stringify;
pub mod traversal;
pub mod vote;
