//! Deterministic, pure logic shared by the session core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod action;
pub mod guard;
pub mod hunks;
pub mod input;
pub mod invariants;
pub mod path;
pub mod pruning;
pub mod tree;
pub mod types;
