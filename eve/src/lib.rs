//! Supervised coding-agent session core.
//!
//! A session is a branching conversation ([`core::tree::ContextTree`]) in which
//! an external decider proposes one typed [`core::action::Action`] at a time.
//! Every action passes through the [`io::gateway::Gateway`], which enforces the
//! workspace boundary, asks a human before destructive changes, and bounds
//! shell commands. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (action validation, tree and
//!   pruning, shell screening). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, processes, approval,
//!   persistence). Isolated behind traits to enable scripting in tests.
//!
//! Orchestration modules ([`step`], [`looping`]) coordinate core logic with
//! I/O to run a session.

pub mod cancel;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
