//! Side-effecting collaborators: filesystem, processes, approval, model client.

pub mod approval;
pub mod boundary;
pub mod config;
pub mod decider;
pub mod gateway;
pub mod init;
pub mod lock;
pub mod memory;
pub mod process;
pub mod prompt;
pub mod session_store;
