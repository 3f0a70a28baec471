//! Shared deterministic types for the session core.
//!
//! These types define stable contracts between the loop, the gateway and the
//! context tree. They carry no I/O handles and serialize into session files.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Author of a conversation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    ToolResult,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::ToolResult => "tool_result",
        }
    }
}

/// Why the gateway refused to run an action. Rejections never have side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Path escapes the workspace root or hits a denied path.
    OutOfBounds,
    /// The approver declined the previewed change (or never answered).
    NotApproved,
    /// Shell command matched the catastrophic-command guard.
    Blocked,
}

/// Why an attempted action did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NotFound,
    PermissionDenied,
    Timeout,
    Cancelled,
    /// The target changed between preview and approval.
    Conflict,
    /// Diff hunks do not line up with the current file.
    InvalidDiff,
    Io,
    /// Infrastructure fault inside the gateway (spawn failure, lock failure, ...).
    Fault,
}

/// Successful payload of a dispatched action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Reply {
        content: String,
    },
    FileRead {
        path: String,
        content: String,
        truncated: bool,
    },
    FileWritten {
        path: String,
        diff: String,
        created: bool,
    },
    FileDeleted {
        path: String,
    },
    Shell {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    Terminated {
        summary: Option<String>,
    },
}

/// Outcome of a dispatched action, produced by the gateway and recorded by the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success { outcome: Outcome },
    Rejected { reason: RejectReason, detail: String },
    Failed { reason: FailureReason, detail: String },
}

impl ExecutionResult {
    pub fn success(outcome: Outcome) -> Self {
        ExecutionResult::Success { outcome }
    }

    pub fn rejected(reason: RejectReason, detail: impl Into<String>) -> Self {
        ExecutionResult::Rejected {
            reason,
            detail: detail.into(),
        }
    }

    pub fn failed(reason: FailureReason, detail: impl Into<String>) -> Self {
        ExecutionResult::Failed {
            reason,
            detail: detail.into(),
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            ExecutionResult::Success { .. } => "success",
            ExecutionResult::Rejected { .. } => "rejected",
            ExecutionResult::Failed { .. } => "failed",
        }
    }

    /// True when the action did not achieve what it asked for.
    ///
    /// A shell command that exited non-zero still counts as `Success` at the
    /// gateway level; only the loop treats it as a logical failure.
    pub fn is_logical_failure(&self) -> bool {
        match self {
            ExecutionResult::Success {
                outcome: Outcome::Shell { exit_code, .. },
            } => *exit_code != Some(0),
            ExecutionResult::Success { .. } => false,
            ExecutionResult::Rejected { .. } | ExecutionResult::Failed { .. } => true,
        }
    }

    /// Text recorded in the conversation so the model can adapt to the outcome.
    pub fn render(&self) -> String {
        match self {
            ExecutionResult::Success { outcome } => render_outcome(outcome),
            ExecutionResult::Rejected { reason, detail } => {
                format!("[rejected: {reason}] {detail}")
            }
            ExecutionResult::Failed { reason, detail } => {
                format!("[failed: {reason}] {detail}")
            }
        }
    }
}

fn render_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Reply { content } => content.clone(),
        Outcome::FileRead {
            path,
            content,
            truncated,
        } => {
            let mut buf = format!("[read {path}]\n{content}");
            if *truncated {
                buf.push_str("\n[truncated]");
            }
            buf
        }
        Outcome::FileWritten {
            path,
            diff,
            created,
        } => {
            let verb = if *created { "created" } else { "wrote" };
            format!("[{verb} {path}]\n{diff}")
        }
        Outcome::FileDeleted { path } => format!("[deleted {path}]"),
        Outcome::Shell {
            stdout,
            stderr,
            exit_code,
        } => {
            let code = exit_code.map_or_else(|| "none".to_string(), |c| c.to_string());
            let mut buf = format!("[exit code {code}]");
            if !stdout.is_empty() {
                buf.push_str("\n=== stdout ===\n");
                buf.push_str(stdout);
            }
            if !stderr.is_empty() {
                buf.push_str("\n=== stderr ===\n");
                buf.push_str(stderr);
            }
            buf
        }
        Outcome::Terminated { summary } => match summary {
            Some(summary) => format!("[session finished] {summary}"),
            None => "[session finished]".to_string(),
        },
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RejectReason::OutOfBounds => "out of bounds",
            RejectReason::NotApproved => "not approved",
            RejectReason::Blocked => "blocked",
        };
        f.write_str(label)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureReason::NotFound => "not found",
            FailureReason::PermissionDenied => "permission denied",
            FailureReason::Timeout => "timeout",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Conflict => "conflict",
            FailureReason::InvalidDiff => "invalid diff",
            FailureReason::Io => "io error",
            FailureReason::Fault => "gateway fault",
        };
        f.write_str(label)
    }
}
