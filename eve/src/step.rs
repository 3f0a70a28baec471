//! Orchestration for a single decision: decide, validate, dispatch, record.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::action::{Action, ActionLimits, ValidationError, parse};
use crate::core::pruning::{PruneBounds, PruneReport};
use crate::core::tree::{ContextTree, NodeDraft, NodeId, TreeError};
use crate::core::types::{ExecutionResult, FailureReason, Role};
use crate::io::boundary::WorkspaceBoundary;
use crate::io::config::{DeciderTimeoutPolicy, EveConfig};
use crate::io::decider::{ClientError, Decider};
use crate::io::gateway::Gateway;
use crate::io::memory::Memory;
use crate::io::prompt::Prompt;

/// Errors that end the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("decider failed: {0}")]
    Decider(ClientError),
    #[error("decider timed out {attempts} time(s) in a row")]
    DeciderTimeout { attempts: u32 },
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Tunables for a single step.
#[derive(Debug, Clone)]
pub struct StepConfig {
    pub max_validation_retries: u32,
    pub decider_timeout_policy: DeciderTimeoutPolicy,
    pub decider_retry_attempts: u32,
    pub memory_recall: usize,
    pub prune_bounds: PruneBounds,
    pub action_limits: ActionLimits,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self::from_config(&EveConfig::default())
    }
}

impl StepConfig {
    pub fn from_config(cfg: &EveConfig) -> Self {
        Self {
            max_validation_retries: cfg.session.max_validation_retries,
            decider_timeout_policy: cfg.session.decider_timeout_policy,
            decider_retry_attempts: cfg.session.decider_retry_attempts,
            memory_recall: cfg.session.memory_recall,
            prune_bounds: cfg.prune_bounds(),
            action_limits: cfg.action_limits(),
        }
    }
}

/// Collaborators borrowed for the duration of a step.
pub struct StepContext<'a> {
    pub decider: &'a dyn Decider,
    pub gateway: &'a Gateway,
    pub boundary: &'a WorkspaceBoundary,
    pub memory: Option<&'a dyn Memory>,
    pub cancel: &'a CancelToken,
    pub config: &'a StepConfig,
}

/// Phases of one decision; each transition is logged and checks cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    AwaitingDecision,
    Validating,
    Dispatching,
    Recording,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepState::AwaitingDecision => "awaiting_decision",
            StepState::Validating => "validating",
            StepState::Dispatching => "dispatching",
            StepState::Recording => "recording",
        };
        f.write_str(label)
    }
}

/// A dispatched action and where it was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub node: NodeId,
    pub action: Action,
    pub result: ExecutionResult,
    /// Rejected, failed, or a shell command that exited non-zero.
    pub logical_failure: bool,
    /// Invalid decisions corrected before this action.
    pub corrections: u32,
    pub prune: PruneReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Recorded(StepRecord),
    /// Validation kept failing; a system node explains why.
    Halted {
        node: NodeId,
        error: ValidationError,
    },
    /// Cancelled before an action was dispatched.
    Cancelled { node: NodeId },
}

/// Run one decision against `tree`, appending what happened under the head.
#[instrument(skip_all, fields(head = %tree.head()))]
pub fn run_step(
    tree: &mut ContextTree,
    ctx: &StepContext<'_>,
) -> Result<StepOutcome, SessionError> {
    let anchor = tree.head();
    let mut corrections = 0u32;

    let action = loop {
        if let Some(node) = enter(StepState::AwaitingDecision, tree, ctx.cancel) {
            return Ok(StepOutcome::Cancelled { node });
        }
        let prompt = build_prompt(tree, ctx);
        let raw = match request_decision(ctx, &prompt) {
            Ok(raw) => raw,
            Err(err) => {
                if let Some(node) = enter(StepState::AwaitingDecision, tree, ctx.cancel) {
                    debug!(error = %err, "decider stopped by cancellation");
                    return Ok(StepOutcome::Cancelled { node });
                }
                return Err(err);
            }
        };

        if let Some(node) = enter(StepState::Validating, tree, ctx.cancel) {
            return Ok(StepOutcome::Cancelled { node });
        }
        match parse(&raw, &ctx.config.action_limits) {
            Ok(action) => break action,
            Err(error) => {
                corrections += 1;
                warn!(
                    field = %error.field,
                    reason = %error.reason,
                    corrections,
                    "invalid decision"
                );
                if corrections >= ctx.config.max_validation_retries {
                    let node = tree.append_to_head(NodeDraft::system(format!(
                        "[halted] the model produced {corrections} invalid decisions in a row; \
                         last error: {error}"
                    )));
                    return Ok(StepOutcome::Halted { node, error });
                }
                tree.append_to_head(NodeDraft::new(Role::Assistant, raw));
                tree.append_to_head(NodeDraft::new(
                    Role::ToolResult,
                    format!(
                        "[invalid action] {error}. \
                         Reply with plain text or exactly one JSON action object."
                    ),
                ));
            }
        }
    };

    if corrections > 0 {
        debug!(corrections, anchor = %anchor, "rewinding head past corrections");
        tree.set_head(anchor)?;
    }

    let result = if ctx.cancel.is_cancelled() {
        info!(state = "dispatching", "cancelled with action pending");
        ExecutionResult::failed(FailureReason::Cancelled, "cancelled before dispatch")
    } else {
        debug!(state = %StepState::Dispatching, kind = action.kind(), "transition");
        match ctx.gateway.dispatch(&action, ctx.boundary, ctx.cancel) {
            Ok(result) => result,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "gateway fault");
                ExecutionResult::failed(FailureReason::Fault, format!("{err:#}"))
            }
        }
    };

    debug!(state = %StepState::Recording, status = result.status_label(), "transition");
    let logical_failure = result.is_logical_failure();
    if logical_failure {
        warn!(kind = action.kind(), status = result.status_label(), "action did not succeed");
    }
    let node = tree.append_to_head(record_draft(&action, &result));
    let prune = tree.prune(&ctx.config.prune_bounds);
    if !prune.is_noop() {
        info!(collapsed = prune.collapsed, removed = prune.removed, "context pruned");
    }

    Ok(StepOutcome::Recorded(StepRecord {
        node,
        action,
        result,
        logical_failure,
        corrections,
        prune,
    }))
}

/// Log the transition; on cancellation record a system node and return it.
fn enter(state: StepState, tree: &mut ContextTree, cancel: &CancelToken) -> Option<NodeId> {
    debug!(state = %state, "transition");
    if !cancel.is_cancelled() {
        return None;
    }
    info!(state = %state, "cancelled");
    Some(tree.append_to_head(NodeDraft::system(format!("[cancelled while {state}]"))))
}

fn build_prompt(tree: &ContextTree, ctx: &StepContext<'_>) -> Prompt {
    let mut prompt = Prompt::from_path(&tree.path_to_head(), Vec::new());
    if let Some(memory) = ctx.memory
        && ctx.config.memory_recall > 0
        && let Some(query) = prompt.last_user_message()
    {
        let recalled = memory.query(query, ctx.config.memory_recall);
        debug!(recalled = recalled.len(), "memory recall");
        prompt.recalled = recalled;
    }
    prompt
}

fn request_decision(ctx: &StepContext<'_>, prompt: &Prompt) -> Result<String, SessionError> {
    let allowed = match ctx.config.decider_timeout_policy {
        DeciderTimeoutPolicy::Surface => 1,
        DeciderTimeoutPolicy::Retry => 1 + ctx.config.decider_retry_attempts,
    };
    let mut attempts = 0;
    loop {
        attempts += 1;
        match ctx.decider.request_decision(prompt) {
            Ok(raw) => return Ok(raw),
            Err(ClientError::TimedOut(after)) if attempts < allowed => {
                warn!(attempts, ?after, "decider timed out, retrying");
            }
            Err(ClientError::TimedOut(_)) => return Err(SessionError::DeciderTimeout { attempts }),
            Err(err) => return Err(SessionError::Decider(err)),
        }
    }
}

/// Chat and terminate are the assistant speaking; everything else is a tool result.
fn record_draft(action: &Action, result: &ExecutionResult) -> NodeDraft {
    let (role, content) = match action {
        Action::Chat { content } => (Role::Assistant, content.clone()),
        Action::Terminate { .. } => (Role::Assistant, result.render()),
        _ => (
            Role::ToolResult,
            format!("{}\n{}", action.describe(), result.render()),
        ),
    };
    NodeDraft::new(role, content)
        .with_action(action.clone())
        .with_result(result.clone())
}
