//! Multi-step driver: run decisions until control returns to the user.

use tracing::info;

use crate::core::action::Action;
use crate::core::input::UserInput;
use crate::core::tree::{ContextTree, NodeDraft, NodeId};
use crate::step::{SessionError, StepContext, StepOutcome, StepRecord, run_step};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The model chose to end the session.
    Terminated { summary: Option<String> },
    /// The model replied in chat; the next move is the user's.
    AwaitingUser,
    /// Validation retries ran out.
    Halted { reason: String },
    Cancelled,
    /// `max_turns` actions were dispatched without a reply or termination.
    TurnLimit { turns: usize },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub steps_executed: usize,
    pub stop: LoopStop,
}

/// Append a user message (with optional label syntax) under the head.
pub fn submit_user_input(tree: &mut ContextTree, text: &str) -> NodeId {
    let input = UserInput::parse(text);
    tree.append_to_head(NodeDraft::user(input.message).with_label(input.label))
}

/// Run steps until the model terminates or chats, validation halts, the
/// session is cancelled, or `max_turns` actions have been dispatched.
///
/// Dispatch failures are recorded and reported through `on_step`; only
/// decider and tree errors abort the loop.
pub fn run_loop<F: FnMut(&StepRecord)>(
    tree: &mut ContextTree,
    ctx: &StepContext<'_>,
    max_turns: Option<usize>,
    mut on_step: F,
) -> Result<LoopOutcome, SessionError> {
    let mut steps_executed = 0usize;
    loop {
        if let Some(limit) = max_turns
            && steps_executed >= limit
        {
            info!(turns = steps_executed, "turn limit reached");
            tree.append_to_head(NodeDraft::system(format!(
                "[turn limit] stopped after {steps_executed} actions"
            )));
            return Ok(LoopOutcome {
                steps_executed,
                stop: LoopStop::TurnLimit {
                    turns: steps_executed,
                },
            });
        }

        let stop = match run_step(tree, ctx)? {
            StepOutcome::Recorded(record) => {
                steps_executed += 1;
                on_step(&record);
                match record.action {
                    Action::Terminate { summary } => Some(LoopStop::Terminated { summary }),
                    Action::Chat { .. } => Some(LoopStop::AwaitingUser),
                    _ => None,
                }
            }
            StepOutcome::Halted { error, .. } => Some(LoopStop::Halted {
                reason: error.to_string(),
            }),
            StepOutcome::Cancelled { .. } => Some(LoopStop::Cancelled),
        };

        if let Some(stop) = stop {
            info!(steps_executed, ?stop, "loop stopped");
            return Ok(LoopOutcome {
                steps_executed,
                stop,
            });
        }
    }
}
