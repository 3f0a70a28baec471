//! Loop-level tests for whole-session scenarios.
//!
//! These drive `run_step`/`run_loop` with scripted deciders and approvers
//! against real temp workspaces, then inspect the tree, the filesystem and the
//! saved session.

use std::thread;
use std::time::{Duration, Instant};

use eve::core::action::Action;
use eve::core::tree::{ContextTree, NodeDraft};
use eve::core::types::{ExecutionResult, FailureReason, Outcome, RejectReason, Role};
use eve::io::approval::Decision;
use eve::io::session_store::{load_session, write_session};
use eve::looping::{LoopOutcome, LoopStop, run_loop, submit_user_input};
use eve::step::{StepConfig, StepContext, StepOutcome, StepRecord, run_step};
use eve::test_support::{ScriptedApprover, ScriptedDecider, TestWorkspace};

fn fresh_tree(message: &str) -> ContextTree {
    let mut tree = ContextTree::new(NodeDraft::system("session"));
    submit_user_input(&mut tree, message);
    tree
}

fn step_once(ws: &TestWorkspace, tree: &mut ContextTree, decider: &ScriptedDecider) -> StepOutcome {
    let config = StepConfig::default();
    let ctx = StepContext {
        decider,
        gateway: &ws.gateway,
        boundary: &ws.boundary,
        memory: None,
        cancel: &ws.cancel,
        config: &config,
    };
    run_step(tree, &ctx).expect("step")
}

fn drive(
    ws: &TestWorkspace,
    tree: &mut ContextTree,
    decider: &ScriptedDecider,
) -> (LoopOutcome, Vec<StepRecord>) {
    let config = StepConfig::default();
    let ctx = StepContext {
        decider,
        gateway: &ws.gateway,
        boundary: &ws.boundary,
        memory: None,
        cancel: &ws.cancel,
        config: &config,
    };
    let mut records = Vec::new();
    let outcome =
        run_loop(tree, &ctx, Some(20), |record| records.push(record.clone())).expect("loop");
    (outcome, records)
}

fn recorded(outcome: StepOutcome) -> StepRecord {
    match outcome {
        StepOutcome::Recorded(record) => record,
        other => panic!("expected a recorded step, got {other:?}"),
    }
}

/// (a) Approved write creates the file with the proposed content.
#[test]
fn approved_write_succeeds() {
    let ws = TestWorkspace::new(ScriptedApprover::new(vec![Decision::Approved])).expect("ws");
    let decider =
        ScriptedDecider::replies(&[r#"{"kind":"write_file","path":"a.txt","content":"hi"}"#]);
    let mut tree = fresh_tree("create a.txt");

    let record = recorded(step_once(&ws, &mut tree, &decider));
    assert!(matches!(
        record.result,
        ExecutionResult::Success {
            outcome: Outcome::FileWritten { created: true, .. }
        }
    ));
    assert_eq!(ws.read("a.txt").as_deref(), Some("hi"));

    let previews = ws.approver.previews();
    assert_eq!(previews.len(), 1);
    assert!(previews[0].diff.contains("+hi"));
}

/// (b) Rejected write leaves the filesystem untouched.
#[test]
fn rejected_write_changes_nothing() {
    let ws = TestWorkspace::new(ScriptedApprover::new(vec![Decision::Rejected])).expect("ws");
    ws.write("b.txt", "original\n").expect("seed");
    let decider = ScriptedDecider::replies(&[
        r#"{"kind":"write_file","path":"a.txt","content":"hi"}"#,
        r#"{"kind":"write_file","path":"b.txt","content":"changed\n"}"#,
    ]);
    let mut tree = fresh_tree("write files");

    let first = recorded(step_once(&ws, &mut tree, &decider));
    assert!(matches!(
        first.result,
        ExecutionResult::Rejected {
            reason: RejectReason::NotApproved,
            ..
        }
    ));
    assert_eq!(ws.read("a.txt"), None);

    let second = recorded(step_once(&ws, &mut tree, &decider));
    assert!(matches!(second.result, ExecutionResult::Rejected { .. }));
    assert_eq!(ws.read("b.txt").as_deref(), Some("original\n"));

    let head = tree.get(tree.head()).expect("head");
    assert!(head.content.contains("[rejected: not approved]"));
}

/// (c) A shell command runs in the root and reports stdout and exit code.
#[cfg(unix)]
#[test]
fn shell_echo_succeeds() {
    let ws = TestWorkspace::new(ScriptedApprover::new(vec![])).expect("ws");
    let decider = ScriptedDecider::replies(&[r#"{"kind":"run_shell","command":"echo hi"}"#]);
    let mut tree = fresh_tree("say hi");

    let record = recorded(step_once(&ws, &mut tree, &decider));
    assert_eq!(
        record.result,
        ExecutionResult::Success {
            outcome: Outcome::Shell {
                stdout: "hi\n".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            }
        }
    );
    assert_eq!(tree.get(record.node).expect("node").role, Role::ToolResult);
}

/// (d) A malformed action gets one corrective retry, and the recorded action
/// extends the history from before the correction.
#[test]
fn malformed_action_is_corrected_once() {
    let ws = TestWorkspace::new(ScriptedApprover::new(vec![Decision::Approved])).expect("ws");
    let decider = ScriptedDecider::replies(&[
        r#"{"kind":"write_file","content":"hi"}"#,
        r#"{"kind":"write_file","path":"a.txt","content":"hi"}"#,
    ]);
    let mut tree = fresh_tree("create a.txt");
    let user = tree.head();

    let record = recorded(step_once(&ws, &mut tree, &decider));
    assert_eq!(record.corrections, 1);
    assert_eq!(ws.read("a.txt").as_deref(), Some("hi"));

    let prompts = decider.prompts();
    assert_eq!(prompts.len(), 2);
    let correction = prompts[1]
        .messages
        .last()
        .expect("correction message");
    assert!(correction.content.contains("invalid `path`"));

    let path = tree.path_ids();
    assert_eq!(path[path.len() - 2], user);
    assert_eq!(*path.last().expect("head"), record.node);
}

/// (e) Three consecutive invalid decisions halt the loop and explain why.
#[test]
fn repeated_invalid_output_halts() {
    let ws = TestWorkspace::new(ScriptedApprover::new(vec![])).expect("ws");
    let decider = ScriptedDecider::replies(&[
        r#"{"kind":"write_file","content":"hi"}"#,
        r#"{"kind":"launch_rocket"}"#,
        "{not json",
    ]);
    let mut tree = fresh_tree("do something");

    let (outcome, records) = drive(&ws, &mut tree, &decider);
    assert!(records.is_empty());
    let LoopStop::Halted { reason } = outcome.stop else {
        panic!("expected halt, got {:?}", outcome.stop);
    };
    assert!(reason.contains("invalid"));

    let head = tree.get(tree.head()).expect("head");
    assert_eq!(head.role, Role::System);
    assert!(head.content.starts_with("[halted]"));
}

#[cfg(unix)]
#[test]
fn file_actions_outside_root_are_out_of_bounds() {
    let ws = TestWorkspace::new(ScriptedApprover::new(vec![
        Decision::Approved,
        Decision::Approved,
        Decision::Approved,
    ]))
    .expect("ws");
    let outside = ws.temp.path().parent().expect("parent").join("eve-outside.txt");
    let decider = ScriptedDecider::replies(&[
        r#"{"kind":"write_file","path":"../escape.txt","content":"x"}"#,
        &format!(
            r#"{{"kind":"write_file","path":"{}","content":"x"}}"#,
            outside.display()
        ),
        r#"{"kind":"read_file","path":"/etc/passwd"}"#,
        r#"{"kind":"delete_file","path":"sub/../../escape.txt"}"#,
        r#"{"kind":"read_file","path":".git/config"}"#,
    ]);
    let mut tree = fresh_tree("poke around");

    for _ in 0..5 {
        let record = recorded(step_once(&ws, &mut tree, &decider));
        assert!(
            matches!(
                record.result,
                ExecutionResult::Rejected {
                    reason: RejectReason::OutOfBounds,
                    ..
                }
            ),
            "{:?} -> {:?}",
            record.action,
            record.result
        );
    }
    assert!(ws.approver.previews().is_empty());
    assert!(!outside.exists());
    assert!(!ws.temp.path().parent().expect("parent").join("escape.txt").exists());
}

#[cfg(unix)]
#[test]
fn shell_timeout_kills_the_command() {
    let ws = TestWorkspace::new(ScriptedApprover::new(vec![])).expect("ws");
    let decider = ScriptedDecider::replies(&[
        r#"{"kind":"run_shell","command":"echo started; sleep 5","timeout_secs":1}"#,
    ]);
    let mut tree = fresh_tree("wait");

    let started = Instant::now();
    let record = recorded(step_once(&ws, &mut tree, &decider));
    assert!(started.elapsed() < Duration::from_secs(4));
    let ExecutionResult::Failed { reason, detail } = record.result else {
        panic!("unexpected result");
    };
    assert_eq!(reason, FailureReason::Timeout);
    assert!(detail.contains("started"));
}

#[cfg(unix)]
#[test]
fn shell_timeout_leaves_no_process_behind() {
    let ws = TestWorkspace::new(ScriptedApprover::new(vec![])).expect("ws");
    let decider = ScriptedDecider::replies(&[
        r#"{"kind":"run_shell","command":"(sleep 2; touch late.txt) & sleep 30","timeout_secs":1}"#,
    ]);
    let mut tree = fresh_tree("wait");

    let record = recorded(step_once(&ws, &mut tree, &decider));
    assert!(matches!(
        record.result,
        ExecutionResult::Failed {
            reason: FailureReason::Timeout,
            ..
        }
    ));
    thread::sleep(Duration::from_secs(3));
    assert_eq!(ws.read("late.txt"), None);
}

#[cfg(unix)]
#[test]
fn cancelling_a_running_shell_records_cancelled() {
    let ws = TestWorkspace::new(ScriptedApprover::new(vec![])).expect("ws");
    let decider = ScriptedDecider::replies(&[
        r#"{"kind":"run_shell","command":"sleep 30","timeout_secs":60}"#,
    ]);
    let mut tree = fresh_tree("wait a while");

    let cancel = ws.cancel.clone();
    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        cancel.cancel();
    });
    let started = Instant::now();
    let record = recorded(step_once(&ws, &mut tree, &decider));
    trigger.join().expect("trigger");

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(
        matches!(
            record.result,
            ExecutionResult::Failed {
                reason: FailureReason::Cancelled,
                ..
            }
        ),
        "{:?}",
        record.result
    );
    assert!(record.logical_failure);
}

#[test]
fn conversation_continues_after_chat_reply() {
    let ws = TestWorkspace::new(ScriptedApprover::new(vec![])).expect("ws");
    ws.write("README.md", "# demo\n").expect("seed");
    let decider = ScriptedDecider::replies(&[
        r#"{"kind":"read_file","path":"README.md"}"#,
        "The readme is a one-line heading.",
        r#"{"kind":"terminate","summary":"answered"}"#,
    ]);
    let mut tree = fresh_tree("[label: docs] what is in the readme?");

    let (first, records) = drive(&ws, &mut tree, &decider);
    assert_eq!(first.stop, LoopStop::AwaitingUser);
    assert_eq!(records.len(), 2);
    assert!(matches!(records[1].action, Action::Chat { .. }));

    submit_user_input(&mut tree, "thanks");
    let (second, _) = drive(&ws, &mut tree, &decider);
    assert_eq!(
        second.stop,
        LoopStop::Terminated {
            summary: Some("answered".to_string())
        }
    );

    let roles: Vec<Role> = tree.path_to_head().iter().map(|n| n.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::ToolResult,
            Role::Assistant,
            Role::User,
            Role::Assistant,
        ]
    );
    let labelled = tree.path_to_head()[1];
    assert_eq!(labelled.label.as_deref(), Some("docs"));
}

#[test]
fn saved_session_replays_identically() {
    let ws = TestWorkspace::new(ScriptedApprover::new(vec![Decision::Approved])).expect("ws");
    let decider = ScriptedDecider::replies(&[
        r#"{"kind":"write_file","content":"oops"}"#,
        r#"{"kind":"write_file","path":"notes.md","content":"one\n"}"#,
        "done",
    ]);
    let mut tree = fresh_tree("take notes");
    drive(&ws, &mut tree, &decider);

    let session = ws.root().join(".eve").join("session.json");
    write_session(&session, &tree).expect("save");
    let restored = load_session(&session).expect("load");

    assert_eq!(restored.head(), tree.head());
    assert_eq!(restored.path_to_head(), tree.path_to_head());
    assert_eq!(restored.render_outline(), tree.render_outline());
}
