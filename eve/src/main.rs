//! Supervised coding-agent session.
//!
//! Keeps a branching conversation in `.eve/session.json`. Each user message
//! hands control to the configured decider, whose actions are executed through
//! the workspace gateway until it replies, terminates, or halts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eve::cancel::CancelToken;
use eve::core::tree::{ContextTree, NodeDraft, NodeId};
use eve::core::types::{ExecutionResult, Outcome, Role};
use eve::exit_codes;
use eve::io::approval::TerminalApprover;
use eve::io::boundary::WorkspaceBoundary;
use eve::io::config::load_config;
use eve::io::decider::CommandDecider;
use eve::io::gateway::Gateway;
use eve::io::init::{EvePaths, InitOptions, init_workspace};
use eve::io::memory::{InMemoryMemory, Memory};
use eve::io::session_store::{load_session, load_session_if_present, write_session};
use eve::logging;
use eve::looping::{LoopStop, run_loop, submit_user_input};
use eve::step::{SessionError, StepConfig, StepContext, StepRecord};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::warn;

const SESSION_PREAMBLE: &str = "You are a coding assistant working inside the workspace. \
Answer with exactly one JSON action per turn.";

#[derive(Parser)]
#[command(name = "eve", version, about = "Supervised coding-agent session")]
struct Cli {
    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Also append diagnostics to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.eve/` with a default config.
    Init {
        /// Overwrite existing eve-owned files (a saved session is kept).
        #[arg(short, long)]
        force: bool,
    },
    /// Start or resume an interactive session (`:help` lists session commands).
    Run,
    /// Print the saved conversation.
    Show {
        /// Only the messages from the root to the current head.
        #[arg(long)]
        path: bool,
    },
    /// Check the saved session against the schema and tree invariants.
    Validate,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref())?;
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run => cmd_run(&root),
        Command::Show { path } => cmd_show(&root, path),
        Command::Validate => cmd_validate(&root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(root, &InitOptions { force })?;
    println!("initialized {}", paths.eve_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path) -> Result<i32> {
    let paths = EvePaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let boundary = WorkspaceBoundary::new(root, cfg.denied_paths())?;
    let gateway = Gateway::new(
        cfg.gateway_config(paths.lock_path.clone()),
        Arc::new(TerminalApprover),
    );
    let cancel = CancelToken::new();
    watch_interrupts(cancel.clone())?;
    let decider = CommandDecider::new(
        cfg.decider.command.clone(),
        boundary.root().to_path_buf(),
        Duration::from_secs(cfg.decider.timeout_secs),
        cancel.clone(),
    );
    let step_config = StepConfig::from_config(&cfg);

    let mut tree = load_session_if_present(&paths.session_path)?
        .unwrap_or_else(|| ContextTree::new(NodeDraft::system(SESSION_PREAMBLE)));
    let mut memory = InMemoryMemory::default();
    for node in tree.path_to_head() {
        if node.role == Role::User {
            memory.remember(&node.content);
        }
    }

    let mut editor = DefaultEditor::new().context("start line editor")?;
    let _ = editor.load_history(&paths.history_path);

    let code = loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break exit_codes::OK,
            Err(err) => return Err(err).context("read user input"),
        };
        let command = match ReplCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        let _ = editor.add_history_entry(line.trim());

        let text = match command {
            ReplCommand::Exit => break exit_codes::OK,
            ReplCommand::Message(text) => text,
            command => {
                if apply_command(command, &mut tree, &mut memory) {
                    write_session(&paths.session_path, &tree)?;
                }
                continue;
            }
        };

        let user = submit_user_input(&mut tree, &text);
        cancel.reset();
        let outcome = {
            let ctx = StepContext {
                decider: &decider,
                gateway: &gateway,
                boundary: &boundary,
                memory: Some(&memory as &dyn Memory),
                cancel: &cancel,
                config: &step_config,
            };
            run_loop(&mut tree, &ctx, cfg.session.max_turns, print_step)
        };
        if let Some(node) = tree.get(user) {
            memory.remember(&node.content);
        }
        write_session(&paths.session_path, &tree)?;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err @ (SessionError::Decider(_) | SessionError::DeciderTimeout { .. })) => {
                eprintln!("session stopped: {err}");
                break exit_codes::DECIDER_FAILED;
            }
            Err(err) => return Err(err).context("run session"),
        };
        match outcome.stop {
            LoopStop::AwaitingUser => {}
            LoopStop::Terminated { summary } => {
                println!("{}", summary.as_deref().unwrap_or("session finished"));
                break exit_codes::OK;
            }
            LoopStop::Halted { reason } => {
                eprintln!("session halted: {reason}");
                break exit_codes::HALTED;
            }
            LoopStop::Cancelled => eprintln!("cancelled"),
            LoopStop::TurnLimit { turns } => {
                eprintln!("stopped after {turns} actions; send a message to continue");
            }
        }
    };

    if let Err(err) = editor.save_history(&paths.history_path) {
        warn!(error = %err, "could not save input history");
    }
    Ok(code)
}

/// Ctrl-C cancels the running step instead of killing the session.
fn watch_interrupts(cancel: CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("start signal runtime")?;
    thread::spawn(move || {
        runtime.block_on(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
                eprintln!("\ninterrupted; stopping the current step");
            }
        });
    });
    Ok(())
}

/// One line typed at the `eve run` prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Message(String),
    Exit,
    Help,
    Outline,
    Head(NodeId),
    Branches(NodeId),
    Discard(NodeId),
    Remember(String),
}

const REPL_HELP: &str = "\
:outline          show the conversation tree
:head <id>        continue from an earlier node
:branches <id>    list the children of a node
:discard <id>     remove a branch that is not on the current path
:remember <text>  store a note for recall
exit              end the session";

impl ReplCommand {
    /// `Ok(None)` for blank lines; `Err` carries a message for the user.
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if matches!(line, "exit" | "quit") {
            return Ok(Some(Self::Exit));
        }
        let Some(command) = line.strip_prefix(':') else {
            return Ok(Some(Self::Message(line.to_string())));
        };
        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        let parsed = match name {
            "help" => Self::Help,
            "outline" => Self::Outline,
            "head" => Self::Head(parse_node_id(arg)?),
            "branches" => Self::Branches(parse_node_id(arg)?),
            "discard" => Self::Discard(parse_node_id(arg)?),
            "remember" if arg.is_empty() => return Err(":remember needs some text".to_string()),
            "remember" => Self::Remember(arg.to_string()),
            other => return Err(format!("unknown command `:{other}` (try :help)")),
        };
        Ok(Some(parsed))
    }
}

/// Accepts ids as printed (`n3`) or bare (`3`).
fn parse_node_id(arg: &str) -> Result<NodeId, String> {
    let digits = arg.strip_prefix('n').unwrap_or(arg);
    digits
        .parse::<usize>()
        .map(NodeId::new)
        .map_err(|_| format!("`{arg}` is not a node id"))
}

/// Run a tree or memory command. Returns true when the tree changed.
fn apply_command(
    command: ReplCommand,
    tree: &mut ContextTree,
    memory: &mut InMemoryMemory,
) -> bool {
    let outcome = match command {
        ReplCommand::Help => {
            eprintln!("{REPL_HELP}");
            return false;
        }
        ReplCommand::Outline => {
            eprint!("{}", tree.render_outline());
            return false;
        }
        ReplCommand::Remember(text) => {
            memory.remember(&text);
            eprintln!("noted ({} notes)", memory.len());
            return false;
        }
        ReplCommand::Head(id) => tree.set_head(id).map(|()| {
            eprintln!("head moved to {id}");
            true
        }),
        ReplCommand::Branches(id) => tree.branches_from(id).map(|children| {
            for child in children {
                if let Some(node) = tree.get(child) {
                    let first = node.content.lines().next().unwrap_or_default();
                    eprintln!("{child} {}: {first}", node.role.as_str());
                }
            }
            false
        }),
        ReplCommand::Discard(id) => tree.discard_branch(id).map(|removed| {
            eprintln!("discarded {removed} node(s)");
            true
        }),
        ReplCommand::Message(_) | ReplCommand::Exit => Ok(false),
    };
    outcome.unwrap_or_else(|err| {
        eprintln!("{err}");
        false
    })
}

/// Chat replies go to stdout; everything else is a progress line on stderr.
fn print_step(record: &StepRecord) {
    match &record.result {
        ExecutionResult::Success {
            outcome: Outcome::Reply { content },
        } => println!("{content}"),
        ExecutionResult::Success {
            outcome: Outcome::Terminated { .. },
        } => {}
        _ => eprintln!("[{}] {}", step_status(record), record.action.describe()),
    }
}

/// Status shown for a step; shell commands that exited non-zero are failures.
fn step_status(record: &StepRecord) -> String {
    match &record.result {
        ExecutionResult::Success {
            outcome: Outcome::Shell { exit_code, .. },
        } if record.logical_failure => match exit_code {
            Some(code) => format!("failed: exit {code}"),
            None => "failed: killed by signal".to_string(),
        },
        result => result.status_label().to_string(),
    }
}

fn cmd_show(root: &Path, path_only: bool) -> Result<i32> {
    let paths = EvePaths::new(root);
    let tree = load_session(&paths.session_path)?;
    if path_only {
        for node in tree.path_to_head() {
            let label = node
                .label
                .as_deref()
                .map(|label| format!(" [{label}]"))
                .unwrap_or_default();
            println!("{} {}{label}: {}", node.id, node.role.as_str(), node.content);
        }
    } else {
        print!("{}", tree.render_outline());
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let paths = EvePaths::new(root);
    let tree = load_session(&paths.session_path)?;
    println!("ok: {} nodes, head {}", tree.len(), tree.head());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eve::core::action::Action;
    use eve::core::pruning::PruneReport;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["eve", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["eve", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_show_path_with_global_root() {
        let cli = Cli::parse_from(["eve", "show", "--path", "--root", "/tmp/ws"]);
        assert!(matches!(cli.command, Command::Show { path: true }));
        assert_eq!(cli.root.as_deref(), Some(Path::new("/tmp/ws")));
    }

    #[test]
    fn parse_run_with_log_file() {
        let cli = Cli::parse_from(["eve", "--log-file", "eve.log", "run"]);
        assert!(matches!(cli.command, Command::Run));
        assert_eq!(cli.log_file.as_deref(), Some(Path::new("eve.log")));
    }

    #[test]
    fn repl_lines_parse_into_commands() {
        assert_eq!(ReplCommand::parse("   "), Ok(None));
        assert_eq!(ReplCommand::parse("quit"), Ok(Some(ReplCommand::Exit)));
        assert_eq!(
            ReplCommand::parse("  fix the build "),
            Ok(Some(ReplCommand::Message("fix the build".to_string())))
        );
        assert_eq!(
            ReplCommand::parse(":head n3"),
            Ok(Some(ReplCommand::Head(NodeId::new(3))))
        );
        assert_eq!(
            ReplCommand::parse(":branches 0"),
            Ok(Some(ReplCommand::Branches(NodeId::new(0))))
        );
        assert_eq!(
            ReplCommand::parse(":discard n12"),
            Ok(Some(ReplCommand::Discard(NodeId::new(12))))
        );
        assert_eq!(
            ReplCommand::parse(":remember tests live in eve/tests"),
            Ok(Some(ReplCommand::Remember("tests live in eve/tests".to_string())))
        );
        assert_eq!(ReplCommand::parse(":outline"), Ok(Some(ReplCommand::Outline)));
    }

    #[test]
    fn bad_repl_commands_explain_themselves() {
        assert!(ReplCommand::parse(":head").unwrap_err().contains("not a node id"));
        assert!(ReplCommand::parse(":head nx").unwrap_err().contains("`nx`"));
        assert!(ReplCommand::parse(":remember").is_err());
        assert!(ReplCommand::parse(":frobnicate").unwrap_err().contains("unknown command"));
    }

    #[test]
    fn tree_commands_move_head_and_discard() {
        let mut tree = ContextTree::new(NodeDraft::system("session"));
        let first = tree.append_to_head(NodeDraft::user("first"));
        let abandoned = tree.append_to_head(NodeDraft::user("abandoned"));
        let mut memory = InMemoryMemory::default();

        assert!(apply_command(ReplCommand::Head(first), &mut tree, &mut memory));
        assert_eq!(tree.head(), first);
        assert!(apply_command(ReplCommand::Discard(abandoned), &mut tree, &mut memory));
        assert!(tree.get(abandoned).is_none());

        assert!(!apply_command(ReplCommand::Discard(first), &mut tree, &mut memory));
        assert!(tree.get(first).is_some());
        assert!(!apply_command(
            ReplCommand::Head(NodeId::new(99)),
            &mut tree,
            &mut memory
        ));

        assert!(!apply_command(
            ReplCommand::Remember("the db is sqlite".to_string()),
            &mut tree,
            &mut memory
        ));
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn non_zero_exit_shows_as_failed() {
        let record = |exit_code, logical_failure| StepRecord {
            node: NodeId::new(1),
            action: Action::RunShell {
                command: "make".to_string(),
                timeout_secs: 5,
            },
            result: ExecutionResult::success(Outcome::Shell {
                stdout: String::new(),
                stderr: String::new(),
                exit_code,
            }),
            logical_failure,
            corrections: 0,
            prune: PruneReport::default(),
        };
        assert_eq!(step_status(&record(Some(0), false)), "success");
        assert_eq!(step_status(&record(Some(2), true)), "failed: exit 2");
        assert_eq!(step_status(&record(None, true)), "failed: killed by signal");
    }
}
