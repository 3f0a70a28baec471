//! Diff-review gate: destructive actions are previewed and need an explicit yes.

use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use dialoguer::Confirm;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Modify => "modify",
            ChangeKind::Delete => "delete",
        }
    }
}

/// What the approver is shown before a write or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub path: String,
    pub kind: ChangeKind,
    /// Unified diff for writes, a deletion notice for deletes.
    pub diff: String,
}

/// Asked on the gateway's thread. With `timeout` set, the approver must return
/// by then and treat silence as [`Decision::Rejected`].
pub trait Approver: Send + Sync {
    fn present_diff(&self, preview: &Preview, timeout: Option<Duration>) -> Decision;
}

/// Interactive approver on the controlling terminal.
///
/// Without a timeout this is a plain `[y/N]` confirm. With one, a single
/// keypress is read in raw mode so the wait can end on the deadline without
/// leaving a reader behind.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalApprover;

impl Approver for TerminalApprover {
    fn present_diff(&self, preview: &Preview, timeout: Option<Duration>) -> Decision {
        eprintln!("--- proposed {} of {} ---", preview.kind.as_str(), preview.path);
        eprintln!("{}", preview.diff.trim_end());

        let decision = match timeout {
            None => match Confirm::new()
                .with_prompt("apply this change?")
                .default(false)
                .interact()
            {
                Ok(true) => Decision::Approved,
                Ok(false) => Decision::Rejected,
                Err(err) => {
                    warn!(path = %preview.path, error = %err, "approval prompt failed");
                    Decision::Rejected
                }
            },
            Some(timeout) => {
                eprintln!("apply this change? [y/N] ({}s)", timeout.as_secs());
                match read_key(timeout) {
                    Ok(Some(code)) => decision_for_key(code),
                    Ok(None) => {
                        warn!(
                            path = %preview.path,
                            timeout_ms = timeout.as_millis() as u64,
                            "approval timed out"
                        );
                        Decision::Rejected
                    }
                    Err(err) => {
                        warn!(path = %preview.path, error = %err, "approval prompt failed");
                        Decision::Rejected
                    }
                }
            }
        };
        info!(path = %preview.path, ?decision, "approval answered");
        decision
    }
}

/// Only `y` approves; every other key is a no.
pub fn decision_for_key(code: KeyCode) -> Decision {
    match code {
        KeyCode::Char('y' | 'Y') => Decision::Approved,
        _ => Decision::Rejected,
    }
}

struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Next key press before `timeout`, or `None` once it passes.
fn read_key(timeout: Duration) -> io::Result<Option<KeyCode>> {
    let _raw = RawMode::enable()?;
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || !event::poll(remaining)? {
            return Ok(None);
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => return Ok(Some(key.code)),
            _ => {}
        }
    }
}
