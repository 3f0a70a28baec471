//! Execution gateway: the only place actions touch the filesystem or a shell.
//!
//! Every path goes through [`WorkspaceBoundary::resolve`] first. Writes and
//! deletes are previewed to the [`Approver`] and only performed on an explicit
//! approval, under the workspace lock, after re-checking that the target did
//! not change while the approver was looking at it.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::action::{Action, WriteBody};
use crate::core::guard::{ShellVerdict, screen_command};
use crate::core::hunks::apply_hunks;
use crate::core::types::{ExecutionResult, FailureReason, Outcome, RejectReason};
use crate::io::approval::{Approver, ChangeKind, Decision, Preview};
use crate::io::boundary::{ResolvedPath, WorkspaceBoundary};
use crate::io::lock::WorkspaceLock;
use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Interpreter used as `<shell> -c <command>`.
    pub shell: String,
    pub output_limit_bytes: usize,
    pub max_read_bytes: usize,
    /// `None` waits for the approver indefinitely.
    pub approval_timeout: Option<Duration>,
    pub lock_path: PathBuf,
    pub lock_timeout: Duration,
}

impl GatewayConfig {
    pub fn for_root(root: &Path) -> Self {
        Self {
            shell: "sh".to_string(),
            output_limit_bytes: 10_000,
            max_read_bytes: 200_000,
            approval_timeout: None,
            lock_path: root.join(".eve").join("workspace.lock"),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Stateless executor of validated actions; safe to share between sessions.
pub struct Gateway {
    config: GatewayConfig,
    approver: Arc<dyn Approver>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, approver: Arc<dyn Approver>) -> Self {
        Self { config, approver }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Execute `action` within `boundary`.
    ///
    /// Refusals and failures are returned as `Ok(ExecutionResult)`. `Err` is
    /// reserved for faults in the gateway itself (e.g. the shell cannot spawn).
    #[instrument(skip_all, fields(kind = action.kind()))]
    pub fn dispatch(
        &self,
        action: &Action,
        boundary: &WorkspaceBoundary,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult> {
        if cancel.is_cancelled() {
            return Ok(ExecutionResult::failed(
                FailureReason::Cancelled,
                "cancelled before dispatch",
            ));
        }
        let result = match action {
            Action::Chat { content } => ExecutionResult::success(Outcome::Reply {
                content: content.clone(),
            }),
            Action::Terminate { summary } => ExecutionResult::success(Outcome::Terminated {
                summary: summary.clone(),
            }),
            Action::ReadFile { path } => self.read_file(path, boundary),
            Action::WriteFile { path, body } => self.write_file(path, body, boundary, cancel),
            Action::DeleteFile { path } => self.delete_file(path, boundary, cancel),
            Action::RunShell {
                command,
                timeout_secs,
            } => self.run_shell(command, *timeout_secs, boundary, cancel)?,
        };
        info!(status = result.status_label(), "action dispatched");
        Ok(result)
    }

    fn read_file(&self, raw: &str, boundary: &WorkspaceBoundary) -> ExecutionResult {
        let target = match boundary.resolve(raw) {
            Ok(target) => target,
            Err(violation) => return out_of_bounds(&violation.to_string()),
        };
        let bytes = match fs::read(&target.abs) {
            Ok(bytes) => bytes,
            Err(err) => return io_failure(&err, &target),
        };
        let truncated = bytes.len() > self.config.max_read_bytes;
        let kept = &bytes[..bytes.len().min(self.config.max_read_bytes)];
        let mut content = String::from_utf8_lossy(kept).into_owned();
        if truncated {
            content.push_str(&format!(
                "\n[...truncated {} of {} bytes]",
                bytes.len() - kept.len(),
                bytes.len()
            ));
        }
        debug!(path = %target.display(), bytes = bytes.len(), truncated, "file read");
        ExecutionResult::success(Outcome::FileRead {
            path: target.display(),
            content,
            truncated,
        })
    }

    fn write_file(
        &self,
        raw: &str,
        body: &WriteBody,
        boundary: &WorkspaceBoundary,
        cancel: &CancelToken,
    ) -> ExecutionResult {
        let target = match boundary.resolve(raw) {
            Ok(target) => target,
            Err(violation) => return out_of_bounds(&violation.to_string()),
        };
        if target.abs.is_dir() {
            return ExecutionResult::failed(
                FailureReason::Io,
                format!("{} is a directory", target.display()),
            );
        }
        let before = match read_existing(&target.abs) {
            Ok(before) => before,
            Err(err) => return io_failure(&err, &target),
        };

        let after = match (body, &before) {
            (WriteBody::Content(content), _) => content.clone(),
            (WriteBody::Diff(_), None) => {
                return ExecutionResult::failed(
                    FailureReason::NotFound,
                    format!("cannot patch missing file {}", target.display()),
                );
            }
            (WriteBody::Diff(hunks), Some(current)) => match apply_hunks(current, hunks) {
                Ok(after) => after,
                Err(reason) => {
                    return ExecutionResult::failed(
                        FailureReason::InvalidDiff,
                        format!("{}: {reason}", target.display()),
                    );
                }
            },
        };

        let created = before.is_none();
        let diff = unified_diff(before.as_deref().unwrap_or(""), &after, &target.display());
        if before.as_deref() == Some(after.as_str()) {
            return ExecutionResult::success(Outcome::FileWritten {
                path: target.display(),
                diff: "(no changes)".to_string(),
                created: false,
            });
        }

        let preview = Preview {
            path: target.display(),
            kind: if created {
                ChangeKind::Create
            } else {
                ChangeKind::Modify
            },
            diff: diff.clone(),
        };
        if let Some(refused) = self.gate(&preview, cancel) {
            return refused;
        }

        let _lock = match WorkspaceLock::acquire(&self.config.lock_path, self.config.lock_timeout) {
            Ok(lock) => lock,
            Err(err) => return ExecutionResult::failed(FailureReason::Fault, format!("{err:#}")),
        };
        match read_existing(&target.abs) {
            Ok(now) if now == before => {}
            Ok(_) => return conflict(&target),
            Err(err) => return io_failure(&err, &target),
        }
        if let Err(err) = write_atomic(&target.abs, &after) {
            warn!(path = %target.display(), err = %format!("{err:#}"), "write failed");
            return ExecutionResult::failed(FailureReason::Io, format!("{err:#}"));
        }
        info!(path = %target.display(), created, "file written");
        ExecutionResult::success(Outcome::FileWritten {
            path: target.display(),
            diff,
            created,
        })
    }

    fn delete_file(
        &self,
        raw: &str,
        boundary: &WorkspaceBoundary,
        cancel: &CancelToken,
    ) -> ExecutionResult {
        let target = match boundary.resolve(raw) {
            Ok(target) => target,
            Err(violation) => return out_of_bounds(&violation.to_string()),
        };
        if target.abs.is_dir() {
            return ExecutionResult::failed(
                FailureReason::Io,
                format!("{} is a directory; only files can be deleted", target.display()),
            );
        }
        let before = match fs::read(&target.abs) {
            Ok(bytes) => bytes,
            Err(err) => return io_failure(&err, &target),
        };

        let preview = Preview {
            path: target.display(),
            kind: ChangeKind::Delete,
            diff: unified_diff(&String::from_utf8_lossy(&before), "", &target.display()),
        };
        if let Some(refused) = self.gate(&preview, cancel) {
            return refused;
        }

        let _lock = match WorkspaceLock::acquire(&self.config.lock_path, self.config.lock_timeout) {
            Ok(lock) => lock,
            Err(err) => return ExecutionResult::failed(FailureReason::Fault, format!("{err:#}")),
        };
        match fs::read(&target.abs) {
            Ok(now) if now == before => {}
            Ok(_) => return conflict(&target),
            Err(err) => return io_failure(&err, &target),
        }
        if let Err(err) = fs::remove_file(&target.abs) {
            return io_failure(&err, &target);
        }
        info!(path = %target.display(), "file deleted");
        ExecutionResult::success(Outcome::FileDeleted {
            path: target.display(),
        })
    }

    /// Present the preview; `Some` carries the refusal to record.
    fn gate(&self, preview: &Preview, cancel: &CancelToken) -> Option<ExecutionResult> {
        let decision = self
            .approver
            .present_diff(preview, self.config.approval_timeout);
        if decision == Decision::Rejected {
            info!(path = %preview.path, "change not approved");
            return Some(ExecutionResult::rejected(
                RejectReason::NotApproved,
                format!("{} of {} was not approved", preview.kind.as_str(), preview.path),
            ));
        }
        if cancel.is_cancelled() {
            return Some(ExecutionResult::failed(
                FailureReason::Cancelled,
                format!("cancelled before applying {}", preview.path),
            ));
        }
        None
    }

    fn run_shell(
        &self,
        command: &str,
        timeout_secs: u64,
        boundary: &WorkspaceBoundary,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult> {
        match screen_command(command, boundary.root(), boundary.denied()) {
            ShellVerdict::Allow => {}
            ShellVerdict::Blocked(reason) => {
                warn!(%reason, "shell command blocked");
                return Ok(ExecutionResult::rejected(RejectReason::Blocked, reason));
            }
            ShellVerdict::OutOfBounds(reason) => {
                return Ok(ExecutionResult::rejected(RejectReason::OutOfBounds, reason));
            }
        }

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c").arg(command).current_dir(boundary.root());
        let output = run_command_with_timeout(
            cmd,
            None,
            Duration::from_secs(timeout_secs),
            self.config.output_limit_bytes,
            cancel,
        )
        .with_context(|| format!("run shell command `{command}`"))?;

        if output.cancelled {
            return Ok(ExecutionResult::failed(
                FailureReason::Cancelled,
                "command killed on cancellation",
            ));
        }
        if output.timed_out {
            let mut detail = format!("command exceeded {timeout_secs}s and was killed");
            let partial = output.stdout_text();
            if !partial.is_empty() {
                detail.push_str("\n=== partial stdout ===\n");
                detail.push_str(&partial);
            }
            return Ok(ExecutionResult::failed(FailureReason::Timeout, detail));
        }
        Ok(ExecutionResult::success(Outcome::Shell {
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            exit_code: output.status.code(),
        }))
    }
}

fn out_of_bounds(detail: &str) -> ExecutionResult {
    ExecutionResult::rejected(RejectReason::OutOfBounds, detail)
}

fn conflict(target: &ResolvedPath) -> ExecutionResult {
    ExecutionResult::failed(
        FailureReason::Conflict,
        format!("{} changed while awaiting approval", target.display()),
    )
}

fn io_failure(err: &io::Error, target: &ResolvedPath) -> ExecutionResult {
    let reason = match err.kind() {
        ErrorKind::NotFound => FailureReason::NotFound,
        ErrorKind::PermissionDenied => FailureReason::PermissionDenied,
        _ => FailureReason::Io,
    };
    ExecutionResult::failed(reason, format!("{}: {err}", target.display()))
}

fn read_existing(path: &Path) -> io::Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn unified_diff(before: &str, after: &str, path: &str) -> String {
    similar::TextDiff::from_lines(before, after)
        .unified_diff()
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

/// Write via a sibling temp file and rename so readers never see a partial file.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let tmp_path = parent.join(format!(".{}.eve-tmp", name.to_string_lossy()));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
