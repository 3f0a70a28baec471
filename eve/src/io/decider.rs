//! Decider abstraction: the model client that turns a prompt into raw text.
//!
//! The loop only sees [`Decider`]. [`CommandDecider`] pipes the rendered prompt
//! into a configured program; tests use scripted deciders instead.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::{Prompt, PromptRenderer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("decider unavailable: {0}")]
    Network(String),
    #[error("decider timed out after {0:?}")]
    TimedOut(Duration),
}

pub trait Decider {
    fn request_decision(&self, prompt: &Prompt) -> Result<String, ClientError>;
}

/// Runs `program` with the rendered prompt on stdin and returns its stdout.
pub struct CommandDecider {
    pub program: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    renderer: PromptRenderer,
    cancel: CancelToken,
}

impl CommandDecider {
    pub fn new(
        program: Vec<String>,
        workdir: PathBuf,
        timeout: Duration,
        cancel: CancelToken,
    ) -> Self {
        Self {
            program,
            workdir,
            timeout,
            output_limit_bytes: 200_000,
            renderer: PromptRenderer::new(),
            cancel,
        }
    }
}

impl Decider for CommandDecider {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn request_decision(&self, prompt: &Prompt) -> Result<String, ClientError> {
        let Some((bin, args)) = self.program.split_first() else {
            return Err(ClientError::Network("decider command is empty".to_string()));
        };
        let rendered = self
            .renderer
            .render(prompt, &self.workdir.display().to_string())
            .map_err(|err| ClientError::Network(format!("render prompt: {err:#}")))?;

        info!(program = %bin, prompt_bytes = rendered.len(), "requesting decision");
        let mut cmd = Command::new(bin);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(
            cmd,
            Some(rendered.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
            &self.cancel,
        )
        .map_err(|err| ClientError::Network(format!("{err:#}")))?;

        if output.timed_out {
            warn!("decider timed out");
            return Err(ClientError::TimedOut(self.timeout));
        }
        if output.cancelled {
            return Err(ClientError::Network("decider cancelled".to_string()));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "decider failed");
            return Err(ClientError::Network(format!(
                "decider exited with {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            )));
        }
        debug!(bytes = output.stdout.len(), "decision received");
        Ok(output.stdout_text())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn decider(program: &[&str], timeout: Duration) -> CommandDecider {
        let temp = std::env::temp_dir();
        CommandDecider::new(
            program.iter().map(|s| (*s).to_string()).collect(),
            temp,
            timeout,
            CancelToken::new(),
        )
    }

    #[test]
    fn returns_program_stdout() {
        let d = decider(
            &["sh", "-c", "cat >/dev/null; echo '{\"kind\":\"terminate\"}'"],
            Duration::from_secs(5),
        );
        let raw = d.request_decision(&Prompt::default()).expect("decision");
        assert_eq!(raw.trim(), r#"{"kind":"terminate"}"#);
    }

    #[test]
    fn prompt_is_fed_on_stdin() {
        let d = decider(&["sh", "-c", "grep -c '<conversation>'"], Duration::from_secs(5));
        let raw = d.request_decision(&Prompt::default()).expect("decision");
        assert_eq!(raw.trim(), "1");
    }

    #[test]
    fn failure_is_network_error() {
        let d = decider(&["sh", "-c", "echo boom >&2; exit 1"], Duration::from_secs(5));
        let err = d.request_decision(&Prompt::default()).unwrap_err();
        assert!(matches!(err, ClientError::Network(msg) if msg.contains("boom")));
    }

    #[test]
    fn slow_program_times_out() {
        let d = decider(&["sleep", "5"], Duration::from_millis(200));
        let err = d.request_decision(&Prompt::default()).unwrap_err();
        assert!(matches!(err, ClientError::TimedOut(_)));
    }
}
