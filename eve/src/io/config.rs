//! Session configuration stored under `.eve/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::action::ActionLimits;
use crate::core::pruning::PruneBounds;
use crate::io::boundary::DEFAULT_DENIED;
use crate::io::gateway::GatewayConfig;

/// Eve configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EveConfig {
    pub session: SessionConfig,
    pub context: ContextConfig,
    pub shell: ShellConfig,
    pub files: FilesConfig,
    pub approval: ApprovalConfig,
    pub workspace: WorkspaceConfig,
    pub decider: DeciderConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeciderTimeoutPolicy {
    /// A decider timeout ends the session with an error.
    Surface,
    /// Retry the decision up to `decider_retry_attempts` times.
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Consecutive invalid decisions tolerated before the session halts.
    pub max_validation_retries: u32,
    /// Stop after this many dispatched actions per user turn.
    pub max_turns: Option<usize>,
    pub decider_timeout_policy: DeciderTimeoutPolicy,
    pub decider_retry_attempts: u32,
    /// Memory entries recalled into each prompt (0 disables recall).
    pub memory_recall: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_validation_retries: 3,
            max_turns: Some(50),
            decider_timeout_policy: DeciderTimeoutPolicy::Surface,
            decider_retry_attempts: 2,
            memory_recall: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    pub max_nodes: usize,
    pub max_chars: usize,
    pub keep_recent: usize,
    pub summary_max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        let bounds = PruneBounds::default();
        Self {
            max_nodes: bounds.max_nodes,
            max_chars: bounds.max_chars,
            keep_recent: bounds.keep_recent,
            summary_max_chars: bounds.summary_max_chars,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    pub program: String,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    /// Truncate stdout/stderr beyond this many bytes each.
    pub output_limit_bytes: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "sh".to_string(),
            default_timeout_secs: 240,
            max_timeout_secs: 30 * 60,
            output_limit_bytes: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilesConfig {
    pub max_read_bytes: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_read_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Unanswered previews are rejected after this many seconds. Unset waits forever.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Relative paths no action may read, write or name in a shell command.
    pub denied: Vec<String>,
    pub lock_timeout_ms: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            denied: DEFAULT_DENIED.iter().map(|s| (*s).to_string()).collect(),
            lock_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeciderConfig {
    /// Program (and arguments) that reads a prompt on stdin and prints one decision.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for DeciderConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            timeout_secs: 300,
        }
    }
}

impl EveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.context.max_nodes < 3 {
            return Err(anyhow!("context.max_nodes must be >= 3"));
        }
        if self.context.keep_recent == 0 || self.context.keep_recent >= self.context.max_nodes {
            return Err(anyhow!(
                "context.keep_recent must be > 0 and < context.max_nodes"
            ));
        }
        if self.context.max_chars == 0 || self.context.summary_max_chars == 0 {
            return Err(anyhow!(
                "context.max_chars and context.summary_max_chars must be > 0"
            ));
        }
        if self.shell.program.trim().is_empty() {
            return Err(anyhow!("shell.program must be non-empty"));
        }
        if self.shell.default_timeout_secs == 0 {
            return Err(anyhow!("shell.default_timeout_secs must be > 0"));
        }
        if self.shell.max_timeout_secs < self.shell.default_timeout_secs {
            return Err(anyhow!(
                "shell.max_timeout_secs must be >= shell.default_timeout_secs"
            ));
        }
        if self.shell.output_limit_bytes == 0 {
            return Err(anyhow!("shell.output_limit_bytes must be > 0"));
        }
        if self.files.max_read_bytes == 0 {
            return Err(anyhow!("files.max_read_bytes must be > 0"));
        }
        if self.approval.timeout_secs == Some(0) {
            return Err(anyhow!("approval.timeout_secs must be > 0 when set"));
        }
        if self.session.max_turns == Some(0) {
            return Err(anyhow!("session.max_turns must be > 0 when set"));
        }
        if self.workspace.denied.iter().any(|entry| entry.trim().is_empty()) {
            return Err(anyhow!("workspace.denied entries must be non-empty"));
        }
        if self.decider.command.is_empty() || self.decider.command[0].trim().is_empty() {
            return Err(anyhow!("decider.command must be a non-empty array"));
        }
        if self.decider.timeout_secs == 0 {
            return Err(anyhow!("decider.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn prune_bounds(&self) -> PruneBounds {
        PruneBounds {
            max_nodes: self.context.max_nodes,
            max_chars: self.context.max_chars,
            keep_recent: self.context.keep_recent,
            summary_max_chars: self.context.summary_max_chars,
        }
    }

    pub fn action_limits(&self) -> ActionLimits {
        ActionLimits {
            default_timeout_secs: self.shell.default_timeout_secs,
            max_timeout_secs: self.shell.max_timeout_secs,
        }
    }

    pub fn denied_paths(&self) -> Vec<PathBuf> {
        self.workspace.denied.iter().map(PathBuf::from).collect()
    }

    pub fn gateway_config(&self, lock_path: PathBuf) -> GatewayConfig {
        GatewayConfig {
            shell: self.shell.program.clone(),
            output_limit_bytes: self.shell.output_limit_bytes,
            max_read_bytes: self.files.max_read_bytes,
            approval_timeout: self.approval.timeout_secs.map(Duration::from_secs),
            lock_path,
            lock_timeout: Duration::from_millis(self.workspace.lock_timeout_ms),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EveConfig::default()`.
pub fn load_config(path: &Path) -> Result<EveConfig> {
    if !path.exists() {
        let cfg = EveConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EveConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EveConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EveConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = EveConfig::default();
        cfg.approval.timeout_secs = Some(30);
        cfg.session.decider_timeout_policy = DeciderTimeoutPolicy::Retry;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[shell]\ndefault_timeout_secs = 10\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.shell.default_timeout_secs, 10);
        assert_eq!(cfg.shell.program, "sh");
        assert_eq!(cfg.action_limits().default_timeout_secs, 10);
    }

    #[test]
    fn invalid_keep_recent_is_rejected() {
        let mut cfg = EveConfig::default();
        cfg.context.keep_recent = cfg.context.max_nodes;
        assert!(cfg.validate().is_err());
    }
}
