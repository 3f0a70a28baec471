//! Initialization helpers for `.eve/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{EveConfig, write_config};

/// All canonical paths within `.eve/` for a workspace root.
#[derive(Debug, Clone)]
pub struct EvePaths {
    pub root: PathBuf,
    pub eve_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub session_path: PathBuf,
    pub lock_path: PathBuf,
    /// Line-editor history for `eve run`.
    pub history_path: PathBuf,
}

impl EvePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let eve_dir = root.join(".eve");
        Self {
            root: root.clone(),
            eve_dir: eve_dir.clone(),
            gitignore_path: eve_dir.join(".gitignore"),
            config_path: eve_dir.join("config.toml"),
            session_path: eve_dir.join("session.json"),
            lock_path: eve_dir.join("workspace.lock"),
            history_path: eve_dir.join("history"),
        }
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing eve-owned files.
    pub force: bool,
}

/// Create `.eve/` scaffolding in `root`.
///
/// Fails if `.eve/` already exists unless `options.force` is set. A saved
/// session is never removed, even with `force`.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<EvePaths> {
    let paths = EvePaths::new(root);
    if paths.eve_dir.exists() && !paths.eve_dir.is_dir() {
        return Err(anyhow!("eve init: .eve exists but is not a directory"));
    }
    if paths.eve_dir.exists() && !options.force {
        return Err(anyhow!(
            "eve init: .eve already exists (use --force to overwrite)"
        ));
    }

    fs::create_dir_all(&paths.eve_dir)
        .with_context(|| format!("create directory {}", paths.eve_dir.display()))?;
    fs::write(&paths.gitignore_path, EVE_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &EveConfig::default())?;

    Ok(paths)
}

const EVE_GITIGNORE: &str = "session.json\nworkspace.lock\nhistory\neve.log\n*.tmp\n";
