//! Workspace boundary: the canonical root plus denied relative paths.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use crate::core::path::{display_rel, is_denied, normalize_relative};

/// Default entries that no action may touch.
pub const DEFAULT_DENIED: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".venv",
    "venv",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".eve",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {reason}")]
pub struct BoundaryViolation {
    pub path: String,
    pub reason: String,
}

impl BoundaryViolation {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// A path that passed boundary checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Normalized path relative to the root.
    pub rel: PathBuf,
    /// `root.join(rel)`.
    pub abs: PathBuf,
}

impl ResolvedPath {
    pub fn display(&self) -> String {
        display_rel(&self.rel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceBoundary {
    root: PathBuf,
    denied: Vec<PathBuf>,
}

impl WorkspaceBoundary {
    /// Canonicalize `root` and fix the denied list for the session.
    pub fn new(root: &Path, denied: Vec<PathBuf>) -> Result<Self> {
        let root = fs::canonicalize(root)
            .with_context(|| format!("canonicalize workspace root {}", root.display()))?;
        Ok(Self { root, denied })
    }

    pub fn with_default_denied(root: &Path) -> Result<Self> {
        Self::new(root, default_denied())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn denied(&self) -> &[PathBuf] {
        &self.denied
    }

    /// Resolve `raw` to a path inside the root.
    ///
    /// Rejects traversal, absolute paths outside the root, denied entries, and
    /// paths whose deepest existing ancestor is a symlink leading outside.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedPath, BoundaryViolation> {
        let candidate = Path::new(raw.trim());
        let rel = if candidate.is_absolute() {
            let stripped = candidate
                .strip_prefix(&self.root)
                .map_err(|_| BoundaryViolation::new(raw, "outside the workspace root"))?;
            normalize_relative(stripped)
        } else {
            normalize_relative(candidate)
        }
        .map_err(|err| BoundaryViolation::new(raw, err.describe()))?;

        if rel.as_os_str().is_empty() {
            return Err(BoundaryViolation::new(raw, "names the workspace root itself"));
        }
        if is_denied(&rel, &self.denied) {
            return Err(BoundaryViolation::new(raw, "protected path"));
        }

        let abs = self.root.join(&rel);
        self.check_real_location(raw, &abs)?;
        Ok(ResolvedPath { rel, abs })
    }

    fn check_real_location(&self, raw: &str, abs: &Path) -> Result<(), BoundaryViolation> {
        let mut ancestor = Some(abs);
        while let Some(current) = ancestor {
            if fs::symlink_metadata(current).is_ok() {
                let real = fs::canonicalize(current)
                    .map_err(|_| BoundaryViolation::new(raw, "symlink cannot be resolved"))?;
                if !real.starts_with(&self.root) {
                    return Err(BoundaryViolation::new(raw, "symlink leads outside the workspace"));
                }
                if let Ok(real_rel) = real.strip_prefix(&self.root)
                    && is_denied(real_rel, &self.denied)
                {
                    return Err(BoundaryViolation::new(raw, "symlink leads to a protected path"));
                }
                return Ok(());
            }
            ancestor = current.parent();
        }
        Ok(())
    }
}

pub fn default_denied() -> Vec<PathBuf> {
    DEFAULT_DENIED.iter().map(PathBuf::from).collect()
}
