//! Lexical helpers for workspace-relative paths.
//!
//! Nothing here touches the filesystem; symlink resolution lives in
//! `io::boundary`.

use std::path::{Component, Path, PathBuf};

/// Why a path cannot be treated as workspace-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    Absolute,
    EscapesRoot,
}

impl PathError {
    pub fn describe(self) -> &'static str {
        match self {
            PathError::Absolute => "must be relative to the workspace root",
            PathError::EscapesRoot => "escapes the workspace root",
        }
    }
}

/// Normalize `path` without touching the filesystem.
///
/// `.` components are dropped and `..` pops the previous component. Climbing
/// above the starting directory is an error. `"."` normalizes to an empty path.
pub fn normalize_relative(path: &Path) -> Result<PathBuf, PathError> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return Err(PathError::Absolute),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(PathError::EscapesRoot);
                }
            }
            Component::Normal(name) => parts.push(name),
        }
    }
    Ok(parts.iter().collect())
}

/// True if `rel` falls under any denied entry.
///
/// Single-component entries (e.g. `.git`) match at any depth, so nested
/// repositories and virtualenvs are covered. Multi-component entries match as
/// a prefix of `rel`.
pub fn is_denied(rel: &Path, denied: &[PathBuf]) -> bool {
    denied.iter().any(|entry| {
        let mut entry_parts = entry
            .components()
            .filter(|c| !matches!(c, Component::CurDir));
        match (entry_parts.next(), entry_parts.next()) {
            (Some(Component::Normal(name)), None) => rel
                .components()
                .any(|c| matches!(c, Component::Normal(part) if part == name)),
            (Some(_), Some(_)) => rel.starts_with(entry),
            _ => false,
        }
    })
}

/// Render a relative path with `/` separators for logs and transcripts.
pub fn display_rel(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_cur_dir_and_resolves_parent() {
        let normalized = normalize_relative(Path::new("./src/../lib/./a.rs")).expect("normalize");
        assert_eq!(normalized, PathBuf::from("lib/a.rs"));
    }

    #[test]
    fn normalize_rejects_escape() {
        assert_eq!(
            normalize_relative(Path::new("src/../../etc/passwd")),
            Err(PathError::EscapesRoot)
        );
    }

    #[test]
    fn normalize_rejects_absolute() {
        assert_eq!(
            normalize_relative(Path::new("/etc/passwd")),
            Err(PathError::Absolute)
        );
    }

    #[test]
    fn normalize_dot_is_empty() {
        let normalized = normalize_relative(Path::new(".")).expect("normalize");
        assert!(normalized.as_os_str().is_empty());
    }

    #[test]
    fn denied_single_component_matches_at_any_depth() {
        let denied = vec![PathBuf::from(".git")];
        assert!(is_denied(Path::new(".git/config"), &denied));
        assert!(is_denied(Path::new("vendor/lib/.git/HEAD"), &denied));
        assert!(!is_denied(Path::new(".gitignore"), &denied));
    }

    #[test]
    fn denied_multi_component_matches_prefix_only() {
        let denied = vec![PathBuf::from("build/cache")];
        assert!(is_denied(Path::new("build/cache/x.bin"), &denied));
        assert!(!is_denied(Path::new("src/build/cache/x.bin"), &denied));
    }

    #[test]
    fn display_rel_uses_forward_slashes() {
        assert_eq!(display_rel(Path::new("src/lib.rs")), "src/lib.rs");
    }
}
