//! Pre-flight screening of shell commands.
//!
//! Screening is lexical and deliberately narrow: it blocks a small set of
//! catastrophic deletions and keeps path-looking arguments inside the
//! workspace. It is not a sandbox.

use std::path::{Component, Path, PathBuf};

use crate::core::path::{is_denied, normalize_relative};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellVerdict {
    Allow,
    Blocked(String),
    OutOfBounds(String),
}

/// Characters that end a word in `sh` even without surrounding whitespace.
const OPERATOR_CHARS: &[char] = &[';', '|', '&', '(', ')', '`', '<', '>'];
const REDIRECT_CHARS: &[char] = &['<', '>'];
const DEVICE_PREFIX: &str = "/dev/";

/// Screen `command` before it is handed to `sh -c`.
pub fn screen_command(command: &str, root: &Path, denied: &[PathBuf]) -> ShellVerdict {
    let lowered = command.trim().to_lowercase();
    if lowered.is_empty() {
        return ShellVerdict::Allow;
    }
    if lowered.contains("--no-preserve-root") {
        return ShellVerdict::Blocked("rm with --no-preserve-root".to_string());
    }
    let padded = format!(" {lowered} ");
    if [" rd ", " rmdir ", " del "].iter().any(|cmd| padded.contains(cmd))
        && lowered.contains("/s")
        && (lowered.contains(" c:\\") || lowered.contains(" c:/"))
    {
        return ShellVerdict::Blocked("windows root deletion".to_string());
    }

    let tokens = match shell_words::split(command) {
        Ok(words) => split_operators(words),
        Err(err) => return ShellVerdict::Blocked(format!("could not tokenize command: {err}")),
    };

    for segment in tokens.split(|token| is_separator(token)) {
        let segment = match segment.first().map(String::as_str) {
            Some("sudo") => &segment[1..],
            _ => segment,
        };
        if let Some(reason) = catastrophic_reason(segment) {
            return ShellVerdict::Blocked(reason);
        }
        for token in segment.iter().skip(1) {
            if let Some(reason) = out_of_bounds(token, root, denied) {
                return ShellVerdict::OutOfBounds(reason);
            }
        }
    }
    ShellVerdict::Allow
}

/// Break words like `x;rm` or `pwned>/etc/x` at shell operators. Each run of
/// operator characters becomes its own token.
fn split_operators(words: Vec<String>) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in words {
        let mut current = String::new();
        let mut operator = String::new();
        for ch in word.chars() {
            if OPERATOR_CHARS.contains(&ch) {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                operator.push(ch);
            } else {
                if !operator.is_empty() {
                    tokens.push(std::mem::take(&mut operator));
                }
                current.push(ch);
            }
        }
        tokens.extend([current, operator].into_iter().filter(|t| !t.is_empty()));
    }
    tokens
}

/// Operator runs other than redirections start a new command.
fn is_separator(token: &str) -> bool {
    token.chars().all(|ch| OPERATOR_CHARS.contains(&ch))
        && !token.chars().any(|ch| REDIRECT_CHARS.contains(&ch))
}

fn catastrophic_reason(tokens: &[String]) -> Option<String> {
    match tokens.first().map(String::as_str) {
        Some("rm") => {
            let (flags, args): (Vec<&String>, Vec<&String>) = tokens[1..]
                .iter()
                .partition(|t| t.starts_with('-') && t.as_str() != "--");
            let recursive = flags.iter().any(|flag| {
                flag.as_str() == "--recursive"
                    || (!flag.starts_with("--") && (flag.contains('r') || flag.contains('R')))
            });
            if !recursive {
                return None;
            }
            args.iter().find_map(|arg| dangerous_rm_target(arg))
        }
        Some("find") => {
            let from_root = tokens.get(1).is_some_and(|start| start == "/");
            let deletes = tokens.iter().any(|t| t == "-delete")
                || tokens
                    .windows(2)
                    .any(|pair| pair[0] == "-exec" && pair[1] == "rm");
            (from_root && deletes).then(|| "find / with deletion".to_string())
        }
        _ => None,
    }
}

/// `rm -r` targets that resolve to `/`, the working directory or its parents.
fn dangerous_rm_target(arg: &str) -> Option<String> {
    if matches!(arg, "*" | ".*") || arg.ends_with("/.*") {
        return Some(format!("rm -r with dangerous glob `{arg}`"));
    }
    let (base, glob) = match arg.strip_suffix("/*") {
        Some("") => ("/", true),
        Some(base) => (base, true),
        None => (arg, false),
    };
    let path = Path::new(base);
    if path.is_absolute() {
        return (lexical_absolute(path) == Path::new("/")).then(|| {
            if glob {
                format!("rm -r with dangerous glob `{arg}`")
            } else {
                "rm -r targeting root /".to_string()
            }
        });
    }
    match normalize_relative(path) {
        Ok(rel) if rel.as_os_str().is_empty() => {
            Some(format!("rm -r `{arg}` targets the current directory"))
        }
        Ok(_) => None,
        Err(_) if path
            .components()
            .all(|c| matches!(c, Component::ParentDir | Component::CurDir)) =>
        {
            Some(format!("rm -r `{arg}` targets a parent directory"))
        }
        // Other escaping paths are reported as out of bounds.
        Err(_) => None,
    }
}

fn out_of_bounds(token: &str, root: &Path, denied: &[PathBuf]) -> Option<String> {
    let candidate = match token.split_once('=') {
        Some((flag, value)) if flag.starts_with('-') => value,
        _ => token,
    };
    if candidate.is_empty() || candidate.starts_with('-') {
        return None;
    }
    if candidate.starts_with('~') {
        return Some(format!("`{candidate}` refers to a home directory"));
    }

    let path = Path::new(candidate);
    let rel = if path.is_absolute() {
        if candidate.starts_with(DEVICE_PREFIX) {
            return None;
        }
        match lexical_absolute(path).strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => return Some(format!("`{candidate}` is outside the workspace")),
        }
    } else {
        match normalize_relative(path) {
            Ok(rel) => rel,
            Err(err) => return Some(format!("`{candidate}` {}", err.describe())),
        }
    };

    is_denied(&rel, denied).then(|| format!("`{candidate}` is a protected path"))
}

fn lexical_absolute(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
