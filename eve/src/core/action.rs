//! Typed actions and validation of raw model output.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::hunks::{Hunk, check_hunk_order};
use crate::core::path::{display_rel, normalize_relative};

/// One decided unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Chat { content: String },
    ReadFile { path: String },
    WriteFile { path: String, body: WriteBody },
    DeleteFile { path: String },
    RunShell { command: String, timeout_secs: u64 },
    Terminate { summary: Option<String> },
}

/// New file contents for `WriteFile`: either a full replacement or line hunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteBody {
    Content(String),
    Diff(Vec<Hunk>),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Chat { .. } => "chat",
            Action::ReadFile { .. } => "read_file",
            Action::WriteFile { .. } => "write_file",
            Action::DeleteFile { .. } => "delete_file",
            Action::RunShell { .. } => "run_shell",
            Action::Terminate { .. } => "terminate",
        }
    }

    /// One-line description used in logs and pruning summaries.
    pub fn describe(&self) -> String {
        match self {
            Action::Chat { content } => format!("chat: {}", first_line(content)),
            Action::ReadFile { path } => format!("read {path}"),
            Action::WriteFile {
                path,
                body: WriteBody::Content(_),
            } => format!("write {path}"),
            Action::WriteFile {
                path,
                body: WriteBody::Diff(hunks),
            } => format!("patch {path} ({} hunks)", hunks.len()),
            Action::DeleteFile { path } => format!("delete {path}"),
            Action::RunShell { command, .. } => format!("shell `{}`", first_line(command)),
            Action::Terminate { .. } => "terminate".to_string(),
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

/// A recoverable shape mismatch in model output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid `{field}`: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Shell timeout policy applied while parsing `run_shell`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionLimits {
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
}

impl Default for ActionLimits {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
            max_timeout_secs: 600,
        }
    }
}

const KINDS: &str = "chat, read_file, write_file, delete_file, run_shell, terminate";

static JSON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").expect("fence regex should be valid")
});

/// Parse raw model output into a validated [`Action`].
///
/// A JSON object (optionally inside a ```json fence) is read as a tagged
/// action. Any other non-empty text is treated as a chat reply.
pub fn parse(raw: &str, limits: &ActionLimits) -> Result<Action, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("content", "model output is empty"));
    }

    let body = match JSON_FENCE_RE.captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(inner) if inner.as_str().starts_with('{') => inner.as_str(),
        _ => trimmed,
    };
    if !body.starts_with('{') {
        return Ok(Action::Chat {
            content: trimmed.to_string(),
        });
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|err| ValidationError::new("output", format!("not valid JSON: {err}")))?;
    let Value::Object(obj) = value else {
        return Err(ValidationError::new("output", "expected a JSON object"));
    };
    parse_object(&obj, limits)
}

fn parse_object(
    obj: &Map<String, Value>,
    limits: &ActionLimits,
) -> Result<Action, ValidationError> {
    let kind = required_str(obj, "kind")?;
    match kind.as_str() {
        "chat" => {
            let content = required_str(obj, "content")?;
            if content.trim().is_empty() {
                return Err(ValidationError::new("content", "must not be blank"));
            }
            Ok(Action::Chat { content })
        }
        "read_file" => Ok(Action::ReadFile {
            path: required_path(obj)?,
        }),
        "write_file" => {
            let path = required_path(obj)?;
            let body = write_body(obj)?;
            Ok(Action::WriteFile { path, body })
        }
        "delete_file" => Ok(Action::DeleteFile {
            path: required_path(obj)?,
        }),
        "run_shell" => {
            let command = required_str(obj, "command")?;
            if command.trim().is_empty() {
                return Err(ValidationError::new("command", "must not be blank"));
            }
            let timeout_secs = timeout_secs(obj, limits)?;
            Ok(Action::RunShell {
                command,
                timeout_secs,
            })
        }
        "terminate" => {
            let summary = match obj.get("summary") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) if s.trim().is_empty() => None,
                Some(Value::String(s)) => Some(s.trim().to_string()),
                Some(_) => return Err(ValidationError::new("summary", "must be a string")),
            };
            Ok(Action::Terminate { summary })
        }
        other => Err(ValidationError::new(
            "kind",
            format!("unknown action kind `{other}` (expected one of: {KINDS})"),
        )),
    }
}

fn required_str(obj: &Map<String, Value>, field: &str) -> Result<String, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ValidationError::new(field, "missing required field")),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::new(field, "must be a string")),
    }
}

fn required_path(obj: &Map<String, Value>) -> Result<String, ValidationError> {
    let raw = required_str(obj, "path")?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("path", "must not be blank"));
    }
    // Absolute and escaping paths pass through untouched; the gateway's
    // boundary check rejects them as out of bounds.
    match normalize_relative(Path::new(trimmed)) {
        Ok(normalized) if normalized.as_os_str().is_empty() => Err(ValidationError::new(
            "path",
            "names the workspace root, not a file",
        )),
        Ok(normalized) => Ok(display_rel(&normalized)),
        Err(_) => Ok(trimmed.to_string()),
    }
}

fn write_body(obj: &Map<String, Value>) -> Result<WriteBody, ValidationError> {
    let content = obj.get("content").filter(|v| !v.is_null());
    let diff = obj.get("diff").filter(|v| !v.is_null());
    match (content, diff) {
        (Some(_), Some(_)) => Err(ValidationError::new(
            "content",
            "provide either `content` or `diff`, not both",
        )),
        (None, None) => Err(ValidationError::new(
            "content",
            "write_file requires `content` or `diff`",
        )),
        (Some(Value::String(s)), None) => Ok(WriteBody::Content(s.clone())),
        (Some(_), None) => Err(ValidationError::new("content", "must be a string")),
        (None, Some(value)) => {
            let hunks: Vec<Hunk> = serde_json::from_value(value.clone()).map_err(|err| {
                ValidationError::new(
                    "diff",
                    format!("expected [{{start_line, remove, insert}}]: {err}"),
                )
            })?;
            check_hunk_order(&hunks)
                .map_err(|(idx, reason)| ValidationError::new(format!("diff[{idx}]"), reason))?;
            Ok(WriteBody::Diff(hunks))
        }
    }
}

fn timeout_secs(obj: &Map<String, Value>, limits: &ActionLimits) -> Result<u64, ValidationError> {
    let requested = match obj.get("timeout_secs") {
        None | Some(Value::Null) => {
            return Ok(limits.default_timeout_secs.min(limits.max_timeout_secs));
        }
        Some(value) => value
            .as_u64()
            .ok_or_else(|| ValidationError::new("timeout_secs", "must be a positive integer"))?,
    };
    if requested == 0 {
        return Err(ValidationError::new("timeout_secs", "must be > 0"));
    }
    Ok(requested.min(limits.max_timeout_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ActionLimits {
        ActionLimits {
            default_timeout_secs: 30,
            max_timeout_secs: 120,
        }
    }

    #[test]
    fn plain_text_is_chat() {
        let action = parse("  Sure, what should I look at?  ", &limits()).expect("parse");
        assert_eq!(
            action,
            Action::Chat {
                content: "Sure, what should I look at?".to_string()
            }
        );
    }

    #[test]
    fn empty_output_is_validation_error() {
        let err = parse("   \n", &limits()).unwrap_err();
        assert_eq!(err.field, "content");
    }

    #[test]
    fn write_file_with_content() {
        let action = parse(
            r#"{"kind":"write_file","path":"./a.txt","content":"hi"}"#,
            &limits(),
        )
        .expect("parse");
        assert_eq!(
            action,
            Action::WriteFile {
                path: "a.txt".to_string(),
                body: WriteBody::Content("hi".to_string()),
            }
        );
    }

    #[test]
    fn write_file_missing_path_names_field() {
        let err = parse(r#"{"kind":"write_file","content":"hi"}"#, &limits()).unwrap_err();
        assert_eq!(err.field, "path");
        assert_eq!(err.reason, "missing required field");
    }

    #[test]
    fn write_file_needs_exactly_one_body() {
        let err = parse(
            r#"{"kind":"write_file","path":"a","content":"x","diff":[]}"#,
            &limits(),
        )
        .unwrap_err();
        assert!(err.reason.contains("not both"));

        let err = parse(r#"{"kind":"write_file","path":"a"}"#, &limits()).unwrap_err();
        assert!(err.reason.contains("requires"));
    }

    #[test]
    fn write_file_diff_checks_hunk_order() {
        let raw = r#"{"kind":"write_file","path":"a.rs","diff":[
            {"start_line":5,"remove":1,"insert":["x"]},
            {"start_line":2,"remove":1,"insert":["y"]}
        ]}"#;
        let err = parse(raw, &limits()).unwrap_err();
        assert_eq!(err.field, "diff[1]");
    }

    #[test]
    fn oversized_hunk_range_is_a_validation_error() {
        let raw = r#"{"kind":"write_file","path":"a","diff":[
            {"start_line":2,"remove":18446744073709551615,"insert":[]}
        ]}"#;
        let err = parse(raw, &limits()).unwrap_err();
        assert_eq!(err.field, "diff[0]");
        assert!(err.reason.contains("overflows"));
    }

    #[test]
    fn escaping_path_is_left_for_the_boundary() {
        let action =
            parse(r#"{"kind":"read_file","path":" ../secret "}"#, &limits()).expect("parse");
        assert_eq!(
            action,
            Action::ReadFile {
                path: "../secret".to_string()
            }
        );
    }

    #[test]
    fn workspace_root_is_not_a_file() {
        let err = parse(r#"{"kind":"delete_file","path":"./"}"#, &limits()).unwrap_err();
        assert_eq!(err.field, "path");
    }

    #[test]
    fn shell_timeout_defaults_and_clamps() {
        let action = parse(r#"{"kind":"run_shell","command":"ls"}"#, &limits()).expect("parse");
        assert_eq!(
            action,
            Action::RunShell {
                command: "ls".to_string(),
                timeout_secs: 30
            }
        );

        let action = parse(
            r#"{"kind":"run_shell","command":"ls","timeout_secs":9000}"#,
            &limits(),
        )
        .expect("parse");
        assert!(matches!(action, Action::RunShell { timeout_secs: 120, .. }));

        let err = parse(
            r#"{"kind":"run_shell","command":"ls","timeout_secs":0}"#,
            &limits(),
        )
        .unwrap_err();
        assert_eq!(err.field, "timeout_secs");
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let raw = "```json\n{\"kind\":\"terminate\",\"summary\":\"all done\"}\n```";
        let action = parse(raw, &limits()).expect("parse");
        assert_eq!(
            action,
            Action::Terminate {
                summary: Some("all done".to_string())
            }
        );
    }

    #[test]
    fn unknown_kind_lists_expected_kinds() {
        let err = parse(r#"{"kind":"launch_missiles"}"#, &limits()).unwrap_err();
        assert_eq!(err.field, "kind");
        assert!(err.reason.contains("run_shell"));
    }

    #[test]
    fn broken_json_is_recoverable() {
        let err = parse(r#"{"kind":"chat","content":"#, &limits()).unwrap_err();
        assert_eq!(err.field, "output");
    }
}
