//! Session load/save helpers with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::tree::{ContextTree, ConversationNode, NodeId};
use crate::io::config::write_atomic;

pub const SESSION_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/session.v1.schema.json"
));

pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted form of a context tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub head: NodeId,
    pub records: Vec<ConversationNode>,
}

impl SessionSnapshot {
    pub fn capture(tree: &ContextTree) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            head: tree.head(),
            records: tree.records(),
        }
    }

    pub fn restore(self) -> Result<ContextTree> {
        ContextTree::from_records(self.records, self.head).context("rebuild context tree")
    }
}

/// Load, schema-check and rebuild a saved session.
pub fn load_session(path: &Path) -> Result<ContextTree> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read session {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse session {}", path.display()))?;
    validate_schema(&value)?;
    let snapshot: SessionSnapshot = serde_json::from_value(value)
        .with_context(|| format!("deserialize session {}", path.display()))?;
    snapshot
        .restore()
        .with_context(|| format!("session {}", path.display()))
}

/// Load the session at `path` if one has been saved.
pub fn load_session_if_present(path: &Path) -> Result<Option<ContextTree>> {
    if !path.exists() {
        return Ok(None);
    }
    load_session(path).map(Some)
}

/// Atomically write the tree as a session snapshot.
pub fn write_session(path: &Path, tree: &ContextTree) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(&SessionSnapshot::capture(tree))
        .context("serialize session")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_schema(session: &Value) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(SESSION_SCHEMA).context("parse embedded session schema")?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(session) {
        let messages = compiled
            .iter_errors(session)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "session schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::action::Action;
    use crate::core::tree::NodeDraft;
    use crate::core::types::{ExecutionResult, Outcome, Role};

    fn sample_tree() -> ContextTree {
        let mut tree = ContextTree::new(NodeDraft::system("session start"));
        tree.append_to_head(NodeDraft::user("list files").with_label(Some("ops".to_string())));
        let action = Action::RunShell {
            command: "ls".to_string(),
            timeout_secs: 5,
        };
        let result = ExecutionResult::success(Outcome::Shell {
            stdout: "a\n".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        });
        tree.append_to_head(
            NodeDraft::new(Role::ToolResult, result.render())
                .with_action(action)
                .with_result(result),
        );
        tree
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".eve/session.json");
        let tree = sample_tree();

        write_session(&path, &tree).expect("write");
        let loaded = load_session(&path).expect("load");
        assert_eq!(loaded.path_to_head(), tree.path_to_head());
        assert_eq!(loaded.head(), tree.head());
    }

    #[test]
    fn schema_rejects_unknown_role() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.json");
        write_session(&path, &sample_tree()).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        fs::write(&path, contents.replace("\"tool_result\"", "\"wizard\"")).expect("corrupt");

        let err = load_session(&path).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn huge_node_id_is_corrupt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session.json");
        let mut snapshot = SessionSnapshot::capture(&sample_tree());
        let stray = snapshot.records.last().cloned().expect("record");
        snapshot.records.push(ConversationNode {
            id: NodeId::new(1_152_921_504_606_846_976),
            children: Vec::new(),
            ..stray
        });
        fs::write(&path, serde_json::to_string(&snapshot).expect("json")).expect("write");

        let err = load_session(&path).expect_err("huge id must not load");
        assert!(format!("{err:#}").contains("out of range"), "{err:#}");
    }

    #[test]
    fn missing_session_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let loaded = load_session_if_present(&temp.path().join("nope.json")).expect("load");
        assert!(loaded.is_none());
    }
}
