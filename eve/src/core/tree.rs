//! Arena-backed conversation tree.
//!
//! Nodes live in a `Vec<Option<ConversationNode>>` indexed by [`NodeId`].
//! Removed slots stay `None`, so ids are never reused within a session.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::action::Action;
use crate::core::invariants::validate_invariants;
use crate::core::types::{ExecutionResult, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Present on synthetic nodes produced by pruning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryInfo {
    /// Number of original nodes folded into this summary (transitively).
    pub collapsed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryInfo>,
}

impl ConversationNode {
    pub fn is_summary(&self) -> bool {
        self.summary.is_some()
    }
}

/// Payload for a node that has not been appended yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDraft {
    pub role: Role,
    pub content: String,
    pub action: Option<Action>,
    pub result: Option<ExecutionResult>,
    pub timestamp: DateTime<Utc>,
    pub label: Option<String>,
}

impl NodeDraft {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            action: None,
            result: None,
            timestamp: Utc::now(),
            label: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_result(mut self, result: ExecutionResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node {0} not found")]
    NotFound(NodeId),
    #[error("node {0} lies on the path to the head")]
    HeadOnPath(NodeId),
    #[error("corrupt tree: {0}")]
    Corrupt(String),
}

/// Ids are arena slots, so discarded branches leave gaps. A saved id past this
/// is treated as corruption rather than sized into the arena.
pub const MAX_NODE_ID: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTree {
    pub(crate) nodes: Vec<Option<ConversationNode>>,
    pub(crate) root: NodeId,
    pub(crate) head: NodeId,
}

impl ContextTree {
    /// Start a tree whose root (and head) is `root`.
    pub fn new(root: NodeDraft) -> Self {
        let id = NodeId(0);
        let node = materialize(id, None, root);
        Self {
            nodes: vec![Some(node)],
            root: id,
            head: id,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn get(&self, id: NodeId) -> Option<&ConversationNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Live nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ConversationNode> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `draft` under `parent` and move the head to the new node.
    pub fn append(&mut self, parent: NodeId, draft: NodeDraft) -> Result<NodeId, TreeError> {
        if !self.contains(parent) {
            return Err(TreeError::NotFound(parent));
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(materialize(id, Some(parent), draft)));
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.push(id);
        }
        self.head = id;
        Ok(id)
    }

    /// Append under the current head.
    pub fn append_to_head(&mut self, draft: NodeDraft) -> NodeId {
        let id = NodeId(self.nodes.len());
        let parent = self.head;
        self.nodes.push(Some(materialize(id, Some(parent), draft)));
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.push(id);
        }
        self.head = id;
        id
    }

    pub fn set_head(&mut self, id: NodeId) -> Result<(), TreeError> {
        if !self.contains(id) {
            return Err(TreeError::NotFound(id));
        }
        self.head = id;
        Ok(())
    }

    /// Ids from root to head inclusive.
    pub fn path_ids(&self) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut cursor = Some(self.head);
        while let Some(id) = cursor {
            let Some(node) = self.get(id) else {
                break;
            };
            path.push(id);
            cursor = node.parent;
            if path.len() > self.nodes.len() {
                break;
            }
        }
        path.reverse();
        path
    }

    /// Nodes from root to head inclusive.
    pub fn path_to_head(&self) -> Vec<&ConversationNode> {
        self.path_ids()
            .into_iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Children of `id`, oldest first.
    pub fn branches_from(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        self.get(id)
            .map(|node| node.children.clone())
            .ok_or(TreeError::NotFound(id))
    }

    /// Remove the subtree rooted at `id`. Returns the number of nodes removed.
    ///
    /// The subtree must not contain the head, so the root is never removable.
    pub fn discard_branch(&mut self, id: NodeId) -> Result<usize, TreeError> {
        if !self.contains(id) {
            return Err(TreeError::NotFound(id));
        }
        if self.path_ids().contains(&id) {
            return Err(TreeError::HeadOnPath(id));
        }
        let parent = self.get(id).and_then(|node| node.parent);
        if let Some(parent_node) = parent.and_then(|p| self.node_mut(p)) {
            parent_node.children.retain(|child| *child != id);
        }
        Ok(self.remove_subtree(id))
    }

    /// Indented outline of the whole tree, oldest branch first.
    pub fn render_outline(&self) -> String {
        let mut buf = String::new();
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.get(id) else {
                continue;
            };
            buf.push_str(&"  ".repeat(depth));
            buf.push_str(&format!("{} {}", node.id, node.role.as_str()));
            if let Some(label) = &node.label {
                buf.push_str(&format!(" [{label}]"));
            }
            buf.push_str(": ");
            buf.push_str(&preview(&outline_text(node), 72));
            if node.is_summary() {
                buf.push_str(" [summary]");
            }
            if id == self.head {
                buf.push_str(" (HEAD)");
            }
            buf.push('\n');
            for child in node.children.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        buf
    }

    /// Live nodes in pre-order, suitable for [`ContextTree::from_records`].
    pub fn records(&self) -> Vec<ConversationNode> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.get(id) else {
                continue;
            };
            out.push(node.clone());
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Rebuild a tree from persisted records and validate its structure.
    pub fn from_records(records: Vec<ConversationNode>, head: NodeId) -> Result<Self, TreeError> {
        let Some(max_id) = records.iter().map(|node| node.id.0).max() else {
            return Err(TreeError::Corrupt("no nodes".to_string()));
        };
        if max_id >= MAX_NODE_ID {
            return Err(TreeError::Corrupt(format!(
                "node id n{max_id} is out of range for {} records",
                records.len()
            )));
        }
        let mut nodes: Vec<Option<ConversationNode>> = vec![None; max_id + 1];
        let mut root = None;
        for node in records {
            let id = node.id;
            if node.parent.is_none() {
                if let Some(existing) = root {
                    return Err(TreeError::Corrupt(format!(
                        "multiple roots: {existing} and {id}"
                    )));
                }
                root = Some(id);
            }
            if nodes[id.0].replace(node).is_some() {
                return Err(TreeError::Corrupt(format!("duplicate node {id}")));
            }
        }
        let root = root.ok_or_else(|| TreeError::Corrupt("no root node".to_string()))?;
        let tree = Self { nodes, root, head };
        if !tree.contains(head) {
            return Err(TreeError::NotFound(head));
        }
        let errors = validate_invariants(&tree);
        if !errors.is_empty() {
            return Err(TreeError::Corrupt(errors.join("; ")));
        }
        Ok(tree)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut ConversationNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub(crate) fn push_node(&mut self, build: impl FnOnce(NodeId) -> ConversationNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(build(id)));
        id
    }

    /// Drop `id` and all its descendants from the arena without touching the
    /// parent's child list.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) -> usize {
        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(next.0).and_then(Option::take) {
                removed += 1;
                stack.extend(node.children);
            }
        }
        removed
    }
}

fn materialize(id: NodeId, parent: Option<NodeId>, draft: NodeDraft) -> ConversationNode {
    ConversationNode {
        id,
        parent,
        children: Vec::new(),
        role: draft.role,
        content: draft.content,
        action: draft.action,
        result: draft.result,
        timestamp: draft.timestamp,
        label: draft.label,
        summary: None,
    }
}

fn outline_text(node: &ConversationNode) -> String {
    match (&node.action, &node.result) {
        (Some(action), Some(result)) => {
            format!("{} -> {}", action.describe(), result.status_label())
        }
        (Some(action), None) => action.describe(),
        _ => node.content.lines().next().unwrap_or("").to_string(),
    }
}

/// Cut `text` to at most `max` chars, marking the cut with `...`.
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}
