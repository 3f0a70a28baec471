//! Bounded-size history: collapse old path runs into summary nodes.

use serde::{Deserialize, Serialize};

use crate::core::tree::{ContextTree, ConversationNode, NodeId, SummaryInfo, preview};
use crate::core::types::Role;

const DIGEST_LINE_CHARS: usize = 100;
const SUMMARY_HEADER: &str = "[summary of";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneBounds {
    pub max_nodes: usize,
    pub max_chars: usize,
    /// Trailing path nodes that are never collapsed. Treated as at least 1.
    pub keep_recent: usize,
    pub summary_max_chars: usize,
}

impl Default for PruneBounds {
    fn default() -> Self {
        Self {
            max_nodes: 40,
            max_chars: 60_000,
            keep_recent: 4,
            summary_max_chars: 2_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Path nodes folded into the summary (an absorbed summary counts as one).
    pub collapsed: usize,
    /// Nodes removed from the arena, including off-path subtrees.
    pub removed: usize,
    pub summary: Option<NodeId>,
}

impl PruneReport {
    pub fn is_noop(&self) -> bool {
        self.summary.is_none()
    }
}

impl PruneBounds {
    pub fn exceeded_by(&self, path: &[&ConversationNode]) -> bool {
        path.len() > self.max_nodes || path_chars(path) > self.max_chars
    }
}

fn path_chars(path: &[&ConversationNode]) -> usize {
    path.iter().map(|node| node.content.chars().count()).sum()
}

impl ContextTree {
    /// Collapse the oldest run of path nodes if the path exceeds `bounds`.
    ///
    /// The run starts right after the root and stops before the last
    /// `keep_recent` nodes. It grows only as far as needed to satisfy the
    /// bounds. A summary at the start of the run is absorbed into the new one.
    pub fn prune(&mut self, bounds: &PruneBounds) -> PruneReport {
        let path = self.path_to_head();
        if !bounds.exceeded_by(&path) {
            return PruneReport::default();
        }

        let keep = bounds.keep_recent.max(1);
        let limit = path.len().saturating_sub(keep);
        let start = 1;
        if limit <= start {
            return PruneReport::default();
        }

        let total_chars = path_chars(&path);
        let mut end = limit;
        let mut run_chars = 0;
        for (offset, node) in path[start..limit].iter().enumerate() {
            run_chars += node.content.chars().count();
            let candidate = start + offset + 1;
            let run_len = candidate - start;
            if run_len < 2 && limit - start >= 2 {
                continue;
            }
            let nodes_after = path.len() - run_len + 1;
            let chars_after = total_chars - run_chars + bounds.summary_max_chars;
            if nodes_after <= bounds.max_nodes && chars_after <= bounds.max_chars {
                end = candidate;
                break;
            }
        }

        if end - start == 1 && path[start].is_summary() {
            return PruneReport::default();
        }

        let run: Vec<NodeId> = path[start..end].iter().map(|node| node.id).collect();
        let survivor = path[end].id;
        let parent = path[start - 1].id;
        let first_timestamp = path[start].timestamp;
        let (content, collapsed_total) = build_summary(&path[start..end], bounds.summary_max_chars);
        drop(path);

        let summary_id = self.push_node(|id| ConversationNode {
            id,
            parent: Some(parent),
            children: vec![survivor],
            role: Role::System,
            content,
            action: None,
            result: None,
            timestamp: first_timestamp,
            label: None,
            summary: Some(SummaryInfo {
                collapsed: collapsed_total,
            }),
        });

        if let Some(parent_node) = self.node_mut(parent) {
            for child in &mut parent_node.children {
                if *child == run[0] {
                    *child = summary_id;
                }
            }
        }
        if let Some(survivor_node) = self.node_mut(survivor) {
            survivor_node.parent = Some(summary_id);
        }

        let mut removed = 0;
        for (idx, id) in run.iter().enumerate() {
            let keep_child = run.get(idx + 1).copied().unwrap_or(survivor);
            let off_path: Vec<NodeId> = self
                .get(*id)
                .map(|node| {
                    node.children
                        .iter()
                        .copied()
                        .filter(|child| *child != keep_child)
                        .collect()
                })
                .unwrap_or_default();
            for child in off_path {
                removed += self.remove_subtree(child);
            }
            if self.nodes.get_mut(id.index()).and_then(Option::take).is_some() {
                removed += 1;
            }
        }

        tracing::debug!(
            collapsed = run.len(),
            removed,
            summary = %summary_id,
            "pruned context path"
        );

        PruneReport {
            collapsed: run.len(),
            removed,
            summary: Some(summary_id),
        }
    }
}

/// Abstract for a collapsed run: a header plus one digest line per node,
/// dropping the oldest lines once `max_chars` is reached.
fn build_summary(run: &[&ConversationNode], max_chars: usize) -> (String, usize) {
    let mut collapsed = 0;
    let mut lines: Vec<String> = Vec::new();
    for node in run {
        match &node.summary {
            Some(info) => {
                collapsed += info.collapsed;
                lines.extend(
                    node.content
                        .lines()
                        .filter(|line| !line.starts_with(SUMMARY_HEADER))
                        .map(str::to_string),
                );
            }
            None => {
                collapsed += 1;
                lines.push(digest_line(node));
            }
        }
    }

    let header = format!("{SUMMARY_HEADER} {collapsed} earlier messages]");
    let mut budget = max_chars.saturating_sub(header.chars().count());
    let mut kept: Vec<&str> = Vec::new();
    for line in lines.iter().rev() {
        let cost = line.chars().count() + 1;
        if cost > budget {
            break;
        }
        budget -= cost;
        kept.push(line);
    }
    kept.reverse();

    let mut content = header;
    for line in kept {
        content.push('\n');
        content.push_str(line);
    }
    (content, collapsed)
}

fn digest_line(node: &ConversationNode) -> String {
    let body = match (&node.action, &node.result) {
        (Some(action), Some(result)) => {
            format!("{} -> {}", action.describe(), result.status_label())
        }
        (Some(action), None) => action.describe(),
        _ => node.content.lines().next().unwrap_or("").trim().to_string(),
    };
    preview(&format!("- {}: {}", node.role.as_str(), body), DIGEST_LINE_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::invariants::validate_invariants;
    use crate::core::tree::NodeDraft;

    fn bounds(max_nodes: usize, keep_recent: usize) -> PruneBounds {
        PruneBounds {
            max_nodes,
            max_chars: 1_000_000,
            keep_recent,
            summary_max_chars: 500,
        }
    }

    fn linear_tree(messages: usize) -> ContextTree {
        let mut tree = ContextTree::new(NodeDraft::system("root prompt"));
        for i in 0..messages {
            tree.append_to_head(NodeDraft::user(format!("message {i}")));
        }
        tree
    }

    fn path_contents(tree: &ContextTree) -> Vec<String> {
        tree.path_to_head()
            .iter()
            .map(|node| node.content.clone())
            .collect()
    }

    #[test]
    fn under_bounds_is_noop() {
        let mut tree = linear_tree(3);
        let report = tree.prune(&bounds(10, 2));
        assert!(report.is_noop());
        assert_eq!(tree.path_to_head().len(), 4);
    }

    #[test]
    fn collapses_oldest_run_and_keeps_recent_verbatim() {
        let mut tree = linear_tree(10);
        let before = path_contents(&tree);
        let report = tree.prune(&bounds(6, 3));

        let path = tree.path_to_head();
        assert_eq!(path.len(), 6);
        assert_eq!(report.collapsed, 6);
        assert!(path[1].is_summary());
        assert!(path[1].content.contains("message 0"));
        assert_eq!(path[0].content, "root prompt");
        assert_eq!(path_contents(&tree)[3..], before[8..]);
        assert!(validate_invariants(&tree).is_empty());
    }

    #[test]
    fn repeated_pruning_absorbs_previous_summary() {
        let mut tree = linear_tree(10);
        let b = bounds(6, 3);
        tree.prune(&b);
        for i in 10..14 {
            tree.append_to_head(NodeDraft::user(format!("message {i}")));
            tree.prune(&b);
        }

        let path = tree.path_to_head();
        assert!(path.len() <= 6);
        let summaries: Vec<_> = path.iter().filter(|node| node.is_summary()).collect();
        assert_eq!(summaries.len(), 1);
        let collapsed = summaries[0].summary.as_ref().map(|s| s.collapsed);
        assert_eq!(collapsed, Some(14 - (path.len() - 2)));
        assert!(summaries[0].content.contains("message 0"));
        assert_eq!(path.last().map(|n| n.content.as_str()), Some("message 13"));
        assert!(validate_invariants(&tree).is_empty());
    }

    #[test]
    fn off_path_subtrees_of_collapsed_nodes_are_removed() {
        let mut tree = ContextTree::new(NodeDraft::system("root"));
        let a = tree.append_to_head(NodeDraft::user("a"));
        let side = tree.append(a, NodeDraft::user("side")).expect("append");
        tree.append(side, NodeDraft::user("side child")).expect("append");
        tree.set_head(a).expect("head");
        for i in 0..5 {
            tree.append_to_head(NodeDraft::user(format!("m{i}")));
        }

        let report = tree.prune(&bounds(4, 2));
        assert!(!tree.contains(side));
        assert_eq!(report.removed, report.collapsed + 2);
        assert!(validate_invariants(&tree).is_empty());
    }

    #[test]
    fn char_bound_triggers_prune() {
        let mut tree = ContextTree::new(NodeDraft::system("root"));
        for _ in 0..6 {
            tree.append_to_head(NodeDraft::user("x".repeat(100)));
        }
        let report = tree.prune(&PruneBounds {
            max_nodes: 100,
            max_chars: 350,
            keep_recent: 2,
            summary_max_chars: 60,
        });
        assert!(!report.is_noop());
        let path = tree.path_to_head();
        assert!(path_chars(&path) <= 350);
        assert_eq!(path[path.len() - 1].content, "x".repeat(100));
    }

    #[test]
    fn summary_respects_char_cap() {
        let mut tree = linear_tree(30);
        tree.prune(&PruneBounds {
            max_nodes: 5,
            max_chars: 1_000_000,
            keep_recent: 2,
            summary_max_chars: 80,
        });
        let path = tree.path_to_head();
        assert!(path[1].content.chars().count() <= 80);
        assert!(path[1].content.contains("message 26"));
        assert!(!path[1].content.contains("message 0\n"));
    }
}
