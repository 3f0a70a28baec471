//! Structural invariants of a context tree that serde alone cannot enforce.

use std::collections::HashSet;

use crate::core::tree::ContextTree;

/// Check structural invariants:
/// - Every node sits in the slot matching its id
/// - Exactly one node has no parent, and it is the root
/// - Parent and child links agree in both directions
/// - Children are ordered by creation time
/// - The head is live and reachable from the root
pub fn validate_invariants(tree: &ContextTree) -> Vec<String> {
    let mut errors = Vec::new();

    for (slot, node) in tree.nodes.iter().enumerate() {
        if let Some(node) = node
            && node.id.index() != slot
        {
            errors.push(format!("{} stored in slot {}", node.id, slot));
        }
    }

    match tree.get(tree.root()) {
        Some(root) if root.parent.is_some() => {
            errors.push(format!("root {} has a parent", root.id));
        }
        Some(_) => {}
        None => errors.push(format!("root {} missing", tree.root())),
    }

    for node in tree.iter() {
        match node.parent {
            None if node.id != tree.root() => {
                errors.push(format!("{} has no parent but is not the root", node.id));
            }
            None => {}
            Some(parent_id) => match tree.get(parent_id) {
                None => errors.push(format!("{}: parent {} missing", node.id, parent_id)),
                Some(parent) => {
                    let listed = parent.children.iter().filter(|c| **c == node.id).count();
                    if listed != 1 {
                        errors.push(format!(
                            "{}: listed {} times among children of {}",
                            node.id, listed, parent_id
                        ));
                    }
                }
            },
        }

        let mut seen = HashSet::new();
        for child_id in &node.children {
            if !seen.insert(*child_id) {
                continue;
            }
            match tree.get(*child_id) {
                None => errors.push(format!("{}: child {} missing", node.id, child_id)),
                Some(child) if child.parent != Some(node.id) => errors.push(format!(
                    "{}: child {} points at parent {:?}",
                    node.id, child_id, child.parent
                )),
                Some(_) => {}
            }
        }

        let ordered = node.children.windows(2).all(|pair| {
            match (tree.get(pair[0]), tree.get(pair[1])) {
                (Some(left), Some(right)) => left.timestamp <= right.timestamp,
                _ => true,
            }
        });
        if !ordered {
            errors.push(format!("{}: children not in creation order", node.id));
        }
    }

    if !tree.contains(tree.head()) {
        errors.push(format!("head {} missing", tree.head()));
    } else if tree.path_ids().first() != Some(&tree.root()) {
        errors.push(format!("head {} not reachable from root", tree.head()));
    }

    errors
}
