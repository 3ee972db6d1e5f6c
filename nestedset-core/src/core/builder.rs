//! Turns a flat, ordered node list into an in-memory nested forest.

use crate::Node;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A node together with its ordered direct children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeItem {
    #[serde(flatten)]
    pub node: Node,
    pub children: Vec<TreeItem>,
}

impl TreeItem {
    /// Number of nodes in this subtree, including the item itself.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeItem::size).sum::<usize>()
    }

    /// Visits the subtree in pre-order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a TreeItem)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// Groups `nodes` by parent and attaches each group under its parent.
///
/// Top-level items are the nodes whose parent is not part of the input: for
/// the full flattened tree these are the root's children, for a scope such as
/// the descendants of some node they are that node's children. Sibling order
/// follows input order, so feeding pre-ordered input yields left-to-right
/// children. Storage is never touched.
pub fn build_tree(nodes: Vec<Node>) -> Vec<TreeItem> {
    let present: HashSet<i64> = nodes.iter().map(|n| n.id).collect();

    let mut top = Vec::new();
    let mut groups: HashMap<i64, Vec<Node>> = HashMap::new();
    for node in nodes {
        match node.parent_id {
            Some(pid) if present.contains(&pid) && pid != node.id => {
                groups.entry(pid).or_default().push(node)
            }
            _ => top.push(node),
        }
    }

    top.into_iter().map(|node| attach(node, &mut groups)).collect()
}

fn attach(node: Node, groups: &mut HashMap<i64, Vec<Node>>) -> TreeItem {
    let children = groups
        .remove(&node.id)
        .unwrap_or_default()
        .into_iter()
        .map(|child| attach(child, groups))
        .collect();
    TreeItem { node, children }
}
