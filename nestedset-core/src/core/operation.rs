//! Records of committed tree mutations.

use crate::Position;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single committed structural change, appended to the operation log in
/// the same transaction as the renumbering it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreeOperation {
    /// A node was placed as the rightmost child of `parent_id`.
    InsertNode {
        operation_id: String,
        /// Unix timestamp (seconds) of the commit.
        timestamp: i64,
        node_id: i64,
        parent_id: i64,
        /// Position assigned to the new node.
        position: Position,
    },
    /// A node and its subtree were reparented.
    MoveNode {
        operation_id: String,
        timestamp: i64,
        node_id: i64,
        old_parent_id: Option<i64>,
        new_parent_id: i64,
        before: Position,
        after: Position,
        /// Number of descendants carried along with the node.
        subtree_size: usize,
    },
    /// A node was removed and its children promoted to its former parent.
    DeleteNode {
        operation_id: String,
        timestamp: i64,
        node_id: i64,
        parent_id: Option<i64>,
        before: Position,
        promoted_children: Vec<i64>,
    },
}

impl TreeOperation {
    pub fn insert(node_id: i64, parent_id: i64, position: Position) -> Self {
        Self::InsertNode {
            operation_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            node_id,
            parent_id,
            position,
        }
    }

    pub fn move_node(
        node_id: i64,
        before: Position,
        after: Position,
        subtree_size: usize,
    ) -> Self {
        Self::MoveNode {
            operation_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            node_id,
            old_parent_id: before.parent_id,
            new_parent_id: after.parent_id.unwrap_or_default(),
            before,
            after,
            subtree_size,
        }
    }

    pub fn delete(node_id: i64, before: Position, promoted_children: Vec<i64>) -> Self {
        Self::DeleteNode {
            operation_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            node_id,
            parent_id: before.parent_id,
            before,
            promoted_children,
        }
    }

    pub fn operation_id(&self) -> &str {
        match self {
            Self::InsertNode { operation_id, .. }
            | Self::MoveNode { operation_id, .. }
            | Self::DeleteNode { operation_id, .. } => operation_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::InsertNode { timestamp, .. }
            | Self::MoveNode { timestamp, .. }
            | Self::DeleteNode { timestamp, .. } => *timestamp,
        }
    }

    pub fn node_id(&self) -> i64 {
        match self {
            Self::InsertNode { node_id, .. }
            | Self::MoveNode { node_id, .. }
            | Self::DeleteNode { node_id, .. } => *node_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::InsertNode { .. } => "InsertNode",
            Self::MoveNode { .. } => "MoveNode",
            Self::DeleteNode { .. } => "DeleteNode",
        }
    }
}
