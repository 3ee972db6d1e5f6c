//! Node record and the [`TreeNode`] capability the mutator works against.

use serde::{Deserialize, Serialize};

/// Bound value carried by rows whose position has not been assigned yet.
///
/// The root occupies `left = 1`, so every positioned row has `left >= 1`.
pub const UNPOSITIONED: i64 = 0;

/// The structural quadruple of a node: parent, bounds and depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub parent_id: Option<i64>,
    pub left: i64,
    pub right: i64,
    pub depth: i64,
}

impl Position {
    /// `right - left + 1`; equals `2 × (1 + descendant count)`.
    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }

    pub fn is_positioned(&self) -> bool {
        self.left > UNPOSITIONED
    }
}

/// Capability a host record exposes so the tree mutator can read and assign
/// its position without knowing anything else about the record.
pub trait TreeNode {
    fn node_id(&self) -> i64;
    fn parent_id(&self) -> Option<i64>;
    fn set_parent_id(&mut self, parent_id: Option<i64>);
    fn left(&self) -> i64;
    fn set_left(&mut self, left: i64);
    fn right(&self) -> i64;
    fn set_right(&mut self, right: i64);
    fn depth(&self) -> i64;
    fn set_depth(&mut self, depth: i64);

    fn width(&self) -> i64 {
        self.right() - self.left() + 1
    }

    fn position(&self) -> Position {
        Position {
            parent_id: self.parent_id(),
            left: self.left(),
            right: self.right(),
            depth: self.depth(),
        }
    }

    fn set_position(&mut self, position: Position) {
        self.set_parent_id(position.parent_id);
        self.set_left(position.left);
        self.set_right(position.right);
        self.set_depth(position.depth);
    }
}

/// One row of a nested-set table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub left: i64,
    pub right: i64,
    pub depth: i64,
    pub created_at: i64,
    pub modified_at: i64,
    pub deleted_at: Option<i64>,
}

impl Node {
    /// A not-yet-stored node. Its bounds are assigned by the mutator.
    pub fn new(name: impl Into<String>, parent_id: Option<i64>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: 0,
            name: name.into(),
            parent_id,
            left: UNPOSITIONED,
            right: UNPOSITIONED,
            depth: 0,
            created_at: now,
            modified_at: now,
            deleted_at: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.right == self.left + 1
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl TreeNode for Node {
    fn node_id(&self) -> i64 {
        self.id
    }
    fn parent_id(&self) -> Option<i64> {
        self.parent_id
    }
    fn set_parent_id(&mut self, parent_id: Option<i64>) {
        self.parent_id = parent_id;
    }
    fn left(&self) -> i64 {
        self.left
    }
    fn set_left(&mut self, left: i64) {
        self.left = left;
    }
    fn right(&self) -> i64 {
        self.right
    }
    fn set_right(&mut self, right: i64) {
        self.right = right;
    }
    fn depth(&self) -> i64 {
        self.depth
    }
    fn set_depth(&mut self, depth: i64) {
        self.depth = depth;
    }
}
