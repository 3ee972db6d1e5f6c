//! Full-table invariant check for a nested-set tree.

use crate::core::store::query_nodes;
use crate::{Node, Result, TreeConfig};
use rusqlite::Connection;
use std::fmt;

/// One broken invariant found by [`verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    MissingRoot,
    /// A row still carries negated bounds from an unfinished move.
    StagedRow { id: i64 },
    EmptyInterval { id: i64, left: i64, right: i64 },
    /// Bounds do not tile the root interval exactly once each.
    BoundGap { expected: i64, found: Option<i64> },
    /// The interval is not contained in the interval of the node opened before it.
    Crossing { id: i64, enclosing: i64 },
    WrongParent { id: i64, recorded: Option<i64>, enclosing: i64 },
    WrongDepth { id: i64, depth: i64, expected: i64 },
    WrongWidth { id: i64, width: i64, descendants: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRoot => write!(f, "root node is missing"),
            Self::StagedRow { id } => write!(f, "node {id} has negative bounds"),
            Self::EmptyInterval { id, left, right } => {
                write!(f, "node {id} has left {left} >= right {right}")
            }
            Self::BoundGap { expected, found } => match found {
                Some(v) => write!(f, "expected bound {expected}, found {v}"),
                None => write!(f, "expected bound {expected}, found nothing"),
            },
            Self::Crossing { id, enclosing } => {
                write!(f, "node {id} overlaps node {enclosing} without nesting")
            }
            Self::WrongParent { id, recorded, enclosing } => write!(
                f,
                "node {id} records parent {recorded:?} but is enclosed by {enclosing}"
            ),
            Self::WrongDepth { id, depth, expected } => {
                write!(f, "node {id} has depth {depth}, expected {expected}")
            }
            Self::WrongWidth { id, width, descendants } => write!(
                f,
                "node {id} has width {width} but {descendants} descendants"
            ),
        }
    }
}

/// Checks every invariant of the encoding over the rows holding bounds, root
/// included. Soft-deleted rows whose delete job has not run yet still hold
/// bounds and are checked with the rest. Returns an empty list when the tree
/// is consistent.
pub fn verify(conn: &Connection, config: &TreeConfig) -> Result<Vec<Violation>> {
    let staged = query_nodes(
        conn,
        config,
        &format!("{} < 0 OR {} < 0", config.left_column, config.right_column),
        "",
        &[],
    )?;
    let mut violations: Vec<Violation> = staged
        .iter()
        .map(|n| Violation::StagedRow { id: n.id })
        .collect();

    let nodes = query_nodes(
        conn,
        config,
        &format!("{} > 0", config.left_column),
        &format!("ORDER BY {} ASC", config.left_column),
        &[],
    )?;

    let Some(root) = nodes.iter().find(|n| n.id == config.root_id) else {
        violations.push(Violation::MissingRoot);
        return Ok(violations);
    };

    for node in &nodes {
        if node.left >= node.right {
            violations.push(Violation::EmptyInterval {
                id: node.id,
                left: node.left,
                right: node.right,
            });
        }
    }

    let mut bounds: Vec<i64> = nodes.iter().flat_map(|n| [n.left, n.right]).collect();
    bounds.sort_unstable();
    for (offset, expected) in (root.left..=root.right).enumerate() {
        let found = bounds.get(offset).copied();
        if found != Some(expected) {
            violations.push(Violation::BoundGap { expected, found });
            break;
        }
    }
    if bounds.len() as i64 > root.right - root.left + 1 {
        violations.push(Violation::BoundGap {
            expected: root.right + 1,
            found: bounds.last().copied(),
        });
    }

    check_nesting(&nodes, root, &mut violations);
    Ok(violations)
}

fn check_nesting(nodes: &[Node], root: &Node, violations: &mut Vec<Violation>) {
    let lefts: Vec<i64> = nodes.iter().map(|n| n.left).collect();
    let mut open: Vec<&Node> = Vec::new();

    for node in nodes {
        while open.last().is_some_and(|top| top.right < node.left) {
            open.pop();
        }

        if node.id != root.id {
            match open.last() {
                None => violations.push(Violation::Crossing { id: node.id, enclosing: root.id }),
                Some(enclosing) => {
                    if enclosing.right <= node.right {
                        violations.push(Violation::Crossing {
                            id: node.id,
                            enclosing: enclosing.id,
                        });
                    }
                    if node.parent_id != Some(enclosing.id) {
                        violations.push(Violation::WrongParent {
                            id: node.id,
                            recorded: node.parent_id,
                            enclosing: enclosing.id,
                        });
                    }
                    if node.depth != enclosing.depth + 1 {
                        violations.push(Violation::WrongDepth {
                            id: node.id,
                            depth: node.depth,
                            expected: enclosing.depth + 1,
                        });
                    }
                }
            }
        }

        // lefts is sorted, so the descendants are the run strictly inside (left, right)
        let start = lefts.partition_point(|&l| l <= node.left);
        let end = lefts.partition_point(|&l| l < node.right);
        let descendants = end.saturating_sub(start);
        if node.right - node.left + 1 != 2 * (1 + descendants as i64) {
            violations.push(Violation::WrongWidth {
                id: node.id,
                width: node.right - node.left + 1,
                descendants,
            });
        }

        open.push(node);
    }
}
