//! Read-only traversal queries expressed as single range predicates.
//!
//! Every scope hides the root sentinel, soft-deleted rows, and rows whose
//! bounds are still unassigned (queued insertions, or subtrees negated by an
//! in-flight move), unless a function says otherwise.

use crate::core::store::{query_nodes, select_columns};
use crate::{Node, Result, TreeConfig, TreeNode};
use rusqlite::{Connection, OptionalExtension};

fn visible(config: &TreeConfig) -> String {
    format!(
        "{id} <> {root} AND {active} AND {lft} > 0",
        id = config.id_column,
        root = config.root_id,
        active = config.active_clause(),
        lft = config.left_column,
    )
}

fn ascending(config: &TreeConfig) -> String {
    format!("ORDER BY {} ASC", config.left_column)
}

/// All ancestors of `node`, nearest first, excluding the root.
pub fn ancestors<N: TreeNode>(conn: &Connection, config: &TreeConfig, node: &N) -> Result<Vec<Node>> {
    query_nodes(
        conn,
        config,
        &format!(
            "{} < ?1 AND {} > ?2 AND {}",
            config.left_column,
            config.right_column,
            visible(config)
        ),
        &format!("ORDER BY {} DESC", config.left_column),
        &[node.left(), node.right()],
    )
}

/// All ancestors of `node`, nearest first, ending with the root.
pub fn ancestors_with_root<N: TreeNode>(
    conn: &Connection,
    config: &TreeConfig,
    node: &N,
) -> Result<Vec<Node>> {
    query_nodes(
        conn,
        config,
        &format!(
            "{} < ?1 AND {} > ?2 AND {}",
            config.left_column,
            config.right_column,
            config.active_clause()
        ),
        &format!("ORDER BY {} DESC", config.left_column),
        &[node.left(), node.right()],
    )
}

/// All descendants of `node` in pre-order.
pub fn descendants<N: TreeNode>(conn: &Connection, config: &TreeConfig, node: &N) -> Result<Vec<Node>> {
    query_nodes(
        conn,
        config,
        &format!(
            "{} > ?1 AND {} < ?2 AND {}",
            config.left_column,
            config.right_column,
            visible(config)
        ),
        &ascending(config),
        &[node.left(), node.right()],
    )
}

/// Direct children of `node`, left to right.
pub fn children<N: TreeNode>(conn: &Connection, config: &TreeConfig, node: &N) -> Result<Vec<Node>> {
    query_nodes(
        conn,
        config,
        &format!("{} = ?1 AND {}", config.parent_id_column, visible(config)),
        &ascending(config),
        &[node.node_id()],
    )
}

/// The direct parent of `node`, which may be the root.
pub fn parent<N: TreeNode>(conn: &Connection, config: &TreeConfig, node: &N) -> Result<Option<Node>> {
    let Some(parent_id) = node.parent_id() else {
        return Ok(None);
    };
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1 AND {}",
        select_columns(config),
        config.table,
        config.id_column,
        config.active_clause()
    );
    Ok(conn
        .query_row(&sql, [parent_id], crate::core::store::map_node_row)
        .optional()?)
}

/// Every visible node in pre-order (ascending `left`).
pub fn flattened_order(conn: &Connection, config: &TreeConfig) -> Result<Vec<Node>> {
    query_nodes(conn, config, &visible(config), &ascending(config), &[])
}

/// Nodes without descendants (`right = left + 1`).
pub fn leaf_nodes(conn: &Connection, config: &TreeConfig) -> Result<Vec<Node>> {
    query_nodes(
        conn,
        config,
        &format!(
            "{} = {} - 1 AND {}",
            config.left_column,
            config.right_column,
            visible(config)
        ),
        &ascending(config),
        &[],
    )
}

fn exists(conn: &Connection, config: &TreeConfig, clause: &str, params: [i64; 3]) -> Result<bool> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE {clause} AND {} = ?3 AND {})",
        config.table,
        config.id_column,
        visible(config)
    );
    Ok(conn.query_row(&sql, params, |row| row.get(0))?)
}

/// Whether `id` is a (non-root) ancestor of `node`.
pub fn has_ancestor<N: TreeNode>(conn: &Connection, config: &TreeConfig, node: &N, id: i64) -> Result<bool> {
    exists(
        conn,
        config,
        &format!("{} < ?1 AND {} > ?2", config.left_column, config.right_column),
        [node.left(), node.right(), id],
    )
}

/// Whether `id` is a descendant of `node`.
pub fn has_descendant<N: TreeNode>(conn: &Connection, config: &TreeConfig, node: &N, id: i64) -> Result<bool> {
    exists(
        conn,
        config,
        &format!("{} > ?1 AND {} < ?2", config.left_column, config.right_column),
        [node.left(), node.right(), id],
    )
}
