//! Row-level access to the nested-set table: point lookups, position writes
//! and range-predicate updates.
//!
//! Everything here takes a plain `&Connection` so it can run either inside a
//! [`rusqlite::Transaction`] (which derefs to `Connection`) or directly for
//! read-only use. Range updates always include the root sentinel. They also
//! reach soft-deleted rows that still hold bounds, since those stay in the
//! encoding until their delete has run and cleared them.

use crate::{NestedSetError, Node, Position, Result, TreeConfig};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use std::fmt;

/// Position column addressed by a [`FieldUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Left,
    Right,
    Depth,
}

impl Column {
    fn name(self, config: &TreeConfig) -> &str {
        match self {
            Self::Left => &config.left_column,
            Self::Right => &config.right_column,
            Self::Depth => &config.depth_column,
        }
    }
}

/// Row selector for a range update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePredicate {
    /// `right >= bound`
    RightAtLeast(i64),
    /// `right > bound`
    RightAbove(i64),
    /// `left > bound`
    LeftAbove(i64),
    /// Strictly inside an interval: the descendants of the node at `[left, right]`.
    Within { left: i64, right: i64 },
    /// Descendants of the node formerly at `[left, right]` whose bounds were negated.
    Staged { left: i64, right: i64 },
}

impl fmt::Display for RangePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RightAtLeast(b) => write!(f, "right >= {b}"),
            Self::RightAbove(b) => write!(f, "right > {b}"),
            Self::LeftAbove(b) => write!(f, "left > {b}"),
            Self::Within { left, right } => write!(f, "{left} < left, right < {right}"),
            Self::Staged { left, right } => write!(f, "staged from [{left}, {right}]"),
        }
    }
}

/// Assignment applied to every row matched by a range update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUpdate {
    /// `column = column + delta`
    Shift(Column, i64),
    /// `column = column * -1`
    Negate(Column),
    /// `column = ABS(column) + delta`
    Restore(Column, i64),
}

/// Applies `updates` to every row matching `predicate`, optionally
/// skipping the row `exclude`. Returns the number of rows changed.
pub fn update_range(
    conn: &Connection,
    config: &TreeConfig,
    predicate: RangePredicate,
    updates: &[FieldUpdate],
    exclude: Option<i64>,
) -> Result<usize> {
    let mut params: Vec<Value> = Vec::new();

    let assignments: Vec<String> = updates
        .iter()
        .map(|update| match *update {
            FieldUpdate::Shift(column, delta) => {
                params.push(Value::Integer(delta));
                let name = column.name(config);
                format!("{name} = {name} + ?")
            }
            FieldUpdate::Negate(column) => {
                let name = column.name(config);
                format!("{name} = {name} * (-1)")
            }
            FieldUpdate::Restore(column, delta) => {
                params.push(Value::Integer(delta));
                let name = column.name(config);
                format!("{name} = ABS({name}) + ?")
            }
        })
        .collect();

    let lft = &config.left_column;
    let rgt = &config.right_column;
    let mut clause = match predicate {
        RangePredicate::RightAtLeast(bound) => {
            params.push(Value::Integer(bound));
            format!("{rgt} >= ?")
        }
        RangePredicate::RightAbove(bound) => {
            params.push(Value::Integer(bound));
            format!("{rgt} > ?")
        }
        RangePredicate::LeftAbove(bound) => {
            params.push(Value::Integer(bound));
            format!("{lft} > ?")
        }
        RangePredicate::Within { left, right } => {
            params.push(Value::Integer(left));
            params.push(Value::Integer(right));
            format!("{lft} > ? AND {rgt} < ?")
        }
        RangePredicate::Staged { left, right } => {
            params.push(Value::Integer(-left));
            params.push(Value::Integer(-right));
            format!("{lft} < ? AND {rgt} > ?")
        }
    };
    if let Some(id) = exclude {
        params.push(Value::Integer(id));
        clause.push_str(&format!(" AND {} <> ?", config.id_column));
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        config.table,
        assignments.join(", "),
        clause
    );
    let affected = conn.execute(&sql, rusqlite::params_from_iter(params))?;
    log::debug!("{}: {predicate} {updates:?} -> {affected} rows", config.table);
    Ok(affected)
}

/// Re-points every direct child of `from` at `to`, skipping rows whose delete
/// has already run. Returns the child IDs.
pub fn reparent_children(
    conn: &Connection,
    config: &TreeConfig,
    from: i64,
    to: Option<i64>,
) -> Result<Vec<i64>> {
    let children: Vec<i64> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {id} FROM {table} WHERE {parent} = ?1 AND ({active} OR {lft} > 0) ORDER BY {lft}",
            id = config.id_column,
            table = config.table,
            parent = config.parent_id_column,
            active = config.active_clause(),
            lft = config.left_column,
        ))?;
        let ids = stmt
            .query_map([from], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        ids
    };

    conn.execute(
        &format!(
            "UPDATE {table} SET {parent} = ?1 WHERE {parent} = ?2 AND ({active} OR {lft} > 0)",
            table = config.table,
            parent = config.parent_id_column,
            active = config.active_clause(),
            lft = config.left_column,
        ),
        rusqlite::params![to, from],
    )?;
    Ok(children)
}

/// Column list matching [`map_node_row`].
pub(crate) fn select_columns(config: &TreeConfig) -> String {
    format!(
        "{}, name, {}, {}, {}, {}, created_at, modified_at, {}",
        config.id_column,
        config.parent_id_column,
        config.left_column,
        config.right_column,
        config.depth_column,
        config.deleted_at_column
    )
}

pub(crate) fn map_node_row(row: &rusqlite::Row) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
        left: row.get(3)?,
        right: row.get(4)?,
        depth: row.get(5)?,
        created_at: row.get(6)?,
        modified_at: row.get(7)?,
        deleted_at: row.get(8)?,
    })
}

/// Runs `SELECT <node columns> FROM <table> WHERE <clause> <order>`.
pub(crate) fn query_nodes(
    conn: &Connection,
    config: &TreeConfig,
    clause: &str,
    order: &str,
    params: &[i64],
) -> Result<Vec<Node>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {clause} {order}",
        select_columns(config),
        config.table
    );
    let mut stmt = conn.prepare(&sql)?;
    let nodes = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), map_node_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nodes)
}

/// Looks up a row by ID regardless of soft-delete state.
pub fn find_node(conn: &Connection, config: &TreeConfig, id: i64) -> Result<Option<Node>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        select_columns(config),
        config.table,
        config.id_column
    );
    Ok(conn.query_row(&sql, [id], map_node_row).optional()?)
}

/// Looks up a row by ID, treating soft-deleted rows as absent.
pub fn find_active(conn: &Connection, config: &TreeConfig, id: i64) -> Result<Option<Node>> {
    Ok(find_node(conn, config, id)?.filter(|node| !node.is_deleted()))
}

/// Fetches a row by ID regardless of soft-delete state.
///
/// # Errors
///
/// Returns [`NestedSetError::NodeNotFound`] if no such row exists.
pub fn get_node(conn: &Connection, config: &TreeConfig, id: i64) -> Result<Node> {
    find_node(conn, config, id)?.ok_or(NestedSetError::NodeNotFound(id))
}

/// Reads the current parent, bounds and depth of a row.
pub fn read_position(conn: &Connection, config: &TreeConfig, id: i64) -> Result<Position> {
    let sql = format!(
        "SELECT {parent}, {lft}, {rgt}, {depth} FROM {table} WHERE {id} = ?1",
        parent = config.parent_id_column,
        lft = config.left_column,
        rgt = config.right_column,
        depth = config.depth_column,
        table = config.table,
        id = config.id_column,
    );
    conn.query_row(&sql, [id], |row| {
        Ok(Position {
            parent_id: row.get(0)?,
            left: row.get(1)?,
            right: row.get(2)?,
            depth: row.get(3)?,
        })
    })
    .optional()?
    .ok_or(NestedSetError::NodeNotFound(id))
}

/// Persists only the position fields of a row, leaving everything else untouched.
pub fn write_position(
    conn: &Connection,
    config: &TreeConfig,
    id: i64,
    position: &Position,
) -> Result<()> {
    let sql = format!(
        "UPDATE {table} SET {parent} = ?1, {lft} = ?2, {rgt} = ?3, {depth} = ?4 WHERE {id} = ?5",
        table = config.table,
        parent = config.parent_id_column,
        lft = config.left_column,
        rgt = config.right_column,
        depth = config.depth_column,
        id = config.id_column,
    );
    let changed = conn.execute(
        &sql,
        rusqlite::params![position.parent_id, position.left, position.right, position.depth, id],
    )?;
    if changed == 0 {
        return Err(NestedSetError::NodeNotFound(id));
    }
    Ok(())
}

/// Inserts a new row with the node's current (usually unassigned) position
/// and returns the store-assigned ID.
pub fn insert_row(conn: &Connection, config: &TreeConfig, node: &Node) -> Result<i64> {
    let sql = format!(
        "INSERT INTO {table} (name, {parent}, {lft}, {rgt}, {depth}, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        table = config.table,
        parent = config.parent_id_column,
        lft = config.left_column,
        rgt = config.right_column,
        depth = config.depth_column,
    );
    conn.execute(
        &sql,
        rusqlite::params![
            node.name,
            node.parent_id,
            node.left,
            node.right,
            node.depth,
            node.created_at,
            node.modified_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Updates the host-owned fields of a row. Position fields are never written here.
pub fn update_details(conn: &Connection, config: &TreeConfig, node: &Node) -> Result<()> {
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET name = ?1, modified_at = ?2 WHERE {} = ?3",
            config.table, config.id_column
        ),
        rusqlite::params![node.name, node.modified_at, node.id],
    )?;
    if changed == 0 {
        return Err(NestedSetError::NodeNotFound(node.id));
    }
    Ok(())
}

/// Removes a row from the active index: stamps `deleted_at` under soft
/// delete, otherwise deletes it. Idempotent.
pub fn retire_row(conn: &Connection, config: &TreeConfig, id: i64) -> Result<()> {
    if config.soft_delete {
        conn.execute(
            &format!(
                "UPDATE {table} SET {deleted} = COALESCE({deleted}, ?1) WHERE {id} = ?2",
                table = config.table,
                deleted = config.deleted_at_column,
                id = config.id_column,
            ),
            rusqlite::params![chrono::Utc::now().timestamp(), id],
        )?;
    } else {
        conn.execute(
            &format!("DELETE FROM {} WHERE {} = ?1", config.table, config.id_column),
            [id],
        )?;
    }
    Ok(())
}
