//! Transactional renumbering for insert, move and delete.
//!
//! Each function runs entirely inside the caller's transaction and starts by
//! re-reading the node's stored position, so it is safe to call with a stale
//! in-memory record (e.g. from a queued job). The in-memory record is updated
//! to match what was written. Dropping the transaction without committing
//! discards every range update made here.
//!
//! Range updates include the root sentinel. Soft-deleted rows keep moving
//! with the tree until their own delete runs, which clears their bounds.

use crate::core::store::{
    find_node, get_node, read_position, reparent_children, retire_row, update_range,
    write_position, Column, FieldUpdate, RangePredicate,
};
use crate::{
    NestedSetError, Node, Position, Result, TreeConfig, TreeNode, TreeOperation, UNPOSITIONED,
};
use rusqlite::Transaction;
use std::collections::HashSet;

/// Resolves the node that children of `parent_id` are placed under.
///
/// A soft-deleted row still counts while it holds bounds: its delete has not
/// run yet and will promote whatever is placed under it. Once its bounds are
/// cleared the lookup continues with its own parent, which is where the
/// delete promoted its children to.
fn positioned_parent(tx: &Transaction, config: &TreeConfig, parent_id: i64) -> Result<Node> {
    let mut id = parent_id;
    let mut seen = HashSet::new();
    loop {
        let row = find_node(tx, config, id)?.ok_or(NestedSetError::ParentNotFound(id))?;
        if row.position().is_positioned() {
            return Ok(row);
        }
        if !row.is_deleted() {
            return Err(NestedSetError::NodeNotPositioned(id));
        }
        if !seen.insert(id) {
            return Err(NestedSetError::ParentNotFound(parent_id));
        }
        log::debug!("parent {id} was removed, trying {:?}", row.parent_id);
        id = row.parent_id.unwrap_or(config.root_id);
    }
}

/// Places `node` as the rightmost child of its stored parent (the root when
/// unset). Returns `None` if the node already has a position.
///
/// # Errors
///
/// Returns [`NestedSetError::ParentNotFound`] if the parent does not resolve
/// to an active node, or [`NestedSetError::TransactionFailure`] for any
/// SQLite failure.
pub fn insert_node<N: TreeNode>(
    tx: &Transaction,
    config: &TreeConfig,
    node: &mut N,
) -> Result<Option<TreeOperation>> {
    let id = node.node_id();
    let current = read_position(tx, config, id)?;
    node.set_position(current);
    if current.is_positioned() {
        log::debug!("node {id} is already positioned at [{}, {}]", current.left, current.right);
        return Ok(None);
    }

    let parent = positioned_parent(tx, config, current.parent_id.unwrap_or(config.root_id))?;
    let parent_id = parent.id;
    let r = parent.right;

    // open a width-2 gap at the parent's closing bound
    update_range(tx, config, RangePredicate::RightAtLeast(r), &[FieldUpdate::Shift(Column::Right, 2)], None)?;
    update_range(tx, config, RangePredicate::LeftAbove(r), &[FieldUpdate::Shift(Column::Left, 2)], None)?;

    let position = Position {
        parent_id: Some(parent_id),
        left: r,
        right: r + 1,
        depth: parent.depth + 1,
    };
    write_position(tx, config, id, &position)?;
    node.set_position(position);

    log::info!("inserted node {id} under {parent_id} at [{r}, {}]", r + 1);
    Ok(Some(TreeOperation::insert(id, parent_id, position)))
}

/// Reparents `node` (with its whole subtree) to become the rightmost child
/// of `new_parent_id`. Returns `None` when the node is already a child of
/// `new_parent_id`.
///
/// # Errors
///
/// Returns [`NestedSetError::InvalidParent`] if `new_parent_id` is the node
/// itself or one of its descendants, [`NestedSetError::ParentNotFound`] if it
/// does not resolve, [`NestedSetError::RootNode`] for the root, and
/// [`NestedSetError::NodeNotPositioned`] if the node has no bounds yet. All of
/// these are raised before any row is written.
pub fn move_node<N: TreeNode>(
    tx: &Transaction,
    config: &TreeConfig,
    node: &mut N,
    new_parent_id: i64,
) -> Result<Option<TreeOperation>> {
    let id = node.node_id();
    if id == config.root_id {
        return Err(NestedSetError::RootNode("moved"));
    }

    let before = read_position(tx, config, id)?;
    node.set_position(before);
    if !before.is_positioned() {
        return Err(NestedSetError::NodeNotPositioned(id));
    }
    if new_parent_id == id {
        log::warn!("rejected move of node {id} under itself");
        return Err(NestedSetError::InvalidParent(format!(
            "node {id} cannot be its own parent"
        )));
    }
    let target = positioned_parent(tx, config, new_parent_id)?;
    if target.id == id || (target.left > before.left && target.right < before.right) {
        log::warn!("rejected move of node {id} under {}", target.id);
        return Err(NestedSetError::InvalidParent(format!(
            "node {} is a descendant of node {id}",
            target.id
        )));
    }
    if before.parent_id == Some(target.id) {
        log::debug!("node {id} is already a child of {}", target.id);
        return Ok(None);
    }
    let new_parent_id = target.id;

    let width = before.width();
    let subtree = RangePredicate::Within { left: before.left, right: before.right };

    // stage the subtree out of the way of the shifts below
    let descendants = update_range(
        tx,
        config,
        subtree,
        &[FieldUpdate::Negate(Column::Left), FieldUpdate::Negate(Column::Right)],
        None,
    )?;

    // close the gap the node leaves behind
    update_range(tx, config, RangePredicate::RightAbove(before.right), &[FieldUpdate::Shift(Column::Right, -width)], Some(id))?;
    update_range(tx, config, RangePredicate::LeftAbove(before.right), &[FieldUpdate::Shift(Column::Left, -width)], Some(id))?;

    // open a gap of the same width at the new parent's closing bound
    let parent = read_position(tx, config, new_parent_id)?;
    let r = parent.right;
    update_range(tx, config, RangePredicate::RightAtLeast(r), &[FieldUpdate::Shift(Column::Right, width)], Some(id))?;
    update_range(tx, config, RangePredicate::LeftAbove(r), &[FieldUpdate::Shift(Column::Left, width)], Some(id))?;

    let after = Position {
        parent_id: Some(new_parent_id),
        left: r,
        right: r + width - 1,
        depth: parent.depth + 1,
    };
    write_position(tx, config, id, &after)?;
    node.set_position(after);

    let distance = after.right - before.right;
    let depth_change = after.depth - before.depth;
    let restored = update_range(
        tx,
        config,
        RangePredicate::Staged { left: before.left, right: before.right },
        &[
            FieldUpdate::Restore(Column::Left, distance),
            FieldUpdate::Restore(Column::Right, distance),
            FieldUpdate::Shift(Column::Depth, depth_change),
        ],
        None,
    )?;
    if restored != descendants {
        log::warn!("node {id}: staged {descendants} descendants but restored {restored}");
    }

    log::info!(
        "moved node {id} from {:?} [{}, {}] to {new_parent_id} [{}, {}]",
        before.parent_id,
        before.left,
        before.right,
        after.left,
        after.right
    );
    Ok(Some(TreeOperation::move_node(id, before, after, descendants)))
}

/// Removes `node` from the tree, promoting its children to its former parent.
///
/// Removing the left bound shifts every descendant down by one (and up one
/// level); removing the right bound shifts everything after it down by two.
/// This holds for subtrees of any width. The row itself is then retired
/// according to the delete policy. A node that never received a position
/// only has its children re-pointed and its row retired.
pub fn delete_node<N: TreeNode>(
    tx: &Transaction,
    config: &TreeConfig,
    node: &mut N,
) -> Result<TreeOperation> {
    let id = node.node_id();
    if id == config.root_id {
        return Err(NestedSetError::RootNode("deleted"));
    }

    let before = read_position(tx, config, id)?;
    node.set_position(before);

    let promote_to = if before.is_positioned() {
        Some(positioned_parent(tx, config, before.parent_id.unwrap_or(config.root_id))?.id)
    } else {
        before.parent_id
    };
    let promoted = reparent_children(tx, config, id, promote_to)?;

    if before.is_positioned() {
        update_range(
            tx,
            config,
            RangePredicate::Within { left: before.left, right: before.right },
            &[
                FieldUpdate::Shift(Column::Left, -1),
                FieldUpdate::Shift(Column::Right, -1),
                FieldUpdate::Shift(Column::Depth, -1),
            ],
            None,
        )?;
        update_range(tx, config, RangePredicate::RightAbove(before.right), &[FieldUpdate::Shift(Column::Right, -2)], Some(id))?;
        update_range(tx, config, RangePredicate::LeftAbove(before.right), &[FieldUpdate::Shift(Column::Left, -2)], Some(id))?;

        if config.soft_delete {
            let cleared = Position { left: UNPOSITIONED, right: UNPOSITIONED, ..before };
            write_position(tx, config, id, &cleared)?;
        }

        // children still waiting for their own insert are placed now
        for &child_id in &promoted {
            let mut child = get_node(tx, config, child_id)?;
            insert_node(tx, config, &mut child)?;
        }
    }

    retire_row(tx, config, id)?;

    log::info!(
        "deleted node {id}, promoted {} children to {:?}",
        promoted.len(),
        promote_to
    );
    Ok(TreeOperation::delete(id, before, promoted))
}
