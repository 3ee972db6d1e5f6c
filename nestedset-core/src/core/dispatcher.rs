//! Lifecycle hooks and the inline/deferred dispatch policy.
//!
//! The host calls the `on_*` hooks from its own write path, inside the
//! transaction that performs the write. In [`DispatchMode::Inline`] the
//! mutator runs right there; in [`DispatchMode::Deferred`] the hook returns a
//! [`TreeJob`] that the host hands to [`Dispatcher::submit`] once its write
//! has committed.

use crate::core::mutator::{delete_node, insert_node, move_node};
use crate::core::scopes;
use crate::core::store::{find_active, get_node};
use crate::{
    DispatchMode, JobQueue, NestedSetError, Result, TreeConfig, TreeJob, TreeNode, TreeOperation,
};
use rusqlite::{Connection, Transaction};
use std::sync::Arc;

/// Outcome of a hook or job.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Dispatched {
    /// The mutator ran and committed this change (once the transaction commits).
    Applied(TreeOperation),
    /// The mutation must be submitted to the queue after the host write commits.
    Deferred(TreeJob),
    /// Nothing to do (no-op reparent, already positioned node, ...).
    Skipped,
}

impl Dispatched {
    pub fn operation(&self) -> Option<&TreeOperation> {
        match self {
            Self::Applied(op) => Some(op),
            _ => None,
        }
    }
}

/// Holds the validated tree configuration and the queue deferred jobs go to.
pub struct Dispatcher {
    config: TreeConfig,
    queue: Arc<dyn JobQueue>,
}

impl Dispatcher {
    /// # Errors
    ///
    /// Returns [`NestedSetError::PreconditionViolation`] if `config` is not
    /// usable, e.g. deferred dispatch without soft delete.
    pub fn new(config: TreeConfig, queue: Arc<dyn JobQueue>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, queue })
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn is_deferred(&self) -> bool {
        self.config.dispatch.is_deferred()
    }

    /// Defaults the parent to the root and checks that it exists.
    pub fn on_creating<N: TreeNode>(&self, conn: &Connection, node: &mut N) -> Result<()> {
        let parent_id = match node.parent_id() {
            Some(id) => id,
            None => {
                node.set_parent_id(Some(self.config.root_id));
                self.config.root_id
            }
        };
        if find_active(conn, &self.config, parent_id)?.is_none() {
            return Err(NestedSetError::ParentNotFound(parent_id));
        }
        Ok(())
    }

    /// Called once the new row exists (it has an ID) but before commit.
    pub fn on_created<N: TreeNode>(&self, tx: &Transaction, node: &mut N) -> Result<Dispatched> {
        if self.is_deferred() {
            return Ok(Dispatched::Deferred(TreeJob::Insert { node_id: node.node_id() }));
        }
        Ok(insert_node(tx, &self.config, node)?.map_or(Dispatched::Skipped, Dispatched::Applied))
    }

    /// Called when the host is about to persist a parent change.
    ///
    /// Under deferred dispatch the in-memory parent is put back to
    /// `old_parent`: the new parent is written by the job together with the
    /// new bounds. A deferred update is queued even when `new_parent` equals
    /// the stored parent, so it overrides a move still waiting in the queue;
    /// the job is a skip if nothing is pending. Self/descendant targets and
    /// missing parents are rejected here in both modes.
    pub fn on_updating<N: TreeNode>(
        &self,
        tx: &Transaction,
        node: &mut N,
        old_parent: Option<i64>,
        new_parent: Option<i64>,
    ) -> Result<Dispatched> {
        let new_parent_id = new_parent.unwrap_or(self.config.root_id);
        if !self.is_deferred() && old_parent.unwrap_or(self.config.root_id) == new_parent_id {
            return Ok(Dispatched::Skipped);
        }

        self.check_new_parent(tx, node.node_id(), new_parent_id)?;
        if !self.is_deferred() {
            return Ok(move_node(tx, &self.config, node, new_parent_id)?
                .map_or(Dispatched::Skipped, Dispatched::Applied));
        }

        node.set_parent_id(old_parent);
        Ok(Dispatched::Deferred(TreeJob::Move {
            node_id: node.node_id(),
            new_parent_id,
        }))
    }

    /// Called before the host removes the row.
    pub fn on_deleting<N: TreeNode>(&self, tx: &Transaction, node: &mut N) -> Result<Dispatched> {
        if node.node_id() == self.config.root_id {
            return Err(NestedSetError::RootNode("deleted"));
        }
        if self.is_deferred() {
            return Ok(Dispatched::Deferred(TreeJob::Delete { node_id: node.node_id() }));
        }
        Ok(Dispatched::Applied(delete_node(tx, &self.config, node)?))
    }

    /// Hands a deferred job to the configured queue lane.
    pub fn submit(&self, job: TreeJob) -> Result<()> {
        let (connection, queue) = match &self.config.dispatch {
            DispatchMode::Deferred { connection, queue } => (connection.as_deref(), queue.as_deref()),
            DispatchMode::Inline => (None, None),
        };
        log::debug!("queueing {job:?}");
        self.queue.enqueue(job, connection, queue)
    }

    /// Executes a deferred job against the current stored state.
    pub fn run_job(&self, tx: &Transaction, job: &TreeJob) -> Result<Dispatched> {
        let mut node = get_node(tx, &self.config, job.node_id())?;
        let outcome = match *job {
            TreeJob::Insert { .. } => insert_node(tx, &self.config, &mut node)?,
            TreeJob::Move { new_parent_id, .. } => {
                // a node whose delete already ran has no bounds left to move
                if node.is_deleted() && !node.position().is_positioned() {
                    log::warn!("skipping move of deleted node {}", node.id);
                    None
                } else {
                    move_node(tx, &self.config, &mut node, new_parent_id)?
                }
            }
            TreeJob::Delete { .. } => Some(delete_node(tx, &self.config, &mut node)?),
        };
        Ok(outcome.map_or(Dispatched::Skipped, Dispatched::Applied))
    }

    fn check_new_parent(&self, conn: &Connection, id: i64, new_parent_id: i64) -> Result<()> {
        if id == self.config.root_id {
            return Err(NestedSetError::RootNode("moved"));
        }
        if id == new_parent_id {
            log::warn!("rejected move of node {id} under {new_parent_id}");
            return Err(NestedSetError::InvalidParent(format!(
                "node {id} cannot be its own parent"
            )));
        }
        let current = get_node(conn, &self.config, id)?;
        if scopes::has_descendant(conn, &self.config, &current, new_parent_id)? {
            log::warn!("rejected move of node {id} under {new_parent_id}");
            return Err(NestedSetError::InvalidParent(format!(
                "node {new_parent_id} is a descendant of node {id}"
            )));
        }
        if find_active(conn, &self.config, new_parent_id)?.is_none() {
            return Err(NestedSetError::ParentNotFound(new_parent_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::insert_row;
    use crate::{MemoryQueue, Node, Storage};

    fn setup(config: TreeConfig) -> (Storage, Dispatcher, Arc<MemoryQueue>) {
        let storage = Storage::open_in_memory(&config).unwrap();
        let queue = Arc::new(MemoryQueue::new());
        let dispatcher = Dispatcher::new(config, queue.clone()).unwrap();
        (storage, dispatcher, queue)
    }

    fn create(storage: &mut Storage, dispatcher: &Dispatcher, parent: Option<i64>) -> (Node, Dispatched) {
        let mut node = Node::new("n", parent);
        dispatcher.on_creating(storage.connection(), &mut node).unwrap();
        let tx = storage.transaction().unwrap();
        node.id = insert_row(&tx, dispatcher.config(), &node).unwrap();
        let outcome = dispatcher.on_created(&tx, &mut node).unwrap();
        tx.commit().unwrap();
        (node, outcome)
    }

    #[test]
    fn test_deferred_without_soft_delete_fails_at_construction() {
        let config = TreeConfig { soft_delete: false, ..TreeConfig::deferred("tree") };
        let result = Dispatcher::new(config, Arc::new(MemoryQueue::new()));
        assert!(matches!(result, Err(NestedSetError::PreconditionViolation(_))));
    }

    #[test]
    fn test_on_creating_defaults_parent_to_root() {
        let (storage, dispatcher, _) = setup(TreeConfig::default());
        let mut node = Node::new("n", None);
        dispatcher.on_creating(storage.connection(), &mut node).unwrap();
        assert_eq!(node.parent_id, Some(1));
    }

    #[test]
    fn test_on_creating_rejects_unknown_parent() {
        let (storage, dispatcher, _) = setup(TreeConfig::default());
        let mut node = Node::new("n", Some(77));
        let err = dispatcher.on_creating(storage.connection(), &mut node).unwrap_err();
        assert!(matches!(err, NestedSetError::ParentNotFound(77)));
    }

    #[test]
    fn test_inline_create_applies_immediately() {
        let (mut storage, dispatcher, queue) = setup(TreeConfig::default());
        let (node, outcome) = create(&mut storage, &dispatcher, None);
        assert!(matches!(outcome, Dispatched::Applied(TreeOperation::InsertNode { .. })));
        assert_eq!((node.left, node.right, node.depth), (2, 3, 1));
        assert_eq!(queue.pending().unwrap(), 0);
    }

    #[test]
    fn test_deferred_create_then_run_job() {
        let (mut storage, dispatcher, _) = setup(TreeConfig::deferred("tree"));
        let (node, outcome) = create(&mut storage, &dispatcher, None);
        let Dispatched::Deferred(job) = outcome else {
            panic!("expected a deferred job");
        };
        assert_eq!(job, TreeJob::Insert { node_id: node.id });
        assert_eq!(node.left, 0, "bounds are not assigned until the job runs");

        let tx = storage.transaction().unwrap();
        let outcome = dispatcher.run_job(&tx, &job).unwrap();
        tx.commit().unwrap();
        assert!(outcome.operation().is_some());

        let stored = get_node(storage.connection(), dispatcher.config(), node.id).unwrap();
        assert_eq!((stored.left, stored.right), (2, 3));
    }

    #[test]
    fn test_deferred_update_to_same_parent_is_still_queued() {
        let (mut storage, dispatcher, _) = setup(TreeConfig::deferred("tree"));
        let (mut node, _) = create(&mut storage, &dispatcher, None);
        let tx = storage.transaction().unwrap();
        let outcome = dispatcher.on_updating(&tx, &mut node, Some(1), None).unwrap();
        assert_eq!(outcome, Dispatched::Deferred(TreeJob::Move { node_id: node.id, new_parent_id: 1 }));
    }

    #[test]
    fn test_move_job_runs_for_node_with_pending_delete() {
        let (mut storage, dispatcher, _) = setup(TreeConfig::deferred("tree"));
        let (a, job_a) = create(&mut storage, &dispatcher, None);
        let (b, job_b) = create(&mut storage, &dispatcher, None);
        let tx = storage.transaction().unwrap();
        for outcome in [job_a, job_b] {
            let Dispatched::Deferred(job) = outcome else { panic!("expected a deferred job") };
            dispatcher.run_job(&tx, &job).unwrap();
        }
        crate::core::store::retire_row(&tx, dispatcher.config(), b.id).unwrap();

        let move_job = TreeJob::Move { node_id: b.id, new_parent_id: a.id };
        assert!(dispatcher.run_job(&tx, &move_job).unwrap().operation().is_some());
        let stored = crate::core::store::find_node(&tx, dispatcher.config(), b.id).unwrap().unwrap();
        assert_eq!((stored.parent_id, stored.left, stored.right), (Some(a.id), 3, 4));

        dispatcher.run_job(&tx, &TreeJob::Delete { node_id: b.id }).unwrap();
        assert_eq!(dispatcher.run_job(&tx, &move_job).unwrap(), Dispatched::Skipped);
    }

    #[test]
    fn test_on_updating_same_parent_is_skipped() {
        let (mut storage, dispatcher, _) = setup(TreeConfig::default());
        let (mut node, _) = create(&mut storage, &dispatcher, None);
        let tx = storage.transaction().unwrap();
        let outcome = dispatcher.on_updating(&tx, &mut node, Some(1), None).unwrap();
        assert_eq!(outcome, Dispatched::Skipped);
    }

    #[test]
    fn test_deferred_update_restores_old_parent_in_memory() {
        let (mut storage, dispatcher, _) = setup(TreeConfig::deferred("tree"));
        let (a, _) = create(&mut storage, &dispatcher, None);
        let (mut b, _) = create(&mut storage, &dispatcher, None);

        let tx = storage.transaction().unwrap();
        b.parent_id = Some(a.id);
        let outcome = dispatcher.on_updating(&tx, &mut b, Some(1), Some(a.id)).unwrap();
        assert_eq!(b.parent_id, Some(1));
        assert_eq!(outcome, Dispatched::Deferred(TreeJob::Move { node_id: b.id, new_parent_id: a.id }));
    }

    #[test]
    fn test_deferred_update_rejects_self_parent_up_front() {
        let (mut storage, dispatcher, _) = setup(TreeConfig::deferred("tree"));
        let (mut a, _) = create(&mut storage, &dispatcher, None);
        let tx = storage.transaction().unwrap();
        let a_id = a.id;
        let err = dispatcher.on_updating(&tx, &mut a, Some(1), Some(a_id)).unwrap_err();
        assert!(matches!(err, NestedSetError::InvalidParent(_)));
    }

    #[test]
    fn test_submit_uses_configured_lane() {
        let (_storage, dispatcher, queue) = setup(TreeConfig::deferred("positions"));
        dispatcher.submit(TreeJob::Delete { node_id: 5 }).unwrap();
        let queued = queue.dequeue().unwrap().unwrap();
        assert_eq!(queued.lane, "default/positions");
    }
}
