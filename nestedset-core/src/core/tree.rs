//! High-level tree operations over a nested-set SQLite table.

use crate::core::integrity::{verify, Violation};
use crate::core::scopes;
use crate::core::store::{find_active, find_node, insert_row, retire_row, update_details};
use crate::{
    build_tree, Dispatched, Dispatcher, JobQueue, MemoryQueue, NestedSetError, Node,
    OperationLog, OperationSummary, PurgeStrategy, Result, Storage, TreeConfig, TreeItem, TreeJob,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

/// Number of operations kept in the log unless configured otherwise.
const DEFAULT_KEEP_LAST: usize = 1000;

/// Result of draining the job queue with [`NestedTree::run_pending_jobs`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct JobReport {
    pub applied: usize,
    pub skipped: usize,
    /// Jobs whose transaction was rolled back, with the error message.
    pub failed: Vec<(TreeJob, String)>,
}

/// An open nested-set tree backed by a SQLite table.
///
/// `NestedTree` is the host write path: every mutation goes through the
/// [`Dispatcher`] hooks inside one immediate transaction, and applied
/// changes are appended to the [`OperationLog`] in that same transaction.
/// Under deferred dispatch, jobs are handed to the queue only after the host
/// write has committed.
pub struct NestedTree {
    storage: Storage,
    dispatcher: Dispatcher,
    operation_log: OperationLog,
}

impl NestedTree {
    /// Creates (or extends) a tree database at `path` using an in-process queue.
    ///
    /// # Errors
    ///
    /// Returns [`NestedSetError::PreconditionViolation`] for an unusable
    /// `config`, or [`NestedSetError::TransactionFailure`] for any SQLite failure.
    pub fn create<P: AsRef<Path>>(path: P, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let storage = Storage::create(path, &config)?;
        Self::with_queue(storage, config, Arc::new(MemoryQueue::new()))
    }

    /// Opens an existing tree database.
    ///
    /// # Errors
    ///
    /// Returns [`NestedSetError::InvalidStore`] if the database does not hold
    /// a tree table matching `config`.
    pub fn open<P: AsRef<Path>>(path: P, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(path, &config)?;
        Self::with_queue(storage, config, Arc::new(MemoryQueue::new()))
    }

    pub fn in_memory(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open_in_memory(&config)?;
        Self::with_queue(storage, config, Arc::new(MemoryQueue::new()))
    }

    /// Builds a tree over already-opened storage with a caller-supplied queue.
    pub fn with_queue(storage: Storage, config: TreeConfig, queue: Arc<dyn JobQueue>) -> Result<Self> {
        let operation_log = OperationLog::new(&config, PurgeStrategy::KeepLast { keep_last: DEFAULT_KEEP_LAST });
        let dispatcher = Dispatcher::new(config, queue)?;
        Ok(Self { storage, dispatcher, operation_log })
    }

    /// Replaces the operation log purge strategy.
    pub fn with_purge_strategy(mut self, strategy: PurgeStrategy) -> Self {
        self.operation_log = OperationLog::new(self.dispatcher.config(), strategy);
        self
    }

    pub fn config(&self) -> &TreeConfig {
        self.dispatcher.config()
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        self.dispatcher.queue()
    }

    /// Returns a reference to the underlying SQLite connection.
    pub fn connection(&self) -> &Connection {
        self.storage.connection()
    }

    /// Creates a node named `name` as the rightmost child of `parent`
    /// (the root when `None`).
    ///
    /// Under inline dispatch the returned node carries its final bounds; under
    /// deferred dispatch it is unpositioned until its job runs.
    ///
    /// # Errors
    ///
    /// Returns [`NestedSetError::ParentNotFound`] if `parent` does not resolve
    /// to an active node.
    pub fn create_node(&mut self, name: &str, parent: Option<i64>) -> Result<Node> {
        let mut node = Node::new(name, parent);
        self.dispatcher.on_creating(self.storage.connection(), &mut node)?;

        let tx = self.storage.transaction()?;
        node.id = insert_row(&tx, self.dispatcher.config(), &node)?;
        let outcome = self.dispatcher.on_created(&tx, &mut node)?;
        if let Dispatched::Applied(op) = &outcome {
            self.operation_log.log(&tx, op)?;
        }
        tx.commit()?;

        if let Dispatched::Deferred(job) = outcome {
            self.dispatcher.submit(job)?;
        }
        Ok(node)
    }

    /// Updates a node's name. Position fields are not touched.
    pub fn rename_node(&mut self, id: i64, name: &str) -> Result<Node> {
        let mut node = self.get_node(id)?;
        node.name = name.to_string();
        node.modified_at = chrono::Utc::now().timestamp();
        update_details(self.storage.connection(), self.dispatcher.config(), &node)?;
        Ok(node)
    }

    /// Reparents a node (with its subtree) under `new_parent`, the root when
    /// `None`. Setting the current parent again is a no-op inline. Under
    /// deferred dispatch it still queues a move, so the last request made
    /// before the queue drains is the one that takes effect.
    ///
    /// # Errors
    ///
    /// Returns [`NestedSetError::InvalidParent`] when `new_parent` is the node
    /// itself or one of its descendants, [`NestedSetError::ParentNotFound`]
    /// when it does not resolve, and [`NestedSetError::RootNode`] for the root.
    /// The tree is unchanged on error.
    pub fn set_parent(&mut self, id: i64, new_parent: Option<i64>) -> Result<Node> {
        let mut node = self.get_node(id)?;
        let old_parent = node.parent_id;
        node.parent_id = new_parent;
        node.modified_at = chrono::Utc::now().timestamp();

        let tx = self.storage.transaction()?;
        let outcome = self.dispatcher.on_updating(&tx, &mut node, old_parent, new_parent)?;
        update_details(&tx, self.dispatcher.config(), &node)?;
        if let Dispatched::Applied(op) = &outcome {
            self.operation_log.log(&tx, op)?;
        }
        tx.commit()?;

        match outcome {
            Dispatched::Deferred(job) => self.dispatcher.submit(job)?,
            Dispatched::Skipped => node.parent_id = old_parent,
            Dispatched::Applied(_) => {}
        }
        Ok(node)
    }

    /// Removes a node. Its direct children are promoted to its parent, keeping
    /// their own subtrees.
    ///
    /// Under deferred dispatch the row is soft-deleted right away and the
    /// renumbering is left to the queued job.
    pub fn delete_node(&mut self, id: i64) -> Result<()> {
        let mut node = self.get_node(id)?;

        let tx = self.storage.transaction()?;
        let outcome = self.dispatcher.on_deleting(&tx, &mut node)?;
        match &outcome {
            Dispatched::Applied(op) => self.operation_log.log(&tx, op)?,
            Dispatched::Deferred(_) => retire_row(&tx, self.dispatcher.config(), id)?,
            Dispatched::Skipped => {}
        }
        tx.commit()?;

        if let Dispatched::Deferred(job) = outcome {
            self.dispatcher.submit(job)?;
        }
        Ok(())
    }

    /// Drains the queue, running each job in its own immediate transaction.
    /// A failing job is rolled back, logged and reported; later jobs still run.
    pub fn run_pending_jobs(&mut self) -> Result<JobReport> {
        let mut report = JobReport::default();
        while let Some(queued) = self.dispatcher.queue().dequeue()? {
            let job = queued.job;
            match self.run_one(&job) {
                Ok(Dispatched::Applied(_)) => report.applied += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    log::warn!("job {job:?} on lane {} failed: {e}", queued.lane);
                    report.failed.push((job, e.to_string()));
                }
            }
        }
        if !report.failed.is_empty() || report.applied > 0 {
            log::info!(
                "ran queued jobs: {} applied, {} skipped, {} failed",
                report.applied,
                report.skipped,
                report.failed.len()
            );
        }
        Ok(report)
    }

    fn run_one(&mut self, job: &TreeJob) -> Result<Dispatched> {
        let tx = self.storage.transaction()?;
        let outcome = self.dispatcher.run_job(&tx, job)?;
        if let Dispatched::Applied(op) = &outcome {
            self.operation_log.log(&tx, op)?;
        }
        tx.commit()?;
        Ok(outcome)
    }

    /// Fetches an active node by ID.
    ///
    /// # Errors
    ///
    /// Returns [`NestedSetError::NodeNotFound`] if no active row has this ID.
    pub fn get_node(&self, id: i64) -> Result<Node> {
        find_active(self.storage.connection(), self.dispatcher.config(), id)?
            .ok_or(NestedSetError::NodeNotFound(id))
    }

    /// The root sentinel, which every other scope hides.
    pub fn root(&self) -> Result<Node> {
        let root_id = self.dispatcher.config().root_id;
        find_node(self.storage.connection(), self.dispatcher.config(), root_id)?
            .ok_or(NestedSetError::NodeNotFound(root_id))
    }

    pub fn ancestors(&self, id: i64) -> Result<Vec<Node>> {
        let node = self.get_node(id)?;
        scopes::ancestors(self.storage.connection(), self.dispatcher.config(), &node)
    }

    pub fn ancestors_with_root(&self, id: i64) -> Result<Vec<Node>> {
        let node = self.get_node(id)?;
        scopes::ancestors_with_root(self.storage.connection(), self.dispatcher.config(), &node)
    }

    pub fn descendants(&self, id: i64) -> Result<Vec<Node>> {
        let node = self.get_node(id)?;
        scopes::descendants(self.storage.connection(), self.dispatcher.config(), &node)
    }

    /// Direct children of `id`; `None` lists the top-level nodes.
    pub fn children(&self, id: Option<i64>) -> Result<Vec<Node>> {
        let node = match id {
            Some(id) => self.get_node(id)?,
            None => self.root()?,
        };
        scopes::children(self.storage.connection(), self.dispatcher.config(), &node)
    }

    pub fn parent(&self, id: i64) -> Result<Option<Node>> {
        let node = self.get_node(id)?;
        scopes::parent(self.storage.connection(), self.dispatcher.config(), &node)
    }

    pub fn flattened_order(&self) -> Result<Vec<Node>> {
        scopes::flattened_order(self.storage.connection(), self.dispatcher.config())
    }

    pub fn leaf_nodes(&self) -> Result<Vec<Node>> {
        scopes::leaf_nodes(self.storage.connection(), self.dispatcher.config())
    }

    pub fn has_ancestor(&self, id: i64, ancestor: i64) -> Result<bool> {
        let node = self.get_node(id)?;
        scopes::has_ancestor(self.storage.connection(), self.dispatcher.config(), &node, ancestor)
    }

    pub fn has_descendant(&self, id: i64, descendant: i64) -> Result<bool> {
        let node = self.get_node(id)?;
        scopes::has_descendant(self.storage.connection(), self.dispatcher.config(), &node, descendant)
    }

    /// The whole visible tree as nested items.
    pub fn tree(&self) -> Result<Vec<TreeItem>> {
        Ok(build_tree(self.flattened_order()?))
    }

    pub fn ancestors_tree(&self, id: i64) -> Result<Vec<TreeItem>> {
        Ok(build_tree(self.ancestors(id)?))
    }

    pub fn descendants_tree(&self, id: i64) -> Result<Vec<TreeItem>> {
        Ok(build_tree(self.descendants(id)?))
    }

    /// Returns up to `limit` logged operations, newest first.
    pub fn list_operations(&self, limit: Option<usize>) -> Result<Vec<OperationSummary>> {
        self.operation_log.list(self.storage.connection(), limit)
    }

    /// Deletes all operations from the log. Returns the number deleted.
    pub fn purge_all_operations(&self) -> Result<usize> {
        self.operation_log.purge_all(self.storage.connection())
    }

    /// Checks every encoding invariant. An empty list means the tree is consistent.
    pub fn verify_integrity(&self) -> Result<Vec<Violation>> {
        verify(self.storage.connection(), self.dispatcher.config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn names(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_create_node_defaults_to_root() {
        let mut tree = NestedTree::in_memory(TreeConfig::default()).unwrap();
        let a = tree.create_node("a", None).unwrap();
        assert_eq!(a.parent_id, Some(1));
        assert_eq!((a.left, a.right, a.depth), (2, 3, 1));
        assert_eq!(tree.root().unwrap().right, 4);
    }

    #[test]
    fn test_create_node_unknown_parent_writes_nothing() {
        let mut tree = NestedTree::in_memory(TreeConfig::default()).unwrap();
        let err = tree.create_node("x", Some(42)).unwrap_err();
        assert!(matches!(err, NestedSetError::ParentNotFound(42)));
        assert!(tree.flattened_order().unwrap().is_empty());
    }

    #[test]
    fn test_rename_keeps_position() {
        let mut tree = NestedTree::in_memory(TreeConfig::default()).unwrap();
        let a = tree.create_node("a", None).unwrap();
        let renamed = tree.rename_node(a.id, "alpha").unwrap();
        assert_eq!(renamed.name, "alpha");
        assert_eq!(tree.get_node(a.id).unwrap().left, a.left);
    }

    #[test]
    fn test_set_parent_moves_subtree() {
        let mut tree = NestedTree::in_memory(TreeConfig::default()).unwrap();
        let a = tree.create_node("a", None).unwrap();
        let b = tree.create_node("b", None).unwrap();
        tree.create_node("b1", Some(b.id)).unwrap();

        tree.set_parent(b.id, Some(a.id)).unwrap();
        assert_eq!(names(&tree.descendants(a.id).unwrap()), vec!["b", "b1"]);
        assert_eq!(tree.get_node(b.id).unwrap().depth, 2);
        assert!(tree.verify_integrity().unwrap().is_empty());
    }

    #[test]
    fn test_set_parent_to_descendant_is_rejected() {
        let mut tree = NestedTree::in_memory(TreeConfig::default()).unwrap();
        let a = tree.create_node("a", None).unwrap();
        let c = tree.create_node("c", Some(a.id)).unwrap();
        let before = tree.flattened_order().unwrap();

        let err = tree.set_parent(a.id, Some(c.id)).unwrap_err();
        assert!(matches!(err, NestedSetError::InvalidParent(_)));
        assert_eq!(tree.flattened_order().unwrap(), before);
    }

    #[test]
    fn test_delete_node_promotes_children() {
        let mut tree = NestedTree::in_memory(TreeConfig::default()).unwrap();
        let a = tree.create_node("a", None).unwrap();
        let c = tree.create_node("c", Some(a.id)).unwrap();

        tree.delete_node(a.id).unwrap();
        let c = tree.get_node(c.id).unwrap();
        assert_eq!((c.parent_id, c.left, c.right, c.depth), (Some(1), 2, 3, 1));
        assert!(matches!(tree.get_node(a.id), Err(NestedSetError::NodeNotFound(_))));
    }

    #[test]
    fn test_delete_root_is_rejected() {
        let mut tree = NestedTree::in_memory(TreeConfig::default()).unwrap();
        let err = tree.delete_node(1).unwrap_err();
        assert!(matches!(err, NestedSetError::RootNode(_)));
    }

    #[test]
    fn test_operations_are_logged() {
        let mut tree = NestedTree::in_memory(TreeConfig::default()).unwrap();
        let a = tree.create_node("a", None).unwrap();
        let b = tree.create_node("b", None).unwrap();
        tree.set_parent(b.id, Some(a.id)).unwrap();
        tree.delete_node(a.id).unwrap();

        let types: Vec<String> = tree
            .list_operations(None)
            .unwrap()
            .into_iter()
            .map(|o| o.operation_type)
            .collect();
        assert_eq!(types, vec!["DeleteNode", "MoveNode", "InsertNode", "InsertNode"]);
        assert_eq!(tree.purge_all_operations().unwrap(), 4);
    }

    #[test]
    fn test_purge_strategy_limits_log() {
        let mut tree = NestedTree::in_memory(TreeConfig::default())
            .unwrap()
            .with_purge_strategy(PurgeStrategy::KeepLast { keep_last: 2 });
        for name in ["a", "b", "c"] {
            tree.create_node(name, None).unwrap();
        }
        let ops = tree.list_operations(None).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].node_id, 4);
    }

    #[test]
    fn test_deferred_jobs_run_after_commit() {
        let mut tree = NestedTree::in_memory(TreeConfig::deferred("tree")).unwrap();
        let a = tree.create_node("a", None).unwrap();
        let b = tree.create_node("b", None).unwrap();
        assert_eq!(a.left, 0);
        assert!(tree.flattened_order().unwrap().is_empty(), "pending rows are hidden");
        assert_eq!(tree.queue().pending().unwrap(), 2);

        let report = tree.run_pending_jobs().unwrap();
        assert_eq!(report.applied, 2);
        assert!(report.failed.is_empty());

        let moved = tree.set_parent(b.id, Some(a.id)).unwrap();
        assert_eq!(moved.parent_id, Some(1), "parent is written by the job");
        tree.run_pending_jobs().unwrap();
        assert_eq!(tree.get_node(b.id).unwrap().parent_id, Some(a.id));
        assert!(tree.verify_integrity().unwrap().is_empty());
    }

    #[test]
    fn test_deferred_delete_hides_row_before_job() {
        let mut tree = NestedTree::in_memory(TreeConfig::deferred("tree")).unwrap();
        let a = tree.create_node("a", None).unwrap();
        let c = tree.create_node("c", Some(a.id)).unwrap();
        tree.run_pending_jobs().unwrap();

        tree.delete_node(a.id).unwrap();
        assert!(matches!(tree.get_node(a.id), Err(NestedSetError::NodeNotFound(_))));
        assert!(tree.verify_integrity().unwrap().is_empty(), "pending row still holds its bounds");

        let report = tree.run_pending_jobs().unwrap();
        assert_eq!(report.applied, 1);
        let c = tree.get_node(c.id).unwrap();
        assert_eq!((c.left, c.right, c.depth), (2, 3, 1));
        assert!(tree.verify_integrity().unwrap().is_empty());
    }

    fn positions(tree: &NestedTree) -> Vec<(i64, Option<i64>, i64, i64, i64)> {
        tree.flattened_order()
            .unwrap()
            .into_iter()
            .map(|n| (n.id, n.parent_id, n.left, n.right, n.depth))
            .collect()
    }

    #[test]
    fn test_parent_deleted_before_child_insert_runs() {
        let mut inline = NestedTree::in_memory(TreeConfig::default()).unwrap();
        let mut deferred = NestedTree::in_memory(TreeConfig::deferred("tree")).unwrap();

        for tree in [&mut inline, &mut deferred] {
            let a = tree.create_node("a", None).unwrap();
            let c = tree.create_node("c", Some(a.id)).unwrap();
            tree.delete_node(a.id).unwrap();

            let report = tree.run_pending_jobs().unwrap();
            assert!(report.failed.is_empty(), "{:?}", report.failed);
            let c = tree.get_node(c.id).unwrap();
            assert_eq!((c.parent_id, c.left, c.right, c.depth), (Some(1), 2, 3, 1));
            assert!(tree.verify_integrity().unwrap().is_empty());
        }
        assert_eq!(positions(&inline), positions(&deferred));
    }

    #[test]
    fn test_move_under_parent_deleted_before_drain() {
        let mut inline = NestedTree::in_memory(TreeConfig::default()).unwrap();
        let mut deferred = NestedTree::in_memory(TreeConfig::deferred("tree")).unwrap();

        for tree in [&mut inline, &mut deferred] {
            let a = tree.create_node("a", None).unwrap();
            let b = tree.create_node("b", None).unwrap();
            tree.run_pending_jobs().unwrap();

            tree.set_parent(b.id, Some(a.id)).unwrap();
            tree.delete_node(a.id).unwrap();
            let report = tree.run_pending_jobs().unwrap();
            assert!(report.failed.is_empty(), "{:?}", report.failed);
            assert_eq!(tree.get_node(b.id).unwrap().parent_id, Some(1));
            assert!(tree.verify_integrity().unwrap().is_empty());
        }
        assert_eq!(positions(&inline), positions(&deferred));
    }

    #[test]
    fn test_deferred_move_back_before_drain_wins() {
        let mut tree = NestedTree::in_memory(TreeConfig::deferred("tree")).unwrap();
        let a = tree.create_node("a", None).unwrap();
        let b = tree.create_node("b", None).unwrap();
        tree.run_pending_jobs().unwrap();

        tree.set_parent(b.id, Some(a.id)).unwrap();
        tree.set_parent(b.id, None).unwrap();
        assert_eq!(tree.queue().pending().unwrap(), 2);

        let report = tree.run_pending_jobs().unwrap();
        assert_eq!(report.applied, 2);
        let b = tree.get_node(b.id).unwrap();
        assert_eq!((b.parent_id, b.left, b.right, b.depth), (Some(1), 4, 5, 1));
        assert!(tree.verify_integrity().unwrap().is_empty());
    }

    #[test]
    fn test_failed_job_is_reported_and_rolled_back() {
        let mut tree = NestedTree::in_memory(TreeConfig::deferred("tree")).unwrap();
        let a = tree.create_node("a", None).unwrap();
        let b = tree.create_node("b", None).unwrap();
        tree.run_pending_jobs().unwrap();

        // both moves pass the up-front check; the second one forms a cycle once the first has run
        tree.set_parent(b.id, Some(a.id)).unwrap();
        tree.set_parent(a.id, Some(b.id)).unwrap();
        let report = tree.run_pending_jobs().unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, TreeJob::Move { node_id: a.id, new_parent_id: b.id });
        assert!(tree.verify_integrity().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_from_disk() {
        let temp = NamedTempFile::new().unwrap();
        let id = {
            let mut tree = NestedTree::create(temp.path(), TreeConfig::default()).unwrap();
            tree.create_node("a", None).unwrap().id
        };
        let tree = NestedTree::open(temp.path(), TreeConfig::default()).unwrap();
        assert_eq!(tree.get_node(id).unwrap().name, "a");
        assert_eq!(tree.tree().unwrap().len(), 1);
    }
}
