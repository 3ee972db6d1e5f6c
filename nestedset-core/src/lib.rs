//! Nested-set tree engine over SQLite.
//!
//! Every node stores a `(left, right, depth)` triple alongside its
//! `parent_id`, so subtree, ancestor and leaf queries are single range scans.
//! [`NestedTree`] is the primary entry point: it runs inserts, moves and
//! deletes through the [`Dispatcher`] either inline in the host transaction
//! or as deferred [`TreeJob`]s.
//!
//! Lower-level pieces ([`mutator`](core::mutator), [`scopes`](core::scopes),
//! [`store`](core::store)) are usable directly with any [`TreeNode`] and a
//! caller-owned transaction.
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

// Re-export commonly used types.
#[doc(inline)]
pub use core::{
    builder::{build_tree, TreeItem},
    config::{load_config, save_config, DispatchMode, TreeConfig, DEFAULT_ROOT_ID},
    dispatcher::{Dispatched, Dispatcher},
    error::{NestedSetError, Result},
    integrity::{verify, Violation},
    mutator::{delete_node, insert_node, move_node},
    node::{Node, Position, TreeNode, UNPOSITIONED},
    operation::TreeOperation,
    operation_log::{OperationLog, OperationSummary, PurgeStrategy},
    queue::{lane_name, JobQueue, MemoryQueue, QueuedJob, TreeJob},
    storage::Storage,
    tree::{JobReport, NestedTree},
};
