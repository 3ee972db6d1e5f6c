//! Internal modules of the nested-set engine.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod integrity;
pub mod mutator;
pub mod node;
pub mod operation;
pub mod operation_log;
pub mod queue;
pub mod scopes;
pub mod storage;
pub mod store;
pub mod tree;

#[doc(inline)]
pub use builder::{build_tree, TreeItem};
#[doc(inline)]
pub use config::{load_config, save_config, DispatchMode, TreeConfig, DEFAULT_ROOT_ID};
#[doc(inline)]
pub use dispatcher::{Dispatched, Dispatcher};
#[doc(inline)]
pub use error::{NestedSetError, Result};
#[doc(inline)]
pub use integrity::{verify, Violation};
#[doc(inline)]
pub use node::{Node, Position, TreeNode, UNPOSITIONED};
#[doc(inline)]
pub use operation::TreeOperation;
#[doc(inline)]
pub use operation_log::{OperationLog, OperationSummary, PurgeStrategy};
#[doc(inline)]
pub use queue::{lane_name, JobQueue, MemoryQueue, QueuedJob, TreeJob};
#[doc(inline)]
pub use storage::Storage;
#[doc(inline)]
pub use tree::{JobReport, NestedTree};
