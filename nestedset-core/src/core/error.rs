//! Error types for the nested-set core library.

use thiserror::Error;

/// All errors that can occur while reading or restructuring a nested-set tree.
#[derive(Debug, Error)]
pub enum NestedSetError {
    /// A SQLite operation failed. Any open mutation transaction is rolled back.
    #[error("Transaction failed: {0}")]
    TransactionFailure(#[from] rusqlite::Error),

    /// A node would be placed under itself or under one of its own descendants.
    #[error("Invalid parent: {0}")]
    InvalidParent(String),

    /// The referenced parent ID does not resolve to an active node.
    #[error("Parent not found: {0}")]
    ParentNotFound(i64),

    /// A node ID was requested that does not exist in the store.
    #[error("Node not found: {0}")]
    NodeNotFound(i64),

    /// The node exists but its bounds have not been assigned yet
    /// (a deferred insertion is still queued).
    #[error("Node {0} has no position in the tree yet")]
    NodeNotPositioned(i64),

    /// The root sentinel was targeted by a move or delete.
    #[error("The root node cannot be {0}")]
    RootNode(&'static str),

    /// The tree configuration cannot be honoured (e.g. deferred dispatch
    /// without soft delete). Raised before any mutation is attempted.
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    /// The opened database does not contain a usable nested-set table.
    #[error("Invalid store: {0}")]
    InvalidStore(String),

    /// The deferred job queue refused a job.
    #[error("Queue error: {0}")]
    Queue(String),

    /// An I/O operation on the filesystem failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration or operation-log data could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias that pins the error type to [`NestedSetError`].
pub type Result<T> = std::result::Result<T, NestedSetError>;

impl NestedSetError {
    /// Returns a short, human-readable message suitable for display to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::TransactionFailure(e) => format!("Failed to update tree: {e}"),
            Self::InvalidParent(msg) => msg.clone(),
            Self::ParentNotFound(id) => format!("Parent {id} no longer exists"),
            Self::NodeNotFound(_) => "Node no longer exists".to_string(),
            Self::NodeNotPositioned(_) => "Node is still being placed in the tree".to_string(),
            Self::RootNode(action) => format!("The root node cannot be {action}"),
            Self::PreconditionViolation(msg) => format!("Invalid tree configuration: {msg}"),
            Self::InvalidStore(_) => "Could not open tree database".to_string(),
            Self::Queue(e) => format!("Could not schedule tree update: {e}"),
            Self::Io(e) => format!("File error: {e}"),
            Self::Json(e) => format!("Data format error: {e}"),
        }
    }

    /// Whether re-running the whole operation may succeed.
    ///
    /// Only store failures qualify: every mutation re-reads its bounds at the
    /// start of each attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionFailure(_))
    }
}
