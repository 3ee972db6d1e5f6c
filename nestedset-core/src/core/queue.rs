//! Deferred tree jobs and the queue seam they are handed to.

use crate::{NestedSetError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// "Recompute this node's tree position", captured by node ID only so the
/// job re-reads everything it needs when it finally runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "camelCase")]
pub enum TreeJob {
    #[serde(rename_all = "camelCase")]
    Insert { node_id: i64 },
    #[serde(rename_all = "camelCase")]
    Move { node_id: i64, new_parent_id: i64 },
    #[serde(rename_all = "camelCase")]
    Delete { node_id: i64 },
}

impl TreeJob {
    pub fn node_id(&self) -> i64 {
        match self {
            Self::Insert { node_id } | Self::Move { node_id, .. } | Self::Delete { node_id } => {
                *node_id
            }
        }
    }
}

/// A job together with the lane it was queued on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub lane: String,
    pub job: TreeJob,
}

/// Work queue that accepts deferred tree jobs.
///
/// Implementations must hand jobs of one lane out in FIFO order; the runner
/// executes them one at a time.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: TreeJob, connection: Option<&str>, queue: Option<&str>) -> Result<()>;

    /// Takes the next job, or `None` when nothing is pending.
    fn dequeue(&self) -> Result<Option<QueuedJob>>;

    fn pending(&self) -> Result<usize>;
}

/// Lane name for a connection/queue pair.
pub fn lane_name(connection: Option<&str>, queue: Option<&str>) -> String {
    format!("{}/{}", connection.unwrap_or("default"), queue.unwrap_or("default"))
}

/// In-process [`JobQueue`] with FIFO lanes, drained lane by lane in the order
/// lanes were first used.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    lanes: Mutex<Vec<(String, VecDeque<TreeJob>)>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<(String, VecDeque<TreeJob>)>>> {
        self.lanes
            .lock()
            .map_err(|_| NestedSetError::Queue("queue lock poisoned".to_string()))
    }
}

impl JobQueue for MemoryQueue {
    fn enqueue(&self, job: TreeJob, connection: Option<&str>, queue: Option<&str>) -> Result<()> {
        let lane = lane_name(connection, queue);
        let mut lanes = self.lock()?;
        match lanes.iter_mut().find(|(name, _)| *name == lane) {
            Some((_, jobs)) => jobs.push_back(job),
            None => lanes.push((lane, VecDeque::from([job]))),
        }
        Ok(())
    }

    fn dequeue(&self) -> Result<Option<QueuedJob>> {
        let mut lanes = self.lock()?;
        for (lane, jobs) in lanes.iter_mut() {
            if let Some(job) = jobs.pop_front() {
                return Ok(Some(QueuedJob { lane: lane.clone(), job }));
            }
        }
        Ok(None)
    }

    fn pending(&self) -> Result<usize> {
        Ok(self.lock()?.iter().map(|(_, jobs)| jobs.len()).sum())
    }
}
