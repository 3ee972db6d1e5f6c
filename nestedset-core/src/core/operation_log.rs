//! Durable log of committed tree mutations and its purge strategies.

use crate::{Result, TreeConfig, TreeOperation};
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};

/// Seconds in one day; used to convert `retention_days` to a Unix timestamp cutoff.
const SECONDS_PER_DAY: i64 = 86_400;

/// Controls which old operations are removed from the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeStrategy {
    /// Retain only the most recent `keep_last` operations.
    KeepLast { keep_last: usize },
    /// Retain operations for up to `retention_days`.
    RetainDays { retention_days: u32 },
}

/// Lightweight view of a logged operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub operation_id: String,
    pub timestamp: i64,
    pub operation_type: String,
    pub node_id: i64,
}

/// Appends [`TreeOperation`]s to `<table>_operations` and purges stale entries.
pub struct OperationLog {
    strategy: PurgeStrategy,
    table: String,
}

impl OperationLog {
    pub fn new(config: &TreeConfig, strategy: PurgeStrategy) -> Self {
        Self {
            strategy,
            table: format!("{}_operations", config.table),
        }
    }

    /// Serialises `op` and appends it within `tx`, then applies the purge strategy.
    ///
    /// # Errors
    ///
    /// Returns [`crate::NestedSetError::TransactionFailure`] if the INSERT fails, or
    /// [`crate::NestedSetError::Json`] if `op` cannot be serialised.
    pub fn log(&self, tx: &Transaction, op: &TreeOperation) -> Result<()> {
        let op_json = serde_json::to_string(op)?;

        tx.execute(
            &format!(
                "INSERT INTO {} (operation_id, timestamp, operation_type, node_id, operation_data)
                 VALUES (?, ?, ?, ?, ?)",
                self.table
            ),
            rusqlite::params![
                op.operation_id(),
                op.timestamp(),
                op.type_name(),
                op.node_id(),
                op_json,
            ],
        )?;

        self.purge_if_needed(tx)
    }

    /// Deletes old operations according to the purge strategy.
    pub fn purge_if_needed(&self, tx: &Transaction) -> Result<()> {
        match self.strategy {
            PurgeStrategy::KeepLast { keep_last } => {
                tx.execute(
                    &format!(
                        "DELETE FROM {table} WHERE id NOT IN (
                            SELECT id FROM {table} ORDER BY id DESC LIMIT ?
                        )",
                        table = self.table
                    ),
                    [keep_last as i64],
                )?;
            }
            PurgeStrategy::RetainDays { retention_days } => {
                let cutoff = chrono::Utc::now().timestamp()
                    - (retention_days as i64 * SECONDS_PER_DAY);
                tx.execute(
                    &format!("DELETE FROM {} WHERE timestamp < ?", self.table),
                    [cutoff],
                )?;
            }
        }
        Ok(())
    }

    /// Returns up to `limit` operation summaries, newest first.
    pub fn list(&self, conn: &Connection, limit: Option<usize>) -> Result<Vec<OperationSummary>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(&format!(
            "SELECT operation_id, timestamp, operation_type, node_id FROM {}
             ORDER BY id DESC LIMIT ?",
            self.table
        ))?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok(OperationSummary {
                    operation_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    operation_type: row.get(2)?,
                    node_id: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Loads the full record of one operation.
    pub fn get(&self, conn: &Connection, operation_id: &str) -> Result<TreeOperation> {
        let data: String = conn.query_row(
            &format!("SELECT operation_data FROM {} WHERE operation_id = ?", self.table),
            [operation_id],
            |row| row.get(0),
        )?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Deletes all operations from the log. Returns the number deleted.
    pub fn purge_all(&self, conn: &Connection) -> Result<usize> {
        Ok(conn.execute(&format!("DELETE FROM {}", self.table), [])?)
    }
}
