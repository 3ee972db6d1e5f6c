//! Tree configuration: table layout, root id, delete policy and dispatch mode.
//!
//! A [`TreeConfig`] is validated once, when a tree is opened, so that
//! unsupported combinations surface as
//! [`NestedSetError::PreconditionViolation`] before any row is touched.
//! Table and column names are spliced into SQL text, which is why every
//! name must be a plain identifier.

use crate::{NestedSetError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default reserved ID of the root sentinel row.
pub const DEFAULT_ROOT_ID: i64 = 1;

/// Controls where tree mutations triggered by lifecycle hooks are executed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum DispatchMode {
    /// Run the mutation synchronously inside the triggering write.
    #[default]
    Inline,
    /// Hand the mutation to a work queue. Requires soft delete.
    #[serde(rename_all = "camelCase")]
    Deferred {
        /// Queue backend connection name, if the host distinguishes several.
        connection: Option<String>,
        /// Queue name within the connection.
        queue: Option<String>,
    },
}

impl DispatchMode {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

/// Layout and behaviour of one nested-set table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TreeConfig {
    pub table: String,
    pub id_column: String,
    pub parent_id_column: String,
    pub left_column: String,
    pub right_column: String,
    pub depth_column: String,
    pub deleted_at_column: String,
    /// ID of the hidden root sentinel.
    pub root_id: i64,
    /// Retire deleted rows by stamping `deleted_at` instead of removing them.
    pub soft_delete: bool,
    pub dispatch: DispatchMode,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            table: "nodes".to_string(),
            id_column: "id".to_string(),
            parent_id_column: "parent_id".to_string(),
            left_column: "lft".to_string(),
            right_column: "rgt".to_string(),
            depth_column: "depth".to_string(),
            deleted_at_column: "deleted_at".to_string(),
            root_id: DEFAULT_ROOT_ID,
            soft_delete: false,
            dispatch: DispatchMode::Inline,
        }
    }
}

impl TreeConfig {
    /// Shorthand for a config that defers mutations to `queue` and soft-deletes rows.
    pub fn deferred(queue: &str) -> Self {
        Self {
            soft_delete: true,
            dispatch: DispatchMode::Deferred {
                connection: None,
                queue: Some(queue.to_string()),
            },
            ..Self::default()
        }
    }

    /// Checks that the configuration can be honoured.
    ///
    /// # Errors
    ///
    /// Returns [`NestedSetError::PreconditionViolation`] if deferred dispatch is
    /// selected without soft delete, or if any table/column name is not a plain
    /// SQL identifier, or if two columns share a name.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.is_deferred() && !self.soft_delete {
            return Err(NestedSetError::PreconditionViolation(
                "soft delete is required when mutations are deferred to a queue".to_string(),
            ));
        }

        let columns = self.columns();
        for name in std::iter::once(self.table.as_str()).chain(columns.iter().copied()) {
            if !is_identifier(name) {
                return Err(NestedSetError::PreconditionViolation(format!(
                    "'{name}' is not a valid SQL identifier"
                )));
            }
        }

        for (i, a) in columns.iter().enumerate() {
            if columns[i + 1..].iter().any(|b| a.eq_ignore_ascii_case(b)) {
                return Err(NestedSetError::PreconditionViolation(format!(
                    "column '{a}' is configured twice"
                )));
            }
        }

        Ok(())
    }

    fn columns(&self) -> [&str; 6] {
        [
            &self.id_column,
            &self.parent_id_column,
            &self.left_column,
            &self.right_column,
            &self.depth_column,
            &self.deleted_at_column,
        ]
    }

    /// SQL fragment restricting a statement to rows still in the active index.
    pub(crate) fn active_clause(&self) -> String {
        format!("{} IS NULL", self.deleted_at_column)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Loads a config from a JSON file; returns defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`NestedSetError::Io`] if the file exists but cannot be read, or
/// [`NestedSetError::Json`] if it is not a valid config document.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TreeConfig> {
    match fs::read_to_string(path.as_ref()) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TreeConfig::default()),
        Err(e) => Err(e.into()),
    }
}

/// Saves a config as pretty JSON, creating parent directories as needed.
pub fn save_config<P: AsRef<Path>>(path: P, config: &TreeConfig) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}
