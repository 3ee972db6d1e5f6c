//! SQLite connection ownership, schema creation and validation.

use crate::{NestedSetError, Result, TreeConfig};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;

pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Creates (or extends) a database at `path` with the table described by
    /// `config` and seeds the root sentinel row.
    pub fn create<P: AsRef<Path>>(path: P, config: &TreeConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialise(conn, config)
    }

    /// Opens a private in-memory database with a fresh tree.
    pub fn open_in_memory(config: &TreeConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialise(conn, config)
    }

    /// Opens an existing database and checks that it holds a usable tree table.
    ///
    /// # Errors
    ///
    /// Returns [`NestedSetError::InvalidStore`] if the table, one of its
    /// position columns, or the root row is missing.
    pub fn open<P: AsRef<Path>>(path: P, config: &TreeConfig) -> Result<Self> {
        let conn = Connection::open(path)?;

        let table_exists: bool = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?1",
            [&config.table],
            |row| row.get::<_, i64>(0).map(|count| count > 0),
        )?;
        if !table_exists {
            return Err(NestedSetError::InvalidStore(format!(
                "table '{}' does not exist",
                config.table
            )));
        }

        let required = [
            &config.id_column,
            &config.parent_id_column,
            &config.left_column,
            &config.right_column,
            &config.depth_column,
        ];
        for column in required {
            if !column_exists(&conn, &config.table, column)? {
                return Err(NestedSetError::InvalidStore(format!(
                    "table '{}' has no column '{column}'",
                    config.table
                )));
            }
        }

        // Migrate: trees created before soft delete existed lack deleted_at
        if !column_exists(&conn, &config.table, &config.deleted_at_column)? {
            log::info!(
                "adding column {} to table {}",
                config.deleted_at_column,
                config.table
            );
            conn.execute(
                &format!(
                    "ALTER TABLE {} ADD COLUMN {} INTEGER",
                    config.table, config.deleted_at_column
                ),
                [],
            )?;
        }

        let root: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT {id} FROM {table} WHERE {id} = ?1",
                    id = config.id_column,
                    table = config.table
                ),
                [config.root_id],
                |row| row.get(0),
            )
            .optional()?;
        if root.is_none() {
            return Err(NestedSetError::InvalidStore(format!(
                "root node {} is missing",
                config.root_id
            )));
        }

        conn.execute_batch(&render_schema(config))?;
        Ok(Self { conn })
    }

    fn initialise(conn: Connection, config: &TreeConfig) -> Result<Self> {
        conn.execute_batch(&render_schema(config))?;

        let now = chrono::Utc::now().timestamp();
        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {table} ({id}, name, {parent}, {lft}, {rgt}, {depth}, created_at, modified_at)
                 VALUES (?1, 'root', NULL, 1, 2, 0, ?2, ?2)",
                table = config.table,
                id = config.id_column,
                parent = config.parent_id_column,
                lft = config.left_column,
                rgt = config.right_column,
                depth = config.depth_column,
            ),
            rusqlite::params![config.root_id, now],
        )?;
        if inserted > 0 {
            log::debug!("seeded root node {} in {}", config.root_id, config.table);
        }

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Begins a write transaction that takes the database write lock up front.
    ///
    /// Dropping the returned transaction without committing rolls it back.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}

fn render_schema(config: &TreeConfig) -> String {
    include_str!("schema.sql")
        .replace("{table}", &config.table)
        .replace("{id}", &config.id_column)
        .replace("{parent_id}", &config.parent_id_column)
        .replace("{lft}", &config.left_column)
        .replace("{rgt}", &config.right_column)
        .replace("{depth}", &config.depth_column)
        .replace("{deleted_at}", &config.deleted_at_column)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get::<_, i64>(0).map(|count| count > 0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn tables(storage: &Storage) -> Vec<String> {
        storage
            .connection()
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_create_storage_seeds_root() {
        let temp = NamedTempFile::new().unwrap();
        let storage = Storage::create(temp.path(), &TreeConfig::default()).unwrap();

        let names = tables(&storage);
        assert!(names.contains(&"nodes".to_string()));
        assert!(names.contains(&"nodes_operations".to_string()));

        let (lft, rgt, depth): (i64, i64, i64) = storage
            .connection()
            .query_row("SELECT lft, rgt, depth FROM nodes WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .unwrap();
        assert_eq!((lft, rgt, depth), (1, 2, 0));
    }

    #[test]
    fn test_create_twice_keeps_single_root() {
        let temp = NamedTempFile::new().unwrap();
        Storage::create(temp.path(), &TreeConfig::default()).unwrap();
        let storage = Storage::create(temp.path(), &TreeConfig::default()).unwrap();

        let count: i64 = storage
            .connection()
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_custom_columns() {
        let config = TreeConfig {
            table: "categories".to_string(),
            left_column: "lo".to_string(),
            right_column: "hi".to_string(),
            root_id: 100,
            ..TreeConfig::default()
        };
        let storage = Storage::open_in_memory(&config).unwrap();
        let hi: i64 = storage
            .connection()
            .query_row("SELECT hi FROM categories WHERE id = 100", [], |row| row.get(0))
            .unwrap();
        assert_eq!(hi, 2);
    }

    #[test]
    fn test_open_existing_storage() {
        let temp = NamedTempFile::new().unwrap();
        Storage::create(temp.path(), &TreeConfig::default()).unwrap();
        let storage = Storage::open(temp.path(), &TreeConfig::default()).unwrap();
        assert!(tables(&storage).contains(&"nodes".to_string()));
    }

    #[test]
    fn test_open_invalid_database() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), "not a database").unwrap();
        assert!(Storage::open(temp.path(), &TreeConfig::default()).is_err());
    }

    #[test]
    fn test_open_without_table_is_invalid_store() {
        let temp = NamedTempFile::new().unwrap();
        Connection::open(temp.path()).unwrap();
        let err = Storage::open(temp.path(), &TreeConfig::default()).err().unwrap();
        assert!(matches!(err, NestedSetError::InvalidStore(_)));
    }

    #[test]
    fn test_migration_adds_deleted_at_column() {
        let temp = NamedTempFile::new().unwrap();
        {
            let conn = Connection::open(temp.path()).unwrap();
            conn.execute_batch(
                "CREATE TABLE nodes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL DEFAULT '',
                    parent_id INTEGER,
                    lft INTEGER NOT NULL,
                    rgt INTEGER NOT NULL,
                    depth INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    modified_at INTEGER NOT NULL
                );
                INSERT INTO nodes VALUES (1, 'root', NULL, 1, 2, 0, 0, 0);",
            )
            .unwrap();
        }

        let storage = Storage::open(temp.path(), &TreeConfig::default()).unwrap();
        assert!(column_exists(storage.connection(), "nodes", "deleted_at").unwrap());
    }
}
