//! Table storage for guild, user and prefix records
//!
//! Each table is a JSON object on disk mapping an id to an attribute object.
//! A table is read into memory on first access and stays authoritative there
//! until it is flushed back, which writes the whole table and unloads it.

use crate::config::Config;
use serde_json::{Map, Value};
use std::fmt;
use std::io::ErrorKind;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// In-memory contents of one table
pub type Records = Map<String, Value>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("IO error on {table} table: {source}")]
    Io {
        table: Table,
        source: std::io::Error,
    },
    #[error("Malformed {table} table: {source}")]
    Json {
        table: Table,
        source: serde_json::Error,
    },
    #[error("Table {0} was flushed before it was loaded")]
    NotLoaded(Table),
}

/// The persisted tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Guilds,
    Users,
    Prefixes,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Guilds => "guilds",
            Table::Users => "users",
            Table::Prefixes => "prefixes",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct TableSlot {
    path: PathBuf,
    records: Option<Records>,
}

impl TableSlot {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: None,
        }
    }
}

/// Lazily loaded table store
///
/// Every table sits behind its own async lock, so a load, mutate, flush
/// sequence done through one `TableGuard` cannot interleave with another.
pub struct TableStore {
    guilds: Mutex<TableSlot>,
    users: Mutex<TableSlot>,
    prefixes: Mutex<TableSlot>,
}

impl TableStore {
    pub fn new<P: Into<PathBuf>>(guilds: P, users: P, prefixes: P) -> Self {
        Self {
            guilds: Mutex::new(TableSlot::new(guilds.into())),
            users: Mutex::new(TableSlot::new(users.into())),
            prefixes: Mutex::new(TableSlot::new(prefixes.into())),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.guild_table_path.clone(),
            config.user_table_path.clone(),
            config.prefix_table_path.clone(),
        )
    }

    fn slot(&self, table: Table) -> &Mutex<TableSlot> {
        match table {
            Table::Guilds => &self.guilds,
            Table::Users => &self.users,
            Table::Prefixes => &self.prefixes,
        }
    }

    /// Lock a table, reading it from disk if it is not loaded yet
    ///
    /// The lock is held until the returned guard is dropped or flushed.
    pub async fn open(&self, table: Table) -> Result<TableGuard<'_>, DatabaseError> {
        let mut slot = self.slot(table).lock().await;

        let records = match slot.records.take() {
            Some(records) => records,
            None => {
                let records = read_table(table, &slot.path).await?;
                debug!("Loaded {} table ({} records)", table, records.len());
                records
            }
        };

        Ok(TableGuard {
            table,
            slot,
            records,
            flushed: false,
        })
    }

    /// Write a loaded table back to disk and unload it
    pub async fn flush(&self, table: Table) -> Result<(), DatabaseError> {
        let mut slot = self.slot(table).lock().await;
        let records = slot.records.take().ok_or(DatabaseError::NotLoaded(table))?;

        if let Err(e) = write_table(table, &slot.path, &records).await {
            // Keep the pending changes in memory so a later flush can retry
            slot.records = Some(records);
            return Err(e);
        }

        debug!("Flushed {} table", table);
        Ok(())
    }

    /// Flush every table that is currently loaded
    pub async fn flush_loaded(&self) -> Result<(), DatabaseError> {
        for table in [Table::Guilds, Table::Users, Table::Prefixes] {
            match self.flush(table).await {
                Ok(()) | Err(DatabaseError::NotLoaded(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn is_loaded(&self, table: Table) -> bool {
        self.slot(table).lock().await.records.is_some()
    }
}

/// Exclusive access to one loaded table
pub struct TableGuard<'a> {
    table: Table,
    slot: MutexGuard<'a, TableSlot>,
    records: Records,
    flushed: bool,
}

impl TableGuard<'_> {
    /// Write the table to disk and unload it, releasing the lock
    pub async fn flush(mut self) -> Result<(), DatabaseError> {
        write_table(self.table, &self.slot.path, &self.records).await?;
        self.flushed = true;
        debug!("Flushed {} table", self.table);
        Ok(())
    }
}

impl Deref for TableGuard<'_> {
    type Target = Records;

    fn deref(&self) -> &Records {
        &self.records
    }
}

impl DerefMut for TableGuard<'_> {
    fn deref_mut(&mut self) -> &mut Records {
        &mut self.records
    }
}

impl Drop for TableGuard<'_> {
    fn drop(&mut self) {
        if !self.flushed {
            self.slot.records = Some(std::mem::take(&mut self.records));
        }
    }
}

async fn read_table(table: Table, path: &Path) -> Result<Records, DatabaseError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            serde_json::from_slice(&bytes).map_err(|source| DatabaseError::Json { table, source })
        }
        // Created on first flush
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Records::new()),
        Err(source) => Err(DatabaseError::Io { table, source }),
    }
}

async fn write_table(table: Table, path: &Path, records: &Records) -> Result<(), DatabaseError> {
    let bytes =
        serde_json::to_vec_pretty(records).map_err(|source| DatabaseError::Json { table, source })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DatabaseError::Io { table, source })?;
    }

    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| DatabaseError::Io { table, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> TableStore {
        TableStore::new(
            dir.path().join("guilds.json"),
            dir.path().join("users.json"),
            dir.path().join("prefixes.json"),
        )
    }

    #[tokio::test]
    async fn test_open_reuses_loaded_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        {
            let mut guilds = store.open(Table::Guilds).await.unwrap();
            assert!(guilds.is_empty());
            guilds.insert("1".to_string(), json!({"case_num": 4}));
        }

        // Disk changes are not picked up while the table is loaded
        std::fs::write(dir.path().join("guilds.json"), "{}").unwrap();

        let guilds = store.open(Table::Guilds).await.unwrap();
        assert_eq!(guilds["1"]["case_num"], 4);
    }

    #[tokio::test]
    async fn test_flush_writes_and_unloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let mut users = store.open(Table::Users).await.unwrap();
        users.insert("42".to_string(), json!({"warnings": 1}));
        users.flush().await.unwrap();

        assert!(!store.is_loaded(Table::Users).await);
        let on_disk: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("users.json")).unwrap())
                .unwrap();
        assert_eq!(on_disk, json!({"42": {"warnings": 1}}));

        // Next open reads the file again
        std::fs::write(dir.path().join("users.json"), r#"{"7": {}}"#).unwrap();
        let users = store.open(Table::Users).await.unwrap();
        assert!(users.contains_key("7"));
        assert!(!users.contains_key("42"));
    }

    #[tokio::test]
    async fn test_store_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert!(matches!(
            store.flush(Table::Prefixes).await,
            Err(DatabaseError::NotLoaded(Table::Prefixes))
        ));

        store
            .open(Table::Prefixes)
            .await
            .unwrap()
            .insert("1".to_string(), json!({"prefix": "?"}));
        assert!(store.is_loaded(Table::Prefixes).await);

        store.flush(Table::Prefixes).await.unwrap();
        assert!(!store.is_loaded(Table::Prefixes).await);
        assert!(dir.path().join("prefixes.json").exists());
    }

    #[tokio::test]
    async fn test_flush_loaded_skips_unloaded_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store
            .open(Table::Guilds)
            .await
            .unwrap()
            .insert("1".to_string(), json!({}));
        store.flush_loaded().await.unwrap();

        assert!(dir.path().join("guilds.json").exists());
        assert!(!dir.path().join("users.json").exists());
        assert!(!dir.path().join("prefixes.json").exists());
    }

    #[tokio::test]
    async fn test_malformed_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("guilds.json"), "[1, 2, 3]").unwrap();

        let store = store(&dir);
        assert!(matches!(
            store.open(Table::Guilds).await,
            Err(DatabaseError::Json { table: Table::Guilds, .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_writers_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store(&dir));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut users = store.open(Table::Users).await.unwrap();
                    let count = users.get("n").and_then(Value::as_u64).unwrap_or(0);
                    tokio::task::yield_now().await;
                    users.insert("n".to_string(), json!(count + 1));
                    users.flush().await.unwrap();
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        let users = store.open(Table::Users).await.unwrap();
        assert_eq!(users["n"], 16);
    }
}
