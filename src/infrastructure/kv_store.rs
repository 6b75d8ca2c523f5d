use crate::infrastructure::error::InfraError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Durable byte store shared by every process of the app.
///
/// Writes must be durable when the call returns; callers never batch.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, InfraError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), InfraError>;
    fn remove(&self, key: &str) -> Result<(), InfraError>;
}

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    db_path: PathBuf,
}

impl SqliteKeyValueStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, InfraError> {
        let connection = self.connect()?;
        let value = connection
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
    writes: Mutex<HashMap<String, usize>>,
}

impl InMemoryKeyValueStore {
    /// Number of `set`/`remove` calls issued for `key` so far.
    pub fn write_count(&self, key: &str) -> usize {
        self.writes
            .lock()
            .map(|writes| writes.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record_write(&self, key: &str) -> Result<(), InfraError> {
        let mut writes = self
            .writes
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("kv write counter lock poisoned: {error}")))?;
        *writes.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, InfraError> {
        let values = self
            .values
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("kv store lock poisoned: {error}")))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), InfraError> {
        {
            let mut values = self
                .values
                .lock()
                .map_err(|error| InfraError::InvalidConfig(format!("kv store lock poisoned: {error}")))?;
            values.insert(key.to_string(), value.to_vec());
        }
        self.record_write(key)
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        {
            let mut values = self
                .values
                .lock()
                .map_err(|error| InfraError::InvalidConfig(format!("kv store lock poisoned: {error}")))?;
            values.remove(key);
        }
        self.record_write(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDatabase {
        dir: PathBuf,
        path: PathBuf,
    }

    impl TempDatabase {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DB.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!(
                "second-thought-kv-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&dir).expect("create temp dir");
            let path = dir.join("kv.sqlite");
            initialize_database(&path).expect("initialize database");
            Self { dir, path }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    #[test]
    fn sqlite_store_set_get_overwrite_and_remove() {
        let database = TempDatabase::new();
        let store = SqliteKeyValueStore::new(&database.path);

        assert_eq!(store.get("blocked_tokens").expect("get missing"), None);

        store.set("blocked_tokens", b"[\"a\"]").expect("first set");
        store.set("blocked_tokens", b"[\"a\",\"b\"]").expect("overwrite");
        assert_eq!(
            store.get("blocked_tokens").expect("get"),
            Some(b"[\"a\",\"b\"]".to_vec())
        );

        store.remove("blocked_tokens").expect("remove");
        assert_eq!(store.get("blocked_tokens").expect("get removed"), None);
    }

    #[test]
    fn sqlite_store_is_visible_to_a_second_handle() {
        let database = TempDatabase::new();
        let writer = SqliteKeyValueStore::new(&database.path);
        let reader = SqliteKeyValueStore::new(&database.path);

        writer.set("configuration", b"{}").expect("set");
        assert_eq!(reader.get("configuration").expect("get"), Some(b"{}".to_vec()));
    }

    #[test]
    fn initialize_database_is_repeatable() {
        let database = TempDatabase::new();
        initialize_database(&database.path).expect("second initialization");
    }

    #[test]
    fn in_memory_store_counts_writes_per_key() {
        let store = InMemoryKeyValueStore::default();
        store.set("a", b"1").expect("set a");
        store.set("a", b"2").expect("set a again");
        store.remove("b").expect("remove b");

        assert_eq!(store.write_count("a"), 2);
        assert_eq!(store.write_count("b"), 1);
        assert_eq!(store.write_count("c"), 0);
        assert_eq!(store.get("a").expect("get a"), Some(b"2".to_vec()));
    }
}
