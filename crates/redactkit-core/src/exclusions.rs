//! Per-pattern exclusion lists
//!
//! Exclusions are exact strings a user has rejected for a pattern. They are
//! append-only: once recorded, a string is never reported for that pattern
//! again. Two stores are provided, an in-memory one for tests and embedding,
//! and a SQLite-backed one for the command line.

use crate::config::ExclusionConfig;
use anyhow::Result;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use uuid::Uuid;

/// Persistence boundary for exclusions.
///
/// Appends must be atomic with respect to concurrent reads: a reader sees
/// either the list before an append or the list after it.
pub trait ExclusionStore: Send + Sync {
    fn append_exclusion(&self, pattern_id: &str, text: &str) -> Result<()>;

    fn exclusions_for(&self, pattern_id: &str) -> Result<Vec<String>>;

    /// Exclusions for several patterns at once, keyed by pattern id.
    fn exclusions_for_many(&self, pattern_ids: &[&str]) -> Result<HashMap<String, Vec<String>>> {
        let mut result = HashMap::new();
        for id in pattern_ids {
            let texts = self.exclusions_for(id)?;
            if !texts.is_empty() {
                result.insert(id.to_string(), texts);
            }
        }
        Ok(result)
    }
}

fn lock_poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("Exclusion store lock was poisoned")
}

#[derive(Debug, Default)]
pub struct MemoryExclusionStore {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryExclusionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExclusionStore for MemoryExclusionStore {
    fn append_exclusion(&self, pattern_id: &str, text: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(lock_poisoned)?;
        let list = entries.entry(pattern_id.to_string()).or_default();
        if !list.iter().any(|t| t == text) {
            list.push(text.to_string());
            debug!("Added exclusion for pattern '{}'", pattern_id);
        }
        Ok(())
    }

    fn exclusions_for(&self, pattern_id: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(lock_poisoned)?;
        Ok(entries.get(pattern_id).cloned().unwrap_or_default())
    }
}

#[derive(Debug)]
pub struct ExclusionStatistics {
    pub total_exclusions: usize,
    pub exclusions_by_pattern: HashMap<String, usize>,
    pub oldest_exclusion_age: Option<u64>,
}

pub struct SqliteExclusionStore {
    conn: Mutex<Connection>,
    config: ExclusionConfig,
}

impl SqliteExclusionStore {
    pub fn new(config: ExclusionConfig) -> Result<Self> {
        let conn = if config.database_path == Path::new(":memory:") {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = config.database_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(&config.database_path)?
        };

        initialize_schema(&conn)?;

        info!("Initialized exclusion store at {:?}", config.database_path);
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.config.database_path
    }

    /// Appends several exclusions for one pattern in a single transaction.
    pub fn append_exclusions_batch(&self, pattern_id: &str, texts: &[String]) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(lock_poisoned)?;
        let tx = conn.transaction()?;
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO pattern_exclusions (id, pattern_id, text, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;

            for text in texts {
                inserted += stmt.execute(params![Uuid::new_v4().to_string(), pattern_id, text, now])?;
            }
        }

        tx.commit()?;
        debug!(
            "Stored {} new exclusions for pattern '{}' ({} submitted)",
            inserted,
            pattern_id,
            texts.len()
        );
        Ok(inserted)
    }

    pub fn get_statistics(&self) -> Result<ExclusionStatistics> {
        let conn = self.conn.lock().map_err(lock_poisoned)?;

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM pattern_exclusions", [], |row| row.get(0))?;

        let mut by_pattern = HashMap::new();
        let mut stmt =
            conn.prepare("SELECT pattern_id, COUNT(*) FROM pattern_exclusions GROUP BY pattern_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (pattern_id, count) = row?;
            by_pattern.insert(pattern_id, count as usize);
        }

        let oldest: Option<u64> = conn.query_row(
            "SELECT MIN(created_at) FROM pattern_exclusions",
            [],
            |row| row.get::<_, Option<u64>>(0),
        )?;

        Ok(ExclusionStatistics {
            total_exclusions: total as usize,
            exclusions_by_pattern: by_pattern,
            oldest_exclusion_age: oldest,
        })
    }
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pattern_exclusions (
            id TEXT PRIMARY KEY,
            pattern_id TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(pattern_id, text)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exclusions_pattern
         ON pattern_exclusions(pattern_id)",
        [],
    )?;

    debug!("Exclusion schema initialized");
    Ok(())
}

impl ExclusionStore for SqliteExclusionStore {
    fn append_exclusion(&self, pattern_id: &str, text: &str) -> Result<()> {
        self.append_exclusions_batch(pattern_id, &[text.to_string()])?;
        Ok(())
    }

    fn exclusions_for(&self, pattern_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().map_err(lock_poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT text FROM pattern_exclusions WHERE pattern_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![pattern_id], |row| row.get::<_, String>(0))?;

        let mut texts = Vec::new();
        for row in rows {
            texts.push(row?);
        }
        Ok(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_config() -> (ExclusionConfig, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = ExclusionConfig {
            database_path: temp_dir.path().join("test_exclusions.db"),
        };
        (config, temp_dir)
    }

    #[test]
    fn test_memory_store_append_and_read() {
        let store = MemoryExclusionStore::new();
        store.append_exclusion("ssn", "123-45-6789").unwrap();
        store.append_exclusion("ssn", "123-45-6789").unwrap();
        store.append_exclusion("phone", "555-123-4567").unwrap();

        assert_eq!(store.exclusions_for("ssn").unwrap(), vec!["123-45-6789"]);
        assert!(store.exclusions_for("email").unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_store_creation() {
        let (config, _temp_dir) = create_test_config();
        let store = SqliteExclusionStore::new(config).unwrap();
        assert!(store.database_path().exists());
    }

    #[test]
    fn test_in_memory_database() {
        let config = ExclusionConfig {
            database_path: PathBuf::from(":memory:"),
        };
        let store = SqliteExclusionStore::new(config).unwrap();
        store.append_exclusion("ssn", "123-45-6789").unwrap();
        assert_eq!(store.exclusions_for("ssn").unwrap().len(), 1);
    }

    #[test]
    fn test_sqlite_append_is_idempotent_per_pattern() {
        let (config, _temp_dir) = create_test_config();
        let store = SqliteExclusionStore::new(config).unwrap();

        store.append_exclusion("ssn", "123-45-6789").unwrap();
        store.append_exclusion("ssn", "123-45-6789").unwrap();
        store.append_exclusion("other", "123-45-6789").unwrap();

        assert_eq!(store.exclusions_for("ssn").unwrap(), vec!["123-45-6789"]);
        assert_eq!(store.exclusions_for("other").unwrap(), vec!["123-45-6789"]);
    }

    #[test]
    fn test_exclusions_persist_across_reopen() {
        let (config, _temp_dir) = create_test_config();
        {
            let store = SqliteExclusionStore::new(config.clone()).unwrap();
            store.append_exclusion("email", "test@example.com").unwrap();
        }

        let reopened = SqliteExclusionStore::new(config).unwrap();
        assert_eq!(reopened.exclusions_for("email").unwrap(), vec!["test@example.com"]);
    }

    #[test]
    fn test_batch_and_statistics() {
        let (config, _temp_dir) = create_test_config();
        let store = SqliteExclusionStore::new(config).unwrap();

        let inserted = store
            .append_exclusions_batch(
                "email",
                &["a@example.com".to_string(), "b@example.com".to_string(), "a@example.com".to_string()],
            )
            .unwrap();
        store.append_exclusion("phone", "555-123-4567").unwrap();

        assert_eq!(inserted, 2);
        let stats = store.get_statistics().unwrap();
        assert_eq!(stats.total_exclusions, 3);
        assert_eq!(stats.exclusions_by_pattern.get("email"), Some(&2));
        assert_eq!(stats.exclusions_by_pattern.get("phone"), Some(&1));
        assert!(stats.oldest_exclusion_age.is_some());
    }

    #[test]
    fn test_exclusions_for_many() {
        let store = MemoryExclusionStore::new();
        store.append_exclusion("a", "x").unwrap();
        store.append_exclusion("b", "y").unwrap();

        let many = store.exclusions_for_many(&["a", "b", "c"]).unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many.get("b"), Some(&vec!["y".to_string()]));
    }

    #[test]
    fn test_concurrent_appends() {
        let store = Arc::new(MemoryExclusionStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.append_exclusion("p", &format!("value-{}", i % 4)).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut values = store.exclusions_for("p").unwrap();
        values.sort();
        assert_eq!(values, vec!["value-0", "value-1", "value-2", "value-3"]);
    }
}
