//! SQLite implementation of the CacheStorage trait

use crate::offline_cache::{CacheError, CacheStorage};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use shellcache_proto::{decode_entry, encode_entry, CachedEntry, RequestKey, Response};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Compute the SHA-256 of an encoded snapshot, hex encoded
fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// SQLite-backed implementation of CacheStorage
///
/// Generations survive restarts, so a deployment that was installed but
/// never activated leaves its generation behind until the next activation
/// sweeps it.
pub struct SqliteCacheStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStorage {
    /// Create a new SQLite cache store
    ///
    /// If the database doesn't exist, it will be created with the required schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, CacheError> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a throwaway in-memory database
    pub fn in_memory() -> Result<Self, CacheError> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<(), CacheError> {
        let conn = self.conn();

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS generations (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // One row per cached request; the snapshot is an encoded CachedEntry
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                generation TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                snapshot BLOB NOT NULL,
                sha256 TEXT NOT NULL,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (generation, method, url)
            )
            "#,
            [],
        )?;

        info!("Shell cache database schema initialized");
        Ok(())
    }

    fn ensure_generation(conn: &Connection, generation: &str) -> Result<(), CacheError> {
        conn.execute(
            "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
            params![generation, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn insert_entry(
        conn: &Connection,
        generation: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        let entry = CachedEntry::new(key, response);
        let snapshot = encode_entry(&entry)?;
        let digest = sha256(&snapshot);

        conn.execute(
            r#"
            INSERT OR REPLACE INTO entries (generation, method, url, snapshot, sha256, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                generation,
                entry.key.method.as_str(),
                entry.key.url,
                snapshot,
                digest,
                entry.stored_at as i64
            ],
        )?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn generations(&self) -> Result<Vec<String>, CacheError> {
        let conn = self.conn();

        let mut stmt = conn.prepare("SELECT name FROM generations ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    async fn open(&self, generation: &str) -> Result<(), CacheError> {
        let conn = self.conn();
        Self::ensure_generation(&conn, generation)
    }

    async fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn();

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE generation = ?1", params![generation])?;
        let removed = tx.execute("DELETE FROM generations WHERE name = ?1", params![generation])?;
        tx.commit()?;

        Ok(removed > 0)
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError> {
        let conn = self.conn();

        let row = conn
            .query_row(
                "SELECT snapshot, sha256 FROM entries WHERE generation = ?1 AND method = ?2 AND url = ?3",
                params![generation, key.method.as_str(), key.url],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((snapshot, expected)) = row else {
            return Ok(None);
        };

        let actual = sha256(&snapshot);
        if actual != expected {
            return Err(CacheError::HashMismatch { expected, actual });
        }

        let entry = decode_entry(&snapshot)?;
        Ok(Some(entry.response))
    }

    async fn put(
        &self,
        generation: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn();

        let tx = conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)",
            params![generation],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(CacheError::UnknownGeneration(generation.to_string()));
        }
        debug!("Storing {} in {}", key, generation);
        Self::insert_entry(&tx, generation, key, response)?;
        tx.commit()?;
        Ok(())
    }

    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn();
        let count = entries.len();

        // Dropping the transaction on error rolls every insert back
        let tx = conn.transaction()?;
        Self::ensure_generation(&tx, generation)?;
        for (key, response) in entries {
            Self::insert_entry(&tx, generation, key, response)?;
        }
        tx.commit()?;

        debug!("Stored {} entries in {}", count, generation);
        Ok(())
    }

    async fn entry_count(&self, generation: &str) -> Result<usize, CacheError> {
        let conn = self.conn();

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE generation = ?1",
            params![generation],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn storage_type(&self) -> &str {
        "sqlite"
    }
}
