//! SQLite-backed [`KvCluster`] reference implementation.
//!
//! Stores both logical tables in a single `kv` table keyed by
//! `(tbl, key)`, guarded by a `tokio::sync::Mutex` since `rusqlite`
//! connections are not `Sync`. This is a reference backend for running
//! the gateway standalone; a real deployment talks to the actual
//! cluster through the same [`KvCluster`] trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use super::{KvCluster, KvError};

pub struct SqliteKvCluster {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvCluster {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                tbl TEXT NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (tbl, key)
            )",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                tbl TEXT NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (tbl, key)
            )",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl KvCluster for SqliteKvCluster {
    fn get(
        &self,
        table: &str,
        key: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, KvError>> + Send + '_>> {
        let table = table.to_string();
        let key = key.to_vec();
        Box::pin(async move {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT value FROM kv WHERE tbl = ?1 AND key = ?2",
                rusqlite::params![table, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => KvError::NotFound,
                other => KvError::Io(other.to_string()),
            })
        })
    }

    fn set(
        &self,
        table: &str,
        key: &[u8],
        value: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + '_>> {
        let table = table.to_string();
        let key = key.to_vec();
        Box::pin(async move {
            let conn = self.conn.lock().await;
            conn.execute(
                "INSERT INTO kv (tbl, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(tbl, key) DO UPDATE SET value = excluded.value",
                rusqlite::params![table, key, value],
            )
            .map_err(|e| KvError::Io(e.to_string()))?;
            Ok(())
        })
    }

    fn delete(
        &self,
        table: &str,
        key: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), KvError>> + Send + '_>> {
        let table = table.to_string();
        let key = key.to_vec();
        Box::pin(async move {
            let conn = self.conn.lock().await;
            conn.execute(
                "DELETE FROM kv WHERE tbl = ?1 AND key = ?2",
                rusqlite::params![table, key],
            )
            .map_err(|e| KvError::Io(e.to_string()))?;
            Ok(())
        })
    }

    fn scan_prefix(
        &self,
        table: &str,
        prefix: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<u8>>, KvError>> + Send + '_>> {
        let table = table.to_string();
        let prefix = prefix.to_vec();
        Box::pin(async move {
            let conn = self.conn.lock().await;
            let mut stmt = conn
                .prepare("SELECT key FROM kv WHERE tbl = ?1 ORDER BY key")
                .map_err(|e| KvError::Io(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![table], |row| row.get::<_, Vec<u8>>(0))
                .map_err(|e| KvError::Io(e.to_string()))?;
            let mut keys = Vec::new();
            for row in rows {
                let key = row.map_err(|e| KvError::Io(e.to_string()))?;
                if key.starts_with(prefix.as_slice()) {
                    keys.push(key);
                }
            }
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let kv = SqliteKvCluster::open_in_memory().unwrap();
        kv.set(super::super::META_TABLE, b"k1", b"v1".to_vec()).await.unwrap();
        assert_eq!(kv.get(super::super::META_TABLE, b"k1").await.unwrap(), b"v1");
    }

    #[tokio::test]
    async fn set_overwrites_existing_value() {
        let kv = SqliteKvCluster::open_in_memory().unwrap();
        kv.set(super::super::META_TABLE, b"k1", b"v1".to_vec()).await.unwrap();
        kv.set(super::super::META_TABLE, b"k1", b"v2".to_vec()).await.unwrap();
        assert_eq!(kv.get(super::super::META_TABLE, b"k1").await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let kv = SqliteKvCluster::open_in_memory().unwrap();
        let err = kv.get(super::super::DATA_TABLE, b"nope").await.unwrap_err();
        assert!(matches!(err, KvError::NotFound));
    }

    #[tokio::test]
    async fn scan_prefix_isolates_by_table() {
        let kv = SqliteKvCluster::open_in_memory().unwrap();
        kv.set(super::super::META_TABLE, b"user/alice", b"1".to_vec()).await.unwrap();
        kv.set(super::super::DATA_TABLE, b"user/alice", b"2".to_vec()).await.unwrap();
        let keys = kv.scan_prefix(super::super::META_TABLE, b"user/").await.unwrap();
        assert_eq!(keys, vec![b"user/alice".to_vec()]);
    }
}
