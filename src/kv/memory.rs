//! In-memory [`KvCluster`] reference implementation.
//!
//! Backed by a `RwLock<HashMap>` per table, the same shape the rest of
//! this codebase family uses for in-process stores. An optional snapshot
//! to a SQLite file lets a gateway instance survive a restart without a
//! real cluster behind it; snapshots are written to a temp file and
//! atomically renamed into place, matching the usual pattern for durable
//! writes to a single file.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::RwLock;

use super::{KvCluster, KvError};

type TableMap = HashMap<Vec<u8>, Vec<u8>>;

struct Tables {
    meta: TableMap,
    data: TableMap,
}

impl Tables {
    fn table_mut(&mut self, table: &str) -> &mut TableMap {
        match table {
            super::META_TABLE => &mut self.meta,
            super::DATA_TABLE => &mut self.data,
            other => panic!("unknown kv table: {other}"),
        }
    }

    fn table(&self, table: &str) -> &TableMap {
        match table {
            super::META_TABLE => &self.meta,
            super::DATA_TABLE => &self.data,
            other => panic!("unknown kv table: {other}"),
        }
    }
}

/// In-memory key-value cluster. Cheap to clone (wraps an `Arc`).
#[derive(Clone)]
pub struct MemoryKvCluster {
    tables: Arc<RwLock<Tables>>,
}

impl Default for MemoryKvCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKvCluster {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables {
                meta: HashMap::new(),
                data: HashMap::new(),
            })),
        }
    }

    /// Restore a previously written snapshot, if the file exists. A
    /// missing file is not an error: crash-only startup treats "no
    /// snapshot yet" the same as "empty cluster".
    pub fn restore_from_snapshot(path: &str) -> anyhow::Result<Self> {
        let cluster = Self::new();
        if !std::path::Path::new(path).exists() {
            return Ok(cluster);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (tbl TEXT NOT NULL, key BLOB NOT NULL, value BLOB NOT NULL, PRIMARY KEY (tbl, key))",
        )?;
        let mut stmt = conn.prepare("SELECT tbl, key, value FROM kv")?;
        let rows = stmt.query_map([], |row| {
            let tbl: String = row.get(0)?;
            let key: Vec<u8> = row.get(1)?;
            let value: Vec<u8> = row.get(2)?;
            Ok((tbl, key, value))
        })?;
        let tables = cluster.tables.clone();
        let mut guard = tables.blocking_write();
        for row in rows {
            let (tbl, key, value) = row?;
            guard.table_mut(&tbl).insert(key, value);
        }
        drop(guard);
        Ok(cluster)
    }

    /// Write the entire cluster state to `path` via a temp file + atomic
    /// rename, so a reader never observes a half-written snapshot.
    pub async fn snapshot_to(&self, path: &str) -> anyhow::Result<()> {
        let guard = self.tables.read().await;
        let mut rows: Vec<(&'static str, Vec<u8>, Vec<u8>)> = Vec::new();
        for (k, v) in guard.meta.iter() {
            rows.push((super::META_TABLE, k.clone(), v.clone()));
        }
        for (k, v) in guard.data.iter() {
            rows.push((super::DATA_TABLE, k.clone(), v.clone()));
        }
        drop(guard);

        let tmp_path = format!("{path}.tmp-{}", std::process::id());
        {
            let conn = Connection::open(&tmp_path)?;
            conn.execute_batch(
                "CREATE TABLE kv (tbl TEXT NOT NULL, key BLOB NOT NULL, value BLOB NOT NULL, PRIMARY KEY (tbl, key))",
            )?;
            let tx = conn.unchecked_transaction()?;
            for (tbl, key, value) in &rows {
                tx.execute(
                    "INSERT INTO kv (tbl, key, value) VALUES (?1, ?2, ?3)",
                    rusqlite::params![tbl, key, value],
                )?;
            }
            tx.commit()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl KvCluster for MemoryKvCluster {
    fn get(
        &self,
        table: &str,
        key: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, KvError>> + Send + '_>> {
        let table = table.to_string();
        let key = key.to_vec();
        Box::pin(async move {
            let guard = self.tables.read().await;
            guard
                .table(&table)
                .get(&key)
                .cloned()
                .ok_or(KvError::NotFound)
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
            let mut guard = self.tables.write().await;
            guard.table_mut(&table).insert(key, value);
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
            let mut guard = self.tables.write().await;
            guard.table_mut(&table).remove(&key);
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
            let guard = self.tables.read().await;
            let mut keys: Vec<Vec<u8>> = guard
                .table(&table)
                .keys()
                .filter(|k| k.starts_with(prefix.as_slice()))
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let kv = MemoryKvCluster::new();
        kv.set(super::super::META_TABLE, b"k1", b"v1".to_vec()).await.unwrap();
        let v = kv.get(super::super::META_TABLE, b"k1").await.unwrap();
        assert_eq!(v, b"v1");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let kv = MemoryKvCluster::new();
        let err = kv.get(super::super::META_TABLE, b"missing").await.unwrap_err();
        assert!(matches!(err, KvError::NotFound));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let kv = MemoryKvCluster::new();
        kv.set(super::super::DATA_TABLE, b"k", b"v".to_vec()).await.unwrap();
        kv.delete(super::super::DATA_TABLE, b"k").await.unwrap();
        kv.delete(super::super::DATA_TABLE, b"k").await.unwrap();
        assert!(kv.get(super::super::DATA_TABLE, b"k").await.is_err());
    }

    #[tokio::test]
    async fn scan_prefix_returns_sorted_matches() {
        let kv = MemoryKvCluster::new();
        kv.set(super::super::META_TABLE, b"user/alice", b"1".to_vec()).await.unwrap();
        kv.set(super::super::META_TABLE, b"user/bob", b"2".to_vec()).await.unwrap();
        kv.set(super::super::META_TABLE, b"bucket/x", b"3".to_vec()).await.unwrap();
        let keys = kv.scan_prefix(super::super::META_TABLE, b"user/").await.unwrap();
        assert_eq!(keys, vec![b"user/alice".to_vec(), b"user/bob".to_vec()]);
    }

    #[tokio::test]
    async fn snapshot_roundtrips_through_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let path_str = path.to_str().unwrap();

        let kv = MemoryKvCluster::new();
        kv.set(super::super::META_TABLE, b"k1", b"v1".to_vec()).await.unwrap();
        kv.set(super::super::DATA_TABLE, b"chunk/0", b"bytes".to_vec()).await.unwrap();
        kv.snapshot_to(path_str).await.unwrap();

        let restored = MemoryKvCluster::restore_from_snapshot(path_str).unwrap();
        assert_eq!(restored.get(super::super::META_TABLE, b"k1").await.unwrap(), b"v1");
        assert_eq!(restored.get(super::super::DATA_TABLE, b"chunk/0").await.unwrap(), b"bytes");
    }
}
