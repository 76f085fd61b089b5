//! Key-range lock table (C3): serializes mutating operations on a given
//! `bucket+object` pair. Read-only GET/HEAD never take this lock; they
//! tolerate concurrent mutation per §4.3's consistency contract.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Holds one key's lock for as long as it lives; dropping releases it.
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Table of per-key mutexes, created on demand and evicted once unused.
#[derive(Default)]
pub struct LockTable {
    keys: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn range_key(bucket: &str, object: &str) -> String {
        format!("{bucket}\0{object}")
    }

    /// Acquire the lock for `(bucket, object)`, blocking until available.
    pub async fn lock(&self, bucket: &str, object: &str) -> KeyGuard {
        let key = Self::range_key(bucket, object);
        let mutex = {
            let mut table = self.keys.lock().await;
            table.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let guard = mutex.lock_owned().await;
        KeyGuard { _guard: guard }
    }

    /// Drop any entries with no outstanding holders. Called opportunistically
    /// rather than on every unlock, since an empty `HashMap` entry with an
    /// `Arc` strong count of 1 is cheap to leave in place briefly.
    pub async fn compact(&self) {
        let mut table = self.keys.lock().await;
        table.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes_concurrent_holders() {
        let table = Arc::new(LockTable::new());
        let counter = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = table.clone();
            let counter = counter.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = table.lock("bucket", "object").await;
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let table = Arc::new(LockTable::new());
        let g1 = table.lock("b1", "o1").await;
        let g2 = table.lock("b2", "o2").await;
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn compact_removes_unused_entries() {
        let table = LockTable::new();
        {
            let _g = table.lock("b", "o").await;
        }
        table.compact().await;
        let size = table.keys.lock().await.len();
        assert_eq!(size, 0);
    }
}
