//! Reference-counted in-memory namelist cache (C2 / `ListMap`).
//!
//! Two instances live in [`crate::AppState`]: one whose scope key is an
//! access key (a user's owned bucket names) and one whose scope key is a
//! bucket name (a bucket's object names). Entries are loaded lazily from
//! the [`Store`] on first `Ref`, kept in memory while any holder has a
//! reference, and written back through `SaveNameList` only if dirtied.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::errors::S3Error;
use crate::store::Store;

struct Entry {
    names: Vec<String>,
    refcount: u64,
    dirty: bool,
}

/// A refcounted, write-through cache of namelists keyed by scope string.
pub struct ListMap {
    store: Store,
    entries: Mutex<HashMap<String, Arc<Mutex<Entry>>>>,
}

/// A held reference to one scope's namelist. `Unref` must be called when
/// done; dropping without unref-ing leaks the refcount (by design, this
/// cache has no async Drop -- callers follow the Ref/Unref discipline
/// explicitly, the same contract the spec describes).
pub struct NameListRef<'a> {
    map: &'a ListMap,
    scope: String,
}

impl ListMap {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a reference to `scope`'s namelist, loading it from the store
    /// if not already cached. Increments the entry's refcount.
    pub async fn reference(&self, scope: &str) -> Result<NameListRef<'_>, S3Error> {
        let mut table = self.entries.lock().await;
        let entry = match table.get(scope) {
            Some(entry) => entry.clone(),
            None => {
                let names = self.store.get_namelist(scope).await?;
                let entry = Arc::new(Mutex::new(Entry {
                    names,
                    refcount: 0,
                    dirty: false,
                }));
                table.insert(scope.to_string(), entry.clone());
                entry
            }
        };
        entry.lock().await.refcount += 1;
        drop(table);
        Ok(NameListRef {
            map: self,
            scope: scope.to_string(),
        })
    }

    async fn entry(&self, scope: &str) -> Arc<Mutex<Entry>> {
        let table = self.entries.lock().await;
        table.get(scope).cloned().expect("entry referenced before use")
    }

    /// Release a held reference; flushes and evicts when the refcount
    /// reaches zero and the list is dirty.
    async fn unreference(&self, scope: &str) -> Result<(), S3Error> {
        let entry = self.entry(scope).await;
        let (should_flush, snapshot) = {
            let mut guard = entry.lock().await;
            guard.refcount = guard.refcount.saturating_sub(1);
            if guard.refcount == 0 && guard.dirty {
                guard.dirty = false;
                (true, guard.names.clone())
            } else {
                (false, Vec::new())
            }
        };
        if should_flush {
            self.store.save_namelist(scope, &snapshot).await?;
        }
        let mut table = self.entries.lock().await;
        if let Some(e) = table.get(scope) {
            if Arc::strong_count(e) <= 2 {
                // Only this table and the just-dropped entry handle remain.
                let refcount = e.lock().await.refcount;
                if refcount == 0 {
                    table.remove(scope);
                }
            }
        }
        Ok(())
    }

    async fn insert(&self, scope: &str, name: &str) {
        let entry = self.entry(scope).await;
        let mut guard = entry.lock().await;
        if !guard.names.iter().any(|n| n == name) {
            guard.names.push(name.to_string());
            guard.dirty = true;
        }
    }

    async fn delete(&self, scope: &str, name: &str) {
        let entry = self.entry(scope).await;
        let mut guard = entry.lock().await;
        let before = guard.names.len();
        guard.names.retain(|n| n != name);
        if guard.names.len() != before {
            guard.dirty = true;
        }
    }

    async fn contains(&self, scope: &str, name: &str) -> bool {
        let entry = self.entry(scope).await;
        let guard = entry.lock().await;
        guard.names.iter().any(|n| n == name)
    }

    async fn snapshot(&self, scope: &str) -> Vec<String> {
        let entry = self.entry(scope).await;
        entry.lock().await.names.clone()
    }
}

impl<'a> NameListRef<'a> {
    pub async fn insert(&self, name: &str) {
        self.map.insert(&self.scope, name).await;
    }

    pub async fn delete(&self, name: &str) {
        self.map.delete(&self.scope, name).await;
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.map.contains(&self.scope, name).await
    }

    pub async fn names(&self) -> Vec<String> {
        self.map.snapshot(&self.scope).await
    }

    /// Release this reference. Prefer this over letting the guard drop
    /// silently, since flushing a dirty list can fail and the caller may
    /// want to observe that.
    pub async fn unref(self) -> Result<(), S3Error> {
        self.map.unreference(&self.scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKvCluster;
    use std::sync::Arc as StdArc;

    fn test_map() -> ListMap {
        ListMap::new(Store::new(StdArc::new(MemoryKvCluster::new()), 1_048_576))
    }

    #[tokio::test]
    async fn insert_is_visible_to_a_second_reference_on_same_scope() {
        let map = test_map();
        let r1 = map.reference("scope").await.unwrap();
        r1.insert("bucket-a").await;
        let r2 = map.reference("scope").await.unwrap();
        assert!(r2.contains("bucket-a").await);
        r1.unref().await.unwrap();
        r2.unref().await.unwrap();
    }

    #[tokio::test]
    async fn dirty_list_flushes_to_store_on_last_unref() {
        let store = Store::new(StdArc::new(MemoryKvCluster::new()), 1_048_576);
        let map = ListMap::new(store.clone());
        let r1 = map.reference("scope").await.unwrap();
        r1.insert("bucket-a").await;
        r1.unref().await.unwrap();

        let persisted = store.get_namelist("scope").await.unwrap();
        assert_eq!(persisted, vec!["bucket-a".to_string()]);
    }

    #[tokio::test]
    async fn delete_removes_name() {
        let map = test_map();
        let r1 = map.reference("scope").await.unwrap();
        r1.insert("a").await;
        r1.insert("b").await;
        r1.delete("a").await;
        assert!(!r1.contains("a").await);
        assert!(r1.contains("b").await);
        r1.unref().await.unwrap();
    }

    #[tokio::test]
    async fn reloading_after_eviction_sees_persisted_state() {
        let store = Store::new(StdArc::new(MemoryKvCluster::new()), 1_048_576);
        let map = ListMap::new(store);
        let r1 = map.reference("scope").await.unwrap();
        r1.insert("a").await;
        r1.unref().await.unwrap();

        let r2 = map.reference("scope").await.unwrap();
        assert!(r2.contains("a").await);
        r2.unref().await.unwrap();
    }
}
