//! BleepStore library — S3-compatible object storage gateway.
//!
//! This crate provides the core components for running an S3-compatible
//! storage gateway in front of a distributed key-value cluster: request
//! routing, AWS4 signature authentication, the namelist cache, the object
//! data plane, and the per-operation S3 handler set.

use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod dataplane;
pub mod errors;
pub mod handlers;
pub mod kv;
pub mod locks;
pub mod metrics;
pub mod monitor;
pub mod namelist;
pub mod server;
pub mod store;
pub mod xml;

use crate::config::Config;
use crate::kv::memory::MemoryKvCluster;
use crate::kv::sqlite::SqliteKvCluster;
use crate::kv::KvCluster;
use crate::locks::LockTable;
use crate::monitor::Monitor;
use crate::namelist::ListMap;
use crate::store::Store;

/// Shared application state passed to all handlers via `axum::extract::State`.
///
/// Global singletons (store, monitor, config) are modeled as explicit
/// dependencies here rather than process-wide statics, per §9's resolved
/// design note; tests construct an `AppState` over an in-memory `KvCluster`.
pub struct AppState {
    pub config: Config,
    pub store: Store,
    /// Namelist cache scoped by access key: a user's owned bucket names.
    pub user_buckets: ListMap,
    /// Namelist cache scoped by bucket name: a bucket's object names.
    pub bucket_objects: ListMap,
    pub locks: LockTable,
    pub auth_cache: auth::AuthCache,
    pub monitor: Monitor,
}

impl AppState {
    /// Build the KV cluster configured by `config.kv.backend`, the `Store`
    /// adapter over it, and the rest of the request-lifecycle components.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let kv: Arc<dyn KvCluster> = match config.kv.backend.as_str() {
            "sqlite" => Arc::new(SqliteKvCluster::open(&config.kv.sqlite.path)?),
            _ => Arc::new(MemoryKvCluster::new()),
        };
        let store = Store::new(kv, config.server.chunk_size);
        Ok(Self {
            user_buckets: ListMap::new(store.clone()),
            bucket_objects: ListMap::new(store.clone()),
            store,
            locks: LockTable::new(),
            auth_cache: auth::AuthCache::new(),
            monitor: Monitor::new(),
            config,
        })
    }
}
