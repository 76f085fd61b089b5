//! Configuration loading and types for BleepStore.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct. Field names mostly mirror the component each
//! section configures; a handful of fields also accept the original
//! `zp_meta_addr`/`server_ip`/... key names via serde aliases so an
//! operator migrating a config file does not have to rewrite it by hand.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Data-plane HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Admin HTTP listener settings (separate port, per spec).
    #[serde(default)]
    pub admin: AdminConfig,

    /// Bootstrap authentication credentials.
    #[serde(default)]
    pub auth: AuthConfig,

    /// KV cluster (backing store) settings.
    #[serde(default)]
    pub kv: KvConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probes).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Data-plane HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address. Alias: `server_ip`.
    #[serde(alias = "server_ip", default = "default_host")]
    pub host: String,

    /// Bind port. Alias: `server_port`.
    #[serde(alias = "server_port", default = "default_port")]
    pub port: u16,

    /// AWS region to present (e.g. `us-east-1`).
    #[serde(default = "default_region")]
    pub region: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum object size in bytes (default 5 GiB).
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,

    /// Chunk size in bytes objects are striped into. Alias: `chunk_size`.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Number of tokio worker threads. Alias: `worker_num`. 0 = runtime default.
    #[serde(alias = "worker_num", default)]
    pub worker_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            region: default_region(),
            shutdown_timeout: default_shutdown_timeout(),
            max_object_size: default_max_object_size(),
            chunk_size: default_chunk_size(),
            worker_threads: 0,
        }
    }
}

/// Admin HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Bind host address for the admin surface.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port. Alias: `admin_port`.
    #[serde(alias = "admin_port", default = "default_admin_port")]
    pub port: u16,

    /// Interval between Monitor flushes to the store, in seconds.
    #[serde(default = "default_monitor_flush_seconds")]
    pub monitor_flush_seconds: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_admin_port(),
            monitor_flush_seconds: default_monitor_flush_seconds(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error. Alias: `minloglevel`.
    #[serde(alias = "minloglevel", default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional log file path. Alias: `log_path`. Empty means stdout.
    #[serde(alias = "log_path", default)]
    pub path: String,

    /// Daemonize on startup. Carried for config compatibility; the
    /// supervising process (systemd, etc.) is expected to do this instead.
    #[serde(default)]
    pub daemonize: bool,

    /// PID file path, written on startup when non-empty. Alias: `pid_file`.
    #[serde(alias = "pid_file", default)]
    pub pid_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            path: String::new(),
            daemonize: false,
            pid_file: String::new(),
        }
    }
}

/// Observability settings.
///
/// Controls Prometheus metrics collection and health probes. Both are
/// enabled by default.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable `/healthz` probe.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

/// Bootstrap authentication settings.
///
/// A single credential pair seeded at startup; additional users can be
/// added afterwards through the admin surface (`PUT /admin_put_user/<name>`).
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Access key (also accepts `access_key_id`).
    #[serde(alias = "access_key_id", default = "default_access_key")]
    pub access_key: String,

    /// Secret access key (also accepts `secret_access_key`).
    #[serde(alias = "secret_access_key", default = "default_secret_key")]
    pub secret_key: String,

    /// Display name for the bootstrap user.
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_key: default_access_key(),
            secret_key: default_secret_key(),
            display_name: default_display_name(),
        }
    }
}

/// KV cluster configuration: the backing store for the `meta`/`data` tables.
#[derive(Debug, Clone, Deserialize)]
pub struct KvConfig {
    /// Backend type: `memory` or `sqlite`.
    #[serde(default = "default_kv_backend")]
    pub backend: String,

    /// Number of partitions per table (P in the spec). Reference backends
    /// use this only to validate partition indices; it does not change
    /// physical sharding for the in-process implementations.
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Peer addresses of the backing cluster. Alias: `zp_meta_addr`
    /// (originally slash-separated; accepted here as a YAML sequence or a
    /// slash-separated string).
    #[serde(alias = "zp_meta_addr", default, deserialize_with = "de_peer_list")]
    pub peers: Vec<String>,

    /// SQLite-specific configuration, used when `backend = "sqlite"`.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            backend: default_kv_backend(),
            partitions: default_partitions(),
            peers: Vec::new(),
            sqlite: SqliteConfig::default(),
        }
    }
}

fn de_peer_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PeerList {
        Sequence(Vec<String>),
        Slashed(String),
    }
    match PeerList::deserialize(deserializer)? {
        PeerList::Sequence(v) => Ok(v),
        PeerList::Slashed(s) => Ok(s.split('/').filter(|p| !p.is_empty()).map(String::from).collect()),
    }
}

/// SQLite-backed KV cluster configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_kv_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_kv_path(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9012
}

fn default_admin_port() -> u16 {
    9013
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_access_key() -> String {
    "bleepstore".to_string()
}

fn default_secret_key() -> String {
    "bleepstore-secret".to_string()
}

fn default_display_name() -> String {
    "bleepstore".to_string()
}

fn default_kv_backend() -> String {
    "memory".to_string()
}

fn default_kv_path() -> String {
    "./data/kv.db".to_string()
}

fn default_partitions() -> u32 {
    10
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_object_size() -> u64 {
    5_368_709_120 // 5 GiB
}

fn default_chunk_size() -> u64 {
    1_048_576 // 1 MiB
}

fn default_monitor_flush_seconds() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_uses_all_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.port, 9012);
        assert_eq!(config.admin.port, 9013);
        assert_eq!(config.kv.backend, "memory");
        assert_eq!(config.server.chunk_size, 1_048_576);
    }

    #[test]
    fn accepts_original_key_aliases() {
        let yaml = r#"
server:
  server_ip: "127.0.0.1"
  server_port: 7000
admin:
  admin_port: 7001
logging:
  minloglevel: "debug"
  log_path: "/var/log/bleepstore.log"
kv:
  zp_meta_addr: "10.0.0.1:9221/10.0.0.2:9221"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.admin.port, 7001);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.path, "/var/log/bleepstore.log");
        assert_eq!(config.kv.peers, vec!["10.0.0.1:9221", "10.0.0.2:9221"]);
    }
}
