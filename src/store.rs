//! Typed store adapter (C1): the only module that knows how buckets,
//! objects, chunks, and namelists are encoded as keys and values in the
//! [`KvCluster`](crate::kv::KvCluster). Everything above this layer works
//! with `User`/`Bucket`/`ObjectMeta` values, never raw keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::S3Error;
use crate::kv::{KvCluster, DATA_TABLE, META_TABLE};

/// Chunks an object's content is striped into. 1 MiB by default; overridden
/// from `server.chunk_size` at `Store` construction.
pub const DEFAULT_CHUNK_SIZE: u64 = 1_048_576;

/// Reserved two-character prefix marking multipart ghost objects. Forbidden
/// in user-supplied object names.
pub const INTERNAL_PREFIX: &str = "__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub access_key: String,
    pub secret_key: String,
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub owner_access_key: String,
    pub owner_display_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    pub storage_class: String,
    pub owner_access_key: String,
    pub mtime: String,
    #[serde(default)]
    pub user_metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartMeta {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// Store adapter over a [`KvCluster`]. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    kv: Arc<dyn KvCluster>,
    pub chunk_size: u64,
}

impl Store {
    pub fn new(kv: Arc<dyn KvCluster>, chunk_size: u64) -> Self {
        Self { kv, chunk_size }
    }

    // -- keys -----------------------------------------------------------

    fn user_key(access_key: &str) -> Vec<u8> {
        format!("user\0{access_key}").into_bytes()
    }

    fn bucket_key(bucket: &str) -> Vec<u8> {
        format!("bucket\0{bucket}").into_bytes()
    }

    fn object_key(bucket: &str, name: &str) -> Vec<u8> {
        format!("object\0{bucket}\0{name}").into_bytes()
    }

    fn chunk_key(bucket: &str, name: &str, idx: u64) -> Vec<u8> {
        format!("chunk\0{bucket}\0{name}\0{idx}").into_bytes()
    }

    fn part_key(bucket: &str, ghost: &str, part_number: u32) -> Vec<u8> {
        format!("part\0{bucket}\0{ghost}\0{part_number}").into_bytes()
    }

    fn part_chunk_name(ghost: &str, part_number: u32) -> String {
        format!("{ghost}\0part{part_number}")
    }

    /// Fully-qualified namelist key for a user's owned bucket names.
    pub fn user_namelist_key(access_key: &str) -> String {
        format!("namelist\0user\0{access_key}")
    }

    /// Fully-qualified namelist key for a bucket's object names.
    pub fn bucket_namelist_key(bucket: &str) -> String {
        format!("namelist\0bucket\0{bucket}")
    }

    fn chunk_count(size: u64, chunk_size: u64) -> u64 {
        if size == 0 {
            0
        } else {
            size.div_ceil(chunk_size)
        }
    }

    // -- users ------------------------------------------------------------

    pub async fn add_user(&self, display_name: &str) -> Result<User, S3Error> {
        let access_key = random_token(20);
        let secret_key = random_token(40);
        let key = Self::user_key(&access_key);
        if self.kv.get(META_TABLE, &key).await.is_ok() {
            return Err(S3Error::Internal(anyhow::anyhow!(
                "access key collision generating new user"
            )));
        }
        let user = User {
            access_key: access_key.clone(),
            secret_key,
            user_id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
        };
        let value = serde_json::to_vec(&user).map_err(|e| S3Error::Internal(e.into()))?;
        self.kv
            .set(META_TABLE, &key, value)
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))?;
        Ok(user)
    }

    /// Idempotently provision a user under a caller-chosen access/secret key
    /// pair, used to seed the bootstrap credential from `config.auth` on
    /// every startup. Crash-only design: re-running this with the same
    /// config is a no-op once the record exists.
    pub async fn seed_user(
        &self,
        access_key: &str,
        secret_key: &str,
        display_name: &str,
    ) -> Result<User, S3Error> {
        let key = Self::user_key(access_key);
        if let Ok(raw) = self.kv.get(META_TABLE, &key).await {
            return serde_json::from_slice(&raw).map_err(|e| S3Error::Internal(e.into()));
        }
        let user = User {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            user_id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
        };
        let value = serde_json::to_vec(&user).map_err(|e| S3Error::Internal(e.into()))?;
        self.kv
            .set(META_TABLE, &key, value)
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))?;
        Ok(user)
    }

    pub async fn get_user(&self, access_key: &str) -> Result<User, S3Error> {
        let raw = self
            .kv
            .get(META_TABLE, &Self::user_key(access_key))
            .await
            .map_err(|_| S3Error::InvalidAccessKeyId)?;
        serde_json::from_slice(&raw).map_err(|e| S3Error::Internal(e.into()))
    }

    pub async fn list_users(&self) -> Result<Vec<User>, S3Error> {
        let keys = self
            .kv
            .scan_prefix(META_TABLE, b"user\0")
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))?;
        let mut users = Vec::with_capacity(keys.len());
        for key in keys {
            let raw = self
                .kv
                .get(META_TABLE, &key)
                .await
                .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))?;
            users.push(serde_json::from_slice(&raw).map_err(|e| S3Error::Internal(e.into()))?);
        }
        Ok(users)
    }

    // -- buckets ------------------------------------------------------------

    pub async fn add_bucket(&self, bucket: &Bucket) -> Result<(), S3Error> {
        let value = serde_json::to_vec(bucket).map_err(|e| S3Error::Internal(e.into()))?;
        self.kv
            .set(META_TABLE, &Self::bucket_key(&bucket.name), value)
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))
    }

    pub async fn get_bucket(&self, name: &str) -> Result<Bucket, S3Error> {
        let raw = self
            .kv
            .get(META_TABLE, &Self::bucket_key(name))
            .await
            .map_err(|_| S3Error::NoSuchBucket { bucket: name.to_string() })?;
        serde_json::from_slice(&raw).map_err(|e| S3Error::Internal(e.into()))
    }

    pub async fn del_bucket(&self, name: &str) -> Result<(), S3Error> {
        self.kv
            .delete(META_TABLE, &Self::bucket_key(name))
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))
    }

    // -- objects ------------------------------------------------------------

    pub async fn get_object_meta(&self, bucket: &str, name: &str) -> Result<ObjectMeta, S3Error> {
        let raw = self
            .kv
            .get(META_TABLE, &Self::object_key(bucket, name))
            .await
            .map_err(|_| S3Error::NoSuchKey { key: name.to_string() })?;
        serde_json::from_slice(&raw).map_err(|e| S3Error::Internal(e.into()))
    }

    /// Writes chunks first, then the metadata record, per the write-order
    /// invariant: a crash between the two leaves only an orphaned chunk,
    /// never metadata pointing at missing content.
    pub async fn add_object(&self, meta: &ObjectMeta, content: &Bytes) -> Result<(), S3Error> {
        self.write_chunks(&meta.bucket, &meta.name, content).await?;
        let value = serde_json::to_vec(meta).map_err(|e| S3Error::Internal(e.into()))?;
        self.kv
            .set(META_TABLE, &Self::object_key(&meta.bucket, &meta.name), value)
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))
    }

    async fn write_chunks(&self, bucket: &str, name: &str, content: &Bytes) -> Result<(), S3Error> {
        let count = Self::chunk_count(content.len() as u64, self.chunk_size);
        for idx in 0..count {
            let start = (idx * self.chunk_size) as usize;
            let end = ((idx + 1) * self.chunk_size).min(content.len() as u64) as usize;
            let chunk = content.slice(start..end);
            if let Err(e) = self
                .kv
                .set(DATA_TABLE, &Self::chunk_key(bucket, name, idx), chunk.to_vec())
                .await
            {
                // Best-effort cleanup of whatever chunks already landed.
                for prior in 0..idx {
                    let _ = self.kv.delete(DATA_TABLE, &Self::chunk_key(bucket, name, prior)).await;
                }
                return Err(S3Error::Internal(anyhow::anyhow!(e.to_string())));
            }
        }
        Ok(())
    }

    async fn read_chunks(&self, bucket: &str, name: &str, count: u64) -> Result<Bytes, S3Error> {
        let mut out = BytesMut::new();
        for idx in 0..count {
            match self.kv.get(DATA_TABLE, &Self::chunk_key(bucket, name, idx)).await {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(_) => {
                    tracing::warn!(bucket, name, idx, "missing chunk below recorded size");
                }
            }
        }
        Ok(out.freeze())
    }

    pub async fn get_object(&self, bucket: &str, name: &str) -> Result<(ObjectMeta, Bytes), S3Error> {
        let meta = self.get_object_meta(bucket, name).await?;
        let count = Self::chunk_count(meta.size, self.chunk_size);
        let content = self.read_chunks(bucket, name, count).await?;
        Ok((meta, content))
    }

    /// Reads the inclusive byte range `[start, end]`, clamped to object size.
    pub async fn get_partial_object(
        &self,
        bucket: &str,
        name: &str,
        start: u64,
        end: u64,
    ) -> Result<(ObjectMeta, Bytes), S3Error> {
        let meta = self.get_object_meta(bucket, name).await?;
        if meta.size == 0 || start >= meta.size {
            return Err(S3Error::InvalidRange);
        }
        let end = end.min(meta.size.saturating_sub(1));
        let first_chunk = start / self.chunk_size;
        let last_chunk = end / self.chunk_size;

        let mut out = BytesMut::new();
        for idx in first_chunk..=last_chunk {
            let chunk = self
                .kv
                .get(DATA_TABLE, &Self::chunk_key(bucket, name, idx))
                .await
                .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))?;
            let chunk_start = idx * self.chunk_size;
            let lo = if idx == first_chunk { (start - chunk_start) as usize } else { 0 };
            let hi = if idx == last_chunk {
                (end - chunk_start + 1) as usize
            } else {
                chunk.len()
            };
            out.extend_from_slice(&chunk[lo..hi.min(chunk.len())]);
        }
        Ok((meta, out.freeze()))
    }

    /// Deletes an object's chunks then its metadata. Tolerant to missing
    /// chunks and a missing metadata record (idempotent).
    pub async fn del_object(&self, bucket: &str, name: &str) -> Result<(), S3Error> {
        let count = match self.get_object_meta(bucket, name).await {
            Ok(meta) => Self::chunk_count(meta.size, self.chunk_size),
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };
        for idx in 0..count {
            let _ = self.kv.delete(DATA_TABLE, &Self::chunk_key(bucket, name, idx)).await;
        }
        self.kv
            .delete(META_TABLE, &Self::object_key(bucket, name))
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))
    }

    // -- multipart ------------------------------------------------------------

    pub async fn upload_part(
        &self,
        bucket: &str,
        ghost: &str,
        part_number: u32,
        content: &Bytes,
    ) -> Result<PartMeta, S3Error> {
        let part_chunk_name = Self::part_chunk_name(ghost, part_number);
        // Overwriting a part means discarding whatever chunks the old
        // upload of this part number left behind.
        if let Ok(raw) = self.kv.get(META_TABLE, &Self::part_key(bucket, ghost, part_number)).await {
            if let Ok(old) = serde_json::from_slice::<PartMeta>(&raw) {
                let old_count = Self::chunk_count(old.size, self.chunk_size);
                for idx in 0..old_count {
                    let _ = self.kv.delete(DATA_TABLE, &Self::chunk_key(bucket, &part_chunk_name, idx)).await;
                }
            }
        }
        self.write_chunks(bucket, &part_chunk_name, content).await?;
        let etag = crate::dataplane::quoted_md5_etag(content);
        let part = PartMeta {
            part_number,
            etag,
            size: content.len() as u64,
        };
        let value = serde_json::to_vec(&part).map_err(|e| S3Error::Internal(e.into()))?;
        self.kv
            .set(META_TABLE, &Self::part_key(bucket, ghost, part_number), value)
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))?;
        Ok(part)
    }

    pub async fn list_parts(&self, bucket: &str, ghost: &str) -> Result<Vec<PartMeta>, S3Error> {
        let prefix = format!("part\0{bucket}\0{ghost}\0").into_bytes();
        let keys = self
            .kv
            .scan_prefix(META_TABLE, &prefix)
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))?;
        let mut parts = Vec::with_capacity(keys.len());
        for key in keys {
            let raw = self
                .kv
                .get(META_TABLE, &key)
                .await
                .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))?;
            parts.push(serde_json::from_slice::<PartMeta>(&raw).map_err(|e| S3Error::Internal(e.into()))?);
        }
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    /// Validates supplied parts against stored ones, physically re-chunks
    /// their content contiguously under `final_name`, and deletes the ghost
    /// and its per-part bookkeeping. Returns the composite etag.
    pub async fn complete_multipart(
        &self,
        bucket: &str,
        ghost: &str,
        final_name: &str,
        owner_access_key: &str,
        content_type: &str,
        supplied: &[(u32, String)],
    ) -> Result<String, S3Error> {
        let stored = self.list_parts(bucket, ghost).await?;
        let stored_by_number: std::collections::HashMap<u32, &PartMeta> =
            stored.iter().map(|p| (p.part_number, p)).collect();

        let mut last_number = 0u32;
        let mut matched = Vec::with_capacity(supplied.len());
        for (number, etag) in supplied {
            if *number < last_number {
                return Err(S3Error::InvalidPartOrder);
            }
            last_number = *number;
            let part = stored_by_number.get(number).ok_or_else(|| S3Error::InvalidPart {
                message: format!("part number {number} was not uploaded"),
            })?;
            if crate::dataplane::strip_etag_quotes(&part.etag) != crate::dataplane::strip_etag_quotes(etag) {
                return Err(S3Error::InvalidPart {
                    message: format!("part {number} etag does not match"),
                });
            }
            matched.push((*part).clone());
        }

        let mut hasher = Md5::new();
        for part in &matched {
            let digest_bytes = hex::decode(crate::dataplane::strip_etag_quotes(&part.etag))
                .map_err(|e| S3Error::Internal(e.into()))?;
            hasher.update(&digest_bytes);
        }
        let final_etag = format!("\"{:x}-{}\"", hasher.finalize(), matched.len());

        // Re-chunk: read each part's bytes back and rewrite contiguously
        // under the final object name so GetObject never has to know the
        // object was ever multipart.
        let mut assembled = BytesMut::new();
        for part in &matched {
            let part_chunk_name = Self::part_chunk_name(ghost, part.part_number);
            let count = Self::chunk_count(part.size, self.chunk_size);
            let bytes = self.read_chunks(bucket, &part_chunk_name, count).await?;
            assembled.extend_from_slice(&bytes);
        }
        let assembled = assembled.freeze();
        let _ = self.del_object(bucket, final_name).await;
        let meta = ObjectMeta {
            bucket: bucket.to_string(),
            name: final_name.to_string(),
            size: assembled.len() as u64,
            etag: final_etag.clone(),
            content_type: content_type.to_string(),
            storage_class: "STANDARD".to_string(),
            owner_access_key: owner_access_key.to_string(),
            mtime: crate::dataplane::now_iso8601(),
            user_metadata: BTreeMap::new(),
        };
        self.add_object(&meta, &assembled).await?;

        for part in &matched {
            let part_chunk_name = Self::part_chunk_name(ghost, part.part_number);
            let count = Self::chunk_count(part.size, self.chunk_size);
            for idx in 0..count {
                let _ = self.kv.delete(DATA_TABLE, &Self::chunk_key(bucket, &part_chunk_name, idx)).await;
            }
            let _ = self.kv.delete(META_TABLE, &Self::part_key(bucket, ghost, part.part_number)).await;
        }
        let _ = self.del_object(bucket, ghost).await;

        Ok(final_etag)
    }

    pub async fn abort_multipart(&self, bucket: &str, ghost: &str) -> Result<(), S3Error> {
        let parts = self.list_parts(bucket, ghost).await.unwrap_or_default();
        for part in parts {
            let part_chunk_name = Self::part_chunk_name(ghost, part.part_number);
            let count = Self::chunk_count(part.size, self.chunk_size);
            for idx in 0..count {
                let _ = self.kv.delete(DATA_TABLE, &Self::chunk_key(bucket, &part_chunk_name, idx)).await;
            }
            let _ = self.kv.delete(META_TABLE, &Self::part_key(bucket, ghost, part.part_number)).await;
        }
        self.del_object(bucket, ghost).await
    }

    // -- namelists ------------------------------------------------------------

    pub async fn save_namelist(&self, key: &str, names: &[String]) -> Result<(), S3Error> {
        let encoded = encode_namelist(names);
        self.kv
            .set(META_TABLE, key.as_bytes(), encoded)
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))
    }

    pub async fn get_namelist(&self, key: &str) -> Result<Vec<String>, S3Error> {
        match self.kv.get(META_TABLE, key.as_bytes()).await {
            Ok(raw) => decode_namelist(&raw).map_err(|e| S3Error::Internal(anyhow::anyhow!(e))),
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Write an arbitrary byte blob to the meta table under `key`. Used by
    /// the Monitor to persist its snapshot, which has its own layout (§6)
    /// distinct from the namelist encoding.
    pub async fn save_namelist_raw(&self, key: &str, value: Vec<u8>) -> Result<(), S3Error> {
        self.kv
            .set(META_TABLE, key.as_bytes(), value)
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))
    }

    pub async fn get_namelist_raw(&self, key: &str) -> Result<Vec<u8>, S3Error> {
        self.kv
            .get(META_TABLE, key.as_bytes())
            .await
            .map_err(|e| S3Error::Internal(anyhow::anyhow!(e.to_string())))
    }
}

fn random_token(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}

/// `uint64 count || (uint64 len || bytes)*`, all little-endian.
pub fn encode_namelist(names: &[String]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + names.iter().map(|n| 8 + n.len()).sum::<usize>());
    buf.extend_from_slice(&(names.len() as u64).to_le_bytes());
    for name in names {
        buf.extend_from_slice(&(name.len() as u64).to_le_bytes());
        buf.extend_from_slice(name.as_bytes());
    }
    buf
}

pub fn decode_namelist(buf: &[u8]) -> Result<Vec<String>, String> {
    if buf.len() < 8 {
        return Err("namelist blob shorter than count prefix".to_string());
    }
    let mut offset = 0usize;
    let count = u64::from_le_bytes(buf[0..8].try_into().unwrap()) as usize;
    offset += 8;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.len() < offset + 8 {
            return Err("namelist blob truncated at length prefix".to_string());
        }
        let len = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap()) as usize;
        offset += 8;
        if buf.len() < offset + len {
            return Err("namelist blob truncated at name bytes".to_string());
        }
        let name = String::from_utf8(buf[offset..offset + len].to_vec()).map_err(|e| e.to_string())?;
        offset += len;
        names.push(name);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKvCluster;

    fn test_store() -> Store {
        Store::new(Arc::new(MemoryKvCluster::new()), 16)
    }

    #[test]
    fn namelist_roundtrips_through_binary_encoding() {
        let names = vec!["a".to_string(), "bb".to_string(), "".to_string()];
        let encoded = encode_namelist(&names);
        let decoded = decode_namelist(&encoded).unwrap();
        assert_eq!(names, decoded);
    }

    #[test]
    fn decode_empty_namelist() {
        let decoded = decode_namelist(&encode_namelist(&[])).unwrap();
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn add_then_get_object_roundtrips_content() {
        let store = test_store();
        let content = Bytes::from_static(b"hello world, this spans more than one chunk boundary");
        let meta = ObjectMeta {
            bucket: "b".into(),
            name: "k".into(),
            size: content.len() as u64,
            etag: format!("{:x}", Md5::digest(&content)),
            content_type: "application/octet-stream".into(),
            storage_class: "STANDARD".into(),
            owner_access_key: "ak".into(),
            mtime: "2026-01-01T00:00:00Z".into(),
            user_metadata: BTreeMap::new(),
        };
        store.add_object(&meta, &content).await.unwrap();
        let (read_meta, read_content) = store.get_object("b", "k").await.unwrap();
        assert_eq!(read_content, content);
        assert_eq!(read_meta.etag, meta.etag);
    }

    #[tokio::test]
    async fn partial_read_trims_to_segment() {
        let store = test_store();
        let content = Bytes::from_static(b"0123456789abcdef0123"); // 20 bytes, chunk_size=16
        let meta = ObjectMeta {
            bucket: "b".into(),
            name: "k".into(),
            size: content.len() as u64,
            etag: "etag".into(),
            content_type: "text/plain".into(),
            storage_class: "STANDARD".into(),
            owner_access_key: "ak".into(),
            mtime: "2026-01-01T00:00:00Z".into(),
            user_metadata: BTreeMap::new(),
        };
        store.add_object(&meta, &content).await.unwrap();
        let (_, partial) = store.get_partial_object("b", "k", 2, 5).await.unwrap();
        assert_eq!(partial, Bytes::from_static(b"2345"));

        // Range spanning the chunk boundary at offset 16.
        let (_, partial2) = store.get_partial_object("b", "k", 14, 17).await.unwrap();
        assert_eq!(partial2, Bytes::from_static(&content[14..18]));
    }

    #[tokio::test]
    async fn partial_read_past_size_is_invalid_range() {
        let store = test_store();
        let content = Bytes::from_static(b"short");
        let meta = ObjectMeta {
            bucket: "b".into(),
            name: "k".into(),
            size: content.len() as u64,
            etag: "etag".into(),
            content_type: "text/plain".into(),
            storage_class: "STANDARD".into(),
            owner_access_key: "ak".into(),
            mtime: "2026-01-01T00:00:00Z".into(),
            user_metadata: BTreeMap::new(),
        };
        store.add_object(&meta, &content).await.unwrap();
        let err = store.get_partial_object("b", "k", 10, 20).await.unwrap_err();
        assert!(matches!(err, S3Error::InvalidRange));
    }

    #[tokio::test]
    async fn delete_object_is_idempotent() {
        let store = test_store();
        store.del_object("b", "missing").await.unwrap();
        store.del_object("b", "missing").await.unwrap();
    }

    #[tokio::test]
    async fn multipart_complete_validates_part_order() {
        let store = test_store();
        store.upload_part("b", "ghost", 1, &Bytes::from_static(b"hello")).await.unwrap();
        store.upload_part("b", "ghost", 2, &Bytes::from_static(b"world")).await.unwrap();
        let etag1 = format!("{:x}", Md5::digest(b"hello"));
        let etag2 = format!("{:x}", Md5::digest(b"world"));

        let err = store
            .complete_multipart("b", "ghost", "final", "ak", "text/plain", &[(2, etag2.clone()), (1, etag1.clone())])
            .await
            .unwrap_err();
        assert!(matches!(err, S3Error::InvalidPartOrder));

        let final_etag = store
            .complete_multipart("b", "ghost", "final", "ak", "text/plain", &[(1, etag1), (2, etag2)])
            .await
            .unwrap();
        assert!(final_etag.ends_with("-2\""));
        assert!(final_etag.starts_with('"'));

        let (_, content) = store.get_object("b", "final").await.unwrap();
        assert_eq!(content, Bytes::from_static(b"helloworld"));
    }

    #[tokio::test]
    async fn multipart_complete_rejects_mismatched_etag() {
        let store = test_store();
        store.upload_part("b", "ghost", 1, &Bytes::from_static(b"hello")).await.unwrap();
        let err = store
            .complete_multipart("b", "ghost", "final", "ak", "text/plain", &[(1, "deadbeef".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(err, S3Error::InvalidPart { .. }));
    }
}
