//! Monitor (C8): request/volume/traffic counters and per-API histograms,
//! periodically flushed to the store. Grounded in the original gateway's
//! monitor component -- atomic scalars for hot counters, a single mutex
//! guarding every map-valued counter (including the multipart upload-part
//! timing mean, which the original left racy; here it shares the same
//! lock as everything else, per the resolved open question in §9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::errors::S3Error;
use crate::store::Store;

/// The S3 operation an API request counter is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ApiKind {
    ListAllBuckets = 0,
    ListObjects = 1,
    CreateBucket = 2,
    DeleteBucket = 3,
    HeadBucket = 4,
    ListMultipartUploads = 5,
    GetBucketLocation = 6,
    DeleteMultipleObjects = 7,
    GetObject = 8,
    PutObject = 9,
    CopyObject = 10,
    DeleteObject = 11,
    HeadObject = 12,
    InitiateMultipartUpload = 13,
    UploadPart = 14,
    UploadPartCopy = 15,
    CompleteMultipartUpload = 16,
    AbortMultipartUpload = 17,
    ListParts = 18,
}

impl ApiKind {
    const ALL: [ApiKind; 19] = [
        ApiKind::ListAllBuckets,
        ApiKind::ListObjects,
        ApiKind::CreateBucket,
        ApiKind::DeleteBucket,
        ApiKind::HeadBucket,
        ApiKind::ListMultipartUploads,
        ApiKind::GetBucketLocation,
        ApiKind::DeleteMultipleObjects,
        ApiKind::GetObject,
        ApiKind::PutObject,
        ApiKind::CopyObject,
        ApiKind::DeleteObject,
        ApiKind::HeadObject,
        ApiKind::InitiateMultipartUpload,
        ApiKind::UploadPart,
        ApiKind::UploadPartCopy,
        ApiKind::CompleteMultipartUpload,
        ApiKind::AbortMultipartUpload,
        ApiKind::ListParts,
    ];

    fn from_u32(v: u32) -> Option<ApiKind> {
        Self::ALL.into_iter().find(|k| *k as u32 == v)
    }
}

#[derive(Default)]
struct MonitorMaps {
    bucket_volume: HashMap<String, u64>,
    bucket_traffic: HashMap<String, u64>,
    api_request_count: HashMap<ApiKind, u64>,
    api_err4xx_count: HashMap<ApiKind, u64>,
    api_err5xx_count: HashMap<ApiKind, u64>,
    upload_part_count: u64,
    upload_part_total_micros: u64,
}

/// Well-known metadata key the Monitor snapshot is flushed to.
pub const MONITOR_KEY: &str = "monitor\0snapshot";

pub struct Monitor {
    meta_volume: AtomicU64,
    data_volume: AtomicU64,
    cluster_traffic: AtomicU64,
    request_count: AtomicU64,
    maps: Mutex<MonitorMaps>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            meta_volume: AtomicU64::new(0),
            data_volume: AtomicU64::new(0),
            cluster_traffic: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
            maps: Mutex::new(MonitorMaps::default()),
        }
    }

    pub fn set_cluster_volume(&self, meta_vol: u64, data_vol: u64) {
        self.meta_volume.store(meta_vol, Ordering::Relaxed);
        self.data_volume.store(data_vol, Ordering::Relaxed);
    }

    pub fn add_cluster_traffic(&self, size: u64) {
        self.cluster_traffic.fetch_add(size, Ordering::Relaxed);
    }

    pub fn add_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bucket_volume(&self, bucket: &str, size: u64) {
        let mut maps = self.maps.lock().unwrap();
        *maps.bucket_volume.entry(bucket.to_string()).or_insert(0) += size;
    }

    pub fn del_bucket_volume(&self, bucket: &str, size: u64) {
        let mut maps = self.maps.lock().unwrap();
        let entry = maps.bucket_volume.entry(bucket.to_string()).or_insert(0);
        *entry = entry.saturating_sub(size);
    }

    pub fn add_bucket_traffic(&self, bucket: &str, size: u64) {
        let mut maps = self.maps.lock().unwrap();
        *maps.bucket_traffic.entry(bucket.to_string()).or_insert(0) += size;
    }

    /// Record the outcome of one API call: 2xx/3xx bumps the request
    /// counter only, 4xx/5xx additionally bump their own counter.
    pub fn add_api_request(&self, kind: ApiKind, status: u16) {
        let mut maps = self.maps.lock().unwrap();
        *maps.api_request_count.entry(kind).or_insert(0) += 1;
        if (400..500).contains(&status) {
            *maps.api_err4xx_count.entry(kind).or_insert(0) += 1;
        } else if status >= 500 {
            *maps.api_err5xx_count.entry(kind).or_insert(0) += 1;
        }
    }

    /// Update the running mean of multipart upload-part latency, in
    /// microseconds. Shares the maps mutex rather than a separate atomic,
    /// eliminating the source's read-modify-write race on the mean.
    pub fn update_upload_part_time(&self, micros: u64) {
        let mut maps = self.maps.lock().unwrap();
        maps.upload_part_count += 1;
        maps.upload_part_total_micros += micros;
    }

    fn upload_part_mean(maps: &MonitorMaps) -> u64 {
        if maps.upload_part_count == 0 {
            0
        } else {
            maps.upload_part_total_micros / maps.upload_part_count
        }
    }

    /// Encode the current state per §6's persisted layout and write it to
    /// the store under [`MONITOR_KEY`].
    pub async fn flush(&self, store: &Store) -> Result<(), S3Error> {
        let encoded = self.encode();
        store.save_namelist_raw(MONITOR_KEY, encoded).await
    }

    /// Zero every counter. Backs the admin surface's `OPTIONS /reset_status`.
    pub fn reset(&self) {
        self.meta_volume.store(0, Ordering::Relaxed);
        self.data_volume.store(0, Ordering::Relaxed);
        self.cluster_traffic.store(0, Ordering::Relaxed);
        self.request_count.store(0, Ordering::Relaxed);
        *self.maps.lock().unwrap() = MonitorMaps::default();
    }

    /// Render a human-readable status report for the admin surface's
    /// `GET /status`, in the line-oriented style of the original monitor.
    pub fn status_text(&self) -> String {
        let maps = self.maps.lock().unwrap();
        let mut out = String::new();
        out.push_str(&format!("meta_volume: {}\r\n", self.meta_volume.load(Ordering::Relaxed)));
        out.push_str(&format!("data_volume: {}\r\n", self.data_volume.load(Ordering::Relaxed)));
        out.push_str(&format!(
            "cluster_traffic: {}\r\n",
            self.cluster_traffic.load(Ordering::Relaxed)
        ));
        out.push_str(&format!("request_count: {}\r\n", self.request_count.load(Ordering::Relaxed)));
        out.push_str(&format!("upload_part_mean_micros: {}\r\n", Self::upload_part_mean(&maps)));
        for (bucket, vol) in &maps.bucket_volume {
            out.push_str(&format!("bucket_volume[{bucket}]: {vol}\r\n"));
        }
        for (bucket, traffic) in &maps.bucket_traffic {
            out.push_str(&format!("bucket_traffic[{bucket}]: {traffic}\r\n"));
        }
        for (kind, count) in &maps.api_request_count {
            out.push_str(&format!("api_requests[{kind:?}]: {count}\r\n"));
        }
        out
    }

    fn encode(&self) -> Vec<u8> {
        let maps = self.maps.lock().unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.meta_volume.load(Ordering::Relaxed).to_le_bytes());
        buf.extend_from_slice(&self.data_volume.load(Ordering::Relaxed).to_le_bytes());
        buf.extend_from_slice(&self.cluster_traffic.load(Ordering::Relaxed).to_le_bytes());

        encode_string_map(&mut buf, &maps.bucket_volume);
        encode_string_map(&mut buf, &maps.bucket_traffic);

        buf.extend_from_slice(&(maps.api_request_count.len() as u64).to_le_bytes());
        for table in [&maps.api_request_count, &maps.api_err4xx_count, &maps.api_err5xx_count] {
            for (kind, count) in table {
                buf.extend_from_slice(&(*kind as u32).to_le_bytes());
                buf.extend_from_slice(&count.to_le_bytes());
            }
        }

        buf.extend_from_slice(&self.request_count.load(Ordering::Relaxed).to_le_bytes());
        buf.extend_from_slice(&Self::upload_part_mean(&maps).to_le_bytes());
        buf
    }

    #[cfg(test)]
    fn decode_for_test(buf: &[u8]) -> (u64, u64, u64, HashMap<String, u64>, HashMap<String, u64>, u64, u64) {
        let mut offset = 0usize;
        let read_u64 = |buf: &[u8], offset: &mut usize| -> u64 {
            let v = u64::from_le_bytes(buf[*offset..*offset + 8].try_into().unwrap());
            *offset += 8;
            v
        };
        let meta_vol = read_u64(buf, &mut offset);
        let data_vol = read_u64(buf, &mut offset);
        let cluster_traffic = read_u64(buf, &mut offset);
        let bucket_volume = decode_string_map(buf, &mut offset);
        let bucket_traffic = decode_string_map(buf, &mut offset);
        let n_api = read_u64(buf, &mut offset);
        for _ in 0..(n_api * 3) {
            offset += 4 + 8;
        }
        let request_count = read_u64(buf, &mut offset);
        let upload_part_time = read_u64(buf, &mut offset);
        (meta_vol, data_vol, cluster_traffic, bucket_volume, bucket_traffic, request_count, upload_part_time)
    }
}

fn encode_string_map(buf: &mut Vec<u8>, map: &HashMap<String, u64>) {
    buf.extend_from_slice(&(map.len() as u64).to_le_bytes());
    for (name, value) in map {
        buf.extend_from_slice(&(name.len() as u64).to_le_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
fn decode_string_map(buf: &[u8], offset: &mut usize) -> HashMap<String, u64> {
    let mut map = HashMap::new();
    let count = u64::from_le_bytes(buf[*offset..*offset + 8].try_into().unwrap());
    *offset += 8;
    for _ in 0..count {
        let len = u64::from_le_bytes(buf[*offset..*offset + 8].try_into().unwrap()) as usize;
        *offset += 8;
        let name = String::from_utf8(buf[*offset..*offset + len].to_vec()).unwrap();
        *offset += len;
        let value = u64::from_le_bytes(buf[*offset..*offset + 8].try_into().unwrap());
        *offset += 8;
        map.insert(name, value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKvCluster;
    use std::sync::Arc;

    #[test]
    fn api_kind_roundtrips_through_discriminant() {
        for kind in ApiKind::ALL {
            assert_eq!(ApiKind::from_u32(kind as u32), Some(kind));
        }
    }

    #[test]
    fn snapshot_encodes_scalars_and_maps() {
        let monitor = Monitor::new();
        monitor.set_cluster_volume(100, 200);
        monitor.add_cluster_traffic(5);
        monitor.add_request();
        monitor.add_bucket_volume("b1", 10);
        monitor.add_bucket_traffic("b1", 20);
        monitor.add_api_request(ApiKind::GetObject, 200);
        monitor.add_api_request(ApiKind::GetObject, 404);
        monitor.update_upload_part_time(100);
        monitor.update_upload_part_time(300);

        let encoded = monitor.encode();
        let (meta_vol, data_vol, cluster_traffic, bucket_volume, bucket_traffic, request_count, upload_part_time) =
            Monitor::decode_for_test(&encoded);

        assert_eq!(meta_vol, 100);
        assert_eq!(data_vol, 200);
        assert_eq!(cluster_traffic, 5);
        assert_eq!(bucket_volume.get("b1"), Some(&10));
        assert_eq!(bucket_traffic.get("b1"), Some(&20));
        assert_eq!(request_count, 1);
        assert_eq!(upload_part_time, 200);
    }

    #[tokio::test]
    async fn flush_writes_snapshot_to_store() {
        let store = Store::new(Arc::new(MemoryKvCluster::new()), 1_048_576);
        let monitor = Monitor::new();
        monitor.add_request();
        monitor.flush(&store).await.unwrap();
        let raw = store.get_namelist_raw(MONITOR_KEY).await.unwrap();
        assert!(!raw.is_empty());
    }

    #[test]
    fn reset_zeroes_every_counter() {
        let monitor = Monitor::new();
        monitor.add_request();
        monitor.add_bucket_volume("b", 10);
        monitor.reset();
        assert_eq!(monitor.status_text().contains("request_count: 0"), true);
        assert!(monitor.maps.lock().unwrap().bucket_volume.is_empty());
    }

    #[test]
    fn status_text_reports_counters() {
        let monitor = Monitor::new();
        monitor.add_request();
        monitor.add_bucket_volume("b1", 42);
        let text = monitor.status_text();
        assert!(text.contains("request_count: 1"));
        assert!(text.contains("bucket_volume[b1]: 42"));
    }

    #[test]
    fn del_bucket_volume_does_not_underflow() {
        let monitor = Monitor::new();
        monitor.add_bucket_volume("b", 5);
        monitor.del_bucket_volume("b", 100);
        let maps = monitor.maps.lock().unwrap();
        assert_eq!(maps.bucket_volume.get("b"), Some(&0));
    }
}
