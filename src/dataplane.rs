//! Object data plane (C6): range parsing, conditional-request evaluation,
//! and ISO-8601/HTTP-date helpers shared by the object and multipart
//! handlers. Chunk striping math itself lives on [`crate::store::Store`];
//! this module covers everything that turns request headers into the
//! `(start, end)` the store needs, and store metadata back into response
//! headers.

use std::collections::HashMap;

use axum::http::HeaderMap;

use crate::errors::S3Error;
use crate::store::ObjectMeta;

/// Parsed byte range from a `Range` header.
#[derive(Debug, Clone, PartialEq)]
pub enum ByteRange {
    /// `bytes=start-end` (inclusive both ends)
    StartEnd(u64, u64),
    /// `bytes=start-` (from start to end of file)
    StartOpen(u64),
    /// `bytes=-N` (last N bytes)
    Suffix(u64),
}

/// Parse a `Range` header value like `bytes=0-4`, `bytes=5-`, `bytes=-3`.
/// Only a single range is supported; a request naming more than one
/// collapses to `None` here, and callers fall back to a full read.
pub fn parse_range_header(range_str: &str) -> Option<ByteRange> {
    let range_str = range_str.trim();
    let spec = range_str.strip_prefix("bytes=")?;

    if spec.contains(',') {
        return None;
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        let n: u64 = suffix.parse().ok()?;
        if n == 0 {
            return None;
        }
        Some(ByteRange::Suffix(n))
    } else if let Some(stripped) = spec.strip_suffix('-') {
        let start: u64 = stripped.parse().ok()?;
        Some(ByteRange::StartOpen(start))
    } else if let Some((start_s, end_s)) = spec.split_once('-') {
        let start: u64 = start_s.parse().ok()?;
        let end: u64 = end_s.parse().ok()?;
        if start > end {
            return None;
        }
        Some(ByteRange::StartEnd(start, end))
    } else {
        None
    }
}

/// Resolve a [`ByteRange`] against a total content length. Both ends of
/// the returned tuple are inclusive. `None` means unsatisfiable (416).
pub fn resolve_range(range: &ByteRange, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    match range {
        ByteRange::StartEnd(start, end) => {
            if *start >= total {
                return None;
            }
            Some((*start, (*end).min(total - 1)))
        }
        ByteRange::StartOpen(start) => {
            if *start >= total {
                return None;
            }
            Some((*start, total - 1))
        }
        ByteRange::Suffix(n) => {
            if *n >= total {
                Some((0, total - 1))
            } else {
                Some((total - n, total - 1))
            }
        }
    }
}

/// Strip surrounding double quotes from an ETag for comparison.
pub fn strip_etag_quotes(etag: &str) -> &str {
    let etag = etag.trim();
    if etag.starts_with('"') && etag.ends_with('"') && etag.len() >= 2 {
        &etag[1..etag.len() - 1]
    } else {
        etag
    }
}

/// Check If-Match / If-None-Match / If-Modified-Since / If-Unmodified-Since
/// against an object's current metadata.
///
/// Evaluation priority, per HTTP semantics:
///   1. If-Match (412 on mismatch)
///   2. If-Unmodified-Since (412 on mismatch) -- only if If-Match absent
///   3. If-None-Match (304 for GET/HEAD on match, 412 otherwise)
///   4. If-Modified-Since (304 on no-change) -- only if If-None-Match absent
pub fn evaluate_conditions(
    headers: &HeaderMap,
    meta: &ObjectMeta,
    is_get_or_head: bool,
) -> Result<(), S3Error> {
    let current_etag = strip_etag_quotes(&meta.etag);
    let last_modified = parse_iso8601_to_system_time(&meta.mtime);

    if let Some(if_match) = headers.get("if-match").and_then(|v| v.to_str().ok()) {
        let inner = strip_etag_quotes(if_match);
        if inner != "*" && inner != current_etag {
            return Err(S3Error::PreconditionFailed);
        }
    } else if let Some(if_unmodified) = headers.get("if-unmodified-since").and_then(|v| v.to_str().ok()) {
        if let (Some(obj_time), Ok(threshold)) = (last_modified, httpdate::parse_http_date(if_unmodified)) {
            if obj_time > threshold {
                return Err(S3Error::PreconditionFailed);
            }
        }
    }

    if let Some(if_none_match) = headers.get("if-none-match").and_then(|v| v.to_str().ok()) {
        let inner = strip_etag_quotes(if_none_match);
        if inner == "*" || inner == current_etag {
            return Err(if is_get_or_head {
                S3Error::NotModified
            } else {
                S3Error::PreconditionFailed
            });
        }
    } else if is_get_or_head {
        if let Some(if_modified) = headers.get("if-modified-since").and_then(|v| v.to_str().ok()) {
            if let (Some(obj_time), Ok(threshold)) = (last_modified, httpdate::parse_http_date(if_modified)) {
                if obj_time <= threshold {
                    return Err(S3Error::NotModified);
                }
            }
        }
    }

    Ok(())
}

/// Parse an ISO-8601 timestamp (as produced by [`now_iso8601`]) to a
/// `SystemTime`, for conditional-request date comparisons.
pub fn parse_iso8601_to_system_time(iso: &str) -> Option<std::time::SystemTime> {
    if iso.len() < 19 {
        return None;
    }
    let year: i32 = iso[0..4].parse().ok()?;
    let month: u32 = iso[5..7].parse().ok()?;
    let day: u32 = iso[8..10].parse().ok()?;
    let hours: u32 = iso[11..13].parse().ok()?;
    let minutes: u32 = iso[14..16].parse().ok()?;
    let seconds: u32 = iso[17..19].parse().ok()?;

    let days_since_epoch = ymd_to_days(year, month, day);
    let total_secs = days_since_epoch as u64 * 86400 + hours as u64 * 3600 + minutes as u64 * 60 + seconds as u64;

    Some(std::time::UNIX_EPOCH + std::time::Duration::from_secs(total_secs))
}

/// Current time as an ISO-8601 string (millisecond precision, `Z` suffix).
pub fn now_iso8601() -> String {
    let now = std::time::SystemTime::now();
    let since_epoch = now.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    let secs = since_epoch.as_secs();
    let millis = since_epoch.subsec_millis();

    let days = secs / 86400;
    let day_secs = secs % 86400;
    let hours = day_secs / 3600;
    let minutes = (day_secs % 3600) / 60;
    let seconds = day_secs % 60;

    let (year, month, day) = days_to_ymd(days);

    format!("{year:04}-{month:02}-{day:02}T{hours:02}:{minutes:02}:{seconds:02}.{millis:03}Z")
}

/// Days-since-epoch -> (year, month, day). Howard Hinnant's civil-from-days.
pub fn days_to_ymd(days: u64) -> (i32, u32, u32) {
    let z = days as i64 + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m <= 2 { y + 1 } else { y };
    (year as i32, m as u32, d as u32)
}

/// Inverse of [`days_to_ymd`].
pub fn ymd_to_days(year: i32, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year as i64 - 1 } else { year as i64 };
    let m = if month <= 2 { month as i64 + 9 } else { month as i64 - 3 };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u64;
    let doy = (153 * m as u64 + 2) / 5 + day as u64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe as i64 - 719468
}

/// Extract `x-amz-meta-*` headers (lowercased names) into a map.
pub fn extract_user_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    let mut meta = HashMap::new();
    for (name, value) in headers.iter() {
        let name_str = name.as_str().to_lowercase();
        if name_str.starts_with("x-amz-meta-") {
            if let Ok(val) = value.to_str() {
                meta.insert(name_str, val.to_string());
            }
        }
    }
    meta
}

/// MD5 of `content`, formatted as a quoted lowercase-hex ETag.
pub fn quoted_md5_etag(content: &[u8]) -> String {
    use md5::{Digest, Md5};
    format!("\"{:x}\"", Md5::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_end_range() {
        assert_eq!(parse_range_header("bytes=2-5"), Some(ByteRange::StartEnd(2, 5)));
    }

    #[test]
    fn parses_open_ended_range() {
        assert_eq!(parse_range_header("bytes=5-"), Some(ByteRange::StartOpen(5)));
    }

    #[test]
    fn parses_suffix_range() {
        assert_eq!(parse_range_header("bytes=-3"), Some(ByteRange::Suffix(3)));
    }

    #[test]
    fn rejects_multi_range() {
        assert_eq!(parse_range_header("bytes=0-1,3-4"), None);
    }

    #[test]
    fn rejects_malformed_prefix() {
        assert_eq!(parse_range_header("items=0-1"), None);
    }

    #[test]
    fn resolve_clamps_end_to_size() {
        assert_eq!(resolve_range(&ByteRange::StartEnd(2, 500), 10), Some((2, 9)));
    }

    #[test]
    fn resolve_start_past_size_is_none() {
        assert_eq!(resolve_range(&ByteRange::StartEnd(20, 30), 10), None);
    }

    #[test]
    fn resolve_suffix_larger_than_total_returns_whole_object() {
        assert_eq!(resolve_range(&ByteRange::Suffix(100), 10), Some((0, 9)));
    }

    #[test]
    fn days_to_ymd_and_back_roundtrip() {
        for days in [0u64, 1, 365, 18_993, 20_000] {
            let (y, m, d) = days_to_ymd(days);
            assert_eq!(ymd_to_days(y, m, d), days as i64);
        }
    }

    #[test]
    fn strip_etag_quotes_removes_surrounding_quotes() {
        assert_eq!(strip_etag_quotes("\"abc\""), "abc");
        assert_eq!(strip_etag_quotes("abc"), "abc");
    }

    #[test]
    fn quoted_md5_etag_matches_known_value() {
        assert_eq!(quoted_md5_etag(b"hello"), "\"5d41402abc4b2a76b9719d911017c592\"");
    }
}
