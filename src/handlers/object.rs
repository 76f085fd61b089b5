//! Object-level S3 API handlers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::auth::AuthContext;
use crate::dataplane::{
    evaluate_conditions, extract_user_metadata, now_iso8601, parse_range_header, quoted_md5_etag,
    resolve_range, ymd_to_days,
};
use crate::errors::S3Error;
use crate::monitor::ApiKind;
use crate::store::{ObjectMeta, INTERNAL_PREFIX};
use crate::xml;
use crate::AppState;

// -- Helper functions -----------------------------------------------------------

/// Extract Content-Type from headers, defaulting to application/octet-stream.
fn extract_content_type(headers: &HeaderMap) -> String {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Validate the Content-MD5 header against the request body if present.
///
/// - Base64-decode the header value; return `InvalidArgument` if decode fails
///   or the result is not 16 bytes.
/// - Compute MD5 of the body and compare; return `InvalidArgument` on mismatch.
/// - If the header is absent, this is a no-op.
fn validate_content_md5(headers: &HeaderMap, body: &[u8]) -> Result<(), S3Error> {
    let md5_header = match headers.get("content-md5").and_then(|v| v.to_str().ok()) {
        Some(v) => v,
        None => return Ok(()),
    };

    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, md5_header)
        .map_err(|_| S3Error::InvalidArgument {
            message: "invalid Content-MD5".to_string(),
        })?;
    if decoded.len() != 16 {
        return Err(S3Error::InvalidArgument {
            message: "invalid Content-MD5".to_string(),
        });
    }

    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(body);
    let computed = hasher.finalize();
    if computed.as_slice() != decoded.as_slice() {
        return Err(S3Error::InvalidArgument {
            message: "Content-MD5 does not match body".to_string(),
        });
    }
    Ok(())
}

/// Convert an ISO-8601 timestamp ("2026-02-23T12:00:00.000Z") to RFC 7231
/// format ("Sun, 23 Feb 2026 12:00:00 GMT") for the Last-Modified header.
fn iso8601_to_http_date(iso: &str) -> String {
    if iso.len() < 19 {
        return httpdate::fmt_http_date(std::time::SystemTime::now());
    }
    let year: i32 = iso[0..4].parse().unwrap_or(1970);
    let month: u32 = iso[5..7].parse().unwrap_or(1);
    let day: u32 = iso[8..10].parse().unwrap_or(1);
    let hours: u32 = iso[11..13].parse().unwrap_or(0);
    let minutes: u32 = iso[14..16].parse().unwrap_or(0);
    let seconds: u32 = iso[17..19].parse().unwrap_or(0);

    let days_since_epoch = ymd_to_days(year, month, day);
    let total_secs = days_since_epoch as u64 * 86400
        + hours as u64 * 3600
        + minutes as u64 * 60
        + seconds as u64;
    let system_time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(total_secs);
    httpdate::fmt_http_date(system_time)
}

fn reject_internal_name(key: &str) -> Result<(), S3Error> {
    if key.starts_with(INTERNAL_PREFIX) {
        return Err(S3Error::NotImplemented);
    }
    Ok(())
}

fn user_metadata_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    extract_user_metadata(headers).into_iter().collect()
}

fn common_headers(response: &mut Response, meta: &ObjectMeta) {
    let hdrs = response.headers_mut();
    hdrs.insert(
        "content-type",
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(val) = HeaderValue::from_str(&meta.etag) {
        hdrs.insert("etag", val);
    }
    hdrs.insert(
        "last-modified",
        HeaderValue::from_str(&iso8601_to_http_date(&meta.mtime)).unwrap(),
    );
    hdrs.insert("accept-ranges", HeaderValue::from_static("bytes"));
    for (name, value) in &meta.user_metadata {
        if let (Ok(hname), Ok(hval)) = (
            axum::http::header::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            hdrs.insert(hname, hval);
        }
    }
}

// -- Handlers ---------------------------------------------------------------

/// `PUT /{bucket}/{key}` -- Upload an object.
pub async fn put_object(
    state: Arc<AppState>,
    auth: AuthContext,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, S3Error> {
    reject_internal_name(key)?;
    state.store.get_bucket(bucket).await?;

    if key.len() > 1024 {
        return Err(S3Error::KeyTooLongError);
    }
    if body.len() as u64 > state.config.server.max_object_size {
        return Err(S3Error::EntityTooLarge);
    }
    validate_content_md5(headers, body)?;

    // If-None-Match: * — fail if the object already exists (conditional PUT).
    if let Some(if_none_match) = headers.get("if-none-match").and_then(|v| v.to_str().ok()) {
        if if_none_match.trim() == "*" && state.store.get_object_meta(bucket, key).await.is_ok() {
            return Err(S3Error::PreconditionFailed);
        }
    }

    let _guard = state.locks.lock(bucket, key).await;

    let content = Bytes::copy_from_slice(body);
    let etag = quoted_md5_etag(body);
    let meta = ObjectMeta {
        bucket: bucket.to_string(),
        name: key.to_string(),
        size: content.len() as u64,
        etag: etag.clone(),
        content_type: extract_content_type(headers),
        storage_class: "STANDARD".to_string(),
        owner_access_key: auth.access_key.clone(),
        mtime: now_iso8601(),
        user_metadata: user_metadata_map(headers),
    };

    state.store.add_object(&meta, &content).await?;

    let names_ref = state.bucket_objects.reference(bucket).await?;
    names_ref.insert(key).await;
    names_ref.unref().await?;

    state.monitor.add_bucket_volume(bucket, meta.size);
    state.monitor.add_bucket_traffic(bucket, meta.size);
    state.monitor.add_api_request(ApiKind::PutObject, 200);

    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert("etag", HeaderValue::from_str(&etag).unwrap());
    Ok(response)
}

/// `GET /{bucket}/{key}` -- Retrieve an object, honoring Range and
/// conditional-request headers.
pub async fn get_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    reject_internal_name(key)?;
    state.store.get_bucket(bucket).await?;

    let meta = state.store.get_object_meta(bucket, key).await?;
    evaluate_conditions(headers, &meta, true)?;

    let (status, body, content_range, content_length) =
        if let Some(range_hdr) = headers.get("range").and_then(|v| v.to_str().ok()) {
            match parse_range_header(range_hdr) {
                Some(byte_range) => match resolve_range(&byte_range, meta.size) {
                    Some((start, end)) => {
                        let (_, data) = state.store.get_partial_object(bucket, key, start, end).await?;
                        let content_range = format!("bytes {start}-{end}/{}", meta.size);
                        let len = data.len() as u64;
                        (StatusCode::PARTIAL_CONTENT, data, Some(content_range), len)
                    }
                    None => return Err(S3Error::InvalidRange),
                },
                // Malformed range header -- ignore per HTTP spec, return full body.
                None => {
                    let (_, data) = state.store.get_object(bucket, key).await?;
                    let len = data.len() as u64;
                    (StatusCode::OK, data, None, len)
                }
            }
        } else {
            let (_, data) = state.store.get_object(bucket, key).await?;
            let len = data.len() as u64;
            (StatusCode::OK, data, None, len)
        };

    state.monitor.add_bucket_traffic(bucket, content_length);
    state.monitor.add_api_request(ApiKind::GetObject, status.as_u16());

    let mut response = (status, body.to_vec()).into_response();
    common_headers(&mut response, &meta);
    let hdrs = response.headers_mut();
    hdrs.insert(
        "content-length",
        HeaderValue::from_str(&content_length.to_string()).unwrap(),
    );
    if let Some(cr) = content_range {
        hdrs.insert("content-range", HeaderValue::from_str(&cr).unwrap());
    }

    Ok(response)
}

/// `HEAD /{bucket}/{key}` -- Retrieve object metadata without the body.
pub async fn head_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    if key.starts_with(INTERNAL_PREFIX) {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    if state.store.get_bucket(bucket).await.is_err() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    let meta = match state.store.get_object_meta(bucket, key).await {
        Ok(m) => m,
        Err(_) => return Ok(StatusCode::NOT_FOUND.into_response()),
    };

    evaluate_conditions(headers, &meta, true)?;

    state.monitor.add_api_request(ApiKind::HeadObject, 200);

    let mut response = StatusCode::OK.into_response();
    common_headers(&mut response, &meta);
    response.headers_mut().insert(
        "content-length",
        HeaderValue::from_str(&meta.size.to_string()).unwrap(),
    );
    Ok(response)
}

/// `DELETE /{bucket}/{key}` -- Delete a single object (idempotent).
pub async fn delete_object(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
) -> Result<Response, S3Error> {
    reject_internal_name(key)?;
    state.store.get_bucket(bucket).await?;

    let _guard = state.locks.lock(bucket, key).await;

    state.store.del_object(bucket, key).await?;

    let names_ref = state.bucket_objects.reference(bucket).await?;
    names_ref.delete(key).await;
    names_ref.unref().await?;

    state.monitor.add_api_request(ApiKind::DeleteObject, 204);

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `POST /{bucket}?delete` -- Delete multiple objects in a single request.
pub async fn delete_objects(
    state: Arc<AppState>,
    bucket: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, S3Error> {
    state.store.get_bucket(bucket).await?;
    validate_content_md5(headers, body)?;

    let (keys, quiet) = parse_delete_xml(body)?;
    if keys.is_empty() {
        return Err(S3Error::MalformedXML);
    }

    let names_ref = state.bucket_objects.reference(bucket).await?;
    let mut deleted_keys = Vec::new();
    let mut error_entries_owned: Vec<(String, String)> = Vec::new();

    for key in &keys {
        let _guard = state.locks.lock(bucket, key).await;
        match state.store.del_object(bucket, key).await {
            Ok(()) => {
                names_ref.delete(key).await;
                deleted_keys.push(key.clone());
            }
            Err(e) => error_entries_owned.push((key.clone(), e.to_string())),
        }
    }
    names_ref.unref().await?;

    state
        .monitor
        .add_api_request(ApiKind::DeleteMultipleObjects, 200);

    let deleted_entries: Vec<xml::DeletedEntry<'_>> = deleted_keys
        .iter()
        .map(|k| xml::DeletedEntry { key: k })
        .collect();
    let error_entries: Vec<xml::DeleteErrorEntry<'_>> = error_entries_owned
        .iter()
        .map(|(k, m)| xml::DeleteErrorEntry {
            key: k,
            code: "InternalError",
            message: m,
        })
        .collect();

    let body = xml::render_delete_result(&deleted_entries, &error_entries, quiet);

    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// Parse a `<Delete>` XML body for `DeleteObjects`, returning the keys to
/// delete and the `Quiet` flag.
fn parse_delete_xml(body: &[u8]) -> Result<(Vec<String>, bool), S3Error> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut keys = Vec::new();
    let mut quiet = false;
    let mut current_tag = String::new();
    let mut in_object = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                current_tag = tag_name.clone();
                if tag_name == "Object" {
                    in_object = true;
                }
            }
            Ok(Event::End(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag_name == "Object" {
                    in_object = false;
                }
                current_tag.clear();
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if in_object && current_tag == "Key" {
                    keys.push(text);
                } else if current_tag == "Quiet" {
                    quiet = text == "true";
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedXML),
            _ => {}
        }
        buf.clear();
    }

    Ok((keys, quiet))
}

/// `PUT /{bucket}/{key}` with `x-amz-copy-source` -- Copy an object.
///
/// Metadata directive `COPY` (default) carries the source's metadata over;
/// `REPLACE` rebuilds it from this request's headers. Honors
/// `x-amz-copy-source-range` for a partial-copy source slice.
pub async fn copy_object(
    state: Arc<AppState>,
    auth: AuthContext,
    dst_bucket: &str,
    dst_key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    reject_internal_name(dst_key)?;
    state.store.get_bucket(dst_bucket).await?;

    let copy_source = headers
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "Missing x-amz-copy-source header".to_string(),
        })?;

    let decoded_source = percent_encoding::percent_decode_str(copy_source).decode_utf8_lossy();
    let source_path = decoded_source.trim_start_matches('/');
    let (src_bucket, src_key) =
        source_path
            .split_once('/')
            .ok_or_else(|| S3Error::InvalidArgument {
                message: format!("Invalid x-amz-copy-source: {copy_source}"),
            })?;

    state.store.get_bucket(src_bucket).await?;
    let src_meta = state.store.get_object_meta(src_bucket, src_key).await?;

    let content = if let Some(range_hdr) = headers
        .get("x-amz-copy-source-range")
        .and_then(|v| v.to_str().ok())
    {
        let byte_range = parse_range_header(range_hdr).ok_or_else(|| S3Error::InvalidArgument {
            message: "invalid x-amz-copy-source-range".to_string(),
        })?;
        let (start, end) = resolve_range(&byte_range, src_meta.size).ok_or(S3Error::InvalidRange)?;
        let (_, data) = state
            .store
            .get_partial_object(src_bucket, src_key, start, end)
            .await?;
        data
    } else {
        let (_, data) = state.store.get_object(src_bucket, src_key).await?;
        data
    };

    let metadata_directive = headers
        .get("x-amz-metadata-directive")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("COPY");

    let etag = quoted_md5_etag(&content);
    let now = now_iso8601();

    let dst_meta = if metadata_directive.eq_ignore_ascii_case("REPLACE") {
        ObjectMeta {
            bucket: dst_bucket.to_string(),
            name: dst_key.to_string(),
            size: content.len() as u64,
            etag: etag.clone(),
            content_type: extract_content_type(headers),
            storage_class: "STANDARD".to_string(),
            owner_access_key: auth.access_key.clone(),
            mtime: now.clone(),
            user_metadata: user_metadata_map(headers),
        }
    } else {
        ObjectMeta {
            bucket: dst_bucket.to_string(),
            name: dst_key.to_string(),
            size: content.len() as u64,
            etag: etag.clone(),
            content_type: src_meta.content_type.clone(),
            storage_class: src_meta.storage_class.clone(),
            owner_access_key: auth.access_key.clone(),
            mtime: now.clone(),
            user_metadata: src_meta.user_metadata.clone(),
        }
    };

    let _guard = state.locks.lock(dst_bucket, dst_key).await;
    state.store.add_object(&dst_meta, &content).await?;

    let names_ref = state.bucket_objects.reference(dst_bucket).await?;
    names_ref.insert(dst_key).await;
    names_ref.unref().await?;

    state.monitor.add_bucket_volume(dst_bucket, dst_meta.size);
    state.monitor.add_api_request(ApiKind::CopyObject, 200);

    let body = xml::render_copy_object_result(&etag, &now);
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

fn list_entries<'a>(names: &'a [String], metas: &'a [ObjectMeta]) -> Vec<xml::ObjectEntry<'a>> {
    names
        .iter()
        .zip(metas.iter())
        .map(|(name, meta)| xml::ObjectEntry {
            key: name,
            last_modified: &meta.mtime,
            etag: &meta.etag,
            size: meta.size,
            storage_class: &meta.storage_class,
        })
        .collect()
}

/// Fetch and paginate the (sorted) names in a bucket's namelist against
/// `prefix`/`delimiter`/`max_keys`/`after`, splitting matches into direct
/// entries and common (delimited) prefixes.
async fn paginate_objects(
    state: &AppState,
    bucket: &str,
    prefix: &str,
    delimiter: &str,
    max_keys: u32,
    after: &str,
) -> Result<(Vec<String>, Vec<ObjectMeta>, Vec<String>, bool), S3Error> {
    let names_ref = state.bucket_objects.reference(bucket).await?;
    let mut all_names = names_ref.names().await;
    names_ref.unref().await?;
    all_names.sort();

    let mut keys = Vec::new();
    let mut common_prefixes: Vec<String> = Vec::new();
    let mut is_truncated = false;

    for name in all_names {
        if name.starts_with(INTERNAL_PREFIX) {
            continue;
        }
        if !name.starts_with(prefix) {
            continue;
        }
        if !after.is_empty() && name.as_str() <= after {
            continue;
        }

        if !delimiter.is_empty() {
            let rest = &name[prefix.len()..];
            if let Some(idx) = rest.find(delimiter) {
                let cp = format!("{prefix}{}", &rest[..idx + delimiter.len()]);
                if !common_prefixes.contains(&cp) {
                    if (keys.len() + common_prefixes.len()) as u32 >= max_keys {
                        is_truncated = true;
                        break;
                    }
                    common_prefixes.push(cp);
                }
                continue;
            }
        }

        if (keys.len() + common_prefixes.len()) as u32 >= max_keys {
            is_truncated = true;
            break;
        }
        keys.push(name);
    }

    let mut metas = Vec::with_capacity(keys.len());
    for key in &keys {
        metas.push(state.store.get_object_meta(bucket, key).await?);
    }

    Ok((keys, metas, common_prefixes, is_truncated))
}

/// `GET /{bucket}?list-type=2` -- List objects using the V2 API.
pub async fn list_objects_v2(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    state.store.get_bucket(bucket).await?;

    let prefix = query.get("prefix").map(|s| s.as_str()).unwrap_or("");
    let delimiter = query.get("delimiter").map(|s| s.as_str()).unwrap_or("");
    let max_keys: u32 = query
        .get("max-keys")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let start_after = query.get("start-after").map(|s| s.as_str()).unwrap_or("");
    let continuation_token = query.get("continuation-token").map(|s| s.as_str());
    let after = continuation_token.unwrap_or(start_after);

    let (keys, metas, common_prefixes, is_truncated) =
        paginate_objects(&state, bucket, prefix, delimiter, max_keys, after).await?;

    let entries = list_entries(&keys, &metas);
    let common_prefix_refs: Vec<&str> = common_prefixes.iter().map(|s| s.as_str()).collect();
    let key_count = (entries.len() + common_prefix_refs.len()) as u32;
    let next_continuation_token = if is_truncated {
        keys.last().cloned()
    } else {
        None
    };

    state.monitor.add_api_request(ApiKind::ListObjects, 200);

    let body = xml::render_list_objects_result(
        bucket,
        prefix,
        delimiter,
        max_keys,
        is_truncated,
        key_count,
        &entries,
        &common_prefix_refs,
        continuation_token,
        next_continuation_token.as_deref(),
        Some(start_after),
    );

    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `GET /{bucket}` -- List objects using the V1 API.
pub async fn list_objects_v1(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    state.store.get_bucket(bucket).await?;

    let prefix = query.get("prefix").map(|s| s.as_str()).unwrap_or("");
    let delimiter = query.get("delimiter").map(|s| s.as_str()).unwrap_or("");
    let max_keys: u32 = query
        .get("max-keys")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let marker = query.get("marker").map(|s| s.as_str()).unwrap_or("");

    let (keys, metas, common_prefixes, is_truncated) =
        paginate_objects(&state, bucket, prefix, delimiter, max_keys, marker).await?;

    let entries = list_entries(&keys, &metas);
    let common_prefix_refs: Vec<&str> = common_prefixes.iter().map(|s| s.as_str()).collect();

    let next_marker = if is_truncated {
        if !delimiter.is_empty() {
            entries
                .last()
                .map(|e| e.key.to_string())
                .or_else(|| common_prefix_refs.last().map(|cp| cp.to_string()))
        } else {
            entries.last().map(|e| e.key.to_string())
        }
    } else {
        None
    };

    state.monitor.add_api_request(ApiKind::ListObjects, 200);

    let body = xml::render_list_objects_result_v1(
        bucket,
        prefix,
        delimiter,
        marker,
        max_keys,
        is_truncated,
        &entries,
        &common_prefix_refs,
        next_marker.as_deref(),
    );

    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

// -- Unit tests ---------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_internal_name() {
        assert!(reject_internal_name("__ghost").is_err());
        assert!(reject_internal_name("normal-key").is_ok());
    }

    #[test]
    fn test_iso8601_to_http_date() {
        let formatted = iso8601_to_http_date("2026-01-15T10:00:00.000Z");
        assert!(formatted.contains("2026"));
        assert!(formatted.ends_with("GMT"));
    }

    #[test]
    fn test_iso8601_to_http_date_invalid_falls_back() {
        let formatted = iso8601_to_http_date("short");
        assert!(formatted.ends_with("GMT"));
    }

    #[test]
    fn test_parse_delete_xml() {
        let xml = br#"<Delete><Quiet>true</Quiet><Object><Key>a.txt</Key></Object><Object><Key>b.txt</Key></Object></Delete>"#;
        let (keys, quiet) = parse_delete_xml(xml).unwrap();
        assert_eq!(keys, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert!(quiet);
    }

    #[test]
    fn test_parse_delete_xml_not_quiet_by_default() {
        let xml = br#"<Delete><Object><Key>a.txt</Key></Object></Delete>"#;
        let (keys, quiet) = parse_delete_xml(xml).unwrap();
        assert_eq!(keys, vec!["a.txt".to_string()]);
        assert!(!quiet);
    }
}
