//! Multipart-upload S3 API handlers.
//!
//! An in-flight multipart upload is represented as a "ghost" entry in the
//! destination bucket's object namelist: `__{key}\0{upload_id}`. The null
//! byte keeps the encoding reversible, so `ListMultipartUploads` can recover
//! `(key, upload_id)` pairs straight back out of the namelist without a
//! separate upload index. Headers supplied at `InitiateMultipartUpload`
//! (content-type, user metadata) are not known again until
//! `CompleteMultipartUpload`, so they are stashed under a parallel raw
//! namelist key using the same length-prefixed encoding `monitor.rs` uses
//! for its own snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use md5::{Digest, Md5};

use crate::auth::AuthContext;
use crate::dataplane::{now_iso8601, parse_range_header, resolve_range};
use crate::errors::S3Error;
use crate::monitor::ApiKind;
use crate::store::INTERNAL_PREFIX;
use crate::xml;
use crate::AppState;

/// Minimum part size (5 MiB) required for all parts except the last.
const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

// -- Ghost naming ---------------------------------------------------------

fn ghost_name(key: &str, upload_id: &str) -> String {
    format!("{INTERNAL_PREFIX}{key}\0{upload_id}")
}

/// Recover `(key, upload_id)` from a ghost entry in a bucket's namelist.
/// Returns `None` for namelist entries that are not multipart ghosts.
fn parse_ghost_name(ghost: &str) -> Option<(&str, &str)> {
    ghost.strip_prefix(INTERNAL_PREFIX)?.rsplit_once('\0')
}

fn generate_upload_id(key: &str) -> String {
    let now_us = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let mut hasher = Md5::new();
    hasher.update(key.as_bytes());
    hasher.update(now_us.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

// -- Stashed initiate-time metadata -----------------------------------------

fn multipart_meta_key(bucket: &str, ghost: &str) -> String {
    format!("multipart-meta\0{bucket}\0{ghost}")
}

fn encode_multipart_meta(content_type: &str, user_metadata: &BTreeMap<String, String>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(content_type.len() as u32).to_le_bytes());
    buf.extend_from_slice(content_type.as_bytes());
    buf.extend_from_slice(&(user_metadata.len() as u32).to_le_bytes());
    for (k, v) in user_metadata {
        buf.extend_from_slice(&(k.len() as u32).to_le_bytes());
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
        buf.extend_from_slice(v.as_bytes());
    }
    buf
}

fn decode_multipart_meta(buf: &[u8]) -> Option<(String, BTreeMap<String, String>)> {
    let mut offset = 0usize;
    let read_u32 = |buf: &[u8], offset: &mut usize| -> Option<u32> {
        let v = u32::from_le_bytes(buf.get(*offset..*offset + 4)?.try_into().ok()?);
        *offset += 4;
        Some(v)
    };
    let read_str = |buf: &[u8], offset: &mut usize, len: usize| -> Option<String> {
        let s = String::from_utf8(buf.get(*offset..*offset + len)?.to_vec()).ok()?;
        *offset += len;
        Some(s)
    };

    let ct_len = read_u32(buf, &mut offset)? as usize;
    let content_type = read_str(buf, &mut offset, ct_len)?;
    let n = read_u32(buf, &mut offset)?;
    let mut user_metadata = BTreeMap::new();
    for _ in 0..n {
        let k_len = read_u32(buf, &mut offset)? as usize;
        let k = read_str(buf, &mut offset, k_len)?;
        let v_len = read_u32(buf, &mut offset)? as usize;
        let v = read_str(buf, &mut offset, v_len)?;
        user_metadata.insert(k, v);
    }
    Some((content_type, user_metadata))
}

// -- Helper functions --------------------------------------------------------

fn extract_user_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
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

fn extract_content_type(headers: &HeaderMap) -> String {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn part_number_and_upload_id(
    query: &HashMap<String, String>,
) -> Result<(String, u32), S3Error> {
    let upload_id = query
        .get("uploadId")
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "Missing uploadId parameter".to_string(),
        })?
        .clone();
    let part_number: u32 = query
        .get("partNumber")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "Missing or invalid partNumber parameter".to_string(),
        })?;
    if !(1..=10000).contains(&part_number) {
        return Err(S3Error::InvalidArgument {
            message: format!("Part number must be between 1 and 10000, got {part_number}"),
        });
    }
    Ok((upload_id, part_number))
}

// -- Handlers -----------------------------------------------------------------

/// `POST /{bucket}/{key}?uploads` -- Initiate a multipart upload.
pub async fn create_multipart_upload(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    if key.starts_with(INTERNAL_PREFIX) {
        return Err(S3Error::NotImplemented);
    }
    state.store.get_bucket(bucket).await?;

    let upload_id = generate_upload_id(key);
    let ghost = ghost_name(key, &upload_id);

    let content_type = extract_content_type(headers);
    let user_metadata = extract_user_metadata(headers);
    let meta_key = multipart_meta_key(bucket, &ghost);
    state
        .store
        .save_namelist_raw(&meta_key, encode_multipart_meta(&content_type, &user_metadata))
        .await?;

    let names_ref = state.bucket_objects.reference(bucket).await?;
    names_ref.insert(&ghost).await;
    names_ref.unref().await?;

    state
        .monitor
        .add_api_request(ApiKind::InitiateMultipartUpload, 200);

    let body = xml::render_initiate_multipart_upload_result(bucket, key, &upload_id);
    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `PUT /{bucket}/{key}?partNumber={n}&uploadId={id}` -- Upload a single part.
pub async fn upload_part(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    body: &[u8],
) -> Result<Response, S3Error> {
    let (upload_id, part_number) = part_number_and_upload_id(query)?;
    let ghost = ghost_name(key, &upload_id);

    let start = std::time::Instant::now();
    let content = Bytes::copy_from_slice(body);
    let part_meta = state
        .store
        .upload_part(bucket, &ghost, part_number, &content)
        .await?;
    state
        .monitor
        .update_upload_part_time(start.elapsed().as_micros() as u64);
    state.monitor.add_bucket_volume(bucket, part_meta.size);
    state.monitor.add_api_request(ApiKind::UploadPart, 200);

    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert("etag", HeaderValue::from_str(&part_meta.etag).unwrap());
    Ok(response)
}

/// `PUT /{bucket}/{key}?partNumber={n}&uploadId={id}` with
/// `x-amz-copy-source` -- Copy a part from an existing object.
pub async fn upload_part_copy(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let (upload_id, part_number) = part_number_and_upload_id(query)?;
    let ghost = ghost_name(key, &upload_id);

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

    let part_meta = state
        .store
        .upload_part(bucket, &ghost, part_number, &content)
        .await?;
    state.monitor.add_api_request(ApiKind::UploadPartCopy, 200);

    let now = now_iso8601();
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><CopyPartResult><ETag>{}</ETag><LastModified>{now}</LastModified></CopyPartResult>",
        part_meta.etag
    );

    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// Parse the `<CompleteMultipartUpload>` XML body to extract
/// `(PartNumber, ETag)` pairs.
fn parse_complete_multipart_upload_xml(body: &[u8]) -> Result<Vec<(u32, String)>, S3Error> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut parts: Vec<(u32, String)> = Vec::new();
    let mut current_part_number: Option<u32> = None;
    let mut current_etag: Option<String> = None;
    let mut in_part = false;
    let mut current_tag = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag_name == "Part" {
                    in_part = true;
                    current_part_number = None;
                    current_etag = None;
                } else if in_part {
                    current_tag = tag_name;
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_part {
                    let text = e.unescape().map_err(|_| S3Error::MalformedXML)?.to_string();
                    match current_tag.as_str() {
                        "PartNumber" => current_part_number = text.parse::<u32>().ok(),
                        "ETag" => current_etag = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag_name == "Part" {
                    in_part = false;
                    match (current_part_number, current_etag.take()) {
                        (Some(pn), Some(etag)) => parts.push((pn, etag)),
                        _ => return Err(S3Error::MalformedXML),
                    }
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedXML),
            _ => {}
        }
        buf.clear();
    }

    if parts.is_empty() {
        return Err(S3Error::MalformedXML);
    }

    Ok(parts)
}

/// `POST /{bucket}/{key}?uploadId={id}` -- Complete a multipart upload.
pub async fn complete_multipart_upload(
    state: Arc<AppState>,
    auth: AuthContext,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    body: &[u8],
) -> Result<Response, S3Error> {
    let upload_id = query
        .get("uploadId")
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "Missing uploadId parameter".to_string(),
        })?;
    let ghost = ghost_name(key, upload_id);

    let requested_parts = parse_complete_multipart_upload_xml(body)?;

    let stored_parts = state.store.list_parts(bucket, &ghost).await?;
    let stored_map: HashMap<u32, &crate::store::PartMeta> =
        stored_parts.iter().map(|p| (p.part_number, p)).collect();
    for (i, (part_number, _)) in requested_parts.iter().enumerate() {
        let is_last = i == requested_parts.len() - 1;
        if let Some(stored) = stored_map.get(part_number) {
            if !is_last && stored.size < MIN_PART_SIZE {
                return Err(S3Error::EntityTooSmall);
            }
        }
    }

    let meta_key = multipart_meta_key(bucket, &ghost);
    let (content_type, _user_metadata) = state
        .store
        .get_namelist_raw(&meta_key)
        .await
        .ok()
        .and_then(|buf| decode_multipart_meta(&buf))
        .unwrap_or_else(|| ("application/octet-stream".to_string(), BTreeMap::new()));

    let _guard = state.locks.lock(bucket, key).await;

    let etag = state
        .store
        .complete_multipart(
            bucket,
            &ghost,
            key,
            &auth.access_key,
            &content_type,
            &requested_parts,
        )
        .await?;

    let names_ref = state.bucket_objects.reference(bucket).await?;
    names_ref.delete(&ghost).await;
    names_ref.insert(key).await;
    names_ref.unref().await?;

    state
        .monitor
        .add_api_request(ApiKind::CompleteMultipartUpload, 200);

    let location = format!("/{bucket}/{key}");
    let body = xml::render_complete_multipart_upload_result(&location, bucket, key, &etag);

    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `DELETE /{bucket}/{key}?uploadId={id}` -- Abort a multipart upload.
pub async fn abort_multipart_upload(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let upload_id = query
        .get("uploadId")
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "Missing uploadId parameter".to_string(),
        })?;
    let ghost = ghost_name(key, upload_id);

    state.store.abort_multipart(bucket, &ghost).await?;

    let names_ref = state.bucket_objects.reference(bucket).await?;
    names_ref.delete(&ghost).await;
    names_ref.unref().await?;

    state
        .monitor
        .add_api_request(ApiKind::AbortMultipartUpload, 204);

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /{bucket}?uploads` -- List in-progress multipart uploads.
pub async fn list_multipart_uploads(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let bucket_rec = state.store.get_bucket(bucket).await?;

    let prefix = query.get("prefix").map(|s| s.as_str()).unwrap_or("");
    let max_uploads: u32 = query
        .get("max-uploads")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let key_marker = query.get("key-marker").map(|s| s.as_str()).unwrap_or("");
    let upload_id_marker = query
        .get("upload-id-marker")
        .map(|s| s.as_str())
        .unwrap_or("");

    let names_ref = state.bucket_objects.reference(bucket).await?;
    let names = names_ref.names().await;
    names_ref.unref().await?;

    let mut ghosts: Vec<(String, String)> = names
        .iter()
        .filter_map(|n| parse_ghost_name(n).map(|(k, u)| (k.to_string(), u.to_string())))
        .filter(|(k, _)| k.starts_with(prefix))
        .collect();
    ghosts.sort();

    let after = |k: &str, u: &str| -> bool {
        if key_marker.is_empty() {
            return false;
        }
        (k, u) <= (key_marker, upload_id_marker)
    };

    let mut uploads = Vec::new();
    let mut is_truncated = false;
    for (object_key, uid) in &ghosts {
        if after(object_key, uid) {
            continue;
        }
        if uploads.len() as u32 >= max_uploads {
            is_truncated = true;
            break;
        }
        // Initiation time isn't persisted separately from the ghost entry
        // itself, so uploads are reported as "now" rather than their true age.
        uploads.push((object_key.clone(), uid.clone(), now_iso8601()));
    }

    let next_key_marker = if is_truncated {
        uploads.last().map(|(k, _, _)| k.clone())
    } else {
        None
    };
    let next_upload_id_marker = if is_truncated {
        uploads.last().map(|(_, u, _)| u.clone())
    } else {
        None
    };

    let entries: Vec<xml::UploadEntry<'_>> = uploads
        .iter()
        .map(|(key, upload_id, initiated)| xml::UploadEntry {
            key,
            upload_id,
            initiated,
            storage_class: "STANDARD",
            owner_id: &bucket_rec.owner_access_key,
            owner_display: &bucket_rec.owner_display_name,
        })
        .collect();

    state
        .monitor
        .add_api_request(ApiKind::ListMultipartUploads, 200);

    let body = xml::render_list_multipart_uploads_result(
        bucket,
        key_marker,
        upload_id_marker,
        max_uploads,
        is_truncated,
        &entries,
        next_key_marker.as_deref(),
        next_upload_id_marker.as_deref(),
        prefix,
    );

    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `GET /{bucket}/{key}?uploadId={id}` -- List parts of an in-progress upload.
pub async fn list_parts(
    state: Arc<AppState>,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let upload_id = query
        .get("uploadId")
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "Missing uploadId parameter".to_string(),
        })?;
    let ghost = ghost_name(key, upload_id);

    let bucket_rec = state.store.get_bucket(bucket).await?;

    let max_parts: u32 = query
        .get("max-parts")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let part_number_marker: u32 = query
        .get("part-number-marker")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let mut all_parts = state.store.list_parts(bucket, &ghost).await?;
    all_parts.retain(|p| p.part_number > part_number_marker);

    let is_truncated = all_parts.len() as u32 > max_parts;
    all_parts.truncate(max_parts as usize);
    let next_part_number_marker = if is_truncated {
        all_parts.last().map(|p| p.part_number)
    } else {
        None
    };

    let now = now_iso8601();
    let entries: Vec<xml::PartEntry<'_>> = all_parts
        .iter()
        .map(|p| xml::PartEntry {
            part_number: p.part_number,
            last_modified: &now,
            etag: &p.etag,
            size: p.size,
        })
        .collect();

    state.monitor.add_api_request(ApiKind::ListParts, 200);

    let body = xml::render_list_parts_result(
        bucket,
        key,
        upload_id,
        part_number_marker,
        max_parts,
        is_truncated,
        &entries,
        next_part_number_marker,
        "STANDARD",
        &bucket_rec.owner_access_key,
        &bucket_rec.owner_display_name,
    );

    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

// -- Unit tests ---------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ghost_name_roundtrip() {
        let ghost = ghost_name("my/object.txt", "abc123");
        assert_eq!(parse_ghost_name(&ghost), Some(("my/object.txt", "abc123")));
    }

    #[test]
    fn test_parse_ghost_name_rejects_non_ghost() {
        assert_eq!(parse_ghost_name("regular-key"), None);
    }

    #[test]
    fn test_multipart_meta_roundtrip() {
        let mut meta = BTreeMap::new();
        meta.insert("x-amz-meta-author".to_string(), "tester".to_string());
        let encoded = encode_multipart_meta("text/plain", &meta);
        let (content_type, decoded_meta) = decode_multipart_meta(&encoded).unwrap();
        assert_eq!(content_type, "text/plain");
        assert_eq!(decoded_meta, meta);
    }

    #[test]
    fn test_extract_user_metadata_with_entries() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-meta-author", HeaderValue::from_static("tester"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        let meta = extract_user_metadata(&headers);
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get("x-amz-meta-author").unwrap(), "tester");
    }

    #[test]
    fn test_extract_content_type_default() {
        let headers = HeaderMap::new();
        assert_eq!(extract_content_type(&headers), "application/octet-stream");
    }

    #[test]
    fn test_parse_complete_multipart_upload_xml_valid() {
        let xml = br#"
            <CompleteMultipartUpload>
                <Part>
                    <PartNumber>1</PartNumber>
                    <ETag>"a54357aff0632cce46d942af68356b38"</ETag>
                </Part>
                <Part>
                    <PartNumber>2</PartNumber>
                    <ETag>"0c78aef83f66abc1fa1e8477f296d394"</ETag>
                </Part>
            </CompleteMultipartUpload>
        "#;

        let parts = parse_complete_multipart_upload_xml(xml).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, 1);
        assert_eq!(parts[0].1, "\"a54357aff0632cce46d942af68356b38\"");
    }

    #[test]
    fn test_parse_complete_multipart_upload_xml_empty_body() {
        let xml = br#"<CompleteMultipartUpload></CompleteMultipartUpload>"#;
        assert!(parse_complete_multipart_upload_xml(xml).is_err());
    }

    #[test]
    fn test_parse_complete_multipart_upload_xml_malformed() {
        let xml = b"not xml at all";
        assert!(parse_complete_multipart_upload_xml(xml).is_err());
    }

    #[test]
    fn test_parse_complete_multipart_upload_xml_missing_etag() {
        let xml = br#"
            <CompleteMultipartUpload>
                <Part>
                    <PartNumber>1</PartNumber>
                </Part>
            </CompleteMultipartUpload>
        "#;
        assert!(parse_complete_multipart_upload_xml(xml).is_err());
    }
}
