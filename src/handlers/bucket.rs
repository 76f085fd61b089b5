//! Bucket-level S3 API handlers.

use std::sync::Arc;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::auth::AuthContext;
use crate::dataplane::now_iso8601;
use crate::errors::S3Error;
use crate::store::{Bucket, INTERNAL_PREFIX};
use crate::xml;
use crate::AppState;

// -- Bucket name validation ---------------------------------------------------

/// Validate that a bucket name conforms to S3 naming rules.
///
/// Rules:
/// - 3-63 characters long
/// - Only lowercase letters, numbers, hyphens, and periods
/// - Must begin and end with a letter or number
/// - Cannot be formatted as an IP address (e.g., 192.168.5.4)
/// - Must not start with `xn--` or end with `-s3alias` or `--ol-s3`
pub fn validate_bucket_name(name: &str) -> Result<(), S3Error> {
    let len = name.len();
    if !(3..=63).contains(&len) {
        return Err(S3Error::InvalidBucketName {
            name: name.to_string(),
        });
    }
    for ch in name.chars() {
        if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() && ch != '-' && ch != '.' {
            return Err(S3Error::InvalidBucketName {
                name: name.to_string(),
            });
        }
    }
    let first = name.chars().next().unwrap();
    let last = name.chars().last().unwrap();
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Err(S3Error::InvalidBucketName {
            name: name.to_string(),
        });
    }
    if !(last.is_ascii_lowercase() || last.is_ascii_digit()) {
        return Err(S3Error::InvalidBucketName {
            name: name.to_string(),
        });
    }
    if looks_like_ip(name) {
        return Err(S3Error::InvalidBucketName {
            name: name.to_string(),
        });
    }
    if name.starts_with("xn--") {
        return Err(S3Error::InvalidBucketName {
            name: name.to_string(),
        });
    }
    if name.ends_with("-s3alias") || name.ends_with("--ol-s3") {
        return Err(S3Error::InvalidBucketName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn looks_like_ip(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|p| p.parse::<u8>().is_ok())
}

// -- Handlers ------------------------------------------------------------------

/// `PUT /{bucket}` -- Create a new bucket.
///
/// Bucket names are globally unique across every user, not just the caller's
/// own namelist; the per-name lock in `LockTable` serializes concurrent
/// creates of the same name so exactly one wins.
pub async fn create_bucket(
    state: Arc<AppState>,
    auth: AuthContext,
    bucket: &str,
    body: &[u8],
) -> Result<Response, S3Error> {
    validate_bucket_name(bucket)?;

    // This deployment is single-region; a CreateBucketConfiguration body is
    // accepted (and parseable) but not persisted against the bucket record.
    let _requested_region = if body.is_empty() {
        None
    } else {
        parse_location_constraint(body)
    };

    let _guard = state.locks.lock(bucket, "").await;

    match state.store.get_bucket(bucket).await {
        Ok(existing) => {
            let location = format!("/{bucket}");
            if existing.owner_access_key == auth.access_key {
                let mut response = (StatusCode::OK, "").into_response();
                response
                    .headers_mut()
                    .insert("location", HeaderValue::from_str(&location).unwrap());
                return Ok(response);
            }
            return Err(S3Error::BucketAlreadyExists {
                bucket: bucket.to_string(),
            });
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let user = state.store.get_user(&auth.access_key).await?;
    let record = Bucket {
        name: bucket.to_string(),
        owner_access_key: auth.access_key.clone(),
        owner_display_name: user.display_name,
        created_at: now_iso8601(),
    };
    state.store.add_bucket(&record).await?;

    let names_ref = state.user_buckets.reference(&auth.access_key).await?;
    names_ref.insert(bucket).await;
    names_ref.unref().await?;

    let location = format!("/{bucket}");
    let mut response = (StatusCode::OK, "").into_response();
    response
        .headers_mut()
        .insert("location", HeaderValue::from_str(&location).unwrap());
    Ok(response)
}

/// `DELETE /{bucket}` -- Delete an existing bucket (must be empty).
///
/// A bucket containing only dangling in-flight multipart uploads (internal
/// ghost entries) is still considered empty: those uploads are aborted first.
pub async fn delete_bucket(
    state: Arc<AppState>,
    auth: AuthContext,
    bucket: &str,
) -> Result<Response, S3Error> {
    let _guard = state.locks.lock(bucket, "").await;

    let record = state.store.get_bucket(bucket).await?;
    if record.owner_access_key != auth.access_key {
        return Err(S3Error::AccessDenied {
            message: "bucket is owned by a different account".to_string(),
        });
    }

    let names_ref = state.bucket_objects.reference(bucket).await?;
    let names = names_ref.names().await;

    let mut visible = 0usize;
    for name in &names {
        if name.starts_with(INTERNAL_PREFIX) {
            let _ = state.store.abort_multipart(bucket, name).await;
            names_ref.delete(name).await;
        } else {
            visible += 1;
        }
    }

    if visible > 0 {
        names_ref.unref().await?;
        return Err(S3Error::BucketNotEmpty {
            bucket: bucket.to_string(),
        });
    }
    names_ref.unref().await?;

    state.store.del_bucket(bucket).await?;

    let user_ref = state.user_buckets.reference(&auth.access_key).await?;
    user_ref.delete(bucket).await;
    user_ref.unref().await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `HEAD /{bucket}` -- Check whether a bucket exists.
pub async fn head_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    match state.store.get_bucket(bucket).await {
        Ok(_) => {
            let mut response = StatusCode::OK.into_response();
            response.headers_mut().insert(
                "x-amz-bucket-region",
                HeaderValue::from_str(&state.config.server.region)
                    .unwrap_or_else(|_| HeaderValue::from_static("us-east-1")),
            );
            Ok(response)
        }
        // HEAD responses carry no body; return the bare status rather than
        // going through S3Error's XML rendering.
        Err(e) if e.is_not_found() => Ok(StatusCode::NOT_FOUND.into_response()),
        Err(e) => Err(e),
    }
}

/// `GET /{bucket}?location` -- Return the region constraint of a bucket.
pub async fn get_bucket_location(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    state.store.get_bucket(bucket).await?;

    let body = xml::render_location_constraint(&state.config.server.region);

    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

fn parse_location_constraint(body: &[u8]) -> Option<String> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    let mut in_location = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"LocationConstraint" => {
                in_location = true;
            }
            Ok(Event::Text(ref e)) if in_location => {
                let text = e.unescape().ok()?.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                return Some(text);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"LocationConstraint" => {
                if in_location {
                    return None; // Empty element (no text between start/end)
                }
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_bucket_name_valid() {
        assert!(validate_bucket_name("valid-bucket").is_ok());
        assert!(validate_bucket_name("my.bucket.name").is_ok());
        assert!(validate_bucket_name("abc").is_ok());
        assert!(validate_bucket_name("a-b-c").is_ok());
        assert!(validate_bucket_name("123").is_ok());
        assert!(validate_bucket_name("a1b2c3").is_ok());
    }

    #[test]
    fn test_validate_bucket_name_too_short() {
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name("a").is_err());
        assert!(validate_bucket_name("").is_err());
    }

    #[test]
    fn test_validate_bucket_name_too_long() {
        let long_name = "a".repeat(64);
        assert!(validate_bucket_name(&long_name).is_err());
    }

    #[test]
    fn test_validate_bucket_name_uppercase() {
        assert!(validate_bucket_name("INVALID").is_err());
        assert!(validate_bucket_name("InvalidBucket").is_err());
    }

    #[test]
    fn test_validate_bucket_name_bad_chars() {
        assert!(validate_bucket_name("bucket_name").is_err()); // underscore
        assert!(validate_bucket_name("bucket name").is_err()); // space
        assert!(validate_bucket_name("bucket!name").is_err()); // exclamation
    }

    #[test]
    fn test_validate_bucket_name_bad_start_end() {
        assert!(validate_bucket_name("-bucket").is_err());
        assert!(validate_bucket_name("bucket-").is_err());
        assert!(validate_bucket_name(".bucket").is_err());
        assert!(validate_bucket_name("bucket.").is_err());
    }

    #[test]
    fn test_validate_bucket_name_ip_address() {
        assert!(validate_bucket_name("192.168.1.1").is_err());
        assert!(validate_bucket_name("10.0.0.1").is_err());
    }

    #[test]
    fn test_validate_bucket_name_xn_prefix() {
        assert!(validate_bucket_name("xn--example").is_err());
    }

    #[test]
    fn test_validate_bucket_name_s3alias_suffix() {
        assert!(validate_bucket_name("example-s3alias").is_err());
        assert!(validate_bucket_name("example--ol-s3").is_err());
    }

    #[test]
    fn test_looks_like_ip() {
        assert!(looks_like_ip("192.168.1.1"));
        assert!(looks_like_ip("10.0.0.1"));
        assert!(!looks_like_ip("192.168.1"));
        assert!(!looks_like_ip("not.an.ip.address"));
        assert!(!looks_like_ip("abc"));
        assert!(!looks_like_ip("999.999.999.999")); // 999 > 255 so u8 parse fails
    }

    #[test]
    fn test_parse_location_constraint() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<CreateBucketConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
    <LocationConstraint>us-west-2</LocationConstraint>
</CreateBucketConfiguration>"#;
        assert_eq!(
            parse_location_constraint(xml),
            Some("us-west-2".to_string())
        );
    }

    #[test]
    fn test_parse_location_constraint_empty() {
        let xml = b"";
        assert_eq!(parse_location_constraint(xml), None);
    }

    #[test]
    fn test_parse_location_constraint_no_element() {
        let xml = br#"<Foo></Foo>"#;
        assert_eq!(parse_location_constraint(xml), None);
    }
}
