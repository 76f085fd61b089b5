//! Service-level scope: `GET /` → ListAllBuckets.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::auth::AuthContext;
use crate::errors::S3Error;
use crate::xml::render_list_buckets_result;
use crate::AppState;

/// `GET /` — list every bucket owned by the authenticated caller.
pub async fn list_all_buckets(state: Arc<AppState>, auth: AuthContext) -> Result<Response, S3Error> {
    let user = state.store.get_user(&auth.access_key).await?;

    let names_ref = state.user_buckets.reference(&auth.access_key).await?;
    let names = names_ref.names().await;
    let unref_result = names_ref.unref().await;

    let mut buckets = Vec::with_capacity(names.len());
    for name in &names {
        match state.store.get_bucket(name).await {
            Ok(bucket) => buckets.push((bucket.name, bucket.created_at)),
            Err(e) if e.is_not_found() => {
                tracing::warn!(bucket = %name, "bucket namelist entry with no metadata record");
            }
            Err(e) => return Err(e),
        }
    }
    unref_result?;

    let pairs: Vec<(&str, &str)> = buckets.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect();
    let body = render_list_buckets_result(&user.user_id, &user.display_name, &pairs);

    Ok((
        StatusCode::OK,
        [("content-type", "application/xml")],
        body,
    )
        .into_response())
}
