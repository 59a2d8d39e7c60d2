//! `GET /_cache/{cache_name}/{key}`: artifact requests from other nodes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use thumbcache_services::{CacheError, CacheManager};

pub async fn handle_peer_get(
    State(cache): State<CacheManager>,
    Path((cache_name, key)): Path<(String, String)>,
) -> Response {
    if cache_name != cache.name() {
        return (
            StatusCode::NOT_FOUND,
            format!("unknown cache: {cache_name}"),
        )
            .into_response();
    }

    match cache.get_owned(&key).await {
        Ok(bytes) => bytes.into_response(),
        Err(err @ CacheError::Key(_)) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        Err(err) => {
            tracing::debug!(key = %key, error = %err, "peer request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
