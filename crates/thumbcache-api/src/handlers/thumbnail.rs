//! `GET /t/{width}/{height}/{file}`: public thumbnail route.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use thumbcache_core::CacheKey;

use super::{status_for, ApiState};

fn dimension(raw: &str, max: u32) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|v| (1..=max).contains(v))
}

pub async fn handle_thumbnail(
    State(state): State<ApiState>,
    Path((width, height, file)): Path<(String, String, String)>,
) -> Response {
    let Some(width) = dimension(&width, state.limits.max_width) else {
        return (StatusCode::BAD_REQUEST, "Invalid width").into_response();
    };
    let Some(height) = dimension(&height, state.limits.max_height) else {
        return (StatusCode::BAD_REQUEST, "Invalid height").into_response();
    };

    let key = CacheKey::new(width, height, file).to_string();
    match state.cache.get(&key).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Err(err) => {
            let status = status_for(&err);
            tracing::debug!(key = %key, %status, error = %err, "thumbnail failed");
            (status, err.to_string()).into_response()
        }
    }
}
