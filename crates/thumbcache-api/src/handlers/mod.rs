//! HTTP handlers: peer artifact route, public thumbnails, status JSON.

pub mod peer;
pub mod status;
pub mod thumbnail;

use axum::http::StatusCode;

use thumbcache_core::config::ResizeSettings;
use thumbcache_services::downloader::DownloadError;
use thumbcache_services::{CacheError, CacheManager};

/// Largest box the public route will render.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_width: u32,
    pub max_height: u32,
}

impl From<&ResizeSettings> for Limits {
    fn from(settings: &ResizeSettings) -> Self {
        Self {
            max_width: settings.max_width,
            max_height: settings.max_height,
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub cache: CacheManager,
    pub limits: Limits,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Status code for a failed public lookup.
fn status_for(err: &CacheError) -> StatusCode {
    match err {
        CacheError::Key(_) => StatusCode::BAD_REQUEST,
        CacheError::Download(e) => match e.as_ref() {
            DownloadError::Status { status: 404, .. } => StatusCode::NOT_FOUND,
            DownloadError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        },
        CacheError::Resize(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CacheError::Peer { .. } => StatusCode::BAD_GATEWAY,
        CacheError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub use peer::handle_peer_get;
pub use status::{handle_peers, handle_status};
pub use thumbnail::handle_thumbnail;
