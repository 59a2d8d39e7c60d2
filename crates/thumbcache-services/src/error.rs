use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;
use thumbcache_core::KeyError;

use crate::downloader::DownloadError;
use crate::resize::ResizeError;
use crate::transport::PeerError;

/// Failure of a cache lookup.
///
/// Cloneable so one failed computation can be handed to every caller that
/// joined it.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("download failed: {0}")]
    Download(Arc<DownloadError>),

    #[error("resize failed: {0}")]
    Resize(Arc<ResizeError>),

    #[error("peer {peer} failed: {source}")]
    Peer {
        peer: String,
        source: Arc<PeerError>,
    },

    #[error("load aborted: {0}")]
    Aborted(Arc<JoinError>),
}

impl CacheError {
    pub fn peer(peer: impl Into<String>, err: PeerError) -> Self {
        Self::Peer {
            peer: peer.into(),
            source: Arc::new(err),
        }
    }

    /// Transient failures a caller may retry after membership settles.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Peer { .. })
    }
}

impl From<DownloadError> for CacheError {
    fn from(err: DownloadError) -> Self {
        Self::Download(Arc::new(err))
    }
}

impl From<ResizeError> for CacheError {
    fn from(err: ResizeError) -> Self {
        Self::Resize(Arc::new(err))
    }
}

impl From<JoinError> for CacheError {
    fn from(err: JoinError) -> Self {
        Self::Aborted(Arc::new(err))
    }
}
