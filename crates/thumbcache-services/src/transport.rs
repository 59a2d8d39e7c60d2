//! Peer-to-peer fetch of computed artifacts.
//!
//! A node that does not own a key asks the owner over HTTP:
//!
//!   GET {peer_url}/_cache/{cache_name}/{key}
//!
//! The owner answers from its own cache (computing locally on a miss) and
//! never forwards the request again.

use bytes::Bytes;
use thiserror::Error;
use url::Url;

/// First path segment of the peer route.
pub const PEER_ROUTE: &str = "_cache";

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("invalid peer url: {0}")]
    InvalidUrl(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("peer answered {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    cache_name: String,
}

impl PeerClient {
    pub fn new(http: reqwest::Client, cache_name: impl Into<String>) -> Self {
        Self {
            http,
            cache_name: cache_name.into(),
        }
    }

    /// Build the artifact URL for `key` on `peer_url`.
    pub fn endpoint(&self, peer_url: &str, key: &str) -> Result<Url, PeerError> {
        let mut url = Url::parse(peer_url).map_err(|_| PeerError::InvalidUrl(peer_url.into()))?;
        url.path_segments_mut()
            .map_err(|_| PeerError::InvalidUrl(peer_url.into()))?
            .pop_if_empty()
            .push(PEER_ROUTE)
            .push(&self.cache_name)
            .push(key);
        Ok(url)
    }

    pub async fn fetch(&self, peer_url: &str, key: &str) -> Result<Bytes, PeerError> {
        let url = self.endpoint(peer_url, key)?;
        tracing::debug!(peer = %peer_url, key = %key, "fetching from peer");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PeerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?)
    }
}
