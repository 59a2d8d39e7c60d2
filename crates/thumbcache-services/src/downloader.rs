//! Origin downloader with a local file cache.
//!
//! A resource is stored under the download directory by the last segment
//! of its URL. Fetches are serialized per destination path: concurrent
//! callers for the same path wait on one lock, and whoever gets it second
//! finds the file already on disk.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("origin returned {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub struct Downloader {
    dir: PathBuf,
    client: reqwest::Client,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl Downloader {
    /// Create a downloader writing into `dir` (created if missing).
    pub fn new(dir: impl Into<PathBuf>, client: reqwest::Client) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            client,
            locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local destination for `url`.
    pub fn local_path(&self, url: &str) -> Result<PathBuf, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.into()))?;
        let name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .ok_or_else(|| DownloadError::InvalidUrl(url.into()))?;
        Ok(self.dir.join(name))
    }

    /// Fetch `url` unless it is already on disk, and return its local path.
    pub async fn download(&self, url: &str) -> Result<PathBuf, DownloadError> {
        let path = self.local_path(url)?;

        let lock = self
            .locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        let result = self.fetch_locked(url, &path).await;

        // Drop the table entry unless someone else is queued on it.
        self.locks
            .remove_if(&path, |_, held| Arc::strong_count(held) <= 2);
        drop(guard);

        result.map(|()| path)
    }

    async fn fetch_locked(&self, url: &str, path: &Path) -> Result<(), DownloadError> {
        if tokio::fs::try_exists(path).await? {
            tracing::debug!(url = %url, path = %path.display(), "download cache hit");
            return Ok(());
        }

        tracing::info!(url = %url, path = %path.display(), "downloading");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let tmp = path.with_extension(match path.extension() {
            Some(ext) => format!("{}.part", ext.to_string_lossy()),
            None => "part".to_string(),
        });
        match write_body(response, &tmp).await {
            Ok(bytes) => {
                tokio::fs::rename(&tmp, path).await?;
                tracing::debug!(path = %path.display(), bytes, "download complete");
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(e)
            }
        }
    }

    /// Paths currently holding a lock entry.
    pub fn pending(&self) -> usize {
        self.locks.len()
    }
}

async fn write_body(response: reqwest::Response, tmp: &Path) -> Result<u64, DownloadError> {
    let mut file = tokio::fs::File::create(tmp).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
