//! Shared HTTP request helpers for CLI commands.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}

pub async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to thumbcached at {}, is it running?", url))?
        .json::<T>()
        .await
        .context("failed to parse response")
}

/// Fetch raw bytes, turning non-2xx answers into errors carrying the body.
pub async fn get_bytes(url: &str) -> Result<Vec<u8>> {
    let resp = reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to thumbcached at {}, is it running?", url))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("{} {}", status.as_u16(), body.trim());
    }
    Ok(resp.bytes().await.context("failed to read response")?.to_vec())
}
