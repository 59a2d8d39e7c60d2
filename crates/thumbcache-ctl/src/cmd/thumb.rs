//! Fetch a thumbnail through the public route.

use std::path::PathBuf;

use anyhow::{Context, Result};

use super::http::{base_url, get_bytes};

pub fn thumb_url(port: u16, width: u32, height: u32, file: &str) -> String {
    format!("{}/t/{}/{}/{}", base_url(port), width, height, file)
}

/// Default output name: `<stem>_<w>x<h>.jpg` in the working directory.
pub fn default_output(width: u32, height: u32, file: &str) -> PathBuf {
    let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
    PathBuf::from(format!("{stem}_{width}x{height}.jpg"))
}

pub async fn cmd_get(
    port: u16,
    width: u32,
    height: u32,
    file: &str,
    out: Option<PathBuf>,
) -> Result<()> {
    let bytes = get_bytes(&thumb_url(port, width, height, file)).await?;
    let out = out.unwrap_or_else(|| default_output(width, height, file));
    std::fs::write(&out, &bytes).with_context(|| format!("failed to write {}", out.display()))?;
    println!("Wrote {} bytes to {}", bytes.len(), out.display());
    Ok(())
}
