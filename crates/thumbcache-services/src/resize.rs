//! Image resize collaborator.
//!
//! The cache only needs "source file + box → encoded bytes". The default
//! implementation shells out to libvips:
//!
//!   vips thumbnail <src> <dst>[Q=<quality>] <w> --height <h> --crop centre --size both

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use thiserror::Error;
use thumbcache_core::config::ResizeSettings;

#[derive(Debug, Error)]
pub enum ResizeError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("resize exited with {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Resizer: Send + Sync {
    /// Produce a `width` x `height` rendition of the image at `source`.
    async fn resize(&self, source: &Path, width: u32, height: u32) -> Result<Bytes, ResizeError>;
}

pub struct VipsResizer {
    program: String,
    quality: u8,
}

impl VipsResizer {
    pub fn new(program: impl Into<String>, quality: u8) -> Self {
        Self {
            program: program.into(),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn from_settings(settings: &ResizeSettings) -> Self {
        Self::new(settings.program.clone(), settings.quality)
    }

    /// Private scratch directory and output path for one resize. The
    /// directory is removed when the returned `TempDir` drops.
    fn scratch(width: u32, height: u32) -> std::io::Result<(TempDir, PathBuf)> {
        let dir = tempfile::Builder::new()
            .prefix("thumbcache-resize-")
            .tempdir()?;
        let output = dir.path().join(format!("{width}x{height}.jpg"));
        Ok((dir, output))
    }

    fn args(&self, source: &Path, output: &Path, width: u32, height: u32) -> Vec<String> {
        vec![
            "thumbnail".into(),
            source.display().to_string(),
            format!("{}[Q={}]", output.display(), self.quality),
            width.to_string(),
            "--height".into(),
            height.to_string(),
            "--crop".into(),
            "centre".into(),
            "--size".into(),
            "both".into(),
        ]
    }
}

#[async_trait]
impl Resizer for VipsResizer {
    async fn resize(&self, source: &Path, width: u32, height: u32) -> Result<Bytes, ResizeError> {
        let (scratch, output) = Self::scratch(width, height)?;
        let args = self.args(source, &output, width, height);
        tracing::debug!(program = %self.program, ?args, "resizing");

        let result = tokio::process::Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ResizeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(ResizeError::Failed {
                code: result.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        let bytes = tokio::fs::read(&output).await?;
        drop(scratch);
        Ok(Bytes::from(bytes))
    }
}
