//! Configuration system for thumbcache.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $THUMBCACHE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/thumbcache/config.toml
//!   3. ~/.config/thumbcache/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbcacheConfig {
    pub cache: CacheSettings,
    pub network: NetworkConfig,
    pub registry: RegistryConfig,
    pub resize: ResizeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Cache name. Also the registry namespace and the peer route segment.
    pub name: String,
    /// In-memory artifact budget in bytes.
    pub max_bytes: u64,
    /// Prefix joined with the resource id to build the download URL.
    pub origin: String,
    /// Parent of the per-cache download directory (`cache_<name>/`).
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Peer-to-peer cache port. 0 = OS-assigned.
    pub cache_port: u16,
    /// Public thumbnail port. 0 = OS-assigned.
    pub service_port: u16,
    /// Host advertised to peers. Empty = auto-detect.
    pub advertise_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// etcd endpoints, tried in order.
    pub endpoints: Vec<String>,
    /// Max wait for response headers on any registry request.
    pub header_timeout_ms: u64,
    pub min_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// Virtual points per peer on the hash ring.
    pub replicas: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeSettings {
    pub max_width: u32,
    pub max_height: u32,
    /// libvips CLI used for resizing.
    pub program: String,
    /// JPEG quality of the re-encoded artifact.
    pub quality: u8,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            name: "mycache".to_string(),
            max_bytes: 64 << 20,
            origin: "http://i.imgur.com/".to_string(),
            data_dir: data_dir(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            header_timeout_ms: 1000,
            min_backoff_secs: 1,
            max_backoff_secs: 4096,
            replicas: 50,
        }
    }
}

impl Default for ResizeSettings {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1920,
            program: "vips".to_string(),
            quality: 95,
        }
    }
}

impl CacheSettings {
    /// Directory holding downloaded source files for this cache.
    pub fn download_dir(&self) -> PathBuf {
        self.data_dir.join(format!("cache_{}", self.name))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("thumbcache")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("thumbcache")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ThumbcacheConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ThumbcacheConfig::default()
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("THUMBCACHE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ThumbcacheConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply THUMBCACHE_* overrides. Unparseable numbers keep the current value.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("THUMBCACHE_CACHE__NAME") {
            self.cache.name = v;
        }
        if let Some(v) = var("THUMBCACHE_CACHE__MAX_BYTES") {
            if let Ok(n) = v.parse() {
                self.cache.max_bytes = n;
            }
        }
        if let Some(v) = var("THUMBCACHE_CACHE__ORIGIN") {
            self.cache.origin = v;
        }
        if let Some(v) = var("THUMBCACHE_REGISTRY__ENDPOINTS") {
            self.registry.endpoints = v
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = var("THUMBCACHE_NETWORK__CACHE_PORT") {
            if let Ok(p) = v.parse() {
                self.network.cache_port = p;
            }
        }
        if let Some(v) = var("THUMBCACHE_NETWORK__SERVICE_PORT") {
            if let Ok(p) = v.parse() {
                self.network.service_port = p;
            }
        }
        if let Some(v) = var("THUMBCACHE_NETWORK__ADVERTISE_HOST") {
            self.network.advertise_host = v;
        }
    }
}
