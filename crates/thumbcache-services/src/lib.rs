//! thumbcache-services: membership, routing, and the cache itself.
//!
//! Registry → PeerPool → CacheManager. The downloader and resizer sit
//! behind the cache and only run on the node that owns a key.

pub mod backoff;
pub mod cache;
pub mod downloader;
pub mod error;
pub mod peers;
pub mod registry;
pub mod resize;
pub mod ring;
pub mod singleflight;
pub mod transport;

pub use cache::{CacheConfig, CacheManager, CacheStats};
pub use error::CacheError;
pub use registry::{EtcdStore, KeyStore, MemoryStore, RegistryError, ServiceRegistry};
pub use resize::{Resizer, VipsResizer};
