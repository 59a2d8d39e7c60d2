//! thumbcache-core: shared types, key format, node identity and configuration.
//! All other thumbcache crates depend on this one.

pub mod config;
pub mod key;
pub mod node;

pub use key::{CacheKey, KeyError};
pub use node::{node_id, Node};
