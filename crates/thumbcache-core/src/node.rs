//! Cluster node identity.

use serde::{Deserialize, Serialize};

/// A cache node as advertised in the service registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Registry identifier, normally `node_id(&url)`.
    pub name: String,
    /// Base URL of the node's peer endpoint, e.g. `http://10.0.0.5:41234`.
    pub url: String,
}

impl Node {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// Build a node whose name is derived from its URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: node_id(&url),
            url,
        }
    }
}

/// Stable identifier for a node: hex BLAKE3 digest of its advertised URL.
///
/// A node restarting on the same URL re-registers under the same id. A new
/// URL (e.g. a different ephemeral port) yields a new id and the old entry
/// stays until something removes it.
pub fn node_id(url: &str) -> String {
    hex::encode(blake3::hash(url.as_bytes()).as_bytes())
}
