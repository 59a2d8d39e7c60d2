//! Service registry: durable, watchable membership directory.
//!
//! Every node lives at `/<cache_name>/nodes/<node_id>` with its URL as the
//! value. Membership is always read back in full; the watch only signals
//! that something under the namespace changed.

mod etcd;
mod memory;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use thumbcache_core::Node;

use crate::backoff::Backoff;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("watch index {0} has been cleared")]
    IndexCleared(u64),
    #[error("registry error {code}: {message}")]
    Store { code: u32, message: String },
    #[error("invalid registry response: {0}")]
    Decode(String),
    #[error("invalid registry endpoint {0:?}")]
    InvalidEndpoint(String),
}

/// A node in the backing store's tree.
///
/// Field names follow the etcd v2 JSON shape so responses deserialize
/// directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreNode {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub nodes: Vec<StoreNode>,
    #[serde(default)]
    pub modified_index: u64,
}

impl StoreNode {
    pub fn leaf(key: impl Into<String>, value: impl Into<String>, modified_index: u64) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            dir: false,
            nodes: Vec::new(),
            modified_index,
        }
    }
}

/// Hierarchical key-value store with change notification.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Create or replace a leaf.
    async fn set(&self, key: &str, value: &str) -> Result<(), RegistryError>;

    /// Delete a key, and its subtree when `recursive`.
    async fn delete(&self, key: &str, recursive: bool) -> Result<(), RegistryError>;

    /// Read a key. Directories come back with their children in `nodes`.
    async fn get(&self, key: &str, recursive: bool) -> Result<StoreNode, RegistryError>;

    /// Block until something at or under `key` changes.
    ///
    /// With `after_index = Some(n)` the first change with index `> n` is
    /// reported, even if it already happened. `None` waits for the next
    /// change from now. Returns the index of the reported change.
    async fn wait(&self, key: &str, after_index: Option<u64>) -> Result<u64, RegistryError>;

    /// Index of the most recent change anywhere in the store.
    async fn current_index(&self) -> Result<u64, RegistryError>;
}

/// Membership directory for one cache cluster.
pub struct ServiceRegistry {
    store: Arc<dyn KeyStore>,
    name: String,
    name_pattern: Regex,
    min_backoff: Duration,
    max_backoff: Duration,
}

impl ServiceRegistry {
    pub fn new(name: impl Into<String>, store: Arc<dyn KeyStore>) -> Self {
        let name = name.into();
        let name_pattern = Regex::new(&format!("/{}/nodes/(.*)", regex::escape(&name)))
            .expect("escaped namespace is a valid pattern");
        Self {
            store,
            name,
            name_pattern,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(4096),
        }
    }

    /// Override the watch retry bounds.
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min;
        self.max_backoff = max;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn nodes_key(&self) -> String {
        format!("/{}/nodes", self.name)
    }

    fn node_key(&self, node_id: &str) -> String {
        format!("/{}/nodes/{}", self.name, node_id)
    }

    /// Idempotent upsert of a node's URL.
    pub async fn register(&self, node_id: &str, url: &str) -> Result<(), RegistryError> {
        let key = self.node_key(node_id);
        self.store.set(&key, url).await?;
        tracing::debug!(key, url, "node registered");
        Ok(())
    }

    /// Remove a node's subtree.
    pub async fn unregister(&self, node_id: &str) -> Result<(), RegistryError> {
        let key = self.node_key(node_id);
        tracing::info!(key, "unregister");
        self.store.delete(&key, true).await
    }

    /// Store index to resume a watch from.
    pub async fn current_index(&self) -> Result<u64, RegistryError> {
        self.store.current_index().await
    }

    /// Read the full current membership.
    pub async fn get_nodes(&self) -> Result<Vec<Node>, RegistryError> {
        let root = match self.store.get(&self.nodes_key(), true).await {
            Ok(root) => root,
            Err(RegistryError::KeyNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(self.nodes_from(root))
    }

    /// Flatten a namespace read into nodes.
    ///
    /// The store may hand back a single leaf at the namespace root or a
    /// directory of children; names are extracted the same way for both.
    fn nodes_from(&self, root: StoreNode) -> Vec<Node> {
        if root.nodes.is_empty() {
            return match root.value {
                Some(url) if !url.is_empty() => vec![Node::new(self.extract_name(&root.key), url)],
                _ => Vec::new(),
            };
        }

        root.nodes
            .into_iter()
            .filter_map(|child| {
                let url = child.value.filter(|v| !v.is_empty())?;
                Some(Node::new(self.extract_name(&child.key), url))
            })
            .collect()
    }

    /// `/<name>/nodes/<id>` → `<id>`; anything else is returned as-is.
    fn extract_name(&self, key: &str) -> String {
        self.name_pattern
            .captures(key)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| key.to_string())
    }

    /// Call `on_change` with the full membership after every change.
    ///
    /// Runs forever; cancel by dropping or aborting the task. Wait failures
    /// back off exponentially and are never reported to `on_change`. A
    /// membership read that fails right after a change skips that round.
    pub async fn watch<F>(&self, on_change: F)
    where
        F: FnMut(Vec<Node>) + Send,
    {
        self.watch_from(None, on_change).await
    }

    /// Like `watch`, but replays changes made after `after_index`.
    ///
    /// Read `current_index` before `get_nodes` and pass it here so no
    /// change between the initial read and the first wait is missed.
    pub async fn watch_from<F>(&self, mut after_index: Option<u64>, mut on_change: F)
    where
        F: FnMut(Vec<Node>) + Send,
    {
        let key = self.nodes_key();
        tracing::info!(key, ?after_index, "watching registry");

        let mut backoff = Backoff::new(self.min_backoff, self.max_backoff);

        loop {
            match self.store.wait(&key, after_index).await {
                Ok(index) => {
                    backoff.reset();
                    after_index = Some(index);
                    match self.get_nodes().await {
                        Ok(nodes) => {
                            tracing::debug!(index, count = nodes.len(), "membership changed");
                            on_change(nodes);
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "membership read failed, skipping round");
                        }
                    }
                }
                Err(e) => {
                    if matches!(e, RegistryError::IndexCleared(_)) {
                        // Changes inside the cleared window are gone; resync.
                        after_index = None;
                        match self.get_nodes().await {
                            Ok(nodes) => {
                                tracing::info!(count = nodes.len(), "membership resynced after cleared index");
                                on_change(nodes);
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "resync after cleared index failed");
                            }
                        }
                    }
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "registry watch failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
