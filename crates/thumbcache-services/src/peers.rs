//! Peer pool: the set of sibling nodes used to route keys.
//!
//! The pool holds one immutable snapshot (membership + hash ring). Watch
//! callbacks build a new snapshot and swap it in whole, so a lookup sees
//! either the old set or the new one, never a mix.

use std::sync::Arc;

use parking_lot::RwLock;
use thumbcache_core::Node;

use crate::ring::HashRing;

/// Where a key should be computed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    Local,
    Remote(String),
}

/// Immutable membership snapshot.
#[derive(Debug)]
pub struct PeerSet {
    nodes: Vec<Node>,
    ring: HashRing,
}

impl PeerSet {
    fn build(self_url: &str, replicas: usize, nodes: Vec<Node>) -> Self {
        let mut ring = HashRing::new(replicas);
        ring.extend(nodes.iter().map(|n| n.url.clone()));
        // This node stays eligible even if the registry has not caught up.
        ring.extend([self_url]);
        Self { nodes, ring }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn owner(&self, self_url: &str, key: &str) -> Owner {
        match self.ring.get(key) {
            Some(url) if url != self_url => Owner::Remote(url.to_string()),
            _ => Owner::Local,
        }
    }
}

pub struct PeerPool {
    self_url: String,
    replicas: usize,
    current: RwLock<Arc<PeerSet>>,
}

impl PeerPool {
    /// A pool that initially knows only this node.
    pub fn new(self_url: impl Into<String>, replicas: usize) -> Self {
        let self_url = self_url.into();
        let current = Arc::new(PeerSet::build(&self_url, replicas, Vec::new()));
        Self {
            self_url,
            replicas,
            current: RwLock::new(current),
        }
    }

    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    /// Replace the whole peer set.
    pub fn set(&self, nodes: Vec<Node>) {
        for node in &nodes {
            tracing::debug!(name = %node.name, url = %node.url, "peer");
        }
        let next = Arc::new(PeerSet::build(&self.self_url, self.replicas, nodes));
        tracing::info!(peers = next.ring.len(), "peer set updated");
        *self.current.write() = next;
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<PeerSet> {
        self.current.read().clone()
    }

    /// Route a key against the current snapshot.
    pub fn pick(&self, key: &str) -> Owner {
        self.snapshot().owner(&self.self_url, key)
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.snapshot().nodes.clone()
    }
}
