//! Cluster-aware thumbnail cache.
//!
//! `CacheManager::get` routes each key to its owner on the hash ring. The
//! owner answers from its in-memory artifact cache or, on a miss, runs
//! download + resize exactly once per key while concurrent callers wait
//! on the same flight. Non-owners forward the request to the owner over
//! the peer route and return its bytes as-is.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use parking_lot::Mutex;
use serde::Serialize;
use thumbcache_core::config::ThumbcacheConfig;
use thumbcache_core::{node_id, CacheKey, Node};
use tokio::task::JoinHandle;

use crate::downloader::Downloader;
use crate::error::CacheError;
use crate::peers::{Owner, PeerPool};
use crate::registry::{RegistryError, ServiceRegistry};
use crate::resize::Resizer;
use crate::singleflight::{Role, SingleFlight};
use crate::transport::PeerClient;

/// Everything a `CacheManager` needs to know about its own node.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache name: registry namespace and peer route segment.
    pub name: String,
    /// URL peers use to reach this node's peer route.
    pub self_url: String,
    /// Artifact budget in bytes.
    pub max_bytes: u64,
    /// Prefix joined with the resource id to form the download URL.
    pub origin: String,
    pub download_dir: PathBuf,
    /// Virtual points per node on the hash ring.
    pub replicas: usize,
}

impl CacheConfig {
    pub fn from_settings(config: &ThumbcacheConfig, self_url: impl Into<String>) -> Self {
        Self {
            name: config.cache.name.clone(),
            self_url: self_url.into(),
            max_bytes: config.cache.max_bytes,
            origin: config.cache.origin.clone(),
            download_dir: config.cache.download_dir(),
            replicas: config.registry.replicas,
        }
    }
}

/// Counters exposed on the status endpoint.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub gets: u64,
    pub hits: u64,
    /// Local computations started (download + resize).
    pub loads: u64,
    /// Callers that joined an in-flight computation.
    pub coalesced: u64,
    pub load_errors: u64,
    pub peer_loads: u64,
    pub peer_errors: u64,
    pub entries: u64,
    pub bytes: u64,
    pub peers: usize,
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    hits: AtomicU64,
    loads: AtomicU64,
    coalesced: AtomicU64,
    load_errors: AtomicU64,
    peer_loads: AtomicU64,
    peer_errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Membership {
    registry: Arc<ServiceRegistry>,
    watch: JoinHandle<()>,
}

struct Inner {
    name: String,
    self_url: String,
    node_id: String,
    origin: String,
    artifacts: Cache<String, Bytes>,
    flights: SingleFlight<Bytes, CacheError>,
    pool: Arc<PeerPool>,
    peers: PeerClient,
    downloader: Downloader,
    resizer: Arc<dyn Resizer>,
    membership: Mutex<Option<Membership>>,
    counters: Counters,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(membership) = self.membership.get_mut().take() {
            membership.watch.abort();
        }
    }
}

/// Handle to one node's cache. Cheap to clone.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    pub fn new(config: CacheConfig, resizer: Arc<dyn Resizer>) -> io::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(io::Error::other)?;
        let downloader = Downloader::new(&config.download_dir, http.clone())?;

        let artifacts = Cache::builder()
            .weigher(|key: &String, value: &Bytes| {
                (key.len() + value.len()).try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(config.max_bytes)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        tracing::info!(
            name = %config.name,
            url = %config.self_url,
            max_bytes = config.max_bytes,
            dir = %config.download_dir.display(),
            "cache created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                node_id: node_id(&config.self_url),
                pool: Arc::new(PeerPool::new(config.self_url.clone(), config.replicas)),
                peers: PeerClient::new(http, config.name.clone()),
                name: config.name,
                self_url: config.self_url,
                origin: config.origin,
                artifacts,
                flights: SingleFlight::new(),
                downloader,
                resizer,
                membership: Mutex::new(None),
                counters: Counters::default(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn self_url(&self) -> &str {
        &self.inner.self_url
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Current membership as last seen from the registry.
    pub fn peers(&self) -> Vec<Node> {
        self.inner.pool.nodes()
    }

    /// Register with the registry, seed the peer set from it, and keep
    /// the peer set in sync from then on.
    pub async fn join(&self, registry: Arc<ServiceRegistry>) -> Result<(), RegistryError> {
        let inner = &self.inner;
        registry.register(&inner.node_id, &inner.self_url).await?;
        let (index, nodes) = match seed(&registry).await {
            Ok(seeded) => seeded,
            Err(e) => {
                // Not joined, so `leave` will not clean up after us.
                if let Err(undo) = registry.unregister(&inner.node_id).await {
                    tracing::warn!(error = %undo, "failed to undo registration");
                }
                return Err(e);
            }
        };
        tracing::info!(
            node_id = %inner.node_id,
            url = %inner.self_url,
            peers = nodes.len(),
            "joined cluster"
        );
        inner.pool.set(nodes);

        let watch = {
            let registry = registry.clone();
            let pool = inner.pool.clone();
            tokio::spawn(async move {
                registry
                    .watch_from(Some(index), move |nodes| pool.set(nodes))
                    .await;
            })
        };

        if let Some(previous) = inner.membership.lock().replace(Membership { registry, watch }) {
            previous.watch.abort();
        }
        Ok(())
    }

    /// Stop watching and remove this node from the registry.
    ///
    /// A no-op if `join` never succeeded.
    pub async fn leave(&self) -> Result<(), RegistryError> {
        let Some(membership) = self.inner.membership.lock().take() else {
            return Ok(());
        };
        membership.watch.abort();
        membership.registry.unregister(&self.inner.node_id).await
    }

    /// Look up `key` (`width:height:resource`) anywhere in the cluster.
    pub async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        let parsed: CacheKey = key.parse()?;
        bump(&self.inner.counters.gets);

        match self.inner.pool.pick(key) {
            Owner::Local => self.get_local(key, parsed).await,
            Owner::Remote(peer) => self.get_remote(&peer, key).await,
        }
    }

    /// Answer a request forwarded by a peer. Never forwards again, even if
    /// this node's view of the ring disagrees with the sender's.
    pub async fn get_owned(&self, key: &str) -> Result<Bytes, CacheError> {
        let parsed: CacheKey = key.parse()?;
        bump(&self.inner.counters.gets);
        self.get_local(key, parsed).await
    }

    async fn get_local(&self, key: &str, parsed: CacheKey) -> Result<Bytes, CacheError> {
        if let Some(bytes) = self.inner.artifacts.get(key).await {
            bump(&self.inner.counters.hits);
            return Ok(bytes);
        }

        let inner = self.inner.clone();
        let owned_key = key.to_string();
        let (result, role) = self
            .inner
            .flights
            .work(key, move || async move { inner.load(owned_key, parsed).await })
            .await;
        if role == Role::Follower {
            bump(&self.inner.counters.coalesced);
        }
        result
    }

    async fn get_remote(&self, peer: &str, key: &str) -> Result<Bytes, CacheError> {
        bump(&self.inner.counters.peer_loads);
        self.inner.peers.fetch(peer, key).await.map_err(|e| {
            bump(&self.inner.counters.peer_errors);
            tracing::warn!(peer = %peer, key = %key, error = %e, "peer fetch failed");
            CacheError::peer(peer, e)
        })
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        inner.artifacts.run_pending_tasks().await;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheStats {
            gets: load(&inner.counters.gets),
            hits: load(&inner.counters.hits),
            loads: load(&inner.counters.loads),
            coalesced: load(&inner.counters.coalesced),
            load_errors: load(&inner.counters.load_errors),
            peer_loads: load(&inner.counters.peer_loads),
            peer_errors: load(&inner.counters.peer_errors),
            entries: inner.artifacts.entry_count(),
            bytes: inner.artifacts.weighted_size(),
            peers: inner.pool.snapshot().nodes().len(),
        }
    }
}

/// Store index to watch from, plus the membership as of that index.
async fn seed(registry: &ServiceRegistry) -> Result<(u64, Vec<Node>), RegistryError> {
    let index = registry.current_index().await?;
    let nodes = registry.get_nodes().await?;
    Ok((index, nodes))
}

impl Inner {
    /// Download the source, resize it, and keep the result.
    async fn load(&self, key: String, parsed: CacheKey) -> Result<Bytes, CacheError> {
        // A flight that finished just before ours started may have filled it.
        if let Some(bytes) = self.artifacts.get(&key).await {
            bump(&self.counters.hits);
            return Ok(bytes);
        }
        bump(&self.counters.loads);

        let result = self.compute(&parsed).await;
        match &result {
            Ok(bytes) => {
                tracing::debug!(key = %key, bytes = bytes.len(), "artifact computed");
                self.artifacts.insert(key, bytes.clone()).await;
            }
            Err(e) => {
                bump(&self.counters.load_errors);
                tracing::warn!(key = %key, error = %e, "load failed");
            }
        }
        result
    }

    async fn compute(&self, key: &CacheKey) -> Result<Bytes, CacheError> {
        let url = format!("{}{}", self.origin, key.resource_id);
        let source = self.downloader.download(&url).await?;
        let bytes = self
            .resizer
            .resize(&source, key.width, key.height)
            .await?;
        Ok(bytes)
    }
}
