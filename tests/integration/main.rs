//! thumbcache integration test harness.
//!
//! Each test starts an in-process cluster: one fake image origin, one
//! in-memory registry, and N nodes that each serve the real peer and
//! public routers on loopback ports. Nodes share a counting resizer so
//! tests can assert how often each key was computed cluster-wide.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use thumbcache_api::{ApiState, Limits};
use thumbcache_services::resize::{ResizeError, Resizer};
use thumbcache_services::ring::HashRing;
use thumbcache_services::{CacheConfig, CacheManager, MemoryStore, ServiceRegistry};

mod membership;
mod routing;
mod status;

pub const CACHE_NAME: &str = "thumbs";

// ── Harness ───────────────────────────────────────────────────────────────────

type HitTable = Arc<Mutex<HashMap<String, usize>>>;

/// Image origin that serves `source:<name>` and counts requests per name.
pub struct Origin {
    pub url: String,
    hits: HitTable,
    task: JoinHandle<()>,
}

impl Origin {
    pub async fn start() -> Result<Self> {
        let hits: HitTable = Arc::default();
        let router = Router::new()
            .route(
                "/{name}",
                get(
                    |State(hits): State<HitTable>, UrlPath(name): UrlPath<String>| async move {
                        *hits.lock().entry(name.clone()).or_default() += 1;
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        if name.starts_with("missing") {
                            Err(StatusCode::NOT_FOUND)
                        } else {
                            Ok(format!("source:{name}"))
                        }
                    },
                ),
            )
            .with_state(hits.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}/", listener.local_addr()?);
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(Self { url, hits, task })
    }

    pub fn hits(&self, name: &str) -> usize {
        self.hits.lock().get(name).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().values().sum()
    }
}

impl Drop for Origin {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Resizer shared by every node: returns `<w>x<h>|<source bytes>` and
/// records each call.
#[derive(Default)]
pub struct CountingResizer {
    calls: Mutex<HashMap<String, usize>>,
}

impl CountingResizer {
    /// Calls for the rendition `width x height` of `file`.
    pub fn calls(&self, width: u32, height: u32, file: &str) -> usize {
        let key = format!("{width}:{height}:{file}");
        self.calls.lock().get(&key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl Resizer for CountingResizer {
    async fn resize(&self, source: &Path, width: u32, height: u32) -> Result<Bytes, ResizeError> {
        let file = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        *self
            .calls
            .lock()
            .entry(format!("{width}:{height}:{file}"))
            .or_default() += 1;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let body = tokio::fs::read(source).await?;
        let mut out = format!("{width}x{height}|").into_bytes();
        out.extend_from_slice(&body);
        Ok(Bytes::from(out))
    }
}

/// Expected artifact for a rendition, as produced by `CountingResizer`.
pub fn expected(width: u32, height: u32, file: &str) -> Vec<u8> {
    format!("{width}x{height}|source:{file}").into_bytes()
}

/// One cache node serving its peer and public routes on loopback.
pub struct TestNode {
    pub cache: CacheManager,
    pub peer_url: String,
    pub public_url: String,
    tasks: Vec<JoinHandle<()>>,
}

impl TestNode {
    pub async fn start(test: &str, index: usize, origin: &Origin, resizer: Arc<CountingResizer>) -> Result<Self> {
        let peer_listener = TcpListener::bind("127.0.0.1:0").await?;
        let public_listener = TcpListener::bind("127.0.0.1:0").await?;
        let peer_url = format!("http://{}", peer_listener.local_addr()?);
        let public_url = format!("http://{}", public_listener.local_addr()?);

        let dir = std::env::temp_dir().join(format!(
            "thumbcache-it-{test}-{index}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);

        let cache = CacheManager::new(
            CacheConfig {
                name: CACHE_NAME.into(),
                self_url: peer_url.clone(),
                max_bytes: 4 << 20,
                origin: origin.url.clone(),
                download_dir: dir,
                replicas: 50,
            },
            resizer,
        )
        .context("failed to create cache")?;

        let peer_app = thumbcache_api::peer_router(cache.clone());
        let public_app = thumbcache_api::public_router(ApiState {
            cache: cache.clone(),
            limits: Limits {
                max_width: 1920,
                max_height: 1920,
            },
        });
        let tasks = vec![
            tokio::spawn(async move {
                let _ = thumbcache_api::serve(peer_listener, peer_app).await;
            }),
            tokio::spawn(async move {
                let _ = thumbcache_api::serve(public_listener, public_app).await;
            }),
        ];

        Ok(Self {
            cache,
            peer_url,
            public_url,
            tasks,
        })
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Registry handle over the shared store with short watch backoff.
pub fn registry(store: &Arc<MemoryStore>) -> Arc<ServiceRegistry> {
    Arc::new(
        ServiceRegistry::new(CACHE_NAME, store.clone())
            .with_backoff(Duration::from_millis(10), Duration::from_millis(100)),
    )
}

pub struct Cluster {
    pub test: String,
    pub store: Arc<MemoryStore>,
    pub origin: Origin,
    pub resizer: Arc<CountingResizer>,
    pub nodes: Vec<TestNode>,
}

impl Cluster {
    /// Start `size` nodes, join them all, and wait until every node sees
    /// the full membership.
    pub async fn start(test: &str, size: usize) -> Result<Self> {
        let mut cluster = Self {
            test: test.to_string(),
            store: Arc::new(MemoryStore::new()),
            origin: Origin::start().await?,
            resizer: Arc::new(CountingResizer::default()),
            nodes: Vec::new(),
        };
        for _ in 0..size {
            cluster.add_node().await?;
        }
        cluster.wait_converged(size).await?;
        Ok(cluster)
    }

    /// Start and join one more node. Returns its index.
    pub async fn add_node(&mut self) -> Result<usize> {
        let index = self.nodes.len();
        let node = TestNode::start(&self.test, index, &self.origin, self.resizer.clone()).await?;
        node.cache
            .join(registry(&self.store))
            .await
            .context("join failed")?;
        self.nodes.push(node);
        Ok(index)
    }

    /// Wait until every live node's peer set has `expected` members.
    pub async fn wait_converged(&self, expected: usize) -> Result<()> {
        wait_until(Duration::from_secs(5), || {
            self.nodes.iter().all(|n| n.cache.peers().len() == expected)
        })
        .await
        .with_context(|| {
            let seen: Vec<usize> = self.nodes.iter().map(|n| n.cache.peers().len()).collect();
            format!("cluster did not converge on {expected} members, saw {seen:?}")
        })
    }

    /// Index of the node that owns `key` once the cluster has converged.
    pub fn owner_of(&self, key: &str) -> Option<usize> {
        let ring = HashRing::with_members(50, self.nodes.iter().map(|n| n.peer_url.clone()));
        let url = ring.get(key)?;
        self.nodes.iter().position(|n| n.peer_url == url)
    }

    /// Some key of the form `<w>:<h>:<prefix>-<i>.jpg` owned by node `owner`.
    pub fn key_owned_by(&self, owner: usize, width: u32, height: u32, prefix: &str) -> (String, String) {
        (0..1000)
            .map(|i| format!("{prefix}-{i}.jpg"))
            .map(|file| (format!("{width}:{height}:{file}"), file))
            .find(|(key, _)| self.owner_of(key) == Some(owner))
            .expect("1000 keys should cover every node")
    }
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// The harness itself: one node, one request, one computation.
#[tokio::test]
async fn test_single_node_cluster() {
    let cluster = Cluster::start("single", 1).await.unwrap();
    let node = &cluster.nodes[0];

    let bytes = node.cache.get("100:100:abc.jpg").await.unwrap();
    assert_eq!(&bytes[..], &expected(100, 100, "abc.jpg")[..]);

    let again = node.cache.get("100:100:abc.jpg").await.unwrap();
    assert_eq!(bytes, again);
    assert_eq!(cluster.origin.hits("abc.jpg"), 1);
    assert_eq!(cluster.resizer.calls(100, 100, "abc.jpg"), 1);
}
