use crate::*;

use thumbcache_services::transport::PeerError;
use thumbcache_services::CacheError;

/// Whichever node is asked, a key is computed once and every node returns
/// the owner's bytes.
#[tokio::test]
async fn test_every_node_returns_the_owners_bytes() {
    let cluster = Cluster::start("every-node", 3).await.unwrap();

    for i in 0..12 {
        let file = format!("img-{i}.jpg");
        let key = format!("120:90:{file}");
        for node in &cluster.nodes {
            let bytes = node.cache.get(&key).await.unwrap();
            assert_eq!(&bytes[..], &expected(120, 90, &file)[..], "{key}");
        }
        assert_eq!(cluster.resizer.calls(120, 90, &file), 1, "{key} computed more than once");
        assert_eq!(cluster.origin.hits(&file), 1, "{file} downloaded more than once");
    }

    // Only owners load, once per key.
    let mut loads = 0;
    for node in &cluster.nodes {
        loads += node.cache.stats().await.loads;
    }
    assert_eq!(loads, 12);
}

/// Many concurrent requests for one key, spread over every node, trigger
/// exactly one download and one resize in the whole cluster.
#[tokio::test]
async fn test_concurrent_requests_compute_once_cluster_wide() {
    let cluster = Cluster::start("concurrent", 3).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..30 {
        let cache = cluster.nodes[i % 3].cache.clone();
        handles.push(tokio::spawn(async move { cache.get("64:64:hot.png").await }));
    }
    for handle in handles {
        let bytes = handle.await.unwrap().unwrap();
        assert_eq!(&bytes[..], &expected(64, 64, "hot.png")[..]);
    }

    assert_eq!(cluster.resizer.calls(64, 64, "hot.png"), 1);
    assert_eq!(cluster.origin.hits("hot.png"), 1);
}

/// Non-owners forward; the owner does the work.
#[tokio::test]
async fn test_non_owner_forwards_to_owner() {
    let cluster = Cluster::start("forward", 3).await.unwrap();
    let (key, file) = cluster.key_owned_by(2, 32, 32, "fwd");

    let bytes = cluster.nodes[0].cache.get(&key).await.unwrap();
    assert_eq!(&bytes[..], &expected(32, 32, &file)[..]);

    let asker = cluster.nodes[0].cache.stats().await;
    assert_eq!(asker.peer_loads, 1);
    assert_eq!(asker.loads, 0);

    let owner = cluster.nodes[2].cache.stats().await;
    assert_eq!(owner.loads, 1);
    assert_eq!(owner.entries, 1);
}

/// A forwarded request is answered locally even when the receiver does not
/// own the key, so two nodes with different views cannot bounce it.
#[tokio::test]
async fn test_peer_route_never_reforwards() {
    let cluster = Cluster::start("no-reforward", 3).await.unwrap();
    let (key, file) = cluster.key_owned_by(0, 16, 16, "bounce");

    let url = format!("{}/_cache/{CACHE_NAME}/{key}", cluster.nodes[1].peer_url);
    let resp = reqwest::get(url).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(&resp.bytes().await.unwrap()[..], &expected(16, 16, &file)[..]);

    let receiver = cluster.nodes[1].cache.stats().await;
    assert_eq!(receiver.loads, 1);
    assert_eq!(receiver.peer_loads, 0);
    assert_eq!(cluster.nodes[0].cache.stats().await.gets, 0);
}

/// Errors on the owner come back to the asking node as peer errors and are
/// not cached anywhere.
#[tokio::test]
async fn test_owner_failure_surfaces_as_peer_error() {
    let cluster = Cluster::start("owner-error", 2).await.unwrap();
    let (key, file) = (0..1000)
        .map(|i| format!("missing-{i}.jpg"))
        .map(|file| (format!("10:10:{file}"), file))
        .find(|(key, _)| cluster.owner_of(key) == Some(1))
        .unwrap();

    for attempt in 1..=2 {
        match cluster.nodes[0].cache.get(&key).await {
            Err(CacheError::Peer { source, .. }) => {
                assert!(
                    matches!(source.as_ref(), PeerError::Status { status: 500, .. }),
                    "unexpected peer error: {source}"
                );
            }
            other => panic!("expected peer error, got {other:?}"),
        }
        assert_eq!(cluster.origin.hits(&file), attempt);
    }
    assert_eq!(cluster.resizer.total_calls(), 0);
}

/// The public route works from any node and forwards like `get`.
#[tokio::test]
async fn test_public_route_on_any_node() {
    let cluster = Cluster::start("public", 2).await.unwrap();

    for node in &cluster.nodes {
        let resp = reqwest::get(format!("{}/t/200/150/cat.jpg", node.public_url))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "image/jpeg");
        assert_eq!(&resp.bytes().await.unwrap()[..], &expected(200, 150, "cat.jpg")[..]);
    }
    assert_eq!(cluster.resizer.calls(200, 150, "cat.jpg"), 1);

    let resp = reqwest::get(format!("{}/t/200/150/missing.jpg", cluster.nodes[0].public_url))
        .await
        .unwrap();
    let expected_status = if cluster.owner_of("200:150:missing.jpg") == Some(0) { 404 } else { 502 };
    assert_eq!(resp.status(), expected_status);
}
