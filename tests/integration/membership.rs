use crate::*;

use thumbcache_services::RegistryError;

#[tokio::test]
async fn test_nodes_discover_each_other() {
    let cluster = Cluster::start("discover", 3).await.unwrap();

    let mut urls: Vec<String> = cluster.nodes.iter().map(|n| n.peer_url.clone()).collect();
    urls.sort();
    for node in &cluster.nodes {
        let mut seen: Vec<String> = node.cache.peers().into_iter().map(|n| n.url).collect();
        seen.sort();
        assert_eq!(seen, urls);
    }

    // Names are the hashed node ids.
    let names: Vec<String> = cluster.nodes[0].cache.peers().into_iter().map(|n| n.name).collect();
    for node in &cluster.nodes {
        assert!(names.contains(&node.cache.node_id().to_string()));
    }
}

/// A node that leaves disappears from every peer set, and its keys move to
/// the survivors.
#[tokio::test]
async fn test_leaving_node_hands_over_its_keys() {
    let mut cluster = Cluster::start("leave", 3).await.unwrap();
    let (key, file) = cluster.key_owned_by(2, 48, 48, "handover");

    cluster.nodes[2].cache.leave().await.unwrap();
    drop(cluster.nodes.pop());
    cluster.wait_converged(2).await.unwrap();

    let owner = cluster.owner_of(&key).unwrap();
    assert!(owner < 2);
    let bytes = cluster.nodes[1 - owner].cache.get(&key).await.unwrap();
    assert_eq!(&bytes[..], &expected(48, 48, &file)[..]);
    assert_eq!(cluster.nodes[owner].cache.stats().await.loads, 1);
}

/// A late joiner takes over some keys; every key stays answerable.
#[tokio::test]
async fn test_late_joiner_takes_over_keys() {
    let mut cluster = Cluster::start("late", 2).await.unwrap();
    let keys: Vec<(String, String)> = (0..40)
        .map(|i| (format!("30:30:late-{i}.jpg"), format!("late-{i}.jpg")))
        .collect();
    let before: Vec<Option<usize>> = keys.iter().map(|(k, _)| cluster.owner_of(k)).collect();

    cluster.add_node().await.unwrap();
    cluster.wait_converged(3).await.unwrap();

    let mut moved = 0;
    for ((key, file), old) in keys.iter().zip(before) {
        let new = cluster.owner_of(key);
        if new != old {
            assert_eq!(new, Some(2), "{key} moved between existing nodes");
            moved += 1;
        }
        let bytes = cluster.nodes[0].cache.get(key).await.unwrap();
        assert_eq!(&bytes[..], &expected(30, 30, file)[..]);
    }
    assert!(moved > 0, "new node owns nothing");
    assert_eq!(cluster.nodes[2].cache.stats().await.loads, moved);
}

/// With the registry down, existing nodes keep serving from their last
/// snapshot, a new node cannot join, and membership catches up once the
/// registry returns.
#[tokio::test]
async fn test_registry_outage_is_survivable() {
    let mut cluster = Cluster::start("outage", 2).await.unwrap();
    cluster.store.set_available(false);

    for node in &cluster.nodes {
        let bytes = node.cache.get("20:20:outage.jpg").await.unwrap();
        assert_eq!(&bytes[..], &expected(20, 20, "outage.jpg")[..]);
    }
    assert_eq!(cluster.resizer.calls(20, 20, "outage.jpg"), 1);

    let late = TestNode::start("outage", 9, &cluster.origin, cluster.resizer.clone())
        .await
        .unwrap();
    assert!(matches!(
        late.cache.join(registry(&cluster.store)).await,
        Err(RegistryError::Unavailable(_))
    ));
    // Not joined: serves alone.
    assert!(late.cache.peers().is_empty());
    let bytes = late.cache.get("20:20:outage.jpg").await.unwrap();
    assert_eq!(&bytes[..], &expected(20, 20, "outage.jpg")[..]);
    drop(late);

    cluster.store.set_available(true);
    cluster.add_node().await.unwrap();
    cluster.wait_converged(3).await.unwrap();
}
