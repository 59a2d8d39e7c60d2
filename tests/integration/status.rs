use crate::*;

/// /api/status and /api/peers shape on a joined node.
#[tokio::test]
async fn test_status_and_peers_api() {
    let cluster = Cluster::start("status", 3).await.unwrap();
    let node = &cluster.nodes[1];
    node.cache.get("50:50:status.jpg").await.unwrap();

    let status: serde_json::Value = reqwest::get(format!("{}/api/status", node.public_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["name"], CACHE_NAME);
    assert_eq!(status["url"], node.peer_url.as_str());
    assert_eq!(status["node_id"], node.cache.node_id());
    assert_eq!(status["peers"], 3);
    assert_eq!(status["cache"]["gets"], 1);
    for field in ["hits", "loads", "coalesced", "peer_loads", "peer_errors", "entries", "bytes"] {
        assert!(status["cache"][field].is_number(), "missing cache.{field}");
    }

    let peers: serde_json::Value = reqwest::get(format!("{}/api/peers", node.public_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let peers = peers["peers"].as_array().unwrap();
    assert_eq!(peers.len(), 3);
    let own: Vec<&serde_json::Value> = peers.iter().filter(|p| p["is_self"] == true).collect();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0]["url"], node.peer_url.as_str());
}
