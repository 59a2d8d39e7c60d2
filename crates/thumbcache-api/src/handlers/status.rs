//! /status and /peers handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use thumbcache_services::CacheStats;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub node_id: String,
    pub url: String,
    pub peers: usize,
    pub cache: CacheStats,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let cache = &state.cache;
    let stats = cache.stats().await;
    Json(StatusResponse {
        name: cache.name().to_string(),
        node_id: cache.node_id().to_string(),
        url: cache.self_url().to_string(),
        peers: stats.peers,
        cache: stats,
    })
}

// ── /peers ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PeerInfo {
    pub name: String,
    pub url: String,
    pub is_self: bool,
}

#[derive(Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    let self_url = state.cache.self_url();
    let peers = state
        .cache
        .peers()
        .into_iter()
        .map(|node| PeerInfo {
            is_self: node.url == self_url,
            name: node.name,
            url: node.url,
        })
        .collect();
    Json(PeersResponse { peers })
}
