//! Node status and peer listing.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    name: String,
    node_id: String,
    url: String,
    peers: usize,
    cache: CacheStats,
}

#[derive(Deserialize)]
struct CacheStats {
    gets: u64,
    hits: u64,
    loads: u64,
    coalesced: u64,
    load_errors: u64,
    peer_loads: u64,
    peer_errors: u64,
    entries: u64,
    bytes: u64,
}

#[derive(Deserialize)]
struct PeersResponse {
    peers: Vec<PeerInfo>,
}

#[derive(Deserialize)]
struct PeerInfo {
    name: String,
    url: String,
    is_self: bool,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/api/status", base_url(port))).await?;
    let c = &resp.cache;

    println!("═══════════════════════════════════════");
    println!("  thumbcache node");
    println!("═══════════════════════════════════════");
    println!("  Cache        : {}", resp.name);
    println!("  Node id      : {}", &resp.node_id[..resp.node_id.len().min(16)]);
    println!("  URL          : {}", resp.url);
    println!("  Peers        : {}", resp.peers);
    println!();
    println!("  Requests     : {} ({} hits)", c.gets, c.hits);
    println!("  Local loads  : {} ({} failed, {} coalesced)", c.loads, c.load_errors, c.coalesced);
    println!("  Peer loads   : {} ({} failed)", c.peer_loads, c.peer_errors);
    println!(
        "  Stored       : {} artifacts, {:.1} KB",
        c.entries,
        c.bytes as f64 / 1024.0
    );
    Ok(())
}

pub async fn cmd_peers(port: u16) -> Result<()> {
    let resp: PeersResponse = get_json(&format!("{}/api/peers", base_url(port))).await?;
    if resp.peers.is_empty() {
        println!("No peers known (not joined to a registry).");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Peers ({})", resp.peers.len());
    println!("═══════════════════════════════════════");
    for p in &resp.peers {
        let marker = if p.is_self { " (this node)" } else { "" };
        println!("  ┌─ {}{}", short_name(&p.name), marker);
        println!("  └─ url : {}", p.url);
    }
    Ok(())
}

/// First 16 characters of a node name.
fn short_name(name: &str) -> String {
    name.chars().take(16).collect()
}
