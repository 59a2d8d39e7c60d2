//! thumbcache-ctl: command-line interface for a thumbcached node.

use std::path::PathBuf;

use anyhow::{Context, Result};

use thumbcache_core::config::ThumbcacheConfig;

mod cmd;

const FALLBACK_PORT: u16 = 8080;

/// Service port from the local config, if it pins one.
fn default_port() -> u16 {
    ThumbcacheConfig::load()
        .ok()
        .map(|c| c.network.service_port)
        .filter(|p| *p != 0)
        .unwrap_or(FALLBACK_PORT)
}

fn print_usage() {
    println!("Usage: thumbcache-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                             Show node identity and cache stats");
    println!("  peers                              List cluster members");
    println!("  get <width> <height> <file> [--out <path>]");
    println!("                                     Fetch a thumbnail and save it");
    println!();
    println!("Options:");
    println!(
        "  --port <port>   Public service port (default: config, else {})",
        FALLBACK_PORT
    );
}

fn dimension(raw: &str, what: &str) -> Result<u32> {
    raw.parse()
        .with_context(|| format!("{what} must be a positive number"))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = None;
    let mut out = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                port = Some(
                    args.get(i)
                        .context("--port requires a value")?
                        .parse()
                        .context("--port must be a number")?,
                );
            }
            "--out" => {
                i += 1;
                out = Some(PathBuf::from(args.get(i).context("--out requires a value")?));
            }
            other => remaining.push(other),
        }
        i += 1;
    }
    let port = port.unwrap_or_else(default_port);

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["peers"] => cmd::status::cmd_peers(port).await,
        ["get", width, height, file] => {
            let width = dimension(width, "width")?;
            let height = dimension(height, "height")?;
            cmd::thumb::cmd_get(port, width, height, file, out).await
        }
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
