//! thumbcached: distributed thumbnail cache daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use thumbcache_api::{ApiState, Limits};
use thumbcache_core::config::ThumbcacheConfig;
use thumbcache_services::{
    CacheConfig, CacheManager, EtcdStore, RegistryError, ServiceRegistry, VipsResizer,
};

mod addr;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ThumbcacheConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ThumbcacheConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ThumbcacheConfig::default()
    });
    tracing::info!(name = %config.cache.name, origin = %config.cache.origin, "thumbcached starting");

    // ── Listeners and identity ───────────────────────────────────────────────

    let cache_listener = TcpListener::bind(("0.0.0.0", config.network.cache_port))
        .await
        .context("failed to bind cache port")?;
    let cache_port = cache_listener.local_addr()?.port();

    let host = addr::advertise_host(&config.network.advertise_host)
        .context("cannot determine an address to advertise")?;
    let self_url = addr::node_url(&host, cache_port);

    let service_listener = TcpListener::bind(("0.0.0.0", config.network.service_port))
        .await
        .context("failed to bind service port")?;

    let cache = CacheManager::new(
        CacheConfig::from_settings(&config, &self_url),
        Arc::new(VipsResizer::from_settings(&config.resize)),
    )
    .context("failed to create cache")?;
    tracing::info!(
        url = %self_url,
        node_id = %cache.node_id(),
        service = %service_listener.local_addr()?,
        "node identity"
    );

    // ── Serve ────────────────────────────────────────────────────────────────

    let peer_task = tokio::spawn(thumbcache_api::serve(
        cache_listener,
        thumbcache_api::peer_router(cache.clone()),
    ));
    let public_task = tokio::spawn(thumbcache_api::serve(
        service_listener,
        thumbcache_api::public_router(ApiState {
            cache: cache.clone(),
            limits: Limits::from(&config.resize),
        }),
    ));

    // ── Join the cluster ─────────────────────────────────────────────────────

    if let Err(e) = join(&cache, &config).await {
        tracing::warn!(error = %e, "registry unavailable, starting as single node");
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = shutdown_signal() => tracing::info!("shutdown signal received"),
        r = peer_task         => tracing::error!("peer server exited: {:?}", r),
        r = public_task       => tracing::error!("public server exited: {:?}", r),
    }

    if let Err(e) = cache.leave().await {
        tracing::error!(error = %e, "failed to unregister");
    }
    tracing::info!("shut down");
    Ok(())
}

async fn join(cache: &CacheManager, config: &ThumbcacheConfig) -> Result<(), RegistryError> {
    let settings = &config.registry;
    let store = EtcdStore::new(
        &settings.endpoints,
        Duration::from_millis(settings.header_timeout_ms),
    )?;
    let registry = ServiceRegistry::new(config.cache.name.clone(), Arc::new(store)).with_backoff(
        Duration::from_secs(settings.min_backoff_secs),
        Duration::from_secs(settings.max_backoff_secs),
    );
    cache.join(Arc::new(registry)).await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.ok();
}
