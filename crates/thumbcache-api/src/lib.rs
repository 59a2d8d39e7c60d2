pub mod handlers;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use thumbcache_services::transport::PEER_ROUTE;
use thumbcache_services::CacheManager;

pub use handlers::{ApiState, Limits};

/// Routes other nodes call to fetch artifacts this node owns.
pub fn peer_router(cache: CacheManager) -> Router {
    Router::new()
        .route(
            &format!("/{PEER_ROUTE}/{{cache_name}}/{{key}}"),
            get(handlers::handle_peer_get),
        )
        .with_state(cache)
}

/// Public thumbnail route plus the JSON API under `/api`.
pub fn public_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/peers", get(handlers::handle_peers))
        .with_state(state.clone());

    Router::new()
        .route(
            "/t/{width}/{height}/{file}",
            get(handlers::handle_thumbnail),
        )
        .with_state(state)
        .nest("/api", api_routes)
        .layer(cors)
}

pub async fn serve(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP listening");
    axum::serve(listener, app).await?;
    Ok(())
}
