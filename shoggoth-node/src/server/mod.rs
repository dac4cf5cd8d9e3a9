//! The node's HTTP surface: the `/api/*` routes peers and clients consume,
//! with a token-bucket rate limiter over the whole server.

pub mod api;
pub mod publish;
pub mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tracing::{info, warn};

use crate::context::NodeCtx;
use crate::error::Result;
use rate_limit::{rate_limit_middleware, RateLimiter};

/// Builds the API router. Rate limiting is layered on by [`serve`] so
/// router-level tests can drive the routes directly.
pub fn build_router(ctx: Arc<NodeCtx>) -> Router {
    Router::new()
        .route("/api/get_manifest", get(api::get_manifest))
        .route("/api/get_dht", get(api::get_dht))
        .route("/api/get_pins", get(api::get_pins))
        .route("/api/get_fingerprint/:shoggoth_id", get(api::get_fingerprint))
        .route("/api/clone/:shoggoth_id", get(api::clone_profile))
        .route("/api/clone/:shoggoth_id/:group", get(api::clone_group))
        .route("/api/clone/:shoggoth_id/:group/:resource", get(api::clone_resource))
        .route("/api/download/:shoggoth_id/:group/:resource", get(api::download_resource))
        .route("/api/publish", get(publish::negotiate))
        .route("/api/publish_chunk", get(publish::receive_chunk))
        .route("/api/publish_finish", get(publish::finish))
        .with_state(ctx)
}

/// Runs the HTTP server until shutdown is requested.
pub async fn serve(ctx: Arc<NodeCtx>) -> Result<()> {
    if !ctx.config.api.enable {
        warn!("Node API disabled");

        let mut shutdown = ctx.subscribe_shutdown();
        let _ = shutdown.changed().await;
        return Ok(());
    }

    let limiter = RateLimiter::new(
        ctx.config.api.rate_limiter_requests,
        ctx.config.api.rate_limiter_duration,
        "you are being rate limited.",
    );
    let janitor = limiter.start_janitor(ctx.subscribe_shutdown());

    let app = build_router(ctx.clone())
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    let addr = format!("{}:{}", ctx.config.network.host, ctx.config.network.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("node API listening on http://{addr}");

    let mut shutdown = ctx.subscribe_shutdown();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    janitor.abort();
    info!("node server exited");

    Ok(())
}
