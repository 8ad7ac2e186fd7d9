//! API — Axum web server for the market engine.
//!
//! Serves the JSON trading/resolution/registration surface.
//! CORS is permissive so browser agents can call it directly.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

pub use routes::{ApiState, AppState};

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ]);

    Router::new()
        .route("/api/trade", post(routes::post_trade))
        .route("/api/resolve", post(routes::post_resolve))
        .route("/api/agents/register", post(routes::post_register))
        .route(
            "/api/markets",
            post(routes::post_create_market).get(routes::get_markets),
        )
        .route("/api/markets/holders", get(routes::get_holders))
        .route("/api/leaderboard", get(routes::get_leaderboard))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on the given port until ctrl-c.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "API server starting on http://localhost:{port}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("API server error")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
