//! HTTP API.
//!
//! JSON endpoints for race data and the betting wizard. CORS is open for
//! local front-ends.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use routes::{ApiError, AppState};

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve(state: AppState, addr: SocketAddr, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API address {addr}"))?;
    info!(%addr, "API server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Race data
        .route("/api/races", get(routes::list_races))
        .route("/api/races/:id", get(routes::get_race))
        .route("/api/races/:id/odds", get(routes::get_odds))
        // Wizard
        .route("/api/sessions", post(routes::create_session))
        .route(
            "/api/sessions/:id",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/api/sessions/:id/analysis", post(routes::run_analysis))
        .route("/api/sessions/:id/selection", put(routes::set_selection))
        .route("/api/sessions/:id/selection/toggle", post(routes::toggle_bet))
        .route("/api/sessions/:id/advance", post(routes::advance))
        .route("/api/sessions/:id/back", post(routes::back))
        .route("/api/sessions/:id/reset", post(routes::reset))
        // History
        .route("/api/portfolios", get(routes::recent_portfolios))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
