//! rpcwatch-api — read-only HTTP API over the status history.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/rpc/status?count=K` | Most recent `K` samples per endpoint (all when `K` is absent or not positive) |
//! | GET | `/api/rpc/health` | Liveness probe |
//! | GET | `/api/rpc/interval` | Sweep interval in minutes, or `null` for irregular schedules |
//!
//! CORS is fully permissive so the dashboard can be hosted anywhere.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;

use rpcwatch_core::Registry;
use rpcwatch_state::StatusStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StatusStore,
    pub registry: Arc<Registry>,
    /// Minutes between sweeps when the schedule is a plain `*/n` interval.
    pub interval_minutes: Option<u32>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/status", get(handlers::status))
        .route("/health", get(handlers::health))
        .route("/interval", get(handlers::interval))
        .with_state(state);

    Router::new()
        .nest("/api/rpc", api_routes)
        .layer(CorsLayer::permissive())
}
