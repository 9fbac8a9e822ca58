//! HTTP and WebSocket surface.
//!
//! ## Endpoints
//!
//! ### Ingestion
//! - `POST /api/v1/ingest` - Ingest one telemetry request
//!
//! ### Officers
//! - `GET /api/v1/officers` - Snapshot of all officers
//! - `GET /api/v1/officers/:officer_id` - One officer's live state
//! - `PUT /api/v1/officers/:officer_id/profile` - Replace the physiological profile
//! - `PUT /api/v1/officers/:officer_id/duty` - Set on/off duty
//! - `GET /api/v1/officers/:officer_id/risk-history` - Recent risk events
//!
//! ### Alerts
//! - `POST /api/v1/alerts/nearby` - Alert officers near a source officer
//! - `POST /api/v1/alerts` - Raise a manual alert
//! - `GET /api/v1/alerts` - Most recent alerts
//!
//! ### Feed
//! - `GET /api/v1/feed/stats` - Fan-out counters
//! - `WS /ws/live` - Live feed with per-connection officer filter
//!
//! - `GET /health` - Liveness

pub mod error;
pub mod handlers;
pub mod websocket;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::pipeline::Monitor;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::*;

/// Shared state handed to every handler
#[derive(Debug, Clone)]
pub struct AppState {
    monitor: Arc<Monitor>,
}

impl AppState {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self { monitor }
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }
}

/// Build the router with every endpoint
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/ingest", post(handlers::ingest))
        .route("/api/v1/officers", get(handlers::list_officers))
        .route("/api/v1/officers/:officer_id", get(handlers::get_officer))
        .route("/api/v1/officers/:officer_id/profile", put(handlers::update_profile))
        .route("/api/v1/officers/:officer_id/duty", put(handlers::set_duty))
        .route("/api/v1/officers/:officer_id/risk-history", get(handlers::risk_history))
        .route("/api/v1/alerts/nearby", post(handlers::alert_nearby))
        .route("/api/v1/alerts", get(handlers::list_alerts).post(handlers::raise_alert))
        .route("/api/v1/feed/stats", get(handlers::feed_stats))
        .route("/ws/live", get(websocket::ws_handler))
        .with_state(state)
}
