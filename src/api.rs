use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::buffer::Filter;
use crate::models::HealthResponse;
use crate::request_log::{log_requests, LogShipper};
use crate::sync::DashboardHandle;
use crate::views::DashboardView;

// ── Shared state ────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub dashboard: DashboardHandle,
    pub hostname: String,
    pub start_time: std::time::Instant,
}

// ── Router ──────────────────────────────────────────────────────

pub fn build_router(state: AppState, shipper: LogShipper) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/view", get(view))
        .route("/alerts", get(alerts))
        .route("/filters", get(filters))
        .route("/filter", post(set_filter))
        .layer(middleware::from_fn_with_state(shipper, log_requests))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

// ── Handlers ────────────────────────────────────────────────────

async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let view = s.dashboard.current();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        hostname: s.hostname.clone(),
        uptime_secs: s.start_time.elapsed().as_secs(),
        connection: view.status,
        revision: view.revision,
    })
}

async fn view(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let view = s.dashboard.current();
    Json(DashboardView::clone(&view))
}

async fn alerts(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let view = s.dashboard.current();
    Json(serde_json::json!({
        "filter": view.filter,
        "revision": view.revision,
        "table": view.table,
    }))
}

async fn filters(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let view = s.dashboard.current();
    Json(serde_json::json!({
        "current": view.filter,
        "options": view.filters,
    }))
}

#[derive(Deserialize)]
struct FilterRequest {
    filter: Filter,
}

async fn set_filter(
    State(s): State<Arc<AppState>>,
    Json(req): Json<FilterRequest>,
) -> impl IntoResponse {
    if s.dashboard.set_filter(req.filter.clone()).await {
        (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "success": true, "filter": req.filter })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "success": false, "error": "Dashboard is shutting down" })),
        )
    }
}
