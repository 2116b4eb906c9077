//! HTTP surface: dashboard WebSocket upgrade, the history query API, a
//! liveness probe, and the ambient `/metrics` counters endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::hub::Hub;
use crate::metrics::Metrics;
use crate::state::StateStore;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<StateStore>,
    pub hub: Arc<Hub>,
    pub metrics: Arc<Metrics>,
}

pub fn router(state: ApiState) -> Router {
    let history_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS]);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/history", get(history_handler).layer(history_cors))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn ws_handler(State(state): State<ApiState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        state.hub.register(socket);
    })
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[derive(Deserialize)]
struct HistoryQuery {
    device: Option<String>,
    iface: Option<String>,
    minutes: Option<i64>,
}

#[derive(Serialize)]
struct HistoryResponse {
    device: String,
    iface: String,
    minutes: i64,
    samples: Vec<crate::model::Sample>,
}

async fn history_handler(
    State(state): State<ApiState>,
    Query(q): Query<HistoryQuery>,
) -> axum::response::Response {
    if !state.store.history_enabled() {
        return (StatusCode::NOT_FOUND, "history disabled").into_response();
    }

    let (Some(device), Some(iface)) = (q.device, q.iface) else {
        return (StatusCode::BAD_REQUEST, "device and iface are required").into_response();
    };

    let minutes = q.minutes.filter(|m| *m > 0).unwrap_or(5);
    match state
        .store
        .fetch_history(&device, &iface, Duration::from_secs((minutes as u64) * 60))
    {
        Ok(samples) => Json(HistoryResponse {
            device,
            iface,
            minutes,
            samples,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.metrics.snapshot(
        state.hub.dropped_count(),
        state.store.history_dropped_count(),
        state.store.device_count(),
        state.hub.client_count(),
    ))
}
