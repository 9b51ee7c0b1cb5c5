// =============================================================================
// REST API - market data bulk loads, symbol listing, gateway status
// =============================================================================
//
// All endpoints live under `/api/v1/`. CORS is configured permissively for
// development; tighten `allowed_origins` in production. Authentication is an
// outer-layer concern and not handled here.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::server::state::AppState;
use crate::types::Timeframe;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full router: REST endpoints plus the WebSocket mount.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/symbols", get(list_symbols))
        .route("/api/v1/market/:symbol", get(market_snapshot))
        .route("/api/v1/market/:symbol/klines", get(market_klines))
        .route("/api/v1/ws/status", get(ws_status))
        .route("/ws/:client_id", get(crate::server::endpoint::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    sessions: usize,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        sessions: state.session_count(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Symbols
// =============================================================================

#[derive(Serialize)]
struct SymbolsResponse {
    total: usize,
    symbols: Vec<crate::types::SymbolInfo>,
}

async fn list_symbols(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let symbols = state.symbols.all();
    Json(SymbolsResponse {
        total: symbols.len(),
        symbols,
    })
}

// =============================================================================
// Market data bulk loads
// =============================================================================

async fn market_snapshot(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    match state.upstream.ticker_24h(&symbol).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            warn!(symbol = %symbol, error = %e, "market snapshot fetch failed");
            error_response(StatusCode::BAD_GATEWAY, "upstream market data unavailable")
        }
    }
}

#[derive(Deserialize)]
struct KlinesQuery {
    interval: Option<String>,
    limit: Option<usize>,
}

async fn market_klines(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<KlinesQuery>,
) -> impl IntoResponse {
    let timeframe = match query.interval.as_deref() {
        None => Timeframe::M1,
        Some(raw) => match raw.parse::<Timeframe>() {
            Ok(tf) => tf,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
        },
    };

    // The rolling window is bounded: never hand out more than the series cap.
    let cap = state.settings.candle_series_cap;
    let limit = query.limit.unwrap_or(cap).min(cap).max(1);

    match state.upstream.klines(&symbol, timeframe, limit).await {
        Ok(candles) => Json(candles).into_response(),
        Err(e) => {
            warn!(symbol = %symbol, timeframe = %timeframe, error = %e, "klines fetch failed");
            error_response(StatusCode::BAD_GATEWAY, "upstream kline data unavailable")
        }
    }
}

// =============================================================================
// WebSocket status
// =============================================================================

async fn ws_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_ws_status())
}

// =============================================================================
// Helpers
// =============================================================================

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    let body = serde_json::json!({ "error": message });
    (status, Json(body)).into_response()
}
