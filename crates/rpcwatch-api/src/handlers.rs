//! Read API handlers.
//!
//! Handlers only read the store. Upstream RPC failures are data, so none of
//! these routes fail on their account.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::ApiState;

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    /// Kept as a string so a malformed value falls back to the full history
    /// instead of rejecting the request.
    pub count: Option<String>,
}

/// Leading integer of `raw`, if it is positive. Anything else means "no limit".
pub fn parse_count(raw: Option<&str>) -> Option<usize> {
    let raw = raw?.trim_start();
    let digits_end = raw
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '+')))
        .map_or(raw.len(), |(i, _)| i);
    let digits = raw[..digits_end].trim_start_matches('+');
    if digits.is_empty() {
        return None;
    }
    // Longer than usize can hold still means "more than we have".
    let count = digits.parse::<usize>().unwrap_or(usize::MAX);
    (count > 0).then_some(count)
}

// ── Status ─────────────────────────────────────────────────────

/// GET /api/rpc/status
///
/// chain → node → `[{ts, status}]` covering every registered endpoint in
/// registry order. Endpoints without samples yet map to an empty list.
pub async fn status(State(state): State<ApiState>, Query(query): Query<StatusQuery>) -> Json<Value> {
    let limit = parse_count(query.count.as_deref());
    let windows = state.store.windows(state.registry.endpoints(), limit).await;
    debug!(?limit, endpoints = windows.len(), "status requested");

    let mut body = Map::new();
    for (chain, _) in state.registry.chains() {
        body.insert(chain.to_string(), Value::Object(Map::new()));
    }
    for (endpoint, samples) in windows {
        if let Some(Value::Object(nodes)) = body.get_mut(&endpoint.chain) {
            nodes.insert(endpoint.name.clone(), json!(samples));
        }
    }
    Json(Value::Object(body))
}

// ── Liveness & cadence ─────────────────────────────────────────

/// GET /api/rpc/health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/rpc/interval
pub async fn interval(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "minutes": state.interval_minutes }))
}
