use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service version and the circuit breaker state of each external service.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let circuits: BTreeMap<_, _> = state
        .orchestrator
        .circuit_states()
        .await
        .into_iter()
        .map(|(service, circuit)| (service.as_str(), circuit))
        .collect();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "talent-pipeline",
        "circuits": circuits
    }))
}
