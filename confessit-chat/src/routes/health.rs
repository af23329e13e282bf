use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use confessit_shared::types::api::{HealthCheck, HealthResponse};

use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store_check = format!("store:{}", state.store.backend());
    let mut checks = vec![match state.store.ping().await {
        Ok(()) => HealthCheck::healthy(store_check),
        Err(e) => HealthCheck::unhealthy(store_check, e.to_string()),
    }];

    if let Some(rabbitmq) = &state.rabbitmq {
        checks.push(if rabbitmq.is_connected() {
            HealthCheck::healthy("rabbitmq")
        } else {
            HealthCheck::unhealthy("rabbitmq", "channel disconnected")
        });
    }

    Json(HealthResponse::healthy("confessit-chat", env!("CARGO_PKG_VERSION")).with_checks(checks))
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.as_ref().map(|h| h.render()).unwrap_or_default()
}
