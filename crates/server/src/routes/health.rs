use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy`, `degraded` (cache down) or `unhealthy` (store down).
    pub status: String,
    pub version: String,
    pub services: BTreeMap<String, String>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health with per-collaborator reachability", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_ok = state.sessions.ping().await.is_ok();
    let cache_ok = state.cache.ping().await.is_ok();

    let mut services = BTreeMap::new();
    services.insert(
        "database".to_string(),
        if db_ok { "healthy" } else { "unreachable" }.to_string(),
    );
    services.insert(
        "cache".to_string(),
        if cache_ok { "healthy" } else { "unreachable" }.to_string(),
    );
    services.insert("orchestrator".to_string(), "healthy".to_string());

    let status = if db_ok && cache_ok {
        "healthy"
    } else if db_ok {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
    })
}
