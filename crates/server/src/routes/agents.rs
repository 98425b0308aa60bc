use agentflow_core::StageSnapshot;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct AgentsStatusResponse {
    pub agents: Vec<StageSnapshot>,
    pub active_sessions: usize,
}

#[utoipa::path(
    get,
    path = "/api/agents/status",
    responses(
        (status = 200, description = "Operational snapshot of every agent", body = AgentsStatusResponse),
    ),
    tag = "agents"
)]
pub async fn agents_status(State(state): State<AppState>) -> Json<AgentsStatusResponse> {
    Json(AgentsStatusResponse {
        agents: state.orchestrator.stages_status(),
        active_sessions: state.orchestrator.active_sessions().await,
    })
}
