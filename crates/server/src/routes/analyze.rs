use std::collections::BTreeMap;

use agentflow_core::{SourceFile, StageOptions};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Rough per-file duration estimate returned to the caller.
const SECONDS_PER_FILE: u64 = 30;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyzeBody {
    /// Optional externally supplied session id.
    pub session_id: Option<Uuid>,
    pub subject_id: i64,
    pub files: Vec<SourceFile>,
    /// Per-agent enablement overrides; unmentioned agents use their
    /// defaults.
    #[serde(default)]
    pub agents_config: BTreeMap<String, bool>,
    pub model: Option<String>,
    pub tone: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalyzeResponse {
    pub session_id: Uuid,
    pub status: String,
    pub estimated_seconds: u64,
}

#[utoipa::path(
    post,
    path = "/api/analyze",
    request_body = AnalyzeBody,
    responses(
        (status = 200, description = "Analysis session launched", body = AnalyzeResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Session id already in use"),
    ),
    tag = "analysis"
)]
pub async fn start_analysis(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeBody>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let estimated_seconds = body.files.len() as u64 * SECONDS_PER_FILE;

    let options = if body.model.is_some() || body.tone.is_some() {
        Some(StageOptions {
            model: body.model,
            tone: body.tone,
        })
    } else {
        None
    };

    let session_id = state
        .orchestrator
        .start(orchestrator::AnalyzeRequest {
            session_id: body.session_id,
            subject_id: body.subject_id,
            files: body.files,
            stage_config: body.agents_config,
            options,
        })
        .await?;

    Ok(Json(AnalyzeResponse {
        session_id,
        status: "started".to_string(),
        estimated_seconds,
    }))
}
