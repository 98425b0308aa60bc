use agentflow_core::{SessionStatus, SessionView};
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/status/{id}",
    params(
        ("id" = Uuid, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Session status", body = SessionView),
        (status = 404, description = "Session not found"),
    ),
    tag = "analysis"
)]
pub async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let view = state.orchestrator.status(id).await?;
    Ok(Json(view))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubjectSessionSummary {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubjectSessionsResponse {
    pub subject_id: i64,
    pub total: usize,
    pub sessions: Vec<SubjectSessionSummary>,
}

#[utoipa::path(
    get,
    path = "/api/subjects/{subject_id}/sessions",
    params(
        ("subject_id" = i64, Path, description = "Subject (project) ID"),
    ),
    responses(
        (status = 200, description = "Analysis history for the subject", body = SubjectSessionsResponse),
        (status = 404, description = "No sessions recorded for the subject"),
    ),
    tag = "analysis"
)]
pub async fn subject_sessions(
    State(state): State<AppState>,
    Path(subject_id): Path<i64>,
) -> Result<Json<SubjectSessionsResponse>, AppError> {
    let records = state.sessions.find_by_subject(subject_id).await?;
    if records.is_empty() {
        return Err(AppError::NotFound(format!(
            "No sessions found for subject {subject_id}"
        )));
    }

    let sessions = records
        .into_iter()
        .map(|record| SubjectSessionSummary {
            session_id: record.id,
            status: record.status,
            error_message: record.error_message,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        })
        .collect::<Vec<_>>();

    Ok(Json(SubjectSessionsResponse {
        subject_id,
        total: sessions.len(),
        sessions,
    }))
}
