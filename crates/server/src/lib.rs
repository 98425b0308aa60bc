pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AgentFlow API",
        version = "0.1.0",
        description = "Multi-agent code analysis pipeline"
    ),
    paths(
        routes::health::health_check,
        routes::analyze::start_analysis,
        routes::sessions::session_status,
        routes::sessions::subject_sessions,
        routes::agents::agents_status,
        routes::sse::events_stream,
    ),
    components(schemas(
        routes::HealthResponse,
        routes::AnalyzeBody,
        routes::AnalyzeResponse,
        routes::AgentsStatusResponse,
        routes::SubjectSessionsResponse,
        routes::sessions::SubjectSessionSummary,
        agentflow_core::SourceFile,
        agentflow_core::SessionView,
        agentflow_core::SessionStatus,
        agentflow_core::StageProgress,
        agentflow_core::StageStatus,
        agentflow_core::StageResult,
        agentflow_core::StageMetadata,
        agentflow_core::StageSnapshot,
        agentflow_core::ViewSource,
    )),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "analysis", description = "Analysis session endpoints"),
        (name = "agents", description = "Agent status endpoints"),
        (name = "events", description = "Real-time event streaming (SSE)"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", ApiDoc::openapi()))
        .route("/health", get(routes::health_check))
        .route("/api/analyze", post(routes::start_analysis))
        .route("/api/status/{id}", get(routes::session_status))
        .route(
            "/api/subjects/{subject_id}/sessions",
            get(routes::subject_sessions),
        )
        .route("/api/agents/status", get(routes::agents_status))
        .route("/api/events", get(routes::events_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
