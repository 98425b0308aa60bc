pub mod agents;
pub mod analyze;
pub mod health;
pub mod sessions;
pub mod sse;

pub use agents::{agents_status, AgentsStatusResponse};
pub use analyze::{start_analysis, AnalyzeBody, AnalyzeResponse};
pub use health::{health_check, HealthResponse};
pub use sessions::{session_status, subject_sessions, SubjectSessionsResponse};
pub use sse::events_stream;
