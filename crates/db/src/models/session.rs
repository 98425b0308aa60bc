use std::collections::BTreeMap;

use agentflow_core::{SessionError, SessionStatus, StageProgress};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Durable record of a session as kept in `analysis_sessions`.
///
/// This is the authoritative history: it survives registry retirement
/// and is the only tier a status query reaches after a session ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub subject_id: i64,
    pub status: SessionStatus,
    pub stage_config: BTreeMap<String, bool>,
    pub progress: BTreeMap<String, StageProgress>,
    pub errors: Vec<SessionError>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub subject_id: i64,
    pub status: String,
    pub stage_config: String,
    pub progress: String,
    pub errors: String,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionRow {
    pub fn into_domain(self) -> SessionRecord {
        SessionRecord {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            subject_id: self.subject_id,
            status: SessionStatus::parse(&self.status).unwrap_or_default(),
            stage_config: serde_json::from_str(&self.stage_config).unwrap_or_default(),
            progress: serde_json::from_str(&self.progress).unwrap_or_default(),
            errors: serde_json::from_str(&self.errors).unwrap_or_default(),
            error_message: self.error_message,
            created_at: timestamp_to_datetime(self.created_at),
            updated_at: timestamp_to_datetime(self.updated_at),
        }
    }
}

pub(crate) fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

pub(crate) fn datetime_to_timestamp(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}
