use agentflow_core::StageResult;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::session::timestamp_to_datetime;

/// One persisted stage output, keyed by (session, stage).
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutputRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub subject_id: i64,
    pub stage_name: String,
    pub output_kind: String,
    pub payload: StageResult,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StageOutputRow {
    pub id: String,
    pub session_id: String,
    pub subject_id: i64,
    pub stage_name: String,
    pub output_kind: String,
    pub payload: String,
    pub created_at: i64,
}

impl StageOutputRow {
    pub fn into_domain(self) -> Result<StageOutputRecord, serde_json::Error> {
        Ok(StageOutputRecord {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            session_id: Uuid::parse_str(&self.session_id).unwrap_or_default(),
            subject_id: self.subject_id,
            stage_name: self.stage_name,
            output_kind: self.output_kind,
            payload: serde_json::from_str(&self.payload)?,
            created_at: timestamp_to_datetime(self.created_at),
        })
    }
}
