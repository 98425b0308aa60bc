use std::collections::BTreeMap;

use agentflow_core::{SessionError, SessionStatus, StageProgress};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::session::datetime_to_timestamp;
use crate::models::{SessionRecord, SessionRow};

#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the initial record for a new session. Safe to retry:
    /// replaying the insert for the same id leaves the row unchanged.
    pub async fn create_session(
        &self,
        subject_id: i64,
        id: Uuid,
        stage_config: &BTreeMap<String, bool>,
    ) -> Result<(), DbError> {
        let now = datetime_to_timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO analysis_sessions
                (id, subject_id, status, stage_config, progress, errors, created_at, updated_at)
            VALUES (?, ?, 'created', ?, '{}', '[]', ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(subject_id)
        .bind(serde_json::to_string(stage_config)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        error_message: Option<&str>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_sessions
            SET status = ?, error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(datetime_to_timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist the progress map and error list snapshot for a session.
    pub async fn update_progress(
        &self,
        id: Uuid,
        progress: &BTreeMap<String, StageProgress>,
        errors: &[SessionError],
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_sessions
            SET progress = ?, errors = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(progress)?)
        .bind(serde_json::to_string(errors)?)
        .bind(datetime_to_timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Option<SessionRecord>, DbError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, subject_id, status, stage_config, progress, errors,
                   error_message, created_at, updated_at
            FROM analysis_sessions
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_domain()))
    }

    pub async fn get_progress(
        &self,
        id: Uuid,
    ) -> Result<Option<BTreeMap<String, StageProgress>>, DbError> {
        Ok(self.get_session(id).await?.map(|record| record.progress))
    }

    pub async fn find_by_subject(&self, subject_id: i64) -> Result<Vec<SessionRecord>, DbError> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, subject_id, status, stage_config, progress, errors,
                   error_message, created_at, updated_at
            FROM analysis_sessions
            WHERE subject_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    pub async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
