use std::collections::BTreeMap;

use agentflow_core::StageResult;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::session::datetime_to_timestamp;
use crate::models::{StageOutputRecord, StageOutputRow};

#[derive(Clone)]
pub struct StageOutputRepository {
    pool: SqlitePool,
}

impl StageOutputRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist one stage's output. Retrying the same (session, stage)
    /// pair overwrites with identical content, so the call is safe to
    /// replay.
    pub async fn store(
        &self,
        subject_id: i64,
        session_id: Uuid,
        stage_name: &str,
        output_kind: &str,
        payload: &StageResult,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO stage_outputs
                (id, session_id, subject_id, stage_name, output_kind, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id, stage_name) DO UPDATE SET
                payload = excluded.payload,
                output_kind = excluded.output_kind
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id.to_string())
        .bind(subject_id)
        .bind(stage_name)
        .bind(output_kind)
        .bind(serde_json::to_string(payload)?)
        .bind(datetime_to_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_session(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<StageOutputRecord>, DbError> {
        let rows: Vec<StageOutputRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, subject_id, stage_name, output_kind, payload, created_at
            FROM stage_outputs
            WHERE session_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.into_domain().map_err(DbError::from))
            .collect()
    }

    /// Results for a session keyed by stage name, as served to status
    /// queries answered from the durable tier.
    pub async fn get_results(
        &self,
        session_id: Uuid,
    ) -> Result<BTreeMap<String, StageResult>, DbError> {
        let records = self.find_by_session(session_id).await?;
        Ok(records
            .into_iter()
            .map(|r| (r.stage_name, r.payload))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::SessionRepository;
    use crate::{create_pool, run_migrations};
    use agentflow_core::StageMetadata;

    async fn setup() -> (SessionRepository, StageOutputRepository, Uuid) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let sessions = SessionRepository::new(pool.clone());
        let outputs = StageOutputRepository::new(pool);

        let id = Uuid::new_v4();
        sessions
            .create_session(3, id, &BTreeMap::new())
            .await
            .unwrap();
        (sessions, outputs, id)
    }

    fn sample_result(summary: &str) -> StageResult {
        StageResult::ok(
            serde_json::json!({"summary": summary}),
            StageMetadata::default(),
        )
    }

    #[tokio::test]
    async fn test_store_and_get_results() {
        let (_, outputs, session_id) = setup().await;

        outputs
            .store(3, session_id, "documenter", "documentation", &sample_result("docs"))
            .await
            .unwrap();
        outputs
            .store(
                3,
                session_id,
                "security_auditor",
                "security_report",
                &sample_result("audit"),
            )
            .await
            .unwrap();

        let results = outputs.get_results(session_id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results["documenter"].data["summary"], "docs");
        assert_eq!(results["security_auditor"].data["summary"], "audit");
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let (_, outputs, session_id) = setup().await;
        let result = sample_result("docs");

        outputs
            .store(3, session_id, "documenter", "documentation", &result)
            .await
            .unwrap();
        outputs
            .store(3, session_id, "documenter", "documentation", &result)
            .await
            .unwrap();

        let results = outputs.get_results(session_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results["documenter"], result);
    }

    #[tokio::test]
    async fn test_results_empty_for_unknown_session() {
        let (_, outputs, _) = setup().await;
        let results = outputs.get_results(Uuid::new_v4()).await.unwrap();
        assert!(results.is_empty());
    }
}
