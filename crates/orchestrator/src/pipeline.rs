//! Pipeline state machine and driver.
//!
//! A session moves through a fixed set of states. Routing between them
//! is a pure function of the accumulated session state, so it can be
//! tested without running anything. The driver owns the only writer to
//! a session for the whole run; status queries share read access.

use std::sync::Arc;
use std::time::Duration;

use agentflow_core::{ErrorKind, Session, SessionStatus, StageOptions, StageResult, StageStatus};
use cache::{session_key, SessionCache};
use db::{SessionRepository, StageOutputRepository};
use events::{Event, EventBus, EventEnvelope};
use parser::CodeParser;
use stages::Stage;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::registry::SharedSession;

/// Progress key used for the built-in parsing step.
pub const PARSING_STAGE: &str = "parsing";

/// Aborts the wrapped stage task when dropped. Dropping a `JoinHandle`
/// alone would detach the task and let it keep running after the
/// driver is cancelled.
struct AbortOnDrop(tokio::task::JoinHandle<StageResult>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// States of one pipeline run.
///
/// `Stage(i)` indexes into the ordered stage list. `ErrorHandling`
/// consolidates a failed run; both it and `Storing` lead to `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Parsing,
    Routing,
    Stage(usize),
    Collecting,
    Storing,
    ErrorHandling,
    Done,
}

impl PipelineState {
    /// Compute the successor state.
    ///
    /// Fatal errors after parsing short-circuit to failure handling.
    /// Stage-to-stage transitions are unconditional unless `fail_fast`
    /// is set: a failed stage never blocks the ones behind it.
    pub fn next(self, has_fatal_errors: bool, stage_count: usize, fail_fast: bool) -> Self {
        match self {
            Self::Created => Self::Parsing,
            Self::Parsing if has_fatal_errors => Self::ErrorHandling,
            Self::Parsing => Self::Routing,
            Self::Routing if stage_count == 0 => Self::Collecting,
            Self::Routing => Self::Stage(0),
            Self::Stage(_) if fail_fast && has_fatal_errors => Self::ErrorHandling,
            Self::Stage(i) if i + 1 < stage_count => Self::Stage(i + 1),
            Self::Stage(_) => Self::Collecting,
            Self::Collecting => Self::Storing,
            Self::Storing | Self::ErrorHandling | Self::Done => Self::Done,
        }
    }
}

/// Drives one session through the pipeline.
///
/// The runner is the single writer for the session it drives. Write
/// locks are held only for synchronous mutation, never across a stage
/// await, and a stage's output lands together with its progress marker
/// under one lock so no partially committed result is observable.
#[derive(Clone)]
pub struct PipelineRunner {
    parser: Arc<CodeParser>,
    stages: Arc<[Arc<dyn Stage>]>,
    sessions: SessionRepository,
    outputs: StageOutputRepository,
    cache: Arc<dyn SessionCache>,
    events: EventBus,
    fail_fast: bool,
    cache_ttl: Duration,
}

impl PipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parser: Arc<CodeParser>,
        stages: Arc<[Arc<dyn Stage>]>,
        sessions: SessionRepository,
        outputs: StageOutputRepository,
        cache: Arc<dyn SessionCache>,
        events: EventBus,
        fail_fast: bool,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            parser,
            stages,
            sessions,
            outputs,
            cache,
            events,
            fail_fast,
            cache_ttl,
        }
    }

    /// Run the full pipeline for one session.
    pub async fn run(&self, session: SharedSession, options: StageOptions) -> Result<()> {
        let mut state = PipelineState::Created;
        let mut decided = SessionStatus::Completed;

        loop {
            match state {
                PipelineState::Created => self.begin(&session).await,
                PipelineState::Parsing => self.run_parsing(&session).await,
                PipelineState::Routing => {}
                PipelineState::Stage(i) => self.run_stage(&session, i, &options).await,
                PipelineState::Collecting => decided = self.collect(&session).await,
                PipelineState::Storing => self.store(&session, decided).await?,
                PipelineState::ErrorHandling => self.consolidate_failure(&session).await?,
                PipelineState::Done => return Ok(()),
            }

            let has_fatal = session.read().await.has_fatal_errors();
            state = state.next(has_fatal, self.stages.len(), self.fail_fast);
        }
    }

    async fn begin(&self, session: &SharedSession) {
        let id = {
            let mut s = session.write().await;
            if let Err(e) = s.mark_running() {
                warn!(session_id = %s.id, error = %e, "Could not mark session running");
            }
            s.id
        };

        if let Err(e) = self
            .sessions
            .update_status(id, SessionStatus::Running, None)
            .await
        {
            warn!(session_id = %id, error = %e, "Could not persist running status");
        }
        self.refresh_cache(session).await;
    }

    async fn run_parsing(&self, session: &SharedSession) {
        let (id, files) = {
            let s = session.read().await;
            (s.id, s.input_files.clone())
        };

        self.events.publish(EventEnvelope::new(Event::StageStarted {
            session_id: id,
            stage: PARSING_STAGE.to_string(),
        }));

        let mut parsed = std::collections::BTreeMap::new();
        let mut warnings = Vec::new();
        for file in &files {
            match self.parser.parse(&file.path, &file.content) {
                Ok(elements) => {
                    parsed.insert(file.path.clone(), elements);
                }
                Err(e) => warnings.push(e.to_string()),
            }
        }

        {
            let mut s = session.write().await;
            s.advance_stage(PARSING_STAGE, StageStatus::Running);
            for warning in &warnings {
                s.push_error(ErrorKind::ParseWarning, warning.clone());
            }
            s.parsed_elements = parsed;
            s.advance_stage(PARSING_STAGE, StageStatus::Completed);
        }

        info!(
            session_id = %id,
            files = files.len(),
            warnings = warnings.len(),
            "Parsing finished"
        );
        self.events
            .publish(EventEnvelope::new(Event::StageCompleted {
                session_id: id,
                stage: PARSING_STAGE.to_string(),
                status: StageStatus::Completed.as_str().to_string(),
            }));
        self.checkpoint(session).await;
    }

    async fn run_stage(&self, session: &SharedSession, index: usize, options: &StageOptions) {
        let stage = self.stages[index].clone();
        let name = stage.descriptor().name.clone();

        let (id, subject_id, enabled, parsed) = {
            let mut s = session.write().await;
            let enabled = s.stage_enabled(&name);
            if enabled {
                s.advance_stage(&name, StageStatus::Running);
            } else {
                s.advance_stage(&name, StageStatus::Skipped);
            }
            (s.id, s.subject_id, enabled, s.parsed_elements.clone())
        };

        if !enabled {
            debug!(session_id = %id, stage = %name, "Stage disabled, skipped");
            self.events
                .publish(EventEnvelope::new(Event::StageCompleted {
                    session_id: id,
                    stage: name,
                    status: StageStatus::Skipped.as_str().to_string(),
                }));
            self.checkpoint(session).await;
            return;
        }

        self.events.publish(EventEnvelope::new(Event::StageStarted {
            session_id: id,
            stage: name.clone(),
        }));
        info!(session_id = %id, stage = %name, "Running stage");

        // Spawned so a stage panic comes back as a join error instead of
        // tearing down the driver. The guard aborts the task if the
        // driver itself is cancelled, so a wedged stage cannot outlive
        // its session's time ceiling.
        let task_stage = stage.clone();
        let task_options = options.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move {
            task_stage.run(&parsed, subject_id, &task_options).await
        }));

        let result = match (&mut task.0).await {
            Ok(result) => result,
            Err(e) => StageResult::failed(
                vec![format!("Stage task aborted: {e}")],
                Default::default(),
            ),
        };

        let marker = {
            let mut s = session.write().await;
            if result.success {
                match s.record_stage_output(&name, result) {
                    Ok(()) => StageStatus::Completed,
                    Err(e) => {
                        s.push_error(ErrorKind::Internal, e.to_string());
                        s.advance_stage(&name, StageStatus::Failed);
                        StageStatus::Failed
                    }
                }
            } else {
                s.record_stage_failure(&name, &result.errors);
                StageStatus::Failed
            }
        };

        self.events
            .publish(EventEnvelope::new(Event::StageCompleted {
                session_id: id,
                stage: name,
                status: marker.as_str().to_string(),
            }));
        self.checkpoint(session).await;
    }

    /// Decide the final status from the accumulated errors. Parse
    /// warnings alone never fail a run.
    async fn collect(&self, session: &SharedSession) -> SessionStatus {
        let s = session.read().await;
        let status = if s.has_fatal_errors() {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        };
        info!(
            session_id = %s.id,
            outputs = s.stage_outputs.len(),
            errors = s.errors.len(),
            status = status.as_str(),
            "Collected stage outputs"
        );
        status
    }

    async fn store(&self, session: &SharedSession, decided: SessionStatus) -> Result<()> {
        let (id, subject_id, outputs) = {
            let s = session.read().await;
            (s.id, s.subject_id, s.stage_outputs.clone())
        };

        let mut decided = decided;
        for (name, result) in &outputs {
            let kind = self.output_kind(name);
            if let Err(e) = self
                .outputs
                .store(subject_id, id, name, &kind, result)
                .await
            {
                warn!(session_id = %id, stage = %name, error = %e, "Could not persist stage output");
                session.write().await.push_error(
                    ErrorKind::StorageFailure,
                    format!("Could not store output for stage {name}: {e}"),
                );
                decided = SessionStatus::Failed;
            }
        }

        self.finalize(session, decided).await
    }

    async fn consolidate_failure(&self, session: &SharedSession) -> Result<()> {
        {
            let mut s = session.write().await;
            if !s.has_fatal_errors() {
                s.push_error(
                    ErrorKind::Internal,
                    "Pipeline routed to failure handling without a recorded error",
                );
            }
        }
        self.finalize(session, SessionStatus::Failed).await
    }

    /// Persist the terminal snapshot, then apply the final status to
    /// the in-memory session. Persistence comes first: when the store
    /// is down, the session is marked failed with the storage error
    /// recorded, the failed view stays readable from the live tiers,
    /// and the fault propagates to the driver.
    pub(crate) async fn finalize(
        &self,
        session: &SharedSession,
        status: SessionStatus,
    ) -> Result<()> {
        let (id, subject_id, progress, errors, error_message) = {
            let s = session.read().await;
            let error_message = s
                .errors
                .iter()
                .find(|e| e.kind.is_fatal())
                .map(|e| e.to_string());
            (
                s.id,
                s.subject_id,
                s.progress.clone(),
                s.errors.clone(),
                error_message,
            )
        };

        let persisted: Result<()> = async {
            self.sessions
                .update_status(id, status, error_message.as_deref())
                .await?;
            self.sessions.update_progress(id, &progress, &errors).await?;
            Ok(())
        }
        .await;

        if let Err(e) = persisted {
            warn!(session_id = %id, error = %e, "Terminal snapshot not persisted");
            {
                let mut s = session.write().await;
                s.push_error(
                    ErrorKind::StorageFailure,
                    format!("Could not persist final session record: {e}"),
                );
                if let Err(apply) = s.mark_failed() {
                    warn!(session_id = %id, error = %apply, "Failed status not applied");
                }
            }
            self.refresh_cache(session).await;
            self.events
                .publish(EventEnvelope::new(Event::SessionEnded {
                    session_id: id,
                    subject_id,
                    success: false,
                }));
            return Err(e);
        }

        {
            let mut s = session.write().await;
            let applied = match status {
                SessionStatus::Completed => s.mark_completed(),
                _ => s.mark_failed(),
            };
            if let Err(e) = applied {
                warn!(session_id = %id, error = %e, "Final status not applied");
            }
        }
        self.refresh_cache(session).await;

        let success = status == SessionStatus::Completed;
        self.events
            .publish(EventEnvelope::new(Event::SessionEnded {
                session_id: id,
                subject_id,
                success,
            }));
        info!(session_id = %id, success, "Session finished");
        Ok(())
    }

    /// Record one more error and finalize the session as failed. Used
    /// for faults raised outside the state loop (time ceiling, driver
    /// errors). A session that already reached a terminal status is
    /// left alone: the normal path marks terminal only after a
    /// successful persist, and the persist-failure path has already
    /// recorded its storage error.
    pub(crate) async fn fail_with(
        &self,
        session: &SharedSession,
        kind: ErrorKind,
        message: String,
    ) -> Result<()> {
        let id = {
            let mut s = session.write().await;
            if s.status.is_terminal() {
                return Ok(());
            }
            s.push_error(kind, message.clone());
            s.id
        };
        self.events.publish(EventEnvelope::new(Event::Error {
            message,
            context: Some(id.to_string()),
        }));
        self.finalize(session, SessionStatus::Failed).await
    }

    fn output_kind(&self, stage_name: &str) -> String {
        self.stages
            .iter()
            .find(|s| s.descriptor().name == stage_name)
            .map(|s| s.descriptor().output_kind.clone())
            .unwrap_or_else(|| stage_name.to_string())
    }

    /// Mid-run persistence: refresh the shared cache and snapshot the
    /// progress map. Both are best effort; the terminal snapshot in
    /// `finalize` is the strict one.
    async fn checkpoint(&self, session: &SharedSession) {
        let (id, progress, errors) = {
            let s = session.read().await;
            (s.id, s.progress.clone(), s.errors.clone())
        };
        if let Err(e) = self.sessions.update_progress(id, &progress, &errors).await {
            warn!(session_id = %id, error = %e, "Progress checkpoint failed");
        }
        self.refresh_cache(session).await;
    }

    async fn refresh_cache(&self, session: &Arc<RwLock<Session>>) {
        let (key, value) = {
            let s = session.read().await;
            match serde_json::to_value(&*s) {
                Ok(value) => (session_key(s.id), value),
                Err(e) => {
                    warn!(session_id = %s.id, error = %e, "Could not serialize session for cache");
                    return;
                }
            }
        };
        if let Err(e) = self.cache.set(&key, value, Some(self.cache_ttl)).await {
            warn!(key = %key, error = %e, "Cache refresh failed");
        }
    }
}
