//! Facade tying the pipeline, registry and collaborators together.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use agentflow_core::{
    ErrorKind, Session, SessionView, SourceFile, StageOptions, StageSnapshot,
};
use cache::SessionCache;
use db::{SessionRepository, StageOutputRepository};
use events::{Event, EventBus, EventEnvelope};
use parser::CodeParser;
use stages::Stage;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::pipeline::PipelineRunner;
use crate::registry::SessionRegistry;

const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard ceiling for one whole session run.
    pub session_timeout: Duration,
    /// Lifetime of the shared-cache copy of a session.
    pub cache_ttl: Duration,
    /// Stop at the first fatal error instead of driving the remaining
    /// stages. Off by default: a failed stage does not block the rest.
    pub fail_fast: bool,
    /// Options applied when a request does not carry its own.
    pub default_options: StageOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            fail_fast: false,
            default_options: StageOptions::default(),
        }
    }
}

/// Everything needed to launch one analysis session.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    /// Externally supplied id; a fresh one is generated when absent.
    pub session_id: Option<Uuid>,
    pub subject_id: i64,
    pub files: Vec<SourceFile>,
    /// Per-stage enablement overrides. Unmentioned stages fall back to
    /// their descriptor default.
    pub stage_config: BTreeMap<String, bool>,
    pub options: Option<StageOptions>,
}

/// Entry point for the analysis service.
///
/// `start` validates, registers and launches a session, returning its
/// id right away; the pipeline runs in a background task bounded by the
/// configured time ceiling. `status` answers from the registry tiers.
pub struct Orchestrator {
    stages: Arc<[Arc<dyn Stage>]>,
    registry: Arc<SessionRegistry>,
    runner: PipelineRunner,
    sessions: SessionRepository,
    events: EventBus,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        parser: Arc<CodeParser>,
        stages: Vec<Arc<dyn Stage>>,
        sessions: SessionRepository,
        outputs: StageOutputRepository,
        cache: Arc<dyn SessionCache>,
        events: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        let stages: Arc<[Arc<dyn Stage>]> = stages.into();
        let registry = Arc::new(SessionRegistry::new(
            cache.clone(),
            sessions.clone(),
            outputs.clone(),
        ));
        let runner = PipelineRunner::new(
            parser,
            stages.clone(),
            sessions.clone(),
            outputs,
            cache,
            events.clone(),
            config.fail_fast,
            config.cache_ttl,
        );
        Self {
            stages,
            registry,
            runner,
            sessions,
            events,
            config,
        }
    }

    /// Launch a session and return its id. The pipeline itself runs in
    /// the background; callers poll `status` for progress.
    pub async fn start(&self, request: AnalyzeRequest) -> Result<Uuid> {
        if request.files.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "At least one input file is required".to_string(),
            ));
        }
        if request.files.iter().any(|f| f.path.trim().is_empty()) {
            return Err(OrchestratorError::InvalidInput(
                "Every input file needs a non-empty path".to_string(),
            ));
        }

        let id = request.session_id.unwrap_or_else(Uuid::new_v4);
        let stage_config = self.effective_stage_config(request.stage_config);
        let subject_id = request.subject_id;
        let file_count = request.files.len();

        let session = Session::new(id, subject_id, request.files, stage_config.clone());
        let handle = self.registry.register(session).await?;

        if let Err(e) = self
            .sessions
            .create_session(subject_id, id, &stage_config)
            .await
        {
            self.registry.retire(id).await;
            return Err(e.into());
        }

        info!(session_id = %id, subject_id, file_count, "Session started");
        self.events.publish(EventEnvelope::new(Event::SessionStarted {
            session_id: id,
            subject_id,
            file_count,
        }));

        let runner = self.runner.clone();
        let registry = self.registry.clone();
        let options = request
            .options
            .unwrap_or_else(|| self.config.default_options.clone());
        let timeout = self.config.session_timeout;

        tokio::spawn(async move {
            let persisted = match tokio::time::timeout(timeout, runner.run(handle.clone(), options))
                .await
            {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!(session_id = %id, error = %e, "Pipeline run failed");
                    if handle.read().await.status.is_terminal() {
                        // Finalization recorded the fault on the session
                        // but could not write the durable snapshot.
                        false
                    } else {
                        runner
                            .fail_with(
                                &handle,
                                ErrorKind::Internal,
                                format!("Pipeline aborted: {e}"),
                            )
                            .await
                            .is_ok()
                    }
                }
                Err(_) => {
                    warn!(
                        session_id = %id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Session exceeded its time ceiling"
                    );
                    runner
                        .fail_with(
                            &handle,
                            ErrorKind::Timeout,
                            format!("Session exceeded the {}ms ceiling", timeout.as_millis()),
                        )
                        .await
                        .is_ok()
                }
            };

            if persisted {
                registry.retire(id).await;
            } else {
                // Without a durable failed record, retiring would make
                // the session unfindable. Keep it live so status queries
                // still get the failed view with the storage error.
                warn!(session_id = %id, "Terminal snapshot not persisted; session kept registered");
            }
        });

        Ok(id)
    }

    /// Status of a session from the first registry tier that knows it.
    pub async fn status(&self, id: Uuid) -> Result<SessionView> {
        self.registry
            .lookup(id)
            .await
            .ok_or(OrchestratorError::NotFound(id))
    }

    /// Operational snapshot of every registered stage.
    pub fn stages_status(&self) -> Vec<StageSnapshot> {
        self.stages.iter().map(|s| s.snapshot()).collect()
    }

    /// Number of sessions currently live in this process.
    pub async fn active_sessions(&self) -> usize {
        self.registry.active_count().await
    }

    fn effective_stage_config(&self, mut requested: BTreeMap<String, bool>) -> BTreeMap<String, bool> {
        for stage in self.stages.iter() {
            let descriptor = stage.descriptor();
            requested
                .entry(descriptor.name.clone())
                .or_insert(descriptor.default_enabled);
        }
        requested
    }
}
