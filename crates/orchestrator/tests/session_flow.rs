//! End-to-end pipeline behavior over real collaborators: regex parser,
//! in-memory cache, in-memory sqlite store, scripted stages.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentflow_core::{
    ElementSet, SessionStatus, SessionView, SourceFile, StageDescriptor, StageOptions,
    StageResult, StageSnapshot, StageStatus, ViewSource,
};
use async_trait::async_trait;
use cache::{session_key, CacheError, MemoryCache, SessionCache};
use db::{create_pool, run_migrations, SessionRepository, SqlitePool, StageOutputRepository};
use events::EventBus;
use orchestrator::{AnalyzeRequest, Orchestrator, OrchestratorConfig, OrchestratorError};
use parser::CodeParser;
use stages::Stage;
use uuid::Uuid;

enum Behavior {
    Succeed,
    Fail,
    Wedge,
    Linger,
}

struct ScriptedStage {
    descriptor: StageDescriptor,
    behavior: Behavior,
}

#[async_trait]
impl Stage for ScriptedStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        parsed_elements: &BTreeMap<String, ElementSet>,
        _subject_id: i64,
        _options: &StageOptions,
    ) -> StageResult {
        match self.behavior {
            Behavior::Succeed => StageResult::ok(
                serde_json::json!({ "files": parsed_elements.len() }),
                Default::default(),
            ),
            Behavior::Fail => {
                StageResult::failed(vec!["synthetic stage failure".to_string()], Default::default())
            }
            Behavior::Wedge => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                StageResult::ok(serde_json::Value::Null, Default::default())
            }
            Behavior::Linger => {
                tokio::time::sleep(Duration::from_millis(400)).await;
                StageResult::ok(serde_json::Value::Null, Default::default())
            }
        }
    }

    fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            name: self.descriptor.name.clone(),
            enabled: true,
            total_runs: 0,
            last_run: None,
        }
    }
}

fn scripted(name: &str, behavior: Behavior) -> Arc<dyn Stage> {
    Arc::new(ScriptedStage {
        descriptor: StageDescriptor::new(name, format!("{name}_report"), true),
        behavior,
    })
}

/// Sets its flag when dropped. Held inside a stage future to observe
/// whether cancelling the driver tears the stage task down too.
struct FlagOnDrop(Arc<AtomicBool>);

impl Drop for FlagOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct WedgedStage {
    descriptor: StageDescriptor,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl Stage for WedgedStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        _parsed_elements: &BTreeMap<String, ElementSet>,
        _subject_id: i64,
        _options: &StageOptions,
    ) -> StageResult {
        let _guard = FlagOnDrop(self.dropped.clone());
        tokio::time::sleep(Duration::from_secs(3600)).await;
        StageResult::ok(serde_json::Value::Null, Default::default())
    }

    fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            name: self.descriptor.name.clone(),
            enabled: true,
            total_runs: 0,
            last_run: None,
        }
    }
}

/// Cache wrapper counting reads, to observe which tier answered.
struct CountingCache {
    inner: MemoryCache,
    gets: AtomicUsize,
}

impl CountingCache {
    fn new() -> Self {
        Self {
            inner: MemoryCache::new(),
            gets: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionCache for CountingCache {
    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.exists(key).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.inner.ping().await
    }
}

struct TestEnv {
    orchestrator: Orchestrator,
    sessions: SessionRepository,
    outputs: StageOutputRepository,
    cache: Arc<dyn SessionCache>,
    pool: SqlitePool,
}

async fn env(stages: Vec<Arc<dyn Stage>>, config: OrchestratorConfig) -> TestEnv {
    env_with_cache(stages, config, Arc::new(MemoryCache::new())).await
}

async fn env_with_cache(
    stages: Vec<Arc<dyn Stage>>,
    config: OrchestratorConfig,
    cache: Arc<dyn SessionCache>,
) -> TestEnv {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let sessions = SessionRepository::new(pool.clone());
    let outputs = StageOutputRepository::new(pool.clone());
    let orchestrator = Orchestrator::new(
        Arc::new(CodeParser::new()),
        stages,
        sessions.clone(),
        outputs.clone(),
        cache.clone(),
        EventBus::new(),
        config,
    );
    TestEnv {
        orchestrator,
        sessions,
        outputs,
        cache,
        pool,
    }
}

fn request(files: Vec<SourceFile>) -> AnalyzeRequest {
    AnalyzeRequest {
        session_id: None,
        subject_id: 7,
        files,
        stage_config: BTreeMap::new(),
        options: None,
    }
}

fn php_file() -> SourceFile {
    SourceFile::new(
        "app/Models/User.php",
        "<?php\nclass User {\n    public function save() {}\n}\n",
    )
}

async fn wait_terminal(orchestrator: &Orchestrator, id: Uuid) -> SessionView {
    for _ in 0..250 {
        if let Ok(view) = orchestrator.status(id).await {
            if view.status.is_terminal() {
                return view;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session {id} did not reach a terminal status");
}

#[tokio::test]
async fn test_output_present_exactly_for_completed_stages() {
    let env = env(
        vec![
            scripted("documenter", Behavior::Succeed),
            scripted("security_auditor", Behavior::Fail),
        ],
        OrchestratorConfig::default(),
    )
    .await;

    let id = env
        .orchestrator
        .start(request(vec![php_file()]))
        .await
        .unwrap();
    let view = wait_terminal(&env.orchestrator, id).await;

    assert_eq!(view.status, SessionStatus::Failed);
    let results = view.results.expect("terminal view exposes results");
    for name in ["documenter", "security_auditor"] {
        let completed = view.progress[name].status == StageStatus::Completed;
        assert_eq!(
            results.contains_key(name),
            completed,
            "output/progress mismatch for {name}"
        );
    }
    assert_eq!(view.progress["security_auditor"].status, StageStatus::Failed);
}

#[tokio::test]
async fn test_failed_stage_does_not_block_downstream() {
    let env = env(
        vec![
            scripted("first", Behavior::Fail),
            scripted("second", Behavior::Succeed),
        ],
        OrchestratorConfig::default(),
    )
    .await;

    let id = env
        .orchestrator
        .start(request(vec![php_file()]))
        .await
        .unwrap();
    let view = wait_terminal(&env.orchestrator, id).await;

    assert_eq!(view.status, SessionStatus::Failed);
    assert_eq!(view.progress["second"].status, StageStatus::Completed);
    assert!(view.results.unwrap().contains_key("second"));
    assert!(view
        .errors
        .iter()
        .any(|e| e.contains("synthetic stage failure")));
}

#[tokio::test]
async fn test_duplicate_start_rejected_and_first_untouched() {
    let env = env(
        vec![scripted("documenter", Behavior::Wedge)],
        OrchestratorConfig::default(),
    )
    .await;

    let id = Uuid::new_v4();
    let mut first = request(vec![php_file()]);
    first.session_id = Some(id);
    env.orchestrator.start(first.clone()).await.unwrap();

    // Give the driver a moment to mark the session running.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = env.orchestrator.start(first).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::DuplicateSession(dup) if dup == id));

    let view = env.orchestrator.status(id).await.unwrap();
    assert_eq!(view.source, ViewSource::Memory);
    assert_eq!(view.status, SessionStatus::Running);
}

#[tokio::test]
async fn test_memory_hit_never_reads_the_cache() {
    let counting = Arc::new(CountingCache::new());
    let env = env_with_cache(
        vec![scripted("documenter", Behavior::Wedge)],
        OrchestratorConfig::default(),
        counting.clone(),
    )
    .await;

    let id = env
        .orchestrator
        .start(request(vec![php_file()]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let view = env.orchestrator.status(id).await.unwrap();
    assert_eq!(view.source, ViewSource::Memory);
    assert_eq!(counting.gets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cache_tier_serves_once_memory_is_vacated() {
    let env = env(vec![], OrchestratorConfig::default()).await;

    // A session another process would have put in the shared cache.
    let id = Uuid::new_v4();
    let session = agentflow_core::Session::new(id, 7, vec![php_file()], BTreeMap::new());
    env.cache
        .set(
            &session_key(id),
            serde_json::to_value(&session).unwrap(),
            None,
        )
        .await
        .unwrap();

    let view = env.orchestrator.status(id).await.unwrap();
    assert_eq!(view.source, ViewSource::Cache);
    assert_eq!(view.status, SessionStatus::Created);
}

#[tokio::test]
async fn test_end_to_end_with_one_unparsable_file() {
    let env = env(
        vec![scripted("documenter", Behavior::Succeed)],
        OrchestratorConfig::default(),
    )
    .await;

    let id = env
        .orchestrator
        .start(request(vec![
            php_file(),
            SourceFile::new("notes.txt", "not source code"),
        ]))
        .await
        .unwrap();
    let view = wait_terminal(&env.orchestrator, id).await;

    // One parse warning, but the run still completes.
    assert_eq!(view.status, SessionStatus::Completed);
    assert_eq!(view.source, ViewSource::Store);
    assert_eq!(view.errors.len(), 1);
    assert!(view.errors[0].contains("parse_warning"));
    assert!(view.errors[0].contains("notes.txt"));

    let results = view.results.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results.contains_key("documenter"));

    let record = env.sessions.get_session(id).await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Completed);
    assert!(record.error_message.is_none());

    let stored = env.outputs.get_results(id).await.unwrap();
    assert!(stored["documenter"].success);
}

#[tokio::test]
async fn test_wedged_stage_hits_the_session_ceiling() {
    let config = OrchestratorConfig {
        session_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let env = env(vec![scripted("documenter", Behavior::Wedge)], config).await;

    let id = env
        .orchestrator
        .start(request(vec![php_file()]))
        .await
        .unwrap();
    let view = wait_terminal(&env.orchestrator, id).await;

    assert_eq!(view.status, SessionStatus::Failed);
    assert!(view.errors.iter().any(|e| e.contains("timeout")));

    let record = env.sessions.get_session(id).await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Failed);
    assert!(record.error_message.unwrap().contains("ceiling"));
}

#[tokio::test]
async fn test_ceiling_aborts_the_wedged_stage_task() {
    let config = OrchestratorConfig {
        session_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let dropped = Arc::new(AtomicBool::new(false));
    let stage: Arc<dyn Stage> = Arc::new(WedgedStage {
        descriptor: StageDescriptor::new("documenter", "documentation", true),
        dropped: dropped.clone(),
    });
    let env = env(vec![stage], config).await;

    let id = env
        .orchestrator
        .start(request(vec![php_file()]))
        .await
        .unwrap();
    let view = wait_terminal(&env.orchestrator, id).await;
    assert_eq!(view.status, SessionStatus::Failed);

    // The stage task must go down with the cancelled driver instead of
    // running on after the session is failed and retired.
    for _ in 0..100 {
        if dropped.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_store_outage_at_finalization_keeps_failed_view() {
    let env = env(
        vec![scripted("documenter", Behavior::Linger)],
        OrchestratorConfig::default(),
    )
    .await;

    let id = env
        .orchestrator
        .start(request(vec![php_file()]))
        .await
        .unwrap();

    // Take the store down while the stage is still running, so every
    // write from here on fails, including the terminal snapshot.
    tokio::time::sleep(Duration::from_millis(100)).await;
    env.pool.close().await;

    let view = wait_terminal(&env.orchestrator, id).await;
    assert_eq!(view.status, SessionStatus::Failed);
    assert!(view.errors.iter().any(|e| e.contains("storage_failure")));

    // With no durable record the session stays live and queryable.
    assert_eq!(view.source, ViewSource::Memory);
    assert_eq!(env.orchestrator.active_sessions().await, 1);
}

#[tokio::test]
async fn test_disabled_stage_is_skipped_without_output() {
    let env = env(
        vec![
            scripted("documenter", Behavior::Succeed),
            scripted("security_auditor", Behavior::Succeed),
        ],
        OrchestratorConfig::default(),
    )
    .await;

    let mut req = request(vec![php_file()]);
    req.stage_config.insert("security_auditor".to_string(), false);
    let id = env.orchestrator.start(req).await.unwrap();
    let view = wait_terminal(&env.orchestrator, id).await;

    assert_eq!(view.status, SessionStatus::Completed);
    assert_eq!(view.progress["security_auditor"].status, StageStatus::Skipped);
    let results = view.results.unwrap();
    assert!(results.contains_key("documenter"));
    assert!(!results.contains_key("security_auditor"));
}

#[tokio::test]
async fn test_empty_file_set_rejected() {
    let env = env(vec![], OrchestratorConfig::default()).await;
    let err = env.orchestrator.start(request(vec![])).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidInput(_)));
}

#[tokio::test]
async fn test_stages_status_reports_every_stage() {
    let env = env(
        vec![
            scripted("documenter", Behavior::Succeed),
            scripted("security_auditor", Behavior::Succeed),
        ],
        OrchestratorConfig::default(),
    )
    .await;

    let names: Vec<String> = env
        .orchestrator
        .stages_status()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["documenter", "security_auditor"]);
}
