use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::CoreError;
use crate::{ElementSet, SourceFile, StageResult};

/// Overall session status. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Created,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Failed => 2,
        }
    }
}

/// Per-stage progress marker. Advances monotonically for a given stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Skipped | Self::Failed => 2,
        }
    }
}

/// Small status record kept per stage in `Session::progress`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StageProgress {
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Error taxonomy for session errors. Parse warnings are the only
/// non-fatal kind: they are recorded but never fail the run on their own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseWarning,
    StageFailure,
    StorageFailure,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseWarning => "parse_warning",
            Self::StageFailure => "stage_failure",
            Self::StorageFailure => "storage_failure",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ParseWarning)
    }
}

/// One recorded failure description. The `errors` sequence is append-only
/// and never cleared during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

/// The unit of work: one tracked run of the analysis pipeline over a
/// fixed set of input files.
///
/// The registry owns a session's lifetime; the pipeline driver borrows it
/// for one run. Mutation goes through the helpers below so the invariants
/// hold: stage outputs are write-once, progress only advances, `errors`
/// only grows and `status` never moves backward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub subject_id: i64,
    pub input_files: Vec<SourceFile>,
    /// Stage name -> enabled. Empty means "all enabled".
    #[serde(default)]
    pub stage_config: BTreeMap<String, bool>,
    /// File path -> parser output. Written once by the parsing stage.
    #[serde(default)]
    pub parsed_elements: BTreeMap<String, ElementSet>,
    /// Stage name -> result. Each entry written exactly once.
    #[serde(default)]
    pub stage_outputs: BTreeMap<String, StageResult>,
    #[serde(default)]
    pub errors: Vec<SessionError>,
    #[serde(default)]
    pub progress: BTreeMap<String, StageProgress>,
    pub status: SessionStatus,
    /// Name of the most recently driven stage. Observability only, never
    /// consulted for control flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stage: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: Uuid,
        subject_id: i64,
        input_files: Vec<SourceFile>,
        stage_config: BTreeMap<String, bool>,
    ) -> Self {
        Self {
            id,
            subject_id,
            input_files,
            stage_config,
            parsed_elements: BTreeMap::new(),
            stage_outputs: BTreeMap::new(),
            errors: Vec::new(),
            progress: BTreeMap::new(),
            status: SessionStatus::Created,
            last_stage: None,
            created_at: Utc::now(),
        }
    }

    /// Whether a stage is enabled for this session. An empty config or a
    /// missing entry means enabled.
    pub fn stage_enabled(&self, name: &str) -> bool {
        self.stage_config.get(name).copied().unwrap_or(true)
    }

    pub fn push_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.errors.push(SessionError::new(kind, message));
    }

    pub fn has_fatal_errors(&self) -> bool {
        self.errors.iter().any(|e| e.kind.is_fatal())
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }

    /// Advance a stage's progress marker. Backward moves are ignored so
    /// progress stays monotonic.
    pub fn advance_stage(&mut self, name: &str, status: StageStatus) {
        let entry = self.progress.entry(name.to_string()).or_default();
        if status.rank() < entry.status.rank() {
            return;
        }
        if status == StageStatus::Running && entry.started_at.is_none() {
            entry.started_at = Some(Utc::now());
        }
        if status.is_terminal() && entry.completed_at.is_none() {
            entry.completed_at = Some(Utc::now());
        }
        entry.status = status;
        self.last_stage = Some(name.to_string());
    }

    /// Record a successful stage output and mark the stage completed in
    /// the same step, so an output is observable iff its progress marker
    /// reads `completed`. Refuses to overwrite an existing output.
    pub fn record_stage_output(
        &mut self,
        name: &str,
        result: StageResult,
    ) -> Result<(), CoreError> {
        if self.stage_outputs.contains_key(name) {
            return Err(CoreError::StageOutputExists(name.to_string()));
        }
        self.stage_outputs.insert(name.to_string(), result);
        self.advance_stage(name, StageStatus::Completed);
        Ok(())
    }

    /// Record a failed stage invocation: progress goes to `failed`, every
    /// stage error lands in the session error list, and no output entry
    /// is created.
    pub fn record_stage_failure(&mut self, name: &str, errors: &[String]) {
        if errors.is_empty() {
            self.push_error(ErrorKind::StageFailure, format!("Stage {name} failed"));
        } else {
            for err in errors {
                self.push_error(ErrorKind::StageFailure, format!("Stage {name} failed: {err}"));
            }
        }
        self.advance_stage(name, StageStatus::Failed);
    }

    fn transition(&mut self, to: SessionStatus) -> Result<(), CoreError> {
        if to.rank() < self.status.rank() || (self.status.is_terminal() && to != self.status) {
            return Err(CoreError::InvalidStatusTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), CoreError> {
        self.transition(SessionStatus::Running)
    }

    pub fn mark_completed(&mut self) -> Result<(), CoreError> {
        self.transition(SessionStatus::Completed)
    }

    pub fn mark_failed(&mut self) -> Result<(), CoreError> {
        self.transition(SessionStatus::Failed)
    }
}

/// Where a status lookup was answered from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ViewSource {
    Memory,
    Cache,
    Store,
}

/// Transport view of a session, served by status queries from any of the
/// three lookup tiers. Always well-formed, even for failed sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SessionView {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub source: ViewSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_stage: Option<String>,
    #[serde(default)]
    pub progress: BTreeMap<String, StageProgress>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<BTreeMap<String, StageResult>>,
}

impl SessionView {
    /// Build a view directly from live (or cached) session state. Results
    /// are only exposed once the session reached a terminal status.
    pub fn from_session(session: &Session, source: ViewSource) -> Self {
        let results = if session.status.is_terminal() {
            Some(session.stage_outputs.clone())
        } else {
            None
        };
        Self {
            session_id: session.id,
            status: session.status,
            source,
            last_stage: session.last_stage.clone(),
            progress: session.progress.clone(),
            errors: session.error_messages(),
            results,
        }
    }
}
