use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use agentflow_core::StageSnapshot;
use chrono::{DateTime, Utc};

/// Operational counters shared by all stage implementations.
///
/// Mutated only by the owning stage, after each invocation completes
/// (success or failure).
#[derive(Debug, Default)]
pub struct StageStats {
    enabled: AtomicBool,
    total_runs: AtomicU64,
    last_run: RwLock<Option<DateTime<Utc>>>,
}

impl StageStats {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            total_runs: AtomicU64::new(0),
            last_run: RwLock::new(None),
        }
    }

    pub fn record_run(&self) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_run.write() {
            *last = Some(Utc::now());
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn snapshot(&self, name: &str) -> StageSnapshot {
        StageSnapshot {
            name: name.to_string(),
            enabled: self.enabled.load(Ordering::Relaxed),
            total_runs: self.total_runs.load(Ordering::Relaxed),
            last_run: self.last_run.read().ok().and_then(|l| *l),
        }
    }
}
