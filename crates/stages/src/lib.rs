//! Pluggable analysis stages.
//!
//! Every stage satisfies the [`Stage`] contract: a pure function from
//! parsed elements to a [`StageResult`], with declared metadata and
//! operational counters. A stage never propagates a fault to the
//! pipeline driver; internal failures come back as a result with
//! `success = false`.

pub mod llm;
mod prompts;
mod stats;

mod documenter;
mod security_auditor;

pub use documenter::DocumenterStage;
pub use security_auditor::SecurityAuditorStage;
pub use stats::StageStats;

use std::collections::BTreeMap;

use agentflow_core::{ElementSet, StageDescriptor, StageOptions, StageResult, StageSnapshot};
use async_trait::async_trait;

/// Contract every pluggable analysis stage implements.
///
/// The pipeline driver invokes stages uniformly through this trait and
/// never needs to know what a stage does internally. Implementations
/// must bound their own external calls with a timeout; the orchestrator
/// only enforces the whole-session ceiling.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Static registration metadata: name, output kind, default enablement.
    fn descriptor(&self) -> &StageDescriptor;

    /// Run the analysis. Must not return an error: failures are reported
    /// through `StageResult { success: false, .. }`.
    async fn run(
        &self,
        parsed_elements: &BTreeMap<String, ElementSet>,
        subject_id: i64,
        options: &StageOptions,
    ) -> StageResult;

    /// Read-only operational snapshot (enabled flag plus counters).
    /// Counters are bumped by the stage itself after each invocation.
    fn snapshot(&self) -> StageSnapshot;
}

/// Rough token estimate used in stage metadata: one token per four
/// characters of prompt plus response.
pub(crate) fn estimate_tokens(prompt: &str, response: &str) -> u64 {
    ((prompt.len() + response.len()) / 4) as u64
}
