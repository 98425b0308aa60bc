use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentflow_core::{
    ElementSet, StageDescriptor, StageMetadata, StageOptions, StageResult, StageSnapshot,
};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::llm::{ChatMessage, CompletionClient};
use crate::stats::StageStats;
use crate::{estimate_tokens, prompts, Stage};

const DEFAULT_MODEL: &str = "llama-3-70b";
const DEFAULT_TONE: &str = "professional";
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Documentation stage: turns the extracted element inventory into a
/// documentation report via one generative round trip.
pub struct DocumenterStage {
    descriptor: StageDescriptor,
    client: Arc<dyn CompletionClient>,
    call_timeout: Duration,
    stats: StageStats,
}

impl DocumenterStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self::with_timeout(client, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(client: Arc<dyn CompletionClient>, call_timeout: Duration) -> Self {
        Self {
            descriptor: StageDescriptor::new("documenter", "documentation", true),
            client,
            call_timeout,
            stats: StageStats::new(),
        }
    }
}

#[async_trait]
impl Stage for DocumenterStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(
        &self,
        parsed_elements: &BTreeMap<String, ElementSet>,
        subject_id: i64,
        options: &StageOptions,
    ) -> StageResult {
        let started = Instant::now();
        let model = options.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let tone = options.tone.as_deref().unwrap_or(DEFAULT_TONE);

        let total_elements: usize = parsed_elements.values().map(|e| e.len()).sum();
        let mut metadata = StageMetadata {
            model: Some(model.to_string()),
            tone: Some(tone.to_string()),
            ..Default::default()
        };

        // Nothing to document: an empty report is still a valid output.
        if total_elements == 0 {
            info!(subject_id, "No elements to document");
            metadata.processing_time_ms = started.elapsed().as_millis() as u64;
            self.stats.record_run();
            return StageResult::ok(
                json!({
                    "total_elements": 0,
                    "files": {},
                    "summary": "No documentable elements were found in the submitted files.",
                }),
                metadata,
            );
        }

        let prompt = prompts::documentation_request(parsed_elements);
        let messages = vec![
            ChatMessage::system(prompts::documenter_system(tone)),
            ChatMessage::user(prompt.clone()),
        ];

        let completion = tokio::time::timeout(
            self.call_timeout,
            self.client.complete(messages, model, Some(0.1), Some(6000)),
        )
        .await;

        metadata.processing_time_ms = started.elapsed().as_millis() as u64;
        self.stats.record_run();

        match completion {
            Ok(Ok(response)) => {
                metadata.estimated_tokens = Some(estimate_tokens(&prompt, &response));
                info!(subject_id, total_elements, "Documentation generated");

                let files: serde_json::Map<String, serde_json::Value> = parsed_elements
                    .iter()
                    .map(|(path, elements)| {
                        (path.clone(), json!({ "elements": elements.len() }))
                    })
                    .collect();

                StageResult::ok(
                    json!({
                        "total_elements": total_elements,
                        "files": files,
                        "summary": response,
                    }),
                    metadata,
                )
            }
            Ok(Err(e)) => {
                warn!(subject_id, error = %e, "Documentation completion failed");
                StageResult::failed(vec![e.to_string()], metadata)
            }
            Err(_) => {
                warn!(
                    subject_id,
                    timeout_secs = self.call_timeout.as_secs(),
                    "Documentation completion timed out"
                );
                StageResult::failed(
                    vec![format!(
                        "Completion timed out after {}s",
                        self.call_timeout.as_secs()
                    )],
                    metadata,
                )
            }
        }
    }

    fn snapshot(&self) -> StageSnapshot {
        self.stats.snapshot(&self.descriptor.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticClient;
    use agentflow_core::CodeElement;

    fn sample_elements() -> BTreeMap<String, ElementSet> {
        let mut parsed = BTreeMap::new();
        parsed.insert(
            "app/User.php".to_string(),
            ElementSet {
                classes: vec![CodeElement::new("User", 1)],
                methods: vec![CodeElement::new("save", 5)],
                ..Default::default()
            },
        );
        parsed
    }

    #[tokio::test]
    async fn test_successful_documentation() {
        let stage = DocumenterStage::new(Arc::new(StaticClient::ok("The User class persists.")));
        let result = stage
            .run(&sample_elements(), 1, &StageOptions::default())
            .await;

        assert!(result.success);
        assert_eq!(result.data["total_elements"], 2);
        assert_eq!(result.data["summary"], "The User class persists.");
        assert!(result.metadata.estimated_tokens.is_some());

        let snapshot = stage.snapshot();
        assert_eq!(snapshot.name, "documenter");
        assert_eq!(snapshot.total_runs, 1);
        assert!(snapshot.last_run.is_some());
    }

    #[tokio::test]
    async fn test_failure_becomes_failed_result() {
        let stage = DocumenterStage::new(Arc::new(StaticClient::failing("model unavailable")));
        let result = stage
            .run(&sample_elements(), 1, &StageOptions::default())
            .await;

        assert!(!result.success);
        assert!(result.errors[0].contains("model unavailable"));
        assert_eq!(stage.snapshot().total_runs, 1);
    }

    #[tokio::test]
    async fn test_empty_elements_skip_completion() {
        let client = Arc::new(StaticClient::ok("unused"));
        let stage = DocumenterStage::new(client.clone());
        let result = stage
            .run(&BTreeMap::new(), 1, &StageOptions::default())
            .await;

        assert!(result.success);
        assert_eq!(result.data["total_elements"], 0);
        assert_eq!(client.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_options_override_model_and_tone() {
        let stage = DocumenterStage::new(Arc::new(StaticClient::ok("ok")));
        let options = StageOptions {
            model: Some("mistral-large".to_string()),
            tone: Some("friendly".to_string()),
        };
        let result = stage.run(&sample_elements(), 1, &options).await;

        assert_eq!(result.metadata.model.as_deref(), Some("mistral-large"));
        assert_eq!(result.metadata.tone.as_deref(), Some("friendly"));
    }
}
