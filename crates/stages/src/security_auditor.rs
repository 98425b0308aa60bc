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

/// Element names that warrant a closer look during the audit.
const RISKY_NAMES: &[(&str, &str)] = &[
    ("eval", "dynamic code evaluation"),
    ("exec", "command execution"),
    ("system", "command execution"),
    ("shell", "command execution"),
    ("query", "possible raw SQL"),
    ("unserialize", "unsafe deserialization"),
    ("deserialize", "unsafe deserialization"),
    ("password", "credential handling"),
    ("secret", "credential handling"),
    ("token", "credential handling"),
];

/// Static-analysis-style stage: a heuristic scan over element names plus
/// a generative audit summary of the findings.
pub struct SecurityAuditorStage {
    descriptor: StageDescriptor,
    client: Arc<dyn CompletionClient>,
    call_timeout: Duration,
    stats: StageStats,
}

impl SecurityAuditorStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self::with_timeout(client, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(client: Arc<dyn CompletionClient>, call_timeout: Duration) -> Self {
        Self {
            descriptor: StageDescriptor::new("security_auditor", "security_report", true),
            client,
            call_timeout,
            stats: StageStats::new(),
        }
    }

    fn scan(parsed_elements: &BTreeMap<String, ElementSet>) -> Vec<serde_json::Value> {
        let mut findings = Vec::new();
        for (path, elements) in parsed_elements {
            let named = elements
                .functions
                .iter()
                .chain(elements.methods.iter())
                .chain(elements.classes.iter());
            for element in named {
                let lowered = element.name.to_lowercase();
                for (needle, reason) in RISKY_NAMES {
                    if lowered.contains(needle) {
                        findings.push(json!({
                            "file": path,
                            "element": element.name,
                            "line": element.line,
                            "reason": reason,
                        }));
                        break;
                    }
                }
            }
        }
        findings
    }

    fn risk_level(finding_count: usize) -> &'static str {
        match finding_count {
            0 => "low",
            1..=3 => "medium",
            _ => "high",
        }
    }
}

#[async_trait]
impl Stage for SecurityAuditorStage {
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

        let mut metadata = StageMetadata {
            model: Some(model.to_string()),
            tone: Some(tone.to_string()),
            ..Default::default()
        };

        let findings = Self::scan(parsed_elements);

        if parsed_elements.values().all(|e| e.is_empty()) {
            metadata.processing_time_ms = started.elapsed().as_millis() as u64;
            self.stats.record_run();
            return StageResult::ok(
                json!({
                    "findings": [],
                    "risk_level": "low",
                    "summary": "No auditable elements were found in the submitted files.",
                }),
                metadata,
            );
        }

        let finding_lines: Vec<String> = findings
            .iter()
            .map(|f| {
                format!(
                    "{} in {} (line {}): {}",
                    f["element"].as_str().unwrap_or_default(),
                    f["file"].as_str().unwrap_or_default(),
                    f["line"],
                    f["reason"].as_str().unwrap_or_default(),
                )
            })
            .collect();

        let prompt = prompts::audit_request(parsed_elements, &finding_lines);
        let messages = vec![
            ChatMessage::system(prompts::auditor_system(tone)),
            ChatMessage::user(prompt.clone()),
        ];

        let completion = tokio::time::timeout(
            self.call_timeout,
            self.client.complete(messages, model, Some(0.1), Some(4000)),
        )
        .await;

        metadata.processing_time_ms = started.elapsed().as_millis() as u64;
        self.stats.record_run();

        match completion {
            Ok(Ok(response)) => {
                metadata.estimated_tokens = Some(estimate_tokens(&prompt, &response));
                info!(
                    subject_id,
                    findings = findings.len(),
                    "Security audit completed"
                );
                let risk_level = Self::risk_level(findings.len());
                StageResult::ok(
                    json!({
                        "findings": findings,
                        "risk_level": risk_level,
                        "summary": response,
                    }),
                    metadata,
                )
            }
            Ok(Err(e)) => {
                warn!(subject_id, error = %e, "Audit completion failed");
                StageResult::failed(vec![e.to_string()], metadata)
            }
            Err(_) => {
                warn!(
                    subject_id,
                    timeout_secs = self.call_timeout.as_secs(),
                    "Audit completion timed out"
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

    fn risky_elements() -> BTreeMap<String, ElementSet> {
        let mut parsed = BTreeMap::new();
        parsed.insert(
            "app/Shell.php".to_string(),
            ElementSet {
                classes: vec![CodeElement::new("Shell", 1)],
                methods: vec![
                    CodeElement::new("execCommand", 4),
                    CodeElement::new("storePassword", 9),
                ],
                functions: vec![CodeElement::new("renderView", 20)],
                ..Default::default()
            },
        );
        parsed
    }

    #[tokio::test]
    async fn test_scan_flags_risky_names() {
        let stage = SecurityAuditorStage::new(Arc::new(StaticClient::ok("Audit summary.")));
        let result = stage
            .run(&risky_elements(), 1, &StageOptions::default())
            .await;

        assert!(result.success);
        let findings = result.data["findings"].as_array().unwrap();
        // Shell class, execCommand and storePassword match; renderView does not.
        assert_eq!(findings.len(), 3);
        assert_eq!(result.data["risk_level"], "medium");
        assert_eq!(result.data["summary"], "Audit summary.");
    }

    #[tokio::test]
    async fn test_no_elements_short_circuits() {
        let client = Arc::new(StaticClient::ok("unused"));
        let stage = SecurityAuditorStage::new(client.clone());
        let mut parsed = BTreeMap::new();
        parsed.insert("a.php".to_string(), ElementSet::default());

        let result = stage.run(&parsed, 1, &StageOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.data["risk_level"], "low");
        assert_eq!(client.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_completion_failure() {
        let stage = SecurityAuditorStage::new(Arc::new(StaticClient::failing("upstream down")));
        let result = stage
            .run(&risky_elements(), 1, &StageOptions::default())
            .await;

        assert!(!result.success);
        assert!(result.errors[0].contains("upstream down"));
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(SecurityAuditorStage::risk_level(0), "low");
        assert_eq!(SecurityAuditorStage::risk_level(2), "medium");
        assert_eq!(SecurityAuditorStage::risk_level(7), "high");
    }
}
