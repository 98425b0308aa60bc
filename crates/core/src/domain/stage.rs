use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Static registration metadata for a pluggable analysis stage.
///
/// Defined once when the orchestrator is constructed and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StageDescriptor {
    /// Stage name, also the key for `stage_config`, `progress` and
    /// `stage_outputs`.
    pub name: String,
    /// Kind of output the stage produces, used when persisting
    /// (e.g. "documentation", "security_report").
    pub output_kind: String,
    /// Whether the stage runs when `stage_config` does not mention it.
    pub default_enabled: bool,
}

impl StageDescriptor {
    pub fn new(
        name: impl Into<String>,
        output_kind: impl Into<String>,
        default_enabled: bool,
    ) -> Self {
        Self {
            name: name.into(),
            output_kind: output_kind.into(),
            default_enabled,
        }
    }
}

/// Execution metadata attached to every stage result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<u64>,
}

/// Result of one stage invocation.
///
/// A stage reports internal failure through `success = false` and a
/// populated error list instead of returning an error to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StageResult {
    pub success: bool,
    /// Stage-defined payload.
    pub data: serde_json::Value,
    pub metadata: StageMetadata,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl StageResult {
    pub fn ok(data: serde_json::Value, metadata: StageMetadata) -> Self {
        Self {
            success: true,
            data,
            metadata,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>, metadata: StageMetadata) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            metadata,
            errors,
        }
    }
}

/// Per-run overrides passed to a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

/// Read-only operational snapshot of a stage, for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StageSnapshot {
    pub name: String,
    pub enabled: bool,
    pub total_runs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_result_constructors() {
        let ok = StageResult::ok(serde_json::json!({"elements": 3}), StageMetadata::default());
        assert!(ok.success);
        assert!(ok.errors.is_empty());

        let failed = StageResult::failed(vec!["llm timeout".to_string()], StageMetadata::default());
        assert!(!failed.success);
        assert_eq!(failed.errors.len(), 1);
        assert!(failed.data.is_null());
    }

    #[test]
    fn test_stage_result_serialization() {
        let result = StageResult::ok(
            serde_json::json!({"summary": "ok"}),
            StageMetadata {
                model: Some("llama-3-70b".to_string()),
                tone: Some("professional".to_string()),
                processing_time_ms: 120,
                estimated_tokens: Some(800),
            },
        );

        let json = serde_json::to_string(&result).unwrap();
        let back: StageResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
