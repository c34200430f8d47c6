//! Typed error hierarchy for the continuation pipeline.
//!
//! Four enums cover the layers of the engine:
//! - `PipelineError`: the only errors that escape `Orchestrator::run`
//! - `StageError`: per-stage failures, always absorbed into a degraded payload
//! - `InferenceError`: failures at the model boundary, converted by stages
//! - `ContextError`: shared context invariant violations

use crate::stage::StageKind;
use thiserror::Error;

/// Errors that abort a run or prevent an orchestrator from being built.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No stage unit registered for {0}")]
    MissingStage(StageKind),
}

/// Non-fatal failures reported by (or on behalf of) a single stage.
#[derive(Debug, Error, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StageError {
    #[error("{stage} timed out after {after_ms} ms")]
    Timeout { stage: StageKind, after_ms: u64 },

    #[error("{stage} returned malformed output: {reason}")]
    MalformedOutput { stage: StageKind, reason: String },

    #[error("{stage} is unavailable: {reason}")]
    Unavailable { stage: StageKind, reason: String },

    #[error("{stage} rejected its input: {reason}")]
    InvalidInput { stage: StageKind, reason: String },
}

impl StageError {
    /// The stage this error belongs to.
    pub fn stage(&self) -> StageKind {
        match self {
            StageError::Timeout { stage, .. }
            | StageError::MalformedOutput { stage, .. }
            | StageError::Unavailable { stage, .. }
            | StageError::InvalidInput { stage, .. } => *stage,
        }
    }

    /// Wrap an inference failure as a stage failure.
    pub fn from_inference(stage: StageKind, err: &InferenceError) -> Self {
        match err {
            InferenceError::Timeout { after_ms } => StageError::Timeout {
                stage,
                after_ms: *after_ms,
            },
            InferenceError::Malformed(reason) => StageError::MalformedOutput {
                stage,
                reason: reason.clone(),
            },
            other => StageError::Unavailable {
                stage,
                reason: other.to_string(),
            },
        }
    }
}

/// Failures at the language-model boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Inference timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("Inference rate limited")]
    RateLimited,

    #[error("Inference returned malformed output: {0}")]
    Malformed(String),

    #[error("Inference backend unavailable: {0}")]
    Unavailable(String),

    #[error("Inference backend returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
}

impl InferenceError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::Timeout { .. }
            | InferenceError::RateLimited
            | InferenceError::Unavailable(_) => true,
            InferenceError::Status { code, .. } => *code >= 500,
            InferenceError::Malformed(_) => false,
        }
    }
}

/// Violations of the append-only shared context.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContextError {
    #[error("Context key {0} is already set")]
    KeyExists(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_message() {
        let err = PipelineError::InvalidRequest("desired ending is empty".to_string());
        assert_eq!(err.to_string(), "Invalid request: desired ending is empty");
    }

    #[test]
    fn test_stage_error_carries_stage() {
        let err = StageError::Timeout {
            stage: StageKind::ChapterPlanner,
            after_ms: 1500,
        };
        assert_eq!(err.stage(), StageKind::ChapterPlanner);
        assert!(err.to_string().contains("1500"));
    }

    #[test]
    fn test_from_inference_maps_timeout() {
        let err = StageError::from_inference(
            StageKind::DataAnalyzer,
            &InferenceError::Timeout { after_ms: 10 },
        );
        match err {
            StageError::Timeout { stage, after_ms } => {
                assert_eq!(stage, StageKind::DataAnalyzer);
                assert_eq!(after_ms, 10);
            }
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_from_inference_maps_rate_limit_to_unavailable() {
        let err = StageError::from_inference(StageKind::QualityChecker, &InferenceError::RateLimited);
        assert!(matches!(err, StageError::Unavailable { .. }));
    }

    #[test]
    fn test_from_inference_maps_malformed() {
        let err = StageError::from_inference(
            StageKind::StrategyPlanner,
            &InferenceError::Malformed("no choices".to_string()),
        );
        assert!(matches!(err, StageError::MalformedOutput { .. }));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(InferenceError::RateLimited.is_retryable());
        assert!(InferenceError::Timeout { after_ms: 1 }.is_retryable());
        assert!(
            InferenceError::Status {
                code: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !InferenceError::Status {
                code: 401,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!InferenceError::Malformed("x".to_string()).is_retryable());
    }

    #[test]
    fn test_stage_error_serializes_with_kind_tag() {
        let err = StageError::Unavailable {
            stage: StageKind::ContentGenerator,
            reason: "offline".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "unavailable");
        assert_eq!(json["stage"], "content_generator");
    }
}
