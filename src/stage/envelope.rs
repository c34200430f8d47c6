use super::{StageKind, StagePayload};
use crate::errors::StageError;
use serde_json::Value;
use std::collections::BTreeMap;

/// What a stage computed, before it is wrapped for the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Ok(StagePayload),
    /// A usable default or heuristic result standing in for the real one.
    Degraded { payload: StagePayload, reason: String },
    Fatal(StageError),
}

/// Uniform result of one stage call.
///
/// When `success` is false, `data` is `None` and `error` says why.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub success: bool,
    pub data: Option<StagePayload>,
    pub message: String,
    pub error: Option<StageError>,
    pub metadata: BTreeMap<String, Value>,
}

impl Envelope {
    /// The only conversion from a stage outcome to an envelope.
    pub fn from_outcome(stage: StageKind, outcome: StageOutcome) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("stage".to_string(), Value::from(stage.as_str()));

        match outcome {
            StageOutcome::Ok(payload) => {
                metadata.insert("degraded".to_string(), Value::Bool(false));
                Self {
                    success: true,
                    data: Some(payload),
                    message: format!("{} completed", stage),
                    error: None,
                    metadata,
                }
            }
            StageOutcome::Degraded { payload, reason } => {
                metadata.insert("degraded".to_string(), Value::Bool(true));
                metadata.insert("degraded_reason".to_string(), Value::from(reason.clone()));
                Self {
                    success: true,
                    data: Some(payload),
                    message: format!("{} degraded: {}", stage, reason),
                    error: None,
                    metadata,
                }
            }
            StageOutcome::Fatal(err) => {
                metadata.insert("degraded".to_string(), Value::Bool(false));
                Self {
                    success: false,
                    data: None,
                    message: err.to_string(),
                    error: Some(err),
                    metadata,
                }
            }
        }
    }

    /// Unsuccessful envelope for a request the stage cannot handle.
    pub fn rejected(stage: StageKind, reason: impl Into<String>) -> Self {
        Self::from_outcome(
            stage,
            StageOutcome::Fatal(StageError::InvalidInput {
                stage,
                reason: reason.into(),
            }),
        )
    }

    pub fn failed(err: StageError) -> Self {
        Self::from_outcome(err.stage(), StageOutcome::Fatal(err))
    }

    pub fn is_degraded(&self) -> bool {
        self.metadata
            .get("degraded")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        self.metadata.get("degraded_reason").and_then(Value::as_str)
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.metadata
            .insert("duration_ms".to_string(), Value::from(duration_ms));
        self
    }

    /// The payload of a successful envelope.
    pub fn into_payload(self) -> Option<StagePayload> {
        if self.success { self.data } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_outcome() {
        let env = Envelope::from_outcome(
            StageKind::ContentGenerator,
            StageOutcome::Ok(StagePayload::Chapter("话说".to_string())),
        );
        assert!(env.success);
        assert!(!env.is_degraded());
        assert_eq!(env.metadata["stage"], "content_generator");
        assert_eq!(env.into_payload().and_then(StagePayload::into_chapter).as_deref(), Some("话说"));
    }

    #[test]
    fn test_degraded_outcome_is_success_with_flag() {
        let env = Envelope::from_outcome(
            StageKind::StrategyPlanner,
            StageOutcome::Degraded {
                payload: StagePayload::Chapter(String::new()),
                reason: "malformed JSON".to_string(),
            },
        );
        assert!(env.success);
        assert!(env.is_degraded());
        assert_eq!(env.degraded_reason(), Some("malformed JSON"));
        assert!(env.error.is_none());
    }

    #[test]
    fn test_fatal_outcome_drops_data() {
        let env = Envelope::failed(StageError::Timeout {
            stage: StageKind::QualityChecker,
            after_ms: 5,
        });
        assert!(!env.success);
        assert!(env.data.is_none());
        assert_eq!(env.metadata["stage"], "quality_checker");
        assert!(env.into_payload().is_none());
    }

    #[test]
    fn test_unsuccessful_envelope_hides_stray_data() {
        let mut env = Envelope::rejected(StageKind::DataAnalyzer, "empty ending");
        env.data = Some(StagePayload::Chapter("stray".to_string()));
        assert!(env.into_payload().is_none());
    }

    #[test]
    fn test_duration_metadata() {
        let env = Envelope::rejected(StageKind::DataAnalyzer, "x").with_duration_ms(42);
        assert_eq!(env.metadata["duration_ms"], 42);
        assert!(matches!(env.error, Some(StageError::InvalidInput { .. })));
    }
}
