//! Boundary to the language model.
//!
//! Stages never talk to a model directly; they go through an
//! [`InferenceClient`], which makes them testable with scripted doubles.

pub mod http;

pub use http::ChatCompletionsClient;

use crate::errors::InferenceError;
use crate::stage::StageKind;
use async_trait::async_trait;

/// Per-call sampling options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceOptions {
    /// Stage issuing the call; used for logging and by test doubles for routing.
    pub stage: StageKind,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl InferenceOptions {
    /// Defaults per stage: analytic stages sample cold, the writer warm.
    pub fn for_stage(stage: StageKind) -> Self {
        let (temperature, max_tokens) = match stage {
            StageKind::DataAnalyzer => (0.3, 4000),
            StageKind::StrategyPlanner => (0.7, 4000),
            StageKind::ChapterPlanner => (0.7, 6000),
            StageKind::ContentGenerator => (0.8, 8000),
            StageKind::QualityChecker => (0.3, 2000),
        };
        Self {
            stage,
            temperature,
            max_tokens,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A text-completion backend.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &InferenceOptions,
    ) -> Result<String, InferenceError>;
}

/// Client used when no model is configured. Every call is `Unavailable`,
/// which drives every stage down its deterministic fallback path.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineClient;

#[async_trait]
impl InferenceClient for OfflineClient {
    async fn invoke(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        options: &InferenceOptions,
    ) -> Result<String, InferenceError> {
        Err(InferenceError::Unavailable(format!(
            "offline mode, no model for {}",
            options.stage
        )))
    }
}
