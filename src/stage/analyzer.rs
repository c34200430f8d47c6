use super::json::parse_object;
use super::{Envelope, StageKind, StageOutcome, StagePayload, StageRequest, StageUnit, wrong_request};
use crate::errors::StageError;
use crate::inference::{InferenceClient, InferenceOptions};
use crate::model::{KnowledgeBase, TextStatistics};
use async_trait::async_trait;
use std::sync::Arc;

/// Source characters sent to the model.
const EXCERPT_CHARS: usize = 6000;

const SYSTEM_PROMPT: &str = "You are a scholar of classical Chinese fiction. \
Extract structured knowledge from the source text and answer with JSON only.";

/// Extracts characters, relationships, themes and plotlines from the source.
pub struct DataAnalyzer {
    client: Arc<dyn InferenceClient>,
    source: Option<String>,
    options: InferenceOptions,
}

impl DataAnalyzer {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self {
            client,
            source: None,
            options: InferenceOptions::for_stage(StageKind::DataAnalyzer),
        }
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source.filter(|s| !s.trim().is_empty());
        self
    }

    fn user_prompt(&self, desired_ending: &str) -> String {
        let excerpt = match self.source {
            Some(ref text) => text.chars().take(EXCERPT_CHARS).collect::<String>(),
            None => "(no source text supplied; rely on your knowledge of the novel)".to_string(),
        };
        format!(
            "Source excerpt:\n{}\n\nThe continuation should end with: {}\n\n\
             Return JSON with keys: characters [{{name, description, traits}}], \
             relationships [{{from, to, kind}}], themes [], plotlines [].",
            excerpt, desired_ending
        )
    }

    fn fallback(&self) -> KnowledgeBase {
        KnowledgeBase::fallback(self.source.as_deref())
    }

    async fn analyze(&self, desired_ending: &str) -> StageOutcome {
        let prompt = self.user_prompt(desired_ending);
        let output = match self.client.invoke(SYSTEM_PROMPT, &prompt, &self.options).await {
            Ok(output) => output,
            Err(err) => {
                return StageOutcome::Degraded {
                    payload: StagePayload::Knowledge(self.fallback()),
                    reason: StageError::from_inference(self.kind(), &err).to_string(),
                };
            }
        };

        let parsed = parse_object::<KnowledgeBase>(&output).and_then(|knowledge| {
            if knowledge.characters.is_empty() {
                Err("no characters extracted".to_string())
            } else {
                Ok(knowledge)
            }
        });
        match parsed {
            Ok(mut knowledge) => {
                if knowledge.text_statistics.is_none() {
                    knowledge.text_statistics = self.source.as_deref().map(TextStatistics::of);
                }
                StageOutcome::Ok(StagePayload::Knowledge(knowledge))
            }
            Err(reason) => StageOutcome::Degraded {
                payload: StagePayload::Knowledge(self.fallback()),
                reason: StageError::MalformedOutput {
                    stage: self.kind(),
                    reason,
                }
                .to_string(),
            },
        }
    }
}

#[async_trait]
impl StageUnit for DataAnalyzer {
    fn kind(&self) -> StageKind {
        StageKind::DataAnalyzer
    }

    async fn process(&self, request: StageRequest) -> Envelope {
        let StageRequest::Analyze(ref req) = request else {
            return wrong_request(self.kind(), &request);
        };
        if req.desired_ending.trim().is_empty() {
            return Envelope::rejected(self.kind(), "desired ending is empty");
        }
        Envelope::from_outcome(self.kind(), self.analyze(&req.desired_ending).await)
    }
}
