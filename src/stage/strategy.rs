use super::json::parse_object;
use super::{Envelope, StageKind, StageOutcome, StagePayload, StageRequest, StageUnit, wrong_request};
use crate::errors::StageError;
use crate::inference::{InferenceClient, InferenceOptions};
use crate::model::{Compatibility, Strategy};
use async_trait::async_trait;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a literary strategist planning the continuation of a classical novel. \
Answer with JSON only.";

/// Sets the overall approach for reaching the desired ending.
///
/// The compatibility check is deterministic and always recorded, whatever the
/// model says.
pub struct StrategyPlanner {
    client: Arc<dyn InferenceClient>,
    options: InferenceOptions,
}

impl StrategyPlanner {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self {
            client,
            options: InferenceOptions::for_stage(StageKind::StrategyPlanner),
        }
    }

    async fn plan(&self, desired_ending: &str, chapter_count: u32, start_chapter: u32) -> StageOutcome {
        let compatibility = Compatibility::assess(desired_ending);
        if !compatibility.compatible {
            tracing::warn!(
                score = compatibility.score,
                "Desired ending conflicts with established characters"
            );
        }

        let prompt = format!(
            "Desired ending: {}\nChapters: {} starting at chapter {}\n\
             Ending compatibility score: {:.2} ({})\n\n\
             Return JSON with keys: overall_approach, narrative_style, key_themes [], \
             emotional_arc [], character_arcs {{name: [steps]}}.",
            desired_ending,
            chapter_count,
            start_chapter,
            compatibility.score,
            compatibility.notes.join("; ")
        );

        let (strategy, degraded_reason) =
            match self.client.invoke(SYSTEM_PROMPT, &prompt, &self.options).await {
                Ok(output) => match parse_object::<Strategy>(&output).and_then(|strategy| {
                    if strategy.overall_approach.trim().is_empty() {
                        Err("overall approach is empty".to_string())
                    } else {
                        Ok(strategy)
                    }
                }) {
                    Ok(strategy) => (strategy, None),
                    Err(reason) => (
                        Strategy::fallback(desired_ending),
                        Some(
                            StageError::MalformedOutput {
                                stage: StageKind::StrategyPlanner,
                                reason,
                            }
                            .to_string(),
                        ),
                    ),
                },
                Err(err) => (
                    Strategy::fallback(desired_ending),
                    Some(StageError::from_inference(StageKind::StrategyPlanner, &err).to_string()),
                ),
            };

        let payload = StagePayload::Strategy(Strategy {
            compatibility,
            ..strategy
        });
        match degraded_reason {
            None => StageOutcome::Ok(payload),
            Some(reason) => StageOutcome::Degraded { payload, reason },
        }
    }
}

#[async_trait]
impl StageUnit for StrategyPlanner {
    fn kind(&self) -> StageKind {
        StageKind::StrategyPlanner
    }

    async fn process(&self, request: StageRequest) -> Envelope {
        let StageRequest::Strategize(ref req) = request else {
            return wrong_request(self.kind(), &request);
        };
        if req.desired_ending.trim().is_empty() {
            return Envelope::rejected(self.kind(), "desired ending is empty");
        }
        if req.chapter_count == 0 {
            return Envelope::rejected(self.kind(), "chapter count is zero");
        }
        let outcome = self
            .plan(req.desired_ending.trim(), req.chapter_count, req.start_chapter)
            .await;
        Envelope::from_outcome(self.kind(), outcome)
    }
}
