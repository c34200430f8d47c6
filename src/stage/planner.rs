use super::json::parse_value;
use super::{
    Envelope, PlanOutput, PlanRequest, StageKind, StageOutcome, StagePayload, StageRequest,
    StageUnit, wrong_request,
};
use crate::errors::StageError;
use crate::inference::{InferenceClient, InferenceOptions};
use crate::model::{ChapterPlan, ChapterPlanEntry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are planning chapters of a classical Chinese novel. \
Each chapter has a two-line title. Answer with JSON only.";

/// Produces the per-chapter outline.
pub struct ChapterPlanner {
    client: Arc<dyn InferenceClient>,
    options: InferenceOptions,
}

impl ChapterPlanner {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self {
            client,
            options: InferenceOptions::for_stage(StageKind::ChapterPlanner),
        }
    }

    fn user_prompt(req: &PlanRequest) -> String {
        let characters = req.knowledge.character_names().join(", ");
        format!(
            "Plan chapters {}-{} ({} chapters) ending with: {}\n\
             Strategy: {}\nThemes: {}\nKnown characters: {}\n\n\
             Return JSON {{\"chapters\": [{{chapter_number, title {{first_part, second_part}}, \
             narrative_phase (setup|development|climax|resolution), \
             main_characters [{{name, importance (primary|secondary|minor), emotional_arc}}], \
             plot_points [{{sequence, event, location, participants}}], \
             literary_elements {{poetry_count, symbolism, foreshadowing}}, \
             connections {{previous, next}}}}]}}",
            req.start_chapter,
            req.start_chapter.saturating_add(req.chapter_count.saturating_sub(1)),
            req.chapter_count,
            req.desired_ending,
            req.strategy.overall_approach,
            req.strategy.key_themes.join(", "),
            characters
        )
    }

    /// Turn raw planner output into a typed plan. Accepts `{"chapters": [...]}`,
    /// a bare array, and both entry schemas.
    fn parse_plan(output: &str, start: u32, count: u32) -> Result<ChapterPlan, String> {
        let value = parse_value(output)?;
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map
                .remove("chapters")
                .or_else(|| map.remove("chapter_plans"))
                .or_else(|| map.remove("entries"))
            {
                Some(Value::Array(items)) => items,
                _ => return Err("no chapter list in output".to_string()),
            },
            _ => return Err("output is not a chapter list".to_string()),
        };

        let entries: Vec<ChapterPlanEntry> = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| ChapterPlanEntry::from_value(item, start.saturating_add(i as u32), start, count))
            .collect();
        Ok(ChapterPlan::new(start, entries))
    }

    async fn plan(&self, req: &PlanRequest) -> StageOutcome {
        let fallback = |reason: String| StageOutcome::Degraded {
            payload: StagePayload::Plan(PlanOutput::new(ChapterPlan::fallback(
                req.start_chapter,
                req.chapter_count,
                &req.desired_ending,
            ))),
            reason,
        };

        let output = match self
            .client
            .invoke(SYSTEM_PROMPT, &Self::user_prompt(req), &self.options)
            .await
        {
            Ok(output) => output,
            Err(err) => return fallback(StageError::from_inference(self.kind(), &err).to_string()),
        };

        let plan = match Self::parse_plan(&output, req.start_chapter, req.chapter_count) {
            Ok(plan) => plan,
            Err(reason) => {
                return fallback(
                    StageError::MalformedOutput {
                        stage: self.kind(),
                        reason,
                    }
                    .to_string(),
                );
            }
        };

        let validation = plan.validate(req.start_chapter, req.chapter_count);
        if !validation.is_valid() {
            return fallback(format!("plan failed validation: {}", validation.issues.join("; ")));
        }

        let mut output = PlanOutput::new(plan);
        output.suggestions = validation.suggestions;
        StageOutcome::Ok(StagePayload::Plan(output))
    }
}

#[async_trait]
impl StageUnit for ChapterPlanner {
    fn kind(&self) -> StageKind {
        StageKind::ChapterPlanner
    }

    async fn process(&self, request: StageRequest) -> Envelope {
        let StageRequest::PlanChapters(ref req) = request else {
            return wrong_request(self.kind(), &request);
        };
        if req.chapter_count == 0 {
            return Envelope::rejected(self.kind(), "chapter count is zero");
        }
        if req.start_chapter.checked_add(req.chapter_count - 1).is_none() {
            return Envelope::rejected(self.kind(), "chapter range overflows");
        }
        Envelope::from_outcome(self.kind(), self.plan(req).await)
    }
}
