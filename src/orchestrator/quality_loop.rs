//! Bounded score-and-revise loop.

use super::report::{LoopExit, StageStatus};
use super::runner::{Orchestrator, RunState};
use super::state::{ContextKey, ContextValue};
use crate::channel::topics;
use crate::model::{ChapterPlan, ChapterText, QualityFeedback, QualityScore, normalize_chapters};
use crate::stage::{GenerationInput, RevisionRequest, ScoreRequest, StageKind, StagePayload, StageRequest};
use serde_json::json;

pub(super) struct LoopOutcome {
    /// Best-scoring version seen, or the drafts when nothing was scored.
    pub chapters: Vec<ChapterText>,
    pub quality: Option<QualityScore>,
    pub exit: LoopExit,
    pub revisions: u32,
    pub scoring_calls: u32,
    pub history: Vec<QualityScore>,
}

impl Orchestrator {
    /// Score the text; below threshold, revise every chapter and score again,
    /// for at most `max_iterations` revision rounds.
    pub(super) async fn quality_loop(
        &self,
        plan: &ChapterPlan,
        drafts: Vec<ChapterText>,
        characters: Vec<String>,
        run: &mut RunState,
    ) -> LoopOutcome {
        let threshold = self.config.quality_threshold;
        let mut current = drafts;
        let mut best: Option<(QualityScore, Vec<ChapterText>)> = None;
        let mut history = Vec::new();
        let mut iteration = 0u32;
        let mut scoring_calls = 0u32;
        let mut revisions = 0u32;

        let exit = loop {
            scoring_calls += 1;
            let envelope = self
                .invoke(
                    StageKind::QualityChecker,
                    StageRequest::Score(ScoreRequest {
                        text: normalize_chapters(&current),
                        threshold,
                        characters: characters.clone(),
                    }),
                )
                .await;
            run.note_envelope(StageKind::QualityChecker, &envelope);

            let failure = (!envelope.success).then(|| envelope.message.clone());
            let Some(score) = envelope
                .into_payload()
                .and_then(StagePayload::into_quality)
                .map(|s| s.with_threshold(threshold))
            else {
                let status = if best.is_some() {
                    StageStatus::Degraded
                } else {
                    StageStatus::Failed
                };
                run.mark(
                    StageKind::QualityChecker,
                    status,
                    failure.unwrap_or_else(|| "checker returned no score".to_string()),
                );
                break LoopExit::CheckerFailed;
            };

            tracing::info!(
                iteration,
                overall = score.overall,
                threshold,
                passed = score.passed,
                "Quality scored"
            );
            run.context
                .record(ContextKey::Score(iteration), ContextValue::Score(score.clone()));
            self.checkpoint_json(&format!("quality/score_{}.json", iteration), &score);
            self.publish(
                topics::QUALITY_SCORED,
                StageKind::QualityChecker.as_str(),
                json!({
                    "iteration": iteration,
                    "overall": score.overall,
                    "passed": score.passed,
                }),
            );
            history.push(score.clone());

            // Ties go to the later version.
            if best.as_ref().is_none_or(|(b, _)| score.overall >= b.overall) {
                best = Some((score.clone(), current.clone()));
            }

            if score.passed {
                break LoopExit::Passed;
            }
            if iteration >= self.config.max_iterations {
                break LoopExit::Exhausted;
            }

            self.publish(
                topics::QUALITY_ALERT,
                StageKind::QualityChecker.as_str(),
                json!({
                    "iteration": iteration,
                    "overall": score.overall,
                    "threshold": threshold,
                    "suggestions": score.suggestions,
                }),
            );

            iteration += 1;
            current = self
                .revise_all(plan, current, QualityFeedback::from_score(&score), iteration, run)
                .await;
            revisions += 1;
            run.context
                .record(ContextKey::Revision(iteration), ContextValue::Chapters(current.clone()));
        };

        let (quality, chapters) = match best {
            Some((score, chapters)) => (Some(score), chapters),
            None => (None, current),
        };

        LoopOutcome {
            chapters,
            quality,
            exit,
            revisions,
            scoring_calls,
            history,
        }
    }

    /// Revise every chapter in order with the same feedback. A chapter whose
    /// revision fails twice keeps its previous text.
    async fn revise_all(
        &self,
        plan: &ChapterPlan,
        chapters: Vec<ChapterText>,
        feedback: QualityFeedback,
        iteration: u32,
        run: &mut RunState,
    ) -> Vec<ChapterText> {
        let mut revised = Vec::with_capacity(chapters.len());

        for chapter in chapters {
            let Some(entry) = plan.entries.iter().find(|e| e.chapter_number == chapter.number) else {
                revised.push(chapter);
                continue;
            };

            let request = StageRequest::Generate(GenerationInput::Revise(RevisionRequest {
                entry: entry.clone(),
                current_text: chapter.text.clone(),
                feedback: feedback.clone(),
                iteration,
            }));

            match self.generate_with_retry(request).await {
                (Ok(text), attempts) => revised.push(ChapterText {
                    text,
                    degraded: false,
                    attempts: chapter.attempts + attempts,
                    ..chapter
                }),
                (Err(reason), attempts) => {
                    run.mark(
                        StageKind::ContentGenerator,
                        StageStatus::Degraded,
                        format!(
                            "revision {} of chapter {} failed, keeping previous text: {}",
                            iteration, chapter.number, reason
                        ),
                    );
                    revised.push(ChapterText {
                        attempts: chapter.attempts + attempts,
                        ..chapter
                    });
                }
            }
        }
        revised
    }
}
