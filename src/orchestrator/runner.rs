use super::report::{FinalArtifact, StageStatus};
use super::state::{ContextKey, ContextValue, PipelineState, SharedContext, StateEntry};
use crate::channel::{ChannelEvent, EventBus, topics};
use crate::errors::{PipelineError, StageError};
use crate::model::{
    ChapterPlan, ChapterText, GenerationRequest, KnowledgeBase, Strategy,
};
use crate::output::chapter_markdown;
use crate::stage::{
    AnalysisRequest, DraftRequest, Envelope, GenerationInput, PlanOutput, PlanRequest,
    StageKind, StagePayload, StageRegistry, StageRequest, StageUnit, StrategyRequest,
};
use crate::store::{ArtifactStore, NullStore, save_json};
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Value, json};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Run-independent orchestrator settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorConfig {
    /// Upper bound for a single stage call.
    pub stage_timeout: Duration,
    /// Revision rounds after the first score.
    pub max_iterations: u32,
    pub quality_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(300),
            max_iterations: 2,
            quality_threshold: 7.0,
        }
    }
}

/// The five wired stages.
pub(super) struct Stages {
    pub analyzer: Arc<dyn StageUnit>,
    pub strategy: Arc<dyn StageUnit>,
    pub planner: Arc<dyn StageUnit>,
    pub generator: Arc<dyn StageUnit>,
    pub checker: Arc<dyn StageUnit>,
}

impl Stages {
    fn from_registry(registry: &StageRegistry) -> Result<Self, PipelineError> {
        let take = |kind| registry.get(kind).ok_or(PipelineError::MissingStage(kind));
        Ok(Self {
            analyzer: take(StageKind::DataAnalyzer)?,
            strategy: take(StageKind::StrategyPlanner)?,
            planner: take(StageKind::ChapterPlanner)?,
            generator: take(StageKind::ContentGenerator)?,
            checker: take(StageKind::QualityChecker)?,
        })
    }

    fn get(&self, kind: StageKind) -> &Arc<dyn StageUnit> {
        match kind {
            StageKind::DataAnalyzer => &self.analyzer,
            StageKind::StrategyPlanner => &self.strategy,
            StageKind::ChapterPlanner => &self.planner,
            StageKind::ContentGenerator => &self.generator,
            StageKind::QualityChecker => &self.checker,
        }
    }
}

/// Mutable bookkeeping for one run.
pub(super) struct RunState {
    pub run_id: Uuid,
    pub context: SharedContext,
    pub report: BTreeMap<StageKind, StageStatus>,
    pub notes: Vec<String>,
    pub states: Vec<StateEntry>,
}

impl RunState {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            context: SharedContext::new(),
            report: StageKind::ALL.iter().map(|k| (*k, StageStatus::Ok)).collect(),
            notes: Vec::new(),
            states: Vec::new(),
        }
    }

    fn transition(&mut self, next: PipelineState) {
        if let Some(current) = self.states.last().map(|e| e.state)
            && !current.can_transition_to(next)
        {
            tracing::warn!(from = %current, to = %next, "Unexpected state transition");
        }
        tracing::info!(run_id = %self.run_id, state = %next, "Entering state");
        self.states.push(StateEntry {
            state: next,
            timestamp: Utc::now(),
        });
    }

    /// Record a non-ok status for a stage; the worst status wins.
    pub fn mark(&mut self, stage: StageKind, status: StageStatus, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(stage = %stage, status = %status, reason = %reason, "Stage did not complete normally");
        let entry = self.report.entry(stage).or_insert(StageStatus::Ok);
        *entry = entry.worst(status);
        self.notes.push(format!("{}: {}", stage, reason));
    }

    /// Mark a stage degraded if its envelope says so.
    pub fn note_envelope(&mut self, stage: StageKind, envelope: &Envelope) {
        if envelope.is_degraded() {
            let reason = envelope.degraded_reason().unwrap_or("degraded").to_string();
            self.mark(stage, StageStatus::Degraded, reason);
        }
    }
}

/// Sequences the stages of a continuation run.
pub struct Orchestrator {
    pub(super) stages: Stages,
    pub(super) config: OrchestratorConfig,
    pub(super) bus: EventBus,
    pub(super) store: Arc<dyn ArtifactStore>,
}

impl Orchestrator {
    /// Wire an orchestrator. Every stage kind must be registered.
    pub fn new(registry: StageRegistry, config: OrchestratorConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            stages: Stages::from_registry(&registry)?,
            config,
            bus: EventBus::new(),
            store: Arc::new(NullStore),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    /// Subscribe to a topic. Only possible before a run starts.
    pub fn subscribe<F>(&mut self, topic: impl Into<String>, callback: F)
    where
        F: Fn(&ChannelEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(topic, callback);
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Recent events published on `topic`, oldest first.
    pub fn event_history(&self, topic: &str) -> Vec<ChannelEvent> {
        self.bus.history(topic)
    }

    /// Produce a continuation.
    ///
    /// The only error is an invalid request; every stage failure after
    /// validation is absorbed into a degraded artifact.
    #[tracing::instrument(skip(self))]
    pub async fn run(
        &self,
        desired_ending: &str,
        chapter_count: i64,
        start_chapter: u32,
    ) -> Result<FinalArtifact, PipelineError> {
        let started_at = Utc::now();
        let mut run = RunState::new();

        run.transition(PipelineState::Validating);
        let request = match validate_request(desired_ending, chapter_count, start_chapter) {
            Ok(request) => request,
            Err(e) => {
                run.transition(PipelineState::Failed);
                tracing::error!(error = %e, "Rejected continuation request");
                return Err(e);
            }
        };

        run.transition(PipelineState::Preprocessing);
        let (knowledge, strategy) = self.preprocess(&request, &mut run).await;

        run.transition(PipelineState::Planning);
        run.context
            .record(ContextKey::Knowledge, ContextValue::Knowledge(knowledge.clone()));
        run.context
            .record(ContextKey::Strategy, ContextValue::Strategy(strategy.clone()));
        self.checkpoint_json("knowledge_base.json", knowledge.as_ref());
        self.checkpoint_json("strategy.json", strategy.as_ref());
        self.publish(
            topics::KNOWLEDGE_EXTRACTED,
            StageKind::DataAnalyzer.as_str(),
            json!({
                "characters": knowledge.characters.len(),
                "status": run.report[&StageKind::DataAnalyzer],
            }),
        );
        self.publish(
            topics::STRATEGY_READY,
            StageKind::StrategyPlanner.as_str(),
            json!({
                "compatibility": strategy.compatibility.score,
                "compatible": strategy.compatibility.compatible,
            }),
        );

        run.transition(PipelineState::ChapterPlanning);
        let plan_output = self
            .plan_chapters(&request, knowledge.clone(), strategy.clone(), &mut run)
            .await;
        let plan = Arc::new(plan_output.plan.clone());
        run.context
            .record(ContextKey::ChapterPlan, ContextValue::Plan(plan.clone()));
        self.checkpoint_json("chapter_plan.json", plan.as_ref());
        self.publish(
            topics::CHAPTER_PLANNED,
            StageKind::ChapterPlanner.as_str(),
            json!({ "chapters": plan.chapter_numbers() }),
        );

        run.transition(PipelineState::Generating);
        let drafts = self
            .generate_chapters(&request, &plan, &knowledge, &strategy, &mut run)
            .await;
        run.context
            .record(ContextKey::Draft, ContextValue::Chapters(drafts.clone()));

        run.transition(PipelineState::QualityLoop);
        let characters: Vec<String> = knowledge.characters.iter().map(|c| c.name.clone()).collect();
        let outcome = self.quality_loop(&plan, drafts, characters, &mut run).await;

        run.transition(PipelineState::Formatting);
        run.context
            .record(ContextKey::Final, ContextValue::Chapters(outcome.chapters.clone()));
        for chapter in &outcome.chapters {
            self.checkpoint(&chapter_file(chapter.number), &chapter_markdown(chapter));
        }

        run.transition(PipelineState::Done);
        let artifact = FinalArtifact {
            run_id: run.run_id,
            request,
            chapters: outcome.chapters,
            quality: outcome.quality,
            completeness_report: run.report,
            notes: run.notes,
            loop_exit: outcome.exit,
            revisions: outcome.revisions,
            scoring_calls: outcome.scoring_calls,
            score_history: outcome.history,
            plan: plan_output.plan,
            plan_suggestions: plan_output.suggestions,
            character_distribution: plan_output.distribution,
            strategy: strategy.as_ref().clone(),
            knowledge: knowledge.as_ref().clone(),
            states: run.states,
            started_at,
            finished_at: Utc::now(),
        };

        self.publish(
            topics::RUN_COMPLETED,
            "orchestrator",
            json!({
                "run_id": artifact.run_id,
                "loop_exit": artifact.loop_exit,
                "chapters": artifact.chapters.len(),
                "overall": artifact.quality.as_ref().map(|q| q.overall),
            }),
        );
        tracing::info!(
            run_id = %artifact.run_id,
            loop_exit = %artifact.loop_exit,
            scoring_calls = artifact.scoring_calls,
            complete = artifact.is_complete(),
            "Run finished"
        );
        Ok(artifact)
    }

    /// Analyzer and strategy planner, issued together. Both always yield a value.
    async fn preprocess(
        &self,
        request: &GenerationRequest,
        run: &mut RunState,
    ) -> (Arc<KnowledgeBase>, Arc<Strategy>) {
        let analyze = StageRequest::Analyze(AnalysisRequest {
            desired_ending: request.desired_ending.clone(),
        });
        let strategize = StageRequest::Strategize(StrategyRequest {
            desired_ending: request.desired_ending.clone(),
            chapter_count: request.chapter_count,
            start_chapter: request.start_chapter,
        });

        let (analysis, strategy) = tokio::join!(
            self.invoke(StageKind::DataAnalyzer, analyze),
            self.invoke(StageKind::StrategyPlanner, strategize)
        );

        run.note_envelope(StageKind::DataAnalyzer, &analysis);
        let failure = envelope_failure(&analysis);
        let knowledge = match analysis.into_payload().and_then(StagePayload::into_knowledge) {
            Some(knowledge) => knowledge,
            None => {
                run.mark(
                    StageKind::DataAnalyzer,
                    StageStatus::Degraded,
                    failure.unwrap_or_else(|| "unexpected payload".to_string()),
                );
                KnowledgeBase::fallback(None)
            }
        };

        run.note_envelope(StageKind::StrategyPlanner, &strategy);
        let failure = envelope_failure(&strategy);
        let strategy_value = match strategy.into_payload().and_then(StagePayload::into_strategy) {
            Some(strategy) => strategy,
            None => {
                run.mark(
                    StageKind::StrategyPlanner,
                    StageStatus::Degraded,
                    failure.unwrap_or_else(|| "unexpected payload".to_string()),
                );
                Strategy::fallback(&request.desired_ending)
            }
        };

        (Arc::new(knowledge), Arc::new(strategy_value))
    }

    /// Planner call plus validation at the context write boundary.
    async fn plan_chapters(
        &self,
        request: &GenerationRequest,
        knowledge: Arc<KnowledgeBase>,
        strategy: Arc<Strategy>,
        run: &mut RunState,
    ) -> PlanOutput {
        let envelope = self
            .invoke(
                StageKind::ChapterPlanner,
                StageRequest::PlanChapters(PlanRequest {
                    desired_ending: request.desired_ending.clone(),
                    chapter_count: request.chapter_count,
                    start_chapter: request.start_chapter,
                    knowledge,
                    strategy,
                }),
            )
            .await;
        run.note_envelope(StageKind::ChapterPlanner, &envelope);

        let failure = envelope_failure(&envelope);
        let output = envelope.into_payload().and_then(StagePayload::into_plan);
        let fallback = || {
            PlanOutput::new(ChapterPlan::fallback(
                request.start_chapter,
                request.chapter_count,
                &request.desired_ending,
            ))
        };

        match output {
            Some(output) => {
                let validation = output
                    .plan
                    .validate(request.start_chapter, request.chapter_count);
                if validation.is_valid() {
                    output
                } else {
                    run.mark(
                        StageKind::ChapterPlanner,
                        StageStatus::Degraded,
                        format!("plan failed validation: {}", validation.issues.join("; ")),
                    );
                    fallback()
                }
            }
            None => {
                run.mark(
                    StageKind::ChapterPlanner,
                    StageStatus::Degraded,
                    failure.unwrap_or_else(|| "unexpected payload".to_string()),
                );
                fallback()
            }
        }
    }

    /// Draft every chapter in order. Chapter N+1 sees chapter N's actual text.
    async fn generate_chapters(
        &self,
        request: &GenerationRequest,
        plan: &ChapterPlan,
        knowledge: &Arc<KnowledgeBase>,
        strategy: &Arc<Strategy>,
        run: &mut RunState,
    ) -> Vec<ChapterText> {
        let mut chapters: Vec<ChapterText> = Vec::with_capacity(plan.len());

        for entry in &plan.entries {
            let draft = StageRequest::Generate(GenerationInput::Draft(DraftRequest {
                entry: entry.clone(),
                desired_ending: request.desired_ending.clone(),
                total_chapters: request.chapter_count,
                knowledge: knowledge.clone(),
                strategy: strategy.clone(),
                previous_text: chapters.last().map(|c| c.text.clone()),
            }));

            let chapter = match self.generate_with_retry(draft).await {
                (Ok(text), attempts) => ChapterText {
                    attempts,
                    ..ChapterText::new(entry, text)
                },
                (Err(reason), _) => {
                    run.mark(
                        StageKind::ContentGenerator,
                        StageStatus::Degraded,
                        format!("chapter {} replaced by placeholder: {}", entry.chapter_number, reason),
                    );
                    ChapterText::placeholder(entry, &reason)
                }
            };

            self.publish(
                topics::CHAPTER_WRITTEN,
                StageKind::ContentGenerator.as_str(),
                json!({
                    "number": chapter.number,
                    "degraded": chapter.degraded,
                    "chars": chapter.char_count(),
                }),
            );
            chapters.push(chapter);
        }
        chapters
    }

    /// Call the generator, retrying once with the identical request.
    /// Returns the text or the last failure reason, with the attempts spent.
    pub(super) async fn generate_with_retry(&self, request: StageRequest) -> (Result<String, String>, u32) {
        let mut last_reason = String::new();
        for attempt in 1..=2 {
            let envelope = self.invoke(StageKind::ContentGenerator, request.clone()).await;
            if let Some(reason) = envelope_failure(&envelope) {
                tracing::warn!(attempt, reason = %reason, "Chapter generation failed");
                last_reason = reason;
                continue;
            }
            match envelope.into_payload().and_then(StagePayload::into_chapter) {
                Some(text) if !text.trim().is_empty() => return (Ok(text), attempt),
                _ => {
                    tracing::warn!(attempt, "Generator returned no chapter text");
                    last_reason = "generator returned no chapter text".to_string();
                }
            }
        }
        (Err(last_reason), 2)
    }

    /// One guarded stage call: timeout and panic are turned into envelopes.
    pub(super) async fn invoke(&self, kind: StageKind, request: StageRequest) -> Envelope {
        let started = Instant::now();
        let unit = self.stages.get(kind).clone();
        let call = AssertUnwindSafe(unit.process(request)).catch_unwind();

        let envelope = match tokio::time::timeout(self.config.stage_timeout, call).await {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(panic)) => Envelope::failed(StageError::Unavailable {
                stage: kind,
                reason: format!("stage panicked: {}", panic_message(panic.as_ref())),
            }),
            Err(_) => Envelope::failed(StageError::Timeout {
                stage: kind,
                after_ms: self.config.stage_timeout.as_millis() as u64,
            }),
        };

        let elapsed = started.elapsed().as_millis() as u64;
        tracing::debug!(
            stage = %kind,
            success = envelope.success,
            degraded = envelope.is_degraded(),
            duration_ms = elapsed,
            "Stage call finished"
        );
        envelope.with_duration_ms(elapsed)
    }

    pub(super) fn publish(&self, topic: &str, publisher: &str, payload: Value) {
        self.bus.publish(&ChannelEvent::new(topic, publisher, payload));
    }

    pub(super) fn checkpoint(&self, name: &str, contents: &str) {
        if let Err(e) = self.store.save(name, contents) {
            tracing::warn!(artifact = name, error = %e, "Failed to save checkpoint");
        }
    }

    pub(super) fn checkpoint_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) {
        if let Err(e) = save_json(self.store.as_ref(), name, value) {
            tracing::warn!(artifact = name, error = %e, "Failed to save checkpoint");
        }
    }
}

/// Failure reason of an unsuccessful envelope.
fn envelope_failure(envelope: &Envelope) -> Option<String> {
    if envelope.success {
        return None;
    }
    Some(
        envelope
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| envelope.message.clone()),
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub fn chapter_file(number: u32) -> String {
    format!("chapters/chapter_{:03}.md", number)
}

/// Check the raw request and turn it into a typed one.
pub fn validate_request(
    desired_ending: &str,
    chapter_count: i64,
    start_chapter: u32,
) -> Result<GenerationRequest, PipelineError> {
    let desired_ending = desired_ending.trim();
    if desired_ending.is_empty() {
        return Err(PipelineError::InvalidRequest(
            "desired ending is empty".to_string(),
        ));
    }
    if chapter_count < 1 {
        return Err(PipelineError::InvalidRequest(format!(
            "chapter count must be at least 1, got {}",
            chapter_count
        )));
    }
    let chapter_count = u32::try_from(chapter_count).map_err(|_| {
        PipelineError::InvalidRequest(format!("chapter count {} is too large", chapter_count))
    })?;
    if start_chapter.checked_add(chapter_count - 1).is_none() {
        return Err(PipelineError::InvalidRequest(format!(
            "chapters {}..+{} overflow the chapter range",
            start_chapter, chapter_count
        )));
    }
    Ok(GenerationRequest {
        desired_ending: desired_ending.to_string(),
        chapter_count,
        start_chapter,
    })
}
