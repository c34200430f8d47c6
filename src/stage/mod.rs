//! Stage units: the five specialized steps of a continuation run.
//!
//! Every stage implements [`StageUnit`] and answers each [`StageRequest`]
//! with exactly one [`Envelope`]. Stages are wired into a [`StageRegistry`]
//! which is handed to the orchestrator.

pub mod analyzer;
pub mod checker;
pub mod envelope;
pub mod generator;
pub mod json;
pub mod planner;
pub mod strategy;

pub use analyzer::DataAnalyzer;
pub use checker::QualityChecker;
pub use envelope::{Envelope, StageOutcome};
pub use generator::ContentGenerator;
pub use planner::ChapterPlanner;
pub use strategy::StrategyPlanner;

use crate::inference::InferenceClient;
use crate::model::{
    ChapterPlan, ChapterPlanEntry, CharacterDistribution, KnowledgeBase, QualityFeedback,
    QualityScore, QualityWeights, Strategy,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The closed set of stage variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    DataAnalyzer,
    StrategyPlanner,
    ChapterPlanner,
    ContentGenerator,
    QualityChecker,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::DataAnalyzer,
        StageKind::StrategyPlanner,
        StageKind::ChapterPlanner,
        StageKind::ContentGenerator,
        StageKind::QualityChecker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::DataAnalyzer => "data_analyzer",
            StageKind::StrategyPlanner => "strategy_planner",
            StageKind::ChapterPlanner => "chapter_planner",
            StageKind::ContentGenerator => "content_generator",
            StageKind::QualityChecker => "quality_checker",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub desired_ending: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRequest {
    pub desired_ending: String,
    pub chapter_count: u32,
    pub start_chapter: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    pub desired_ending: String,
    pub chapter_count: u32,
    pub start_chapter: u32,
    pub knowledge: Arc<KnowledgeBase>,
    pub strategy: Arc<Strategy>,
}

/// First draft of one chapter.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftRequest {
    pub entry: ChapterPlanEntry,
    pub desired_ending: String,
    pub total_chapters: u32,
    pub knowledge: Arc<KnowledgeBase>,
    pub strategy: Arc<Strategy>,
    /// Actual text of the preceding chapter, placeholder text included.
    pub previous_text: Option<String>,
}

/// Revision of one chapter: its plan entry, current text and the latest feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionRequest {
    pub entry: ChapterPlanEntry,
    pub current_text: String,
    pub feedback: QualityFeedback,
    pub iteration: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationInput {
    Draft(DraftRequest),
    Revise(RevisionRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRequest {
    /// All chapter texts joined in chapter order.
    pub text: String,
    pub threshold: f64,
    /// Character names the heuristic fallback looks for.
    pub characters: Vec<String>,
}

/// Input to a stage. Each stage accepts exactly one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum StageRequest {
    Analyze(AnalysisRequest),
    Strategize(StrategyRequest),
    PlanChapters(PlanRequest),
    Generate(GenerationInput),
    Score(ScoreRequest),
}

impl StageRequest {
    pub fn variant_name(&self) -> &'static str {
        match self {
            StageRequest::Analyze(_) => "analyze",
            StageRequest::Strategize(_) => "strategize",
            StageRequest::PlanChapters(_) => "plan_chapters",
            StageRequest::Generate(GenerationInput::Draft(_)) => "generate_draft",
            StageRequest::Generate(GenerationInput::Revise(_)) => "generate_revision",
            StageRequest::Score(_) => "score",
        }
    }
}

/// Planner output: the plan plus derived observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOutput {
    pub plan: ChapterPlan,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub distribution: CharacterDistribution,
}

impl PlanOutput {
    pub fn new(plan: ChapterPlan) -> Self {
        let distribution = plan.character_distribution();
        Self {
            plan,
            suggestions: Vec::new(),
            distribution,
        }
    }
}

/// Output of a stage, one variant per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StagePayload {
    Knowledge(KnowledgeBase),
    Strategy(Strategy),
    Plan(PlanOutput),
    Chapter(String),
    Quality(QualityScore),
}

impl StagePayload {
    pub fn into_knowledge(self) -> Option<KnowledgeBase> {
        match self {
            StagePayload::Knowledge(k) => Some(k),
            _ => None,
        }
    }

    pub fn into_strategy(self) -> Option<Strategy> {
        match self {
            StagePayload::Strategy(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_plan(self) -> Option<PlanOutput> {
        match self {
            StagePayload::Plan(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_chapter(self) -> Option<String> {
        match self {
            StagePayload::Chapter(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_quality(self) -> Option<QualityScore> {
        match self {
            StagePayload::Quality(q) => Some(q),
            _ => None,
        }
    }
}

/// One specialized step of the pipeline.
#[async_trait]
pub trait StageUnit: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Handle a request. Never panics on bad input; wrong or incomplete
    /// requests yield an unsuccessful envelope.
    async fn process(&self, request: StageRequest) -> Envelope;
}

/// Construction-time settings for the standard stages.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSettings {
    /// Source material handed to the analyzer.
    pub source_text: Option<String>,
    pub weights: QualityWeights,
    pub generator_temperature: f64,
    pub generator_max_tokens: u32,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            source_text: None,
            weights: QualityWeights::default(),
            generator_temperature: 0.8,
            generator_max_tokens: 8000,
        }
    }
}

/// Stage units keyed by kind.
#[derive(Default, Clone)]
pub struct StageRegistry {
    units: HashMap<StageKind, Arc<dyn StageUnit>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five standard stages sharing one inference client.
    pub fn standard(client: Arc<dyn InferenceClient>, settings: &StageSettings) -> Self {
        Self::new()
            .with(Arc::new(
                DataAnalyzer::new(client.clone()).with_source(settings.source_text.clone()),
            ))
            .with(Arc::new(StrategyPlanner::new(client.clone())))
            .with(Arc::new(ChapterPlanner::new(client.clone())))
            .with(Arc::new(
                ContentGenerator::new(client.clone())
                    .with_temperature(settings.generator_temperature)
                    .with_max_tokens(settings.generator_max_tokens),
            ))
            .with(Arc::new(
                QualityChecker::new(client).with_weights(settings.weights),
            ))
    }

    /// Register a unit under its own kind, replacing any previous one.
    pub fn register(&mut self, unit: Arc<dyn StageUnit>) -> Option<Arc<dyn StageUnit>> {
        self.units.insert(unit.kind(), unit)
    }

    pub fn with(mut self, unit: Arc<dyn StageUnit>) -> Self {
        self.register(unit);
        self
    }

    pub fn get(&self, kind: StageKind) -> Option<Arc<dyn StageUnit>> {
        self.units.get(&kind).cloned()
    }

    /// Kinds with no registered unit, in pipeline order.
    pub fn missing(&self) -> Vec<StageKind> {
        StageKind::ALL
            .iter()
            .copied()
            .filter(|k| !self.units.contains_key(k))
            .collect()
    }
}

/// Reply to a request variant the stage does not handle.
pub(crate) fn wrong_request(stage: StageKind, request: &StageRequest) -> Envelope {
    Envelope::rejected(
        stage,
        format!("{} cannot handle a {} request", stage, request.variant_name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::OfflineClient;

    #[test]
    fn test_stage_kind_display_matches_serde() {
        for kind in StageKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.to_string());
        }
    }

    #[test]
    fn test_standard_registry_is_complete() {
        let registry = StageRegistry::standard(Arc::new(OfflineClient), &StageSettings::default());
        assert!(registry.missing().is_empty());
        for kind in StageKind::ALL {
            assert_eq!(registry.get(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_missing_reports_unregistered_kinds() {
        let registry = StageRegistry::new().with(Arc::new(QualityChecker::new(Arc::new(OfflineClient))));
        assert_eq!(
            registry.missing(),
            vec![
                StageKind::DataAnalyzer,
                StageKind::StrategyPlanner,
                StageKind::ChapterPlanner,
                StageKind::ContentGenerator
            ]
        );
    }

    #[test]
    fn test_register_replaces_existing_unit() {
        let mut registry = StageRegistry::new();
        assert!(registry.register(Arc::new(ChapterPlanner::new(Arc::new(OfflineClient)))).is_none());
        assert!(registry.register(Arc::new(ChapterPlanner::new(Arc::new(OfflineClient)))).is_some());
    }

    #[test]
    fn test_payload_accessors() {
        let payload = StagePayload::Chapter("text".to_string());
        assert!(payload.clone().into_quality().is_none());
        assert_eq!(payload.into_chapter().as_deref(), Some("text"));
    }

    #[tokio::test]
    async fn test_wrong_request_variant_is_rejected() {
        let checker = QualityChecker::new(Arc::new(OfflineClient));
        let envelope = checker
            .process(StageRequest::Analyze(AnalysisRequest {
                desired_ending: "x".to_string(),
            }))
            .await;
        assert!(!envelope.success);
        assert!(envelope.message.contains("analyze"));
    }
}
