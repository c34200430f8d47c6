//! Intermediate artifacts passed between stages.

pub mod chapter;
pub mod knowledge;
pub mod plan;
pub mod quality;
pub mod strategy;

pub use chapter::{ChapterText, normalize_chapters};
pub use knowledge::{CharacterProfile, KnowledgeBase, Relationship, TextStatistics};
pub use plan::{
    ChapterPlan, ChapterPlanEntry, ChapterTitle, CharacterDistribution, Importance, NarrativePhase,
    PlanValidation, PlannedCharacter, PlotPoint,
};
pub use quality::{Dimension, Grade, QualityFeedback, QualityScore, QualityWeights};
pub use strategy::{Compatibility, Strategy};

/// Validated continuation request, immutable for a run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GenerationRequest {
    pub desired_ending: String,
    pub chapter_count: u32,
    pub start_chapter: u32,
}

impl GenerationRequest {
    pub fn last_chapter(&self) -> u32 {
        self.start_chapter + (self.chapter_count - 1)
    }
}
