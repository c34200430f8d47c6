use super::state::StateEntry;
use crate::model::{
    ChapterPlan, ChapterText, CharacterDistribution, GenerationRequest, KnowledgeBase,
    QualityScore, Strategy, normalize_chapters,
};
use crate::stage::StageKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// How a stage fared over the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Degraded,
    Failed,
}

impl StageStatus {
    /// The worse of two statuses.
    pub fn worst(self, other: StageStatus) -> StageStatus {
        self.max(other)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Ok => write!(f, "ok"),
            StageStatus::Degraded => write!(f, "degraded"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why the quality loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopExit {
    /// A score met the threshold.
    Passed,
    /// Iterations ran out below the threshold.
    Exhausted,
    /// The checker produced no usable score.
    CheckerFailed,
}

impl fmt::Display for LoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopExit::Passed => write!(f, "passed"),
            LoopExit::Exhausted => write!(f, "exhausted"),
            LoopExit::CheckerFailed => write!(f, "checker_failed"),
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    pub run_id: Uuid,
    pub request: GenerationRequest,
    pub chapters: Vec<ChapterText>,
    pub quality: Option<QualityScore>,
    pub completeness_report: BTreeMap<StageKind, StageStatus>,
    /// Reasons behind every degraded or failed status, in occurrence order.
    #[serde(default)]
    pub notes: Vec<String>,
    pub loop_exit: LoopExit,
    pub revisions: u32,
    pub scoring_calls: u32,
    /// Every score the checker produced, in order.
    #[serde(default)]
    pub score_history: Vec<QualityScore>,
    pub plan: ChapterPlan,
    #[serde(default)]
    pub plan_suggestions: Vec<String>,
    #[serde(default)]
    pub character_distribution: CharacterDistribution,
    pub strategy: Strategy,
    pub knowledge: KnowledgeBase,
    pub states: Vec<StateEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FinalArtifact {
    /// Chapter texts in chapter order.
    pub fn texts(&self) -> Vec<&str> {
        let mut chapters: Vec<&ChapterText> = self.chapters.iter().collect();
        chapters.sort_by_key(|c| c.number);
        chapters.into_iter().map(|c| c.text.as_str()).collect()
    }

    /// All chapters as one string, as the checker saw it.
    pub fn full_text(&self) -> String {
        normalize_chapters(&self.chapters)
    }

    pub fn status(&self, stage: StageKind) -> StageStatus {
        self.completeness_report
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::Ok)
    }

    /// True when no stage degraded or failed.
    pub fn is_complete(&self) -> bool {
        self.completeness_report
            .values()
            .all(|s| *s == StageStatus::Ok)
    }

    pub fn degraded_chapters(&self) -> Vec<u32> {
        self.chapters
            .iter()
            .filter(|c| c.degraded)
            .map(|c| c.number)
            .collect()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_status() {
        assert_eq!(StageStatus::Ok.worst(StageStatus::Degraded), StageStatus::Degraded);
        assert_eq!(StageStatus::Failed.worst(StageStatus::Degraded), StageStatus::Failed);
        assert_eq!(StageStatus::Ok.worst(StageStatus::Ok), StageStatus::Ok);
    }

    #[test]
    fn test_status_and_exit_serialize_snake_case() {
        assert_eq!(serde_json::to_value(StageStatus::Degraded).unwrap(), "degraded");
        assert_eq!(serde_json::to_value(LoopExit::CheckerFailed).unwrap(), "checker_failed");
        assert_eq!(LoopExit::CheckerFailed.to_string(), "checker_failed");
    }

    #[test]
    fn test_completeness_report_keys_serialize_as_stage_names() {
        let report = BTreeMap::from([(StageKind::QualityChecker, StageStatus::Failed)]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["quality_checker"], "failed");
    }
}
