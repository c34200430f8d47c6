use crate::errors::ContextError;
use crate::model::{ChapterPlan, ChapterText, KnowledgeBase, QualityScore, Strategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Orchestrator states, in the order a run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Validating,
    Preprocessing,
    Planning,
    ChapterPlanning,
    Generating,
    QualityLoop,
    Formatting,
    Done,
    /// Reachable from `Validating` only.
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Validating => "validating",
            PipelineState::Preprocessing => "preprocessing",
            PipelineState::Planning => "planning",
            PipelineState::ChapterPlanning => "chapter_planning",
            PipelineState::Generating => "generating",
            PipelineState::QualityLoop => "quality_loop",
            PipelineState::Formatting => "formatting",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    /// Whether `next` may follow this state.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Validating, Preprocessing)
                | (Validating, Failed)
                | (Preprocessing, Planning)
                | (Planning, ChapterPlanning)
                | (ChapterPlanning, Generating)
                | (Generating, QualityLoop)
                | (QualityLoop, Formatting)
                | (Formatting, Done)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub state: PipelineState,
    pub timestamp: DateTime<Utc>,
}

/// Keys of the shared context. Each key is written at most once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKey {
    Knowledge,
    Strategy,
    ChapterPlan,
    Draft,
    Revision(u32),
    Score(u32),
    Final,
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKey::Knowledge => write!(f, "knowledge"),
            ContextKey::Strategy => write!(f, "strategy"),
            ContextKey::ChapterPlan => write!(f, "chapter_plan"),
            ContextKey::Draft => write!(f, "draft"),
            ContextKey::Revision(n) => write!(f, "revision_{}", n),
            ContextKey::Score(n) => write!(f, "score_{}", n),
            ContextKey::Final => write!(f, "final"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Knowledge(Arc<KnowledgeBase>),
    Strategy(Arc<Strategy>),
    Plan(Arc<ChapterPlan>),
    Chapters(Vec<ChapterText>),
    Score(QualityScore),
}

/// Append-only store of everything a run has produced so far.
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    entries: BTreeMap<ContextKey, ContextValue>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. An existing key is never overwritten.
    pub fn insert(&mut self, key: ContextKey, value: ContextValue) -> Result<(), ContextError> {
        if self.entries.contains_key(&key) {
            return Err(ContextError::KeyExists(key.to_string()));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Insert a value, logging and dropping it if the key is already set.
    pub fn record(&mut self, key: ContextKey, value: ContextValue) {
        if let Err(e) = self.insert(key, value) {
            tracing::warn!(error = %e, "Shared context write rejected");
        }
    }

    pub fn get(&self, key: ContextKey) -> Option<&ContextValue> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: ContextKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn keys(&self) -> Vec<ContextKey> {
        self.entries.keys().copied().collect()
    }

    pub fn knowledge(&self) -> Option<Arc<KnowledgeBase>> {
        match self.get(ContextKey::Knowledge) {
            Some(ContextValue::Knowledge(k)) => Some(k.clone()),
            _ => None,
        }
    }

    pub fn strategy(&self) -> Option<Arc<Strategy>> {
        match self.get(ContextKey::Strategy) {
            Some(ContextValue::Strategy(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn plan(&self) -> Option<Arc<ChapterPlan>> {
        match self.get(ContextKey::ChapterPlan) {
            Some(ContextValue::Plan(p)) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn chapters(&self, key: ContextKey) -> Option<&[ChapterText]> {
        match self.get(key) {
            Some(ContextValue::Chapters(c)) => Some(c),
            _ => None,
        }
    }

    pub fn score(&self, iteration: u32) -> Option<&QualityScore> {
        match self.get(ContextKey::Score(iteration)) {
            Some(ContextValue::Score(s)) => Some(s),
            _ => None,
        }
    }
}
