use serde::{Deserialize, Serialize};

use super::plan::ChapterPlanEntry;

/// One generated chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterText {
    pub number: u32,
    pub title: String,
    pub text: String,
    /// True when the text is a placeholder standing in for a failed generation.
    #[serde(default)]
    pub degraded: bool,
    /// Generation calls spent on this chapter, revisions included.
    #[serde(default)]
    pub attempts: u32,
}

impl ChapterText {
    pub fn new(entry: &ChapterPlanEntry, text: impl Into<String>) -> Self {
        Self {
            number: entry.chapter_number,
            title: entry.title.to_string(),
            text: text.into(),
            degraded: false,
            attempts: 1,
        }
    }

    /// Stand-in chapter used when generation failed twice.
    pub fn placeholder(entry: &ChapterPlanEntry, reason: &str) -> Self {
        let events = entry
            .plot_points
            .iter()
            .map(|p| p.event.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let text = format!(
            "第{}回　{}\n\n[This chapter could not be generated: {}]\n\nPlanned events: {}",
            entry.chapter_number, entry.title, reason, events
        );
        Self {
            number: entry.chapter_number,
            title: entry.title.to_string(),
            text,
            degraded: true,
            attempts: 2,
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Join chapter texts in chapter order, separated by a blank line.
pub fn normalize_chapters(chapters: &[ChapterText]) -> String {
    let mut ordered: Vec<&ChapterText> = chapters.iter().collect();
    ordered.sort_by_key(|c| c.number);
    ordered
        .iter()
        .map(|c| c.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::plan::{ChapterPlanEntry, NarrativePhase};

    fn chapter(number: u32, text: &str) -> ChapterText {
        ChapterText::new(&ChapterPlanEntry::fallback(number, NarrativePhase::Setup), text)
    }

    #[test]
    fn test_normalize_orders_by_number() {
        let joined = normalize_chapters(&[chapter(82, "second\n"), chapter(81, "first")]);
        assert_eq!(joined, "first\n\nsecond");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize_chapters(&[]), "");
    }

    #[test]
    fn test_placeholder_is_degraded_and_mentions_plan() {
        let entry = ChapterPlanEntry::fallback(83, NarrativePhase::Climax);
        let placeholder = ChapterText::placeholder(&entry, "timeout");
        assert!(placeholder.degraded);
        assert_eq!(placeholder.number, 83);
        assert!(placeholder.text.contains("timeout"));
        assert!(placeholder.text.contains("plot point to be planned"));
    }
}
