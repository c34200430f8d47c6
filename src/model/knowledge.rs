use serde::{Deserialize, Serialize};

/// A character extracted from the source material.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub traits: Vec<String>,
}

/// A directed relationship between two characters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: String,
}

/// Basic statistics of the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextStatistics {
    pub total_chars: usize,
    pub paragraphs: usize,
    pub chapters: usize,
}

impl TextStatistics {
    /// Compute statistics over a source text.
    ///
    /// Chapters are counted by the classical heading marker "第…回".
    pub fn of(text: &str) -> Self {
        let paragraphs = text.split("\n\n").filter(|p| !p.trim().is_empty()).count();
        let chapters = text
            .lines()
            .filter(|line| {
                let line = line.trim_start_matches(['#', ' ']);
                line.starts_with('第') && line.contains('回')
            })
            .count();
        Self {
            total_chars: text.chars().count(),
            paragraphs,
            chapters,
        }
    }
}

/// Everything the analyzer learned about the source material.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub characters: Vec<CharacterProfile>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub plotlines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_statistics: Option<TextStatistics>,
}

/// Characters the fallback knowledge base always knows about.
const FALLBACK_CHARACTERS: &[(&str, &str)] = &[
    ("贾宝玉", "protagonist"),
    ("林黛玉", "protagonist"),
    ("薛宝钗", "principal"),
    ("贾母", "matriarch"),
    ("王熙凤", "household manager"),
];

impl KnowledgeBase {
    /// Deterministic knowledge base used when analysis is unavailable.
    ///
    /// When a source text is supplied, its statistics are still computed and
    /// only fallback characters that actually occur in it are kept.
    pub fn fallback(source: Option<&str>) -> Self {
        let characters = FALLBACK_CHARACTERS
            .iter()
            .filter(|(name, _)| source.is_none_or(|text| text.contains(name)))
            .map(|(name, description)| CharacterProfile {
                name: (*name).to_string(),
                description: (*description).to_string(),
                traits: Vec::new(),
            })
            .collect();

        Self {
            characters,
            relationships: Vec::new(),
            themes: vec!["rise and fall of a great house".to_string()],
            plotlines: Vec::new(),
            text_statistics: source.map(TextStatistics::of),
        }
    }

    /// One-line summary used in downstream prompts.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.characters.is_empty() {
            parts.push(format!("{} characters", self.characters.len()));
        }
        if !self.relationships.is_empty() {
            parts.push(format!("{} relationships", self.relationships.len()));
        }
        if !self.plotlines.is_empty() {
            parts.push(format!("{} plotlines", self.plotlines.len()));
        }
        if parts.is_empty() {
            "basic information about the source".to_string()
        } else {
            parts.join(", ")
        }
    }

    pub fn character_names(&self) -> Vec<&str> {
        self.characters.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_statistics_counts_chapters_and_paragraphs() {
        let text = "第一回 甄士隐梦幻识通灵\n\n话说...\n\n第二回 贾夫人仙逝扬州城\n\n却说...";
        let stats = TextStatistics::of(text);
        assert_eq!(stats.chapters, 2);
        assert_eq!(stats.paragraphs, 4);
        assert_eq!(stats.total_chars, text.chars().count());
    }

    #[test]
    fn test_fallback_without_source_has_all_characters() {
        let kb = KnowledgeBase::fallback(None);
        assert_eq!(kb.characters.len(), FALLBACK_CHARACTERS.len());
        assert!(kb.text_statistics.is_none());
    }

    #[test]
    fn test_fallback_with_source_filters_characters() {
        let kb = KnowledgeBase::fallback(Some("贾宝玉与林黛玉共读西厢"));
        assert_eq!(kb.character_names(), vec!["贾宝玉", "林黛玉"]);
        assert!(kb.text_statistics.is_some());
    }

    #[test]
    fn test_summary_of_empty_knowledge() {
        assert_eq!(
            KnowledgeBase::default().summary(),
            "basic information about the source"
        );
    }

    #[test]
    fn test_deserialize_partial_json() {
        let kb: KnowledgeBase =
            serde_json::from_str(r#"{"characters":[{"name":"贾母"}],"themes":["fate"]}"#).unwrap();
        assert_eq!(kb.characters[0].name, "贾母");
        assert!(kb.relationships.is_empty());
        assert_eq!(kb.summary(), "1 characters");
    }
}
