use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum compatibility score for an ending to be considered compatible.
pub const COMPATIBILITY_THRESHOLD: f64 = 0.7;

/// How well a desired ending fits the established characters and themes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compatibility {
    pub score: f64,
    pub compatible: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Default for Compatibility {
    fn default() -> Self {
        Self {
            score: 1.0,
            compatible: true,
            notes: Vec::new(),
        }
    }
}

/// A conflict keyword rule: when `subject` and any trigger appear together
/// in an ending, the score is reduced by `penalty`.
struct ConflictRule {
    subject: &'static str,
    triggers: &'static [&'static str],
    penalty: f64,
    note: &'static str,
}

const CONFLICT_RULES: &[ConflictRule] = &[
    ConflictRule {
        subject: "宝玉",
        triggers: &["皇帝", "权臣", "富商"],
        penalty: 0.3,
        note: "Baoyu's disdain for rank and wealth conflicts with a pursuit of power",
    },
    ConflictRule {
        subject: "黛玉",
        triggers: &["世故", "圆滑", "适应"],
        penalty: 0.15,
        note: "Daiyu's aloofness conflicts with a worldly, accommodating turn",
    },
    ConflictRule {
        subject: "白茫茫大地",
        triggers: &["皆大欢喜"],
        penalty: 0.1,
        note: "A wholly happy ending conflicts with the theme of emptiness",
    },
];

impl Compatibility {
    /// Deterministic keyword check of a desired ending.
    pub fn assess(desired_ending: &str) -> Self {
        let mut score: f64 = 1.0;
        let mut notes = Vec::new();

        for rule in CONFLICT_RULES {
            if desired_ending.contains(rule.subject)
                && rule.triggers.iter().any(|t| desired_ending.contains(t))
            {
                score -= rule.penalty;
                notes.push(rule.note.to_string());
            }
        }

        let score = score.clamp(0.0, 1.0);
        Self {
            score,
            compatible: score >= COMPATIBILITY_THRESHOLD,
            notes,
        }
    }
}

/// The overall continuation strategy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub overall_approach: String,
    #[serde(default)]
    pub narrative_style: String,
    #[serde(default)]
    pub key_themes: Vec<String>,
    #[serde(default)]
    pub emotional_arc: Vec<String>,
    #[serde(default)]
    pub character_arcs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub compatibility: Compatibility,
}

impl Strategy {
    /// Deterministic strategy derived only from the desired ending.
    pub fn fallback(desired_ending: &str) -> Self {
        Self {
            overall_approach: format!(
                "Continue the established narrative steadily toward the ending: {}",
                desired_ending.trim()
            ),
            narrative_style: "classical vernacular novel, omniscient narrator".to_string(),
            key_themes: vec![
                "impermanence".to_string(),
                "decline of the household".to_string(),
            ],
            emotional_arc: vec![
                "foreboding".to_string(),
                "crisis".to_string(),
                "collapse".to_string(),
                "resolution".to_string(),
            ],
            character_arcs: BTreeMap::new(),
            compatibility: Compatibility::assess(desired_ending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_ending_is_fully_compatible() {
        let c = Compatibility::assess("贾府衰败势如流");
        assert_eq!(c.score, 1.0);
        assert!(c.compatible);
        assert!(c.notes.is_empty());
    }

    #[test]
    fn test_character_conflict_reduces_score() {
        let c = Compatibility::assess("宝玉终成权臣");
        assert!((c.score - 0.7).abs() < 1e-9);
        assert!(c.compatible);
        assert_eq!(c.notes.len(), 1);
    }

    #[test]
    fn test_multiple_conflicts_can_make_incompatible() {
        let c = Compatibility::assess("宝玉做了皇帝，黛玉变得世故圆滑");
        assert!(c.score < COMPATIBILITY_THRESHOLD);
        assert!(!c.compatible);
        assert_eq!(c.notes.len(), 2);
    }

    #[test]
    fn test_fallback_strategy_mentions_ending() {
        let s = Strategy::fallback("  往昔繁华化虚无 ");
        assert!(s.overall_approach.ends_with("往昔繁华化虚无"));
        assert_eq!(s.emotional_arc.len(), 4);
        assert!(s.compatibility.compatible);
    }
}
