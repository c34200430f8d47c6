use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Dimensions below this score get a targeted suggestion and are fed back
/// into revision prompts.
pub const SUGGESTION_FLOOR: f64 = 7.0;

/// The four scored dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    StyleConsistency,
    CharacterAccuracy,
    PlotReasonability,
    LiteraryQuality,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::StyleConsistency,
        Dimension::CharacterAccuracy,
        Dimension::PlotReasonability,
        Dimension::LiteraryQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::StyleConsistency => "style_consistency",
            Dimension::CharacterAccuracy => "character_accuracy",
            Dimension::PlotReasonability => "plot_reasonability",
            Dimension::LiteraryQuality => "literary_quality",
        }
    }

    /// Human readable label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            Dimension::StyleConsistency => "Style consistency",
            Dimension::CharacterAccuracy => "Character accuracy",
            Dimension::PlotReasonability => "Plot reasonability",
            Dimension::LiteraryQuality => "Literary quality",
        }
    }

    fn advice(&self) -> &'static str {
        match self {
            Dimension::StyleConsistency => {
                "match the classical narration more closely (chapter openings, set phrases, closing couplet)"
            }
            Dimension::CharacterAccuracy => {
                "keep characters' speech and choices consistent with their established personalities"
            }
            Dimension::PlotReasonability => {
                "tighten causality between events and the links to neighbouring chapters"
            }
            Dimension::LiteraryQuality => {
                "enrich imagery, poetry and symbolism"
            }
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative weight of each dimension in the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    #[serde(default = "default_style_weight")]
    pub style_consistency: f64,
    #[serde(default = "default_character_weight")]
    pub character_accuracy: f64,
    #[serde(default = "default_plot_weight")]
    pub plot_reasonability: f64,
    #[serde(default = "default_literary_weight")]
    pub literary_quality: f64,
}

fn default_style_weight() -> f64 {
    0.30
}

fn default_character_weight() -> f64 {
    0.30
}

fn default_plot_weight() -> f64 {
    0.25
}

fn default_literary_weight() -> f64 {
    0.15
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            style_consistency: default_style_weight(),
            character_accuracy: default_character_weight(),
            plot_reasonability: default_plot_weight(),
            literary_quality: default_literary_weight(),
        }
    }
}

impl QualityWeights {
    pub fn weight(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::StyleConsistency => self.style_consistency,
            Dimension::CharacterAccuracy => self.character_accuracy,
            Dimension::PlotReasonability => self.plot_reasonability,
            Dimension::LiteraryQuality => self.literary_quality,
        }
    }

    pub fn sum(&self) -> f64 {
        Dimension::ALL.iter().map(|d| self.weight(*d)).sum()
    }
}

/// Report grade of a single score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Excellent,
    Good,
    Pass,
    NeedsWork,
    Rewrite,
}

impl Grade {
    pub fn for_score(score: f64) -> Self {
        if score >= 9.0 {
            Grade::Excellent
        } else if score >= 8.0 {
            Grade::Good
        } else if score >= 7.0 {
            Grade::Pass
        } else if score >= 6.0 {
            Grade::NeedsWork
        } else {
            Grade::Rewrite
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Excellent => write!(f, "excellent"),
            Grade::Good => write!(f, "good"),
            Grade::Pass => write!(f, "pass"),
            Grade::NeedsWork => write!(f, "needs work"),
            Grade::Rewrite => write!(f, "rewrite"),
        }
    }
}

/// A scored assessment of the full continuation text.
///
/// `passed` always equals `overall >= threshold`; use [`QualityScore::with_threshold`]
/// to re-apply a threshold to a score produced elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub overall: f64,
    pub dimensions: BTreeMap<Dimension, f64>,
    pub threshold: f64,
    pub passed: bool,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl QualityScore {
    /// Build a score from per-dimension values.
    ///
    /// Dimension scores are clamped to [0, 10]; missing dimensions count as 0.
    /// The overall score is the weighted sum rounded to one decimal.
    pub fn from_dimensions(
        dimensions: BTreeMap<Dimension, f64>,
        weights: &QualityWeights,
        threshold: f64,
    ) -> Self {
        let dimensions: BTreeMap<Dimension, f64> = Dimension::ALL
            .iter()
            .map(|d| (*d, dimensions.get(d).copied().unwrap_or(0.0).clamp(0.0, 10.0)))
            .collect();

        let total_weight = weights.sum();
        let weighted: f64 = dimensions
            .iter()
            .map(|(d, score)| score * weights.weight(*d))
            .sum();
        let overall = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };
        let overall = ((overall * 10.0).round() / 10.0).clamp(0.0, 10.0);

        let suggestions = derive_suggestions(&dimensions, overall, threshold);
        Self {
            overall,
            dimensions,
            threshold,
            passed: overall >= threshold,
            suggestions,
        }
    }

    /// Re-apply a threshold, recomputing `passed` and the overall suggestion.
    ///
    /// Per-dimension and model-supplied suggestions are kept as they are.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.overall = self.overall.clamp(0.0, 10.0);
        self.threshold = threshold;
        self.passed = self.overall >= threshold;

        let line = overall_suggestion(self.overall, threshold);
        match self.suggestions.iter().position(|s| is_overall_suggestion(s)) {
            Some(index) => self.suggestions[index] = line,
            None => self.suggestions.push(line),
        }
        self
    }

    pub fn grade(&self) -> Grade {
        Grade::for_score(self.overall)
    }

    pub fn dimension(&self, dimension: Dimension) -> f64 {
        self.dimensions.get(&dimension).copied().unwrap_or(0.0)
    }

    /// Dimensions below the suggestion floor, weakest first.
    pub fn weak_dimensions(&self) -> Vec<(Dimension, f64)> {
        let mut weak: Vec<(Dimension, f64)> = self
            .dimensions
            .iter()
            .filter(|(_, s)| **s < SUGGESTION_FLOOR)
            .map(|(d, s)| (*d, *s))
            .collect();
        weak.sort_by(|a, b| a.1.total_cmp(&b.1));
        weak
    }
}

fn derive_suggestions(dimensions: &BTreeMap<Dimension, f64>, overall: f64, threshold: f64) -> Vec<String> {
    let mut suggestions: Vec<String> = dimensions
        .iter()
        .filter(|(_, score)| **score < SUGGESTION_FLOOR)
        .map(|(d, score)| format!("{} ({:.1}): {}", d.label(), score, d.advice()))
        .collect();

    suggestions.push(overall_suggestion(overall, threshold));
    suggestions
}

const KEEP_VOICE: &str = "Keep the current voice and pacing in further revisions";

fn overall_suggestion(overall: f64, threshold: f64) -> String {
    if overall < threshold {
        format!(
            "Overall score {:.1} is below the threshold {:.1}; revise the weakest dimensions first",
            overall, threshold
        )
    } else {
        KEEP_VOICE.to_string()
    }
}

fn is_overall_suggestion(suggestion: &str) -> bool {
    suggestion == KEEP_VOICE || suggestion.starts_with("Overall score ")
}

/// What a revision request is allowed to know about the last score.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityFeedback {
    pub overall: f64,
    pub weak_dimensions: Vec<(Dimension, f64)>,
    pub suggestions: Vec<String>,
}

impl QualityFeedback {
    pub fn from_score(score: &QualityScore) -> Self {
        Self {
            overall: score.overall,
            weak_dimensions: score.weak_dimensions(),
            suggestions: score.suggestions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(values: [f64; 4]) -> BTreeMap<Dimension, f64> {
        Dimension::ALL.iter().copied().zip(values).collect()
    }

    #[test]
    fn test_weighted_overall_is_rounded() {
        let score = QualityScore::from_dimensions(dims([8.0, 7.0, 6.0, 8.5]), &QualityWeights::default(), 7.0);
        // 2.4 + 2.1 + 1.5 + 1.275 = 7.275
        assert_eq!(score.overall, 7.3);
        assert!(score.passed);
    }

    #[test]
    fn test_passed_matches_threshold() {
        let score = QualityScore::from_dimensions(dims([6.0; 4]), &QualityWeights::default(), 7.0);
        assert_eq!(score.overall, 6.0);
        assert!(!score.passed);
        let relaxed = score.with_threshold(6.0);
        assert!(relaxed.passed);
        assert_eq!(relaxed.threshold, 6.0);
    }

    #[test]
    fn test_with_threshold_clamps_foreign_scores() {
        let foreign = QualityScore {
            overall: 14.0,
            dimensions: BTreeMap::new(),
            threshold: 100.0,
            passed: false,
            suggestions: Vec::new(),
        };
        let fixed = foreign.with_threshold(7.0);
        assert_eq!(fixed.overall, 10.0);
        assert!(fixed.passed);
    }

    #[test]
    fn test_with_threshold_rewrites_the_overall_suggestion() {
        let mut score = QualityScore::from_dimensions(dims([6.5; 4]), &QualityWeights::default(), 7.0);
        score.suggestions.push("多用伏笔".to_string());
        assert!(score.suggestions.iter().any(|s| s.contains("below the threshold 7.0")));

        let relaxed = score.clone().with_threshold(6.0);
        assert!(relaxed.passed);
        assert!(relaxed.suggestions.contains(&KEEP_VOICE.to_string()));
        assert!(!relaxed.suggestions.iter().any(|s| s.starts_with("Overall score")));
        assert_eq!(relaxed.suggestions.len(), score.suggestions.len());
        assert_eq!(relaxed.suggestions.last().unwrap(), "多用伏笔");

        let strict = relaxed.with_threshold(9.0);
        assert!(!strict.passed);
        assert!(strict.suggestions.iter().any(|s| s.contains("below the threshold 9.0")));
        assert!(!strict.suggestions.contains(&KEEP_VOICE.to_string()));
    }

    #[test]
    fn test_dimension_scores_are_clamped() {
        let score = QualityScore::from_dimensions(dims([12.0, -1.0, 5.0, 5.0]), &QualityWeights::default(), 7.0);
        assert_eq!(score.dimension(Dimension::StyleConsistency), 10.0);
        assert_eq!(score.dimension(Dimension::CharacterAccuracy), 0.0);
    }

    #[test]
    fn test_missing_dimensions_count_as_zero() {
        let mut partial = BTreeMap::new();
        partial.insert(Dimension::StyleConsistency, 10.0);
        let score = QualityScore::from_dimensions(partial, &QualityWeights::default(), 7.0);
        assert_eq!(score.dimensions.len(), 4);
        assert_eq!(score.overall, 3.0);
    }

    #[test]
    fn test_suggestions_cover_weak_dimensions_plus_overall() {
        let score = QualityScore::from_dimensions(dims([5.0, 8.0, 6.5, 9.0]), &QualityWeights::default(), 7.0);
        assert_eq!(score.suggestions.len(), 3);
        assert!(score.suggestions[0].starts_with("Style consistency"));
        assert!(score.suggestions[2].starts_with("Overall score"));
    }

    #[test]
    fn test_feedback_lists_weakest_first() {
        let score = QualityScore::from_dimensions(dims([6.5, 8.0, 4.0, 9.0]), &QualityWeights::default(), 7.0);
        let feedback = QualityFeedback::from_score(&score);
        assert_eq!(
            feedback.weak_dimensions,
            vec![(Dimension::PlotReasonability, 4.0), (Dimension::StyleConsistency, 6.5)]
        );
        assert_eq!(feedback.suggestions, score.suggestions);
    }

    #[test]
    fn test_grades() {
        assert_eq!(Grade::for_score(9.0), Grade::Excellent);
        assert_eq!(Grade::for_score(8.2), Grade::Good);
        assert_eq!(Grade::for_score(7.0), Grade::Pass);
        assert_eq!(Grade::for_score(6.9), Grade::NeedsWork);
        assert_eq!(Grade::for_score(2.0), Grade::Rewrite);
        assert_eq!(Grade::NeedsWork.to_string(), "needs work");
    }

    #[test]
    fn test_score_json_uses_dimension_names() {
        let score = QualityScore::from_dimensions(dims([7.0; 4]), &QualityWeights::default(), 7.0);
        let json = serde_json::to_value(&score).unwrap();
        assert_eq!(json["dimensions"]["plot_reasonability"], 7.0);
        let back: QualityScore = serde_json::from_value(json).unwrap();
        assert_eq!(back, score);
    }

    #[test]
    fn test_weights_sum() {
        assert!((QualityWeights::default().sum() - 1.0).abs() < 1e-9);
    }
}
