//! Chapter plan schema, validation and the legacy-outline adapter.
//!
//! The plan has exactly one current schema (version 2). Planner output in the
//! older outline shape (`chapter_num`, single-string `title`, `key_events`) is
//! converted by [`adapt_legacy_entry`] when raw output is turned into a typed
//! plan; nothing downstream ever sees the legacy shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Current plan schema version.
pub const PLAN_VERSION: u32 = 2;

/// Where a chapter sits in the overall narrative arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativePhase {
    Setup,
    Development,
    Climax,
    Resolution,
}

impl NarrativePhase {
    /// Four-phase partition of a chapter range: the first 12.5% set up,
    /// up to 50% develop, up to 87.5% climax, the rest resolve.
    pub fn for_chapter(number: u32, start: u32, count: u32) -> Self {
        let offset = u64::from(number.saturating_sub(start));
        let count = u64::from(count);
        if offset < count * 125 / 1000 {
            NarrativePhase::Setup
        } else if offset < count / 2 {
            NarrativePhase::Development
        } else if offset < count * 875 / 1000 {
            NarrativePhase::Climax
        } else {
            NarrativePhase::Resolution
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "setup" | "铺垫" => Some(NarrativePhase::Setup),
            "development" | "发展" => Some(NarrativePhase::Development),
            "climax" | "高潮" => Some(NarrativePhase::Climax),
            "resolution" | "结局" => Some(NarrativePhase::Resolution),
            _ => None,
        }
    }
}

impl fmt::Display for NarrativePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NarrativePhase::Setup => write!(f, "setup"),
            NarrativePhase::Development => write!(f, "development"),
            NarrativePhase::Climax => write!(f, "climax"),
            NarrativePhase::Resolution => write!(f, "resolution"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Primary,
    Secondary,
    Minor,
}

impl Importance {
    fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "primary" | "main" => Importance::Primary,
            "secondary" => Importance::Secondary,
            _ => Importance::Minor,
        }
    }
}

/// Classical two-line chapter title.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChapterTitle {
    pub first_part: String,
    pub second_part: String,
}

impl ChapterTitle {
    pub fn new(first_part: impl Into<String>, second_part: impl Into<String>) -> Self {
        Self {
            first_part: first_part.into(),
            second_part: second_part.into(),
        }
    }

    /// Both lines are present.
    pub fn is_complete(&self) -> bool {
        !self.first_part.trim().is_empty() && !self.second_part.trim().is_empty()
    }

    /// Split a single-string title into two lines on whitespace or a comma.
    fn split(title: &str) -> Self {
        let title = title.trim();
        let separators: &[char] = &[' ', '\u{3000}', '，', ',', '/'];
        match title.split_once(separators) {
            Some((first, second)) => Self::new(first.trim(), second.trim()),
            None => Self::new(title, ""),
        }
    }
}

impl fmt::Display for ChapterTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.second_part.is_empty() {
            write!(f, "{}", self.first_part)
        } else {
            write!(f, "{}　{}", self.first_part, self.second_part)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedCharacter {
    pub name: String,
    pub importance: Importance,
    #[serde(default)]
    pub emotional_arc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotPoint {
    pub sequence: u32,
    pub event: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LiteraryElements {
    #[serde(default)]
    pub poetry_count: u32,
    #[serde(default)]
    pub symbolism: Vec<String>,
    #[serde(default)]
    pub foreshadowing: Vec<String>,
}

/// Links to the neighbouring chapters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Connections {
    #[serde(default)]
    pub previous: String,
    #[serde(default)]
    pub next: String,
}

/// One chapter of the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterPlanEntry {
    pub chapter_number: u32,
    pub title: ChapterTitle,
    pub narrative_phase: NarrativePhase,
    pub main_characters: Vec<PlannedCharacter>,
    pub plot_points: Vec<PlotPoint>,
    #[serde(default)]
    pub literary_elements: LiteraryElements,
    #[serde(default)]
    pub connections: Connections,
}

impl ChapterPlanEntry {
    /// Deterministic entry used when planning is unavailable.
    pub fn fallback(chapter_number: u32, narrative_phase: NarrativePhase) -> Self {
        Self {
            chapter_number,
            title: ChapterTitle::new(
                format!("第{}回上", chapter_number),
                format!("第{}回下", chapter_number),
            ),
            narrative_phase,
            main_characters: vec![PlannedCharacter {
                name: "贾宝玉".to_string(),
                importance: Importance::Primary,
                emotional_arc: "to be planned".to_string(),
            }],
            plot_points: vec![PlotPoint {
                sequence: 1,
                event: "plot point to be planned".to_string(),
                location: String::new(),
                participants: Vec::new(),
            }],
            literary_elements: LiteraryElements {
                poetry_count: 1,
                ..LiteraryElements::default()
            },
            connections: Connections::default(),
        }
    }

    /// Short description used when prompting for neighbouring chapters.
    pub fn summary(&self) -> String {
        let events = self
            .plot_points
            .iter()
            .take(2)
            .map(|p| p.event.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("第{}回 {} - {}", self.chapter_number, self.title, events)
    }

    /// Parse an entry from planner JSON, accepting both schemas.
    ///
    /// `fallback_number` is used when the entry carries no number;
    /// the narrative phase is derived from the range when missing.
    pub fn from_value(value: &Value, fallback_number: u32, start: u32, count: u32) -> Option<Self> {
        if value.get("chapter_num").is_some() && value.get("chapter_number").is_none() {
            return adapt_legacy_entry(value, start, count);
        }

        let chapter_number = value
            .get("chapter_number")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(fallback_number);

        let title_value = value.get("title").or_else(|| value.get("chapter_title"))?;
        let title = match title_value {
            Value::String(s) => ChapterTitle::split(s),
            Value::Object(_) => ChapterTitle::new(
                str_field(title_value, "first_part"),
                str_field(title_value, "second_part"),
            ),
            _ => return None,
        };

        let narrative_phase = value
            .get("narrative_phase")
            .and_then(Value::as_str)
            .and_then(NarrativePhase::parse)
            .unwrap_or_else(|| NarrativePhase::for_chapter(chapter_number, start, count));

        let main_characters = value
            .get("main_characters")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(parse_character).collect())
            .unwrap_or_default();

        let plot_points = value
            .get("plot_points")
            .or_else(|| value.get("main_plot_points"))
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .enumerate()
                    .filter_map(|(i, p)| parse_plot_point(p, i as u32 + 1))
                    .collect()
            })
            .unwrap_or_default();

        let literary_elements = value
            .get("literary_elements")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let connections = match value.get("connections") {
            Some(c) => Connections {
                previous: str_field(c, "previous"),
                next: str_field(c, "next"),
            },
            None => value
                .get("chapter_metadata")
                .map(|m| Connections {
                    previous: str_field(m, "previous_chapter_link"),
                    next: str_field(m, "next_chapter_setup"),
                })
                .unwrap_or_default(),
        };

        Some(Self {
            chapter_number,
            title,
            narrative_phase,
            main_characters,
            plot_points,
            literary_elements,
            connections,
        })
    }
}

/// Convert a legacy outline entry into the current schema.
///
/// Legacy entries look like
/// `{"chapter_num": 81, "title": "...", "phase": "...", "key_events": [...],
/// "character_development": {"name": "arc"}}`.
pub fn adapt_legacy_entry(value: &Value, start: u32, count: u32) -> Option<ChapterPlanEntry> {
    let chapter_number = value
        .get("chapter_num")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())?;

    let title = ChapterTitle::split(value.get("title").and_then(Value::as_str).unwrap_or(""));

    let narrative_phase = value
        .get("phase")
        .and_then(Value::as_str)
        .and_then(NarrativePhase::parse)
        .unwrap_or_else(|| NarrativePhase::for_chapter(chapter_number, start, count));

    let plot_points = value
        .get("key_events")
        .and_then(Value::as_array)
        .map(|events| {
            events
                .iter()
                .filter_map(Value::as_str)
                .enumerate()
                .map(|(i, event)| PlotPoint {
                    sequence: i as u32 + 1,
                    event: event.to_string(),
                    location: String::new(),
                    participants: Vec::new(),
                })
                .collect()
        })
        .unwrap_or_default();

    let main_characters = value
        .get("character_development")
        .and_then(Value::as_object)
        .map(|devs| {
            devs.iter()
                .map(|(name, arc)| PlannedCharacter {
                    name: name.clone(),
                    importance: Importance::Primary,
                    emotional_arc: arc.as_str().unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ChapterPlanEntry {
        chapter_number,
        title,
        narrative_phase,
        main_characters,
        plot_points,
        literary_elements: LiteraryElements::default(),
        connections: Connections::default(),
    })
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn parse_character(value: &Value) -> Option<PlannedCharacter> {
    let name = value.get("name").and_then(Value::as_str)?.trim();
    if name.is_empty() {
        return None;
    }
    Some(PlannedCharacter {
        name: name.to_string(),
        importance: Importance::parse(
            value.get("importance").and_then(Value::as_str).unwrap_or("minor"),
        ),
        emotional_arc: str_field(value, "emotional_arc"),
    })
}

fn parse_plot_point(value: &Value, default_sequence: u32) -> Option<PlotPoint> {
    let event = value.get("event").and_then(Value::as_str)?.trim();
    if event.is_empty() {
        return None;
    }
    let sequence = value
        .get("sequence")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(default_sequence);
    let participants = value
        .get("participants")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default();
    Some(PlotPoint {
        sequence,
        event: event.to_string(),
        location: str_field(value, "location"),
        participants,
    })
}

/// Result of validating a plan against the requested chapter range.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanValidation {
    /// Problems that make the plan unusable.
    pub issues: Vec<String>,
    /// Non-blocking observations.
    pub suggestions: Vec<String>,
}

impl PlanValidation {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Appearance counts of one character across the plan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CharacterAppearances {
    pub total: usize,
    pub primary: Vec<u32>,
    pub secondary: Vec<u32>,
    pub minor: Vec<u32>,
    pub absent: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CharacterDistribution {
    pub characters: BTreeMap<String, CharacterAppearances>,
    /// 0..=1, higher means appearances are spread more evenly.
    pub balance: f64,
}

/// Ordered, per-chapter outline consumed by content generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterPlan {
    pub version: u32,
    pub start_chapter: u32,
    pub entries: Vec<ChapterPlanEntry>,
}

impl ChapterPlan {
    pub fn new(start_chapter: u32, entries: Vec<ChapterPlanEntry>) -> Self {
        Self {
            version: PLAN_VERSION,
            start_chapter,
            entries,
        }
    }

    /// Deterministic plan for `count` chapters starting at `start`.
    ///
    /// The final chapter's plot point carries the desired ending.
    pub fn fallback(start: u32, count: u32, desired_ending: &str) -> Self {
        let mut entries: Vec<ChapterPlanEntry> = (0..count)
            .map(|i| {
                let number = start.saturating_add(i);
                ChapterPlanEntry::fallback(number, NarrativePhase::for_chapter(number, start, count))
            })
            .collect();

        if let Some(last) = entries.last_mut()
            && let Some(point) = last.plot_points.first_mut()
        {
            point.event = format!("move toward the ending: {}", desired_ending.trim());
        }

        Self::new(start, entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn chapter_numbers(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.chapter_number).collect()
    }

    /// Check the plan against the requested range.
    ///
    /// Numbers must start at `start`, be contiguous and cover exactly `count`
    /// chapters; every entry needs a complete title and a plot point.
    pub fn validate(&self, start: u32, count: u32) -> PlanValidation {
        let mut validation = PlanValidation::default();

        if self.entries.is_empty() {
            validation.issues.push("plan has no chapters".to_string());
            return validation;
        }

        if self.entries.len() != count as usize {
            validation.issues.push(format!(
                "plan has {} chapters, expected {}",
                self.entries.len(),
                count
            ));
        }

        for (i, entry) in self.entries.iter().enumerate() {
            match u32::try_from(i).ok().and_then(|i| start.checked_add(i)) {
                Some(expected) if entry.chapter_number != expected => {
                    validation.issues.push(format!(
                        "chapter {} found where {} was expected",
                        entry.chapter_number, expected
                    ));
                }
                Some(_) => {}
                None => validation.issues.push(format!(
                    "chapter {} lies past the last chapter number",
                    entry.chapter_number
                )),
            }
            if !entry.title.is_complete() {
                validation
                    .issues
                    .push(format!("chapter {} is missing a title line", entry.chapter_number));
            }
            if entry.plot_points.is_empty() {
                validation
                    .issues
                    .push(format!("chapter {} has no plot points", entry.chapter_number));
            }
            if entry.main_characters.is_empty() {
                validation.suggestions.push(format!(
                    "chapter {} lists no main characters",
                    entry.chapter_number
                ));
            }
        }

        for pair in self.entries.windows(2) {
            if pair[0].connections.next.is_empty() || pair[1].connections.previous.is_empty() {
                validation.suggestions.push(format!(
                    "the link between chapters {} and {} could be clearer",
                    pair[0].chapter_number, pair[1].chapter_number
                ));
            }
        }

        validation
    }

    /// How often each character appears and in which role.
    pub fn character_distribution(&self) -> CharacterDistribution {
        let mut characters: BTreeMap<String, CharacterAppearances> = BTreeMap::new();

        for entry in &self.entries {
            for character in &entry.main_characters {
                let stats = characters.entry(character.name.clone()).or_default();
                stats.total += 1;
                match character.importance {
                    Importance::Primary => stats.primary.push(entry.chapter_number),
                    Importance::Secondary => stats.secondary.push(entry.chapter_number),
                    Importance::Minor => stats.minor.push(entry.chapter_number),
                }
            }
        }

        let all = self.chapter_numbers();
        for stats in characters.values_mut() {
            stats.absent = all
                .iter()
                .copied()
                .filter(|n| {
                    !stats.primary.contains(n) && !stats.secondary.contains(n) && !stats.minor.contains(n)
                })
                .collect();
        }

        let balance = if characters.is_empty() {
            0.0
        } else {
            let totals: Vec<f64> = characters.values().map(|s| s.total as f64).collect();
            let mean = totals.iter().sum::<f64>() / totals.len() as f64;
            let variance = totals.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / totals.len() as f64;
            (100.0 / (1.0 + variance / 100.0)).round() / 100.0
        };

        CharacterDistribution {
            characters,
            balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_phase_partition_for_three_chapters() {
        let phases: Vec<_> = (81..84)
            .map(|n| NarrativePhase::for_chapter(n, 81, 3))
            .collect();
        assert_eq!(
            phases,
            vec![
                NarrativePhase::Development,
                NarrativePhase::Climax,
                NarrativePhase::Resolution
            ]
        );
    }

    #[test]
    fn test_phase_partition_for_forty_chapters() {
        assert_eq!(NarrativePhase::for_chapter(81, 81, 40), NarrativePhase::Setup);
        assert_eq!(NarrativePhase::for_chapter(85, 81, 40), NarrativePhase::Setup);
        assert_eq!(NarrativePhase::for_chapter(86, 81, 40), NarrativePhase::Development);
        assert_eq!(NarrativePhase::for_chapter(101, 81, 40), NarrativePhase::Climax);
        assert_eq!(NarrativePhase::for_chapter(116, 81, 40), NarrativePhase::Resolution);
        assert_eq!(NarrativePhase::for_chapter(120, 81, 40), NarrativePhase::Resolution);
    }

    #[test]
    fn test_single_chapter_is_resolution() {
        assert_eq!(NarrativePhase::for_chapter(81, 81, 1), NarrativePhase::Resolution);
    }

    #[test]
    fn test_fallback_plan_is_valid() {
        let plan = ChapterPlan::fallback(81, 5, "贾府衰败");
        let validation = plan.validate(81, 5);
        assert!(validation.is_valid(), "{:?}", validation.issues);
        assert_eq!(plan.chapter_numbers(), vec![81, 82, 83, 84, 85]);
        assert!(plan.entries[4].plot_points[0].event.contains("贾府衰败"));
    }

    #[test]
    fn test_validate_detects_gap() {
        let mut plan = ChapterPlan::fallback(81, 3, "x");
        plan.entries[2].chapter_number = 90;
        let validation = plan.validate(81, 3);
        assert!(!validation.is_valid());
        assert!(validation.issues[0].contains("90"));
    }

    #[test]
    fn test_validate_detects_wrong_count() {
        let plan = ChapterPlan::fallback(81, 2, "x");
        assert!(!plan.validate(81, 3).is_valid());
    }

    #[test]
    fn test_validate_detects_missing_title_and_plot_points() {
        let mut plan = ChapterPlan::fallback(1, 1, "x");
        plan.entries[0].title.second_part.clear();
        plan.entries[0].plot_points.clear();
        let validation = plan.validate(1, 1);
        assert_eq!(validation.issues.len(), 2);
    }

    #[test]
    fn test_validate_at_the_top_of_the_chapter_range() {
        let plan = ChapterPlan::fallback(u32::MAX, 1, "x");
        assert_eq!(plan.chapter_numbers(), vec![u32::MAX]);
        assert!(plan.validate(u32::MAX, 1).is_valid());

        let mut extra = plan.clone();
        extra.entries.push(ChapterPlanEntry::fallback(u32::MAX, NarrativePhase::Resolution));
        let validation = extra.validate(u32::MAX, 1);
        assert!(validation.issues.iter().any(|i| i.contains("past the last chapter number")));
    }

    #[test]
    fn test_validate_empty_plan() {
        let plan = ChapterPlan::new(81, Vec::new());
        assert!(!plan.validate(81, 1).is_valid());
    }

    #[test]
    fn test_from_value_current_schema() {
        let value = json!({
            "chapter_number": 82,
            "chapter_title": {"first_part": "王熙凤弄权", "second_part": "贾宝玉探病"},
            "narrative_phase": "climax",
            "main_characters": [{"name": "王熙凤", "importance": "primary", "emotional_arc": "pride"}],
            "main_plot_points": [{"event": "查抄大观园", "location": "怡红院", "participants": ["王熙凤"]}],
            "chapter_metadata": {"previous_chapter_link": "承上", "next_chapter_setup": "启下"}
        });
        let entry = ChapterPlanEntry::from_value(&value, 1, 81, 3).unwrap();
        assert_eq!(entry.chapter_number, 82);
        assert_eq!(entry.title.second_part, "贾宝玉探病");
        assert_eq!(entry.narrative_phase, NarrativePhase::Climax);
        assert_eq!(entry.plot_points[0].sequence, 1);
        assert_eq!(entry.connections.next, "启下");
    }

    #[test]
    fn test_from_value_fills_missing_number_and_phase() {
        let value = json!({
            "title": "风雨夜 灯下书",
            "plot_points": [{"sequence": 3, "event": "夜谈"}]
        });
        let entry = ChapterPlanEntry::from_value(&value, 83, 81, 3).unwrap();
        assert_eq!(entry.chapter_number, 83);
        assert_eq!(entry.title, ChapterTitle::new("风雨夜", "灯下书"));
        assert_eq!(entry.narrative_phase, NarrativePhase::Resolution);
        assert_eq!(entry.plot_points[0].sequence, 3);
    }

    #[test]
    fn test_from_value_routes_legacy_shape_through_adapter() {
        let value = json!({
            "chapter_num": 81,
            "title": "占旺相四美钓游鱼，奉严词两番入家塾",
            "phase": "setup",
            "key_events": ["钓鱼", "入塾"],
            "character_development": {"贾宝玉": "被迫读书"}
        });
        let entry = ChapterPlanEntry::from_value(&value, 1, 81, 40).unwrap();
        assert_eq!(entry.chapter_number, 81);
        assert_eq!(entry.title.first_part, "占旺相四美钓游鱼");
        assert_eq!(entry.title.second_part, "奉严词两番入家塾");
        assert_eq!(entry.plot_points.len(), 2);
        assert_eq!(entry.plot_points[1].sequence, 2);
        assert_eq!(entry.main_characters[0].emotional_arc, "被迫读书");
    }

    #[test]
    fn test_from_value_rejects_missing_title() {
        let value = json!({"chapter_number": 81});
        assert!(ChapterPlanEntry::from_value(&value, 81, 81, 1).is_none());
    }

    #[test]
    fn test_character_distribution() {
        let mut plan = ChapterPlan::fallback(81, 3, "x");
        plan.entries[1].main_characters.push(PlannedCharacter {
            name: "林黛玉".to_string(),
            importance: Importance::Secondary,
            emotional_arc: String::new(),
        });
        let dist = plan.character_distribution();
        let baoyu = &dist.characters["贾宝玉"];
        assert_eq!(baoyu.total, 3);
        assert!(baoyu.absent.is_empty());
        let daiyu = &dist.characters["林黛玉"];
        assert_eq!(daiyu.secondary, vec![82]);
        assert_eq!(daiyu.absent, vec![81, 83]);
        assert!(dist.balance > 0.0 && dist.balance <= 1.0);
    }

    #[test]
    fn test_entry_summary() {
        let entry = ChapterPlanEntry::fallback(81, NarrativePhase::Setup);
        assert!(entry.summary().starts_with("第81回 第81回上"));
    }
}
