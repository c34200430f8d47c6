use super::json::parse_value;
use super::{Envelope, ScoreRequest, StageKind, StageOutcome, StagePayload, StageRequest, StageUnit, wrong_request};
use crate::errors::StageError;
use crate::inference::{InferenceClient, InferenceOptions};
use crate::model::{Dimension, QualityScore, QualityWeights};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Text characters sent to the model for review.
const REVIEW_CHARS: usize = 12000;

const SYSTEM_PROMPT: &str = "You review continuations of a classical Chinese novel. \
Score each dimension from 0 to 10 and answer with JSON only.";

const CLASSICAL_MARKERS: &[&str] = &["话说", "原来", "却说", "且听下回分解", "诗曰", "词曰", "只见"];
const WENYAN_PARTICLES: &[&str] = &["之", "乎", "者", "也", "矣", "焉", "哉"];
const CONTRADICTION_MARKERS: &[&str] = &["却又", "但是却", "然而却"];
const TENSION_MARKERS: &[&str] = &["却", "原来", "突然", "不想", "谁知"];
const CLOSING_MARKERS: &[&str] = &["且听下回分解", "正是", "后事如何", "下回书交代"];
const IMAGERY_MARKERS: &[&str] = &["月下", "花开", "风吹", "雨打", "雪飘"];
const EMOTION_MARKERS: &[&str] = &["伤感", "喜悦", "悲伤", "思念", "无奈"];
const VERSE_MARKERS: &[&str] = &["诗曰", "词曰", "有诗为证", "正是"];

fn present(text: &str, markers: &[&str]) -> usize {
    markers.iter().filter(|m| text.contains(*m)).count()
}

/// Marker-count scoring used when the model cannot be consulted.
pub fn heuristic_dimensions(text: &str, characters: &[String]) -> BTreeMap<Dimension, f64> {
    let style = 5.0
        + (present(text, CLASSICAL_MARKERS) as f64 * 0.5).min(3.0)
        + (present(text, WENYAN_PARTICLES) as f64 * 0.2).min(1.5);

    let named = characters.iter().filter(|name| text.contains(name.as_str())).count();
    let character = 5.0 + (named as f64 * 0.5).min(4.0);

    let mut plot: f64 = 5.0;
    if present(text, CONTRADICTION_MARKERS) <= 2 {
        plot += 1.5;
    }
    if present(text, TENSION_MARKERS) >= 3 {
        plot += 1.0;
    }
    if present(text, CLOSING_MARKERS) > 0 {
        plot += 1.0;
    }

    let mut literary: f64 = 5.0;
    if text.chars().count() > 1000 {
        literary += 1.0;
    }
    if present(text, IMAGERY_MARKERS) >= 2 {
        literary += 1.0;
    }
    if present(text, EMOTION_MARKERS) >= 1 {
        literary += 1.0;
    }
    if present(text, VERSE_MARKERS) >= 1 {
        literary += 1.0;
    }

    BTreeMap::from([
        (Dimension::StyleConsistency, style.min(10.0)),
        (Dimension::CharacterAccuracy, character.min(10.0)),
        (Dimension::PlotReasonability, plot.min(10.0)),
        (Dimension::LiteraryQuality, literary.min(10.0)),
    ])
}

/// Read dimension scores from model JSON. Scores may sit at the top level or
/// under `dimensions` / `scores`, as numbers or numeric strings.
fn parse_dimensions(value: &Value) -> Option<BTreeMap<Dimension, f64>> {
    let source = value
        .get("dimensions")
        .or_else(|| value.get("scores"))
        .unwrap_or(value);

    let mut dimensions = BTreeMap::new();
    for dimension in Dimension::ALL {
        let score = source.get(dimension.as_str()).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Object(_) => v.get("score").and_then(Value::as_f64),
            _ => None,
        });
        dimensions.insert(dimension, score?);
    }
    Some(dimensions)
}

/// Scores the full continuation text.
pub struct QualityChecker {
    client: Arc<dyn InferenceClient>,
    weights: QualityWeights,
    options: InferenceOptions,
}

impl QualityChecker {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self {
            client,
            weights: QualityWeights::default(),
            options: InferenceOptions::for_stage(StageKind::QualityChecker),
        }
    }

    pub fn with_weights(mut self, weights: QualityWeights) -> Self {
        self.weights = weights;
        self
    }

    async fn score(&self, req: &ScoreRequest) -> StageOutcome {
        let excerpt: String = req.text.chars().take(REVIEW_CHARS).collect();
        let prompt = format!(
            "Text under review:\n{}\n\nReturn JSON {{\"style_consistency\": n, \"character_accuracy\": n, \
             \"plot_reasonability\": n, \"literary_quality\": n, \"suggestions\": []}}.",
            excerpt
        );

        let heuristic = |reason: String| StageOutcome::Degraded {
            payload: StagePayload::Quality(QualityScore::from_dimensions(
                heuristic_dimensions(&req.text, &req.characters),
                &self.weights,
                req.threshold,
            )),
            reason,
        };

        let output = match self.client.invoke(SYSTEM_PROMPT, &prompt, &self.options).await {
            Ok(output) => output,
            Err(err) => return heuristic(StageError::from_inference(self.kind(), &err).to_string()),
        };

        let parsed = parse_value(&output).and_then(|value| {
            parse_dimensions(&value)
                .map(|dims| (dims, value))
                .ok_or_else(|| "missing dimension scores".to_string())
        });
        match parsed {
            Ok((dimensions, value)) => {
                let mut score = QualityScore::from_dimensions(dimensions, &self.weights, req.threshold);
                let extra = value
                    .get("suggestions")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect::<Vec<_>>())
                    .unwrap_or_default();
                for suggestion in extra {
                    if !score.suggestions.contains(&suggestion) {
                        score.suggestions.push(suggestion);
                    }
                }
                StageOutcome::Ok(StagePayload::Quality(score))
            }
            Err(reason) => heuristic(
                StageError::MalformedOutput {
                    stage: self.kind(),
                    reason,
                }
                .to_string(),
            ),
        }
    }
}

#[async_trait]
impl StageUnit for QualityChecker {
    fn kind(&self) -> StageKind {
        StageKind::QualityChecker
    }

    async fn process(&self, request: StageRequest) -> Envelope {
        let StageRequest::Score(ref req) = request else {
            return wrong_request(self.kind(), &request);
        };
        if req.text.trim().is_empty() {
            return Envelope::rejected(self.kind(), "text to score is empty");
        }
        Envelope::from_outcome(self.kind(), self.score(req).await)
    }
}
