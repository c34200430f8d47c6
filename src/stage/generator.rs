use super::{
    DraftRequest, Envelope, GenerationInput, RevisionRequest, StageKind, StageOutcome,
    StagePayload, StageRequest, StageUnit, wrong_request,
};
use crate::errors::StageError;
use crate::inference::{InferenceClient, InferenceOptions};
use crate::model::ChapterPlanEntry;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};

/// Trailing characters of the previous chapter quoted in a draft prompt.
const PREVIOUS_TAIL_CHARS: usize = 1500;

static FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^```[a-zA-Z]*[ \t]*$").unwrap());
static TRAILING_SPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n").unwrap());
static BLANK_RUN_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

const SYSTEM_PROMPT: &str = "You write chapters of a classical Chinese novel in its original \
vernacular style: chapters open with a two-line title and close with a couplet. \
Answer with the chapter text only.";

/// Normalize generated prose: no carriage returns, code fences or trailing
/// spaces, at most one blank line in a row, trimmed.
pub fn clean_prose(raw: &str) -> String {
    let text = raw.replace('\r', "");
    let text = FENCE_REGEX.replace_all(&text, "");
    let text = TRAILING_SPACE_REGEX.replace_all(&text, "\n");
    let text = BLANK_RUN_REGEX.replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn tail(text: &str, chars: usize) -> &str {
    let count = text.chars().count();
    if count <= chars {
        return text;
    }
    let skip = count - chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

fn describe_entry(entry: &ChapterPlanEntry) -> String {
    let characters = entry
        .main_characters
        .iter()
        .map(|c| {
            if c.emotional_arc.is_empty() {
                c.name.clone()
            } else {
                format!("{} ({})", c.name, c.emotional_arc)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let events = entry
        .plot_points
        .iter()
        .map(|p| format!("{}. {}", p.sequence, p.event))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Chapter {}: {}\nPhase: {}\nCharacters: {}\nPlot points:\n{}",
        entry.chapter_number, entry.title, entry.narrative_phase, characters, events
    )
}

/// Writes and revises chapter prose.
pub struct ContentGenerator {
    client: Arc<dyn InferenceClient>,
    options: InferenceOptions,
}

impl ContentGenerator {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self {
            client,
            options: InferenceOptions::for_stage(StageKind::ContentGenerator),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.options = self.options.with_temperature(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options = self.options.with_max_tokens(max_tokens);
        self
    }

    fn draft_prompt(req: &DraftRequest) -> String {
        let mut prompt = format!(
            "{}\n\nOverall approach: {}\nStyle: {}\nThe whole continuation ({} chapters) ends with: {}\n",
            describe_entry(&req.entry),
            req.strategy.overall_approach,
            req.strategy.narrative_style,
            req.total_chapters,
            req.desired_ending
        );
        if let Some(ref previous) = req.previous_text {
            prompt.push_str("\nThe previous chapter ended:\n");
            prompt.push_str(tail(previous, PREVIOUS_TAIL_CHARS));
            prompt.push('\n');
        }
        prompt.push_str("\nWrite the full chapter.");
        prompt
    }

    fn revision_prompt(req: &RevisionRequest) -> String {
        let mut prompt = format!(
            "{}\n\nRevision round {}. The last review scored the text {:.1}.\n",
            describe_entry(&req.entry),
            req.iteration,
            req.feedback.overall
        );
        if !req.feedback.weak_dimensions.is_empty() {
            prompt.push_str("\nWeak dimensions:\n");
            for (dimension, score) in &req.feedback.weak_dimensions {
                prompt.push_str(&format!("- {}: {:.1}\n", dimension.label(), score));
            }
        }
        if !req.feedback.suggestions.is_empty() {
            prompt.push_str("\nSuggestions:\n");
            for (i, suggestion) in req.feedback.suggestions.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, suggestion));
            }
        }
        prompt.push_str("\nCurrent text:\n");
        prompt.push_str(&req.current_text);
        prompt.push_str("\n\nRewrite the chapter, keeping its plot points.");
        prompt
    }

    async fn write(&self, prompt: &str) -> StageOutcome {
        match self.client.invoke(SYSTEM_PROMPT, prompt, &self.options).await {
            Ok(raw) => {
                let text = clean_prose(&raw);
                if text.is_empty() {
                    StageOutcome::Fatal(StageError::MalformedOutput {
                        stage: StageKind::ContentGenerator,
                        reason: "empty chapter text".to_string(),
                    })
                } else {
                    StageOutcome::Ok(StagePayload::Chapter(text))
                }
            }
            Err(err) => StageOutcome::Fatal(StageError::from_inference(StageKind::ContentGenerator, &err)),
        }
    }
}

#[async_trait]
impl StageUnit for ContentGenerator {
    fn kind(&self) -> StageKind {
        StageKind::ContentGenerator
    }

    async fn process(&self, request: StageRequest) -> Envelope {
        let StageRequest::Generate(ref input) = request else {
            return wrong_request(self.kind(), &request);
        };
        let prompt = match input {
            GenerationInput::Draft(req) => {
                if !req.entry.title.is_complete() {
                    return Envelope::rejected(self.kind(), "plan entry has no title");
                }
                Self::draft_prompt(req)
            }
            GenerationInput::Revise(req) => {
                if !req.entry.title.is_complete() {
                    return Envelope::rejected(self.kind(), "plan entry has no title");
                }
                if req.current_text.trim().is_empty() {
                    return Envelope::rejected(self.kind(), "nothing to revise");
                }
                Self::revision_prompt(req)
            }
        };
        tracing::debug!(prompt_chars = prompt.chars().count(), "Generating chapter");
        Envelope::from_outcome(self.kind(), self.write(&prompt).await)
    }
}
