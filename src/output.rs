//! Markdown and JSON renderings of a finished run.

use crate::model::{ChapterText, Dimension, Grade};
use crate::orchestrator::FinalArtifact;
use crate::orchestrator::runner::chapter_file;
use crate::store::{ArtifactStore, FileArtifactStore, save_json};
use anyhow::Result;
use serde_json::{Value, json};
use std::fmt::Write as _;
use std::path::Path;

pub fn chapter_markdown(chapter: &ChapterText) -> String {
    let mut out = format!("# 第{}回　{}\n\n", chapter.number, chapter.title);
    if chapter.degraded {
        out.push_str("> This chapter is a placeholder; generation failed.\n\n");
    }
    out.push_str(chapter.text.trim());
    out.push('\n');
    out
}

/// Human readable quality report.
pub fn quality_report_markdown(artifact: &FinalArtifact) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Quality report");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Run: `{}`", artifact.run_id);
    let _ = writeln!(out, "- Desired ending: {}", artifact.request.desired_ending);
    let _ = writeln!(
        out,
        "- Chapters: {}-{}",
        artifact.request.start_chapter,
        artifact.request.last_chapter()
    );
    let _ = writeln!(out, "- Loop exit: {}", artifact.loop_exit);
    let _ = writeln!(
        out,
        "- Revisions: {} (scoring calls: {})",
        artifact.revisions, artifact.scoring_calls
    );
    let _ = writeln!(out);

    match artifact.quality {
        Some(ref score) => {
            let _ = writeln!(
                out,
                "## Score: {:.1} / 10 ({}, threshold {:.1}, {})",
                score.overall,
                score.grade(),
                score.threshold,
                if score.passed { "passed" } else { "below threshold" }
            );
            let _ = writeln!(out);
            let _ = writeln!(out, "| Dimension | Score | Grade |");
            let _ = writeln!(out, "|-----------|-------|-------|");
            for dimension in Dimension::ALL {
                let value = score.dimension(dimension);
                let _ = writeln!(
                    out,
                    "| {} | {:.1} | {} |",
                    dimension.label(),
                    value,
                    Grade::for_score(value)
                );
            }
            let _ = writeln!(out);
            if !score.suggestions.is_empty() {
                let _ = writeln!(out, "## Suggestions");
                let _ = writeln!(out);
                for (i, suggestion) in score.suggestions.iter().enumerate() {
                    let _ = writeln!(out, "{}. {}", i + 1, suggestion);
                }
                let _ = writeln!(out);
            }
        }
        None => {
            let _ = writeln!(out, "## Score: unavailable");
            let _ = writeln!(out);
            let _ = writeln!(out, "The quality checker produced no score.");
            let _ = writeln!(out);
        }
    }

    if artifact.score_history.len() > 1 {
        let history = artifact
            .score_history
            .iter()
            .map(|s| format!("{:.1}", s.overall))
            .collect::<Vec<_>>()
            .join(" → ");
        let _ = writeln!(out, "Score history: {}", history);
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Completeness");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Stage | Status |");
    let _ = writeln!(out, "|-------|--------|");
    for (stage, status) in &artifact.completeness_report {
        let _ = writeln!(out, "| {} | {} |", stage, status);
    }
    let _ = writeln!(out);

    if !artifact.notes.is_empty() {
        let _ = writeln!(out, "## Notes");
        let _ = writeln!(out);
        for note in &artifact.notes {
            let _ = writeln!(out, "- {}", note);
        }
        let _ = writeln!(out);
    }

    if !artifact.plan_suggestions.is_empty() {
        let _ = writeln!(out, "## Plan suggestions");
        let _ = writeln!(out);
        for suggestion in &artifact.plan_suggestions {
            let _ = writeln!(out, "- {}", suggestion);
        }
        let _ = writeln!(out);
    }

    out
}

/// Compact machine-readable summary.
pub fn run_summary(artifact: &FinalArtifact) -> Value {
    json!({
        "run_id": artifact.run_id,
        "desired_ending": artifact.request.desired_ending,
        "start_chapter": artifact.request.start_chapter,
        "chapter_count": artifact.request.chapter_count,
        "chapters": artifact.chapters.iter().map(|c| json!({
            "number": c.number,
            "title": c.title,
            "chars": c.char_count(),
            "degraded": c.degraded,
            "attempts": c.attempts,
        })).collect::<Vec<_>>(),
        "overall": artifact.quality.as_ref().map(|q| q.overall),
        "passed": artifact.quality.as_ref().map(|q| q.passed),
        "loop_exit": artifact.loop_exit,
        "revisions": artifact.revisions,
        "scoring_calls": artifact.scoring_calls,
        "completeness_report": artifact.completeness_report,
        "complete": artifact.is_complete(),
        "duration_secs": artifact.duration().num_milliseconds() as f64 / 1000.0,
    })
}

/// Write summary, details, chapters and the quality report into `dir`.
pub fn write_run_outputs(dir: &Path, artifact: &FinalArtifact) -> Result<()> {
    let store = FileArtifactStore::new(dir);
    save_json(&store, "summary.json", &run_summary(artifact))?;
    save_json(&store, "details.json", artifact)?;
    for chapter in &artifact.chapters {
        store.save(&chapter_file(chapter.number), &chapter_markdown(chapter))?;
    }
    store.save("quality_report.md", &quality_report_markdown(artifact))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ChapterPlan, ChapterPlanEntry, GenerationRequest, KnowledgeBase, NarrativePhase,
        QualityScore, QualityWeights, Strategy,
    };
    use crate::orchestrator::{LoopExit, StageStatus};
    use crate::stage::StageKind;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn artifact(quality: Option<QualityScore>) -> FinalArtifact {
        let entry = ChapterPlanEntry::fallback(81, NarrativePhase::Resolution);
        FinalArtifact {
            run_id: Uuid::new_v4(),
            request: GenerationRequest {
                desired_ending: "贾府衰败".to_string(),
                chapter_count: 1,
                start_chapter: 81,
            },
            chapters: vec![ChapterText::new(&entry, "话说贾府")],
            quality,
            completeness_report: StageKind::ALL.iter().map(|k| (*k, StageStatus::Ok)).collect(),
            notes: vec!["data_analyzer: offline".to_string()],
            loop_exit: LoopExit::Passed,
            revisions: 0,
            scoring_calls: 1,
            score_history: Vec::new(),
            plan: ChapterPlan::fallback(81, 1, "贾府衰败"),
            plan_suggestions: Vec::new(),
            character_distribution: Default::default(),
            strategy: Strategy::fallback("贾府衰败"),
            knowledge: KnowledgeBase::fallback(None),
            states: Vec::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    fn score(value: f64) -> QualityScore {
        let dims: BTreeMap<Dimension, f64> = Dimension::ALL.iter().map(|d| (*d, value)).collect();
        QualityScore::from_dimensions(dims, &QualityWeights::default(), 7.0)
    }

    #[test]
    fn test_chapter_markdown_heading() {
        let entry = ChapterPlanEntry::fallback(82, NarrativePhase::Climax);
        let md = chapter_markdown(&ChapterText::new(&entry, "正文\n"));
        assert!(md.starts_with("# 第82回　第82回上　第82回下\n\n正文"));
        let placeholder = chapter_markdown(&ChapterText::placeholder(&entry, "offline"));
        assert!(placeholder.contains("placeholder"));
    }

    #[test]
    fn test_quality_report_lists_grades_and_suggestions() {
        let report = quality_report_markdown(&artifact(Some(score(8.5))));
        assert!(report.contains("## Score: 8.5 / 10 (good"));
        assert!(report.contains("| Style consistency | 8.5 | good |"));
        assert!(report.contains("1. Keep the current voice"));
        assert!(report.contains("| quality_checker | ok |"));
        assert!(report.contains("- data_analyzer: offline"));
    }

    #[test]
    fn test_quality_report_without_score() {
        let report = quality_report_markdown(&artifact(None));
        assert!(report.contains("Score: unavailable"));
    }

    #[test]
    fn test_summary_fields() {
        let summary = run_summary(&artifact(Some(score(6.0))));
        assert_eq!(summary["overall"], 6.0);
        assert_eq!(summary["passed"], false);
        assert_eq!(summary["loop_exit"], "passed");
        assert_eq!(summary["chapters"][0]["number"], 81);
        assert_eq!(summary["completeness_report"]["content_generator"], "ok");
    }

    #[test]
    fn test_write_run_outputs() {
        let dir = tempdir().unwrap();
        write_run_outputs(dir.path(), &artifact(Some(score(7.0)))).unwrap();
        for name in ["summary.json", "details.json", "chapters/chapter_081.md", "quality_report.md"] {
            assert!(dir.path().join(name).exists(), "{} missing", name);
        }
        let details: FinalArtifact =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("details.json")).unwrap()).unwrap();
        assert_eq!(details.chapters.len(), 1);
    }
}
