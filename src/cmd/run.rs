//! Continuation runs: `sequel run`.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Cli, RunArgs};

/// Resolve `path` against the project directory unless it is absolute.
fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path)
    }
}

pub fn read_source(project_dir: &Path, source: Option<&Path>) -> Result<Option<String>> {
    let Some(source) = source else {
        return Ok(None);
    };
    let path = resolve(project_dir, source);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read source text: {}", path.display()))?;
    Ok(Some(text))
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, args: &RunArgs) -> Result<()> {
    use sequel::channel::topics;
    use sequel::config::SequelConfig;
    use sequel::inference::{ChatCompletionsClient, InferenceClient, OfflineClient};
    use sequel::orchestrator::Orchestrator;
    use sequel::output::{run_summary, write_run_outputs};
    use sequel::stage::StageRegistry;
    use sequel::store::FileArtifactStore;

    // A missing .env is fine.
    let _ = dotenvy::from_path(project_dir.join(".env"));

    let mut config = SequelConfig::load_or_default(project_dir, cli.config.as_deref())?;
    if let Some(threshold) = args.threshold {
        config.quality.threshold = threshold;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.quality.max_iterations = max_iterations;
    }
    for warning in config.validate() {
        tracing::warn!(%warning, "Configuration warning");
    }

    let chapter_count = args
        .chapters
        .unwrap_or(i64::from(config.pipeline.chapter_count));
    let start_chapter = args.start.unwrap_or(config.pipeline.start_chapter);

    let source_path = args.source.clone().or_else(|| config.pipeline.source_file.clone());
    let source_text = read_source(project_dir, source_path.as_deref())?;

    let client: Arc<dyn InferenceClient> = if args.offline {
        tracing::info!("Offline mode: every stage will use its fallback");
        Arc::new(OfflineClient)
    } else {
        let model = config.model_name();
        tracing::info!(model = %model, base_url = %config.base_url(), "Using chat completions endpoint");
        Arc::new(
            ChatCompletionsClient::new(config.base_url(), model)
                .with_api_key(config.api_key())
                .with_max_retries(config.model.max_retries)
                .with_request_timeout(std::time::Duration::from_secs(
                    config.model.request_timeout_secs,
                )),
        )
    };

    let output_root = resolve(
        project_dir,
        args.output_dir.as_deref().unwrap_or(config.pipeline.output_dir.as_path()),
    );
    let run_dir = output_root.join(format!(
        "run_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));

    let registry = StageRegistry::standard(client, &config.stage_settings(source_text));
    let mut orchestrator = Orchestrator::new(registry, config.orchestrator_config())?
        .with_store(Arc::new(FileArtifactStore::new(&run_dir)));

    if !args.json {
        orchestrator.subscribe(topics::CHAPTER_WRITTEN, |event| {
            let number = event.payload["number"].as_u64().unwrap_or_default();
            let marker = if event.payload["degraded"].as_bool().unwrap_or(false) {
                style("placeholder").yellow()
            } else {
                style("written").green()
            };
            eprintln!("  第{}回 {}", style(number).cyan(), marker);
            Ok(())
        });
        orchestrator.subscribe(topics::QUALITY_SCORED, |event| {
            eprintln!(
                "  {} {}",
                style("quality").dim(),
                style(&event.payload["overall"]).cyan()
            );
            Ok(())
        });
    }

    let artifact = orchestrator
        .run(&args.ending, chapter_count, start_chapter)
        .await?;

    write_run_outputs(&run_dir, &artifact)
        .with_context(|| format!("Failed to write run outputs to {}", run_dir.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run_summary(&artifact))?);
        return Ok(());
    }

    println!();
    println!(
        "{} {} chapter(s), 第{}回 to 第{}回",
        style("Continuation finished:").bold(),
        artifact.chapters.len(),
        artifact.request.start_chapter,
        artifact.request.last_chapter()
    );
    match artifact.quality {
        Some(ref score) => {
            let overall = format!("{:.1}", score.overall);
            let overall = if score.passed {
                style(overall).green()
            } else {
                style(overall).yellow()
            };
            println!(
                "  Quality: {} / 10 ({}), {} revision(s), exit {}",
                overall,
                score.grade(),
                artifact.revisions,
                artifact.loop_exit
            );
        }
        None => println!("  Quality: {}", style("unavailable").red().bold()),
    }
    for (stage, status) in &artifact.completeness_report {
        let status = match status {
            sequel::orchestrator::StageStatus::Ok => style(status.to_string()).green(),
            sequel::orchestrator::StageStatus::Degraded => style(status.to_string()).yellow(),
            sequel::orchestrator::StageStatus::Failed => style(status.to_string()).red(),
        };
        println!("  {:<18} {}", stage.as_str(), status);
    }
    let degraded = artifact.degraded_chapters();
    if !degraded.is_empty() {
        println!(
            "  {} placeholder chapter(s): {:?}",
            style("!").yellow().bold(),
            degraded
        );
    }
    println!("  Output: {}", run_dir.display());
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_keeps_absolute_paths() {
        let dir = tempdir().unwrap();
        let abs = dir.path().join("x.txt");
        assert_eq!(resolve(Path::new("/elsewhere"), &abs), abs);
        assert_eq!(resolve(dir.path(), Path::new("x.txt")), abs);
    }

    #[test]
    fn test_read_source() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("hlm.txt"), "满纸荒唐言").unwrap();
        assert_eq!(
            read_source(dir.path(), Some(Path::new("hlm.txt"))).unwrap().as_deref(),
            Some("满纸荒唐言")
        );
        assert!(read_source(dir.path(), None).unwrap().is_none());
        assert!(read_source(dir.path(), Some(Path::new("missing.txt"))).is_err());
    }
}
