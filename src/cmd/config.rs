//! Configuration view and validation commands: `sequel config`.

use anyhow::Result;
use std::path::Path;

use crate::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    config_file: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    use sequel::config::SequelConfig;

    let config_path = config_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| SequelConfig::default_path(project_dir));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Sequel Configuration");
            println!("====================");
            println!();

            let config = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                SequelConfig::load(&config_path)?
            } else {
                println!("No sequel.toml found at {}", config_path.display());
                println!("Using default configuration.");
                SequelConfig::default()
            };
            println!();

            println!("[model]");
            println!("  name = \"{}\"", config.model.name);
            println!("  base_url = \"{}\"", config.model.base_url);
            println!("  api_key_env = \"{}\"", config.model.api_key_env);
            println!("  max_retries = {}", config.model.max_retries);
            println!("  request_timeout_secs = {}", config.model.request_timeout_secs);
            println!();

            println!("[pipeline]");
            println!("  start_chapter = {}", config.pipeline.start_chapter);
            println!("  chapter_count = {}", config.pipeline.chapter_count);
            println!("  stage_timeout_secs = {}", config.pipeline.stage_timeout_secs);
            if let Some(source) = &config.pipeline.source_file {
                println!("  source_file = \"{}\"", source.display());
            }
            println!("  output_dir = \"{}\"", config.pipeline.output_dir.display());
            println!();

            println!("[quality]");
            println!("  threshold = {}", config.quality.threshold);
            println!("  max_iterations = {}", config.quality.max_iterations);
            let weights = config.quality.weights;
            println!(
                "  weights = style {:.2}, character {:.2}, plot {:.2}, literary {:.2}",
                weights.style_consistency,
                weights.character_accuracy,
                weights.plot_reasonability,
                weights.literary_quality
            );
            println!();

            println!("[stages.content_generator]");
            println!("  temperature = {}", config.stages.content_generator.temperature);
            println!("  max_tokens = {}", config.stages.content_generator.max_tokens);
            println!();

            println!("Effective values (with env overrides):");
            println!("  model = \"{}\"", config.model_name());
            println!("  base_url = \"{}\"", config.base_url());
            println!(
                "  api key ({}) = {}",
                config.model.api_key_env,
                if config.api_key().is_some() { "set" } else { "not set" }
            );
            println!();

            if !config_path.exists() {
                println!("Run 'sequel config init' to create a sequel.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No sequel.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = SequelConfig::load(&config_path)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("sequel.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            SequelConfig::default().save(&config_path)?;

            println!("Created sequel.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [model] name, base_url, api_key_env");
            println!("  - [pipeline] start_chapter, chapter_count, source_file, output_dir");
            println!("  - [quality] threshold, max_iterations, weights");
            println!();
        }
    }

    Ok(())
}
