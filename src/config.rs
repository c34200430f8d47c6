//! Configuration read from `.sequel/sequel.toml`.
//!
//! Settings are layered: file, then environment, then CLI flags (applied by
//! the command handlers). Every field has a default, so an empty or missing
//! file is a valid configuration.
//!
//! ```toml
//! [model]
//! name = "gpt-5-chat"
//! base_url = "https://api.openai.com/v1"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [pipeline]
//! start_chapter = 81
//! chapter_count = 1
//!
//! [quality]
//! threshold = 7.0
//! max_iterations = 2
//!
//! [quality.weights]
//! style_consistency = 0.30
//!
//! [stages.content_generator]
//! temperature = 0.8
//! ```

use crate::model::QualityWeights;
use crate::orchestrator::OrchestratorConfig;
use crate::stage::StageSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding project configuration.
pub const CONFIG_DIR: &str = ".sequel";
pub const CONFIG_FILE: &str = "sequel.toml";

/// Environment variable overriding the model base URL.
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
/// Environment variable overriding the model name.
pub const MODEL_ENV: &str = "SEQUEL_MODEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_model_name() -> String {
    "gpt-5-chat".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_start_chapter")]
    pub start_chapter: u32,
    #[serde(default = "default_chapter_count")]
    pub chapter_count: u32,
    #[serde(default = "default_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Source text handed to the analyzer, relative to the project directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_start_chapter() -> u32 {
    81
}

fn default_chapter_count() -> u32 {
    1
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            start_chapter: default_start_chapter(),
            chapter_count: default_chapter_count(),
            stage_timeout_secs: default_timeout_secs(),
            source_file: None,
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub weights: QualityWeights,
}

fn default_threshold() -> f64 {
    7.0
}

fn default_max_iterations() -> u32 {
    2
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_iterations: default_max_iterations(),
            weights: QualityWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f64 {
    0.8
}

fn default_max_tokens() -> u32 {
    8000
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default)]
    pub content_generator: GeneratorConfig,
}

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SequelConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub stages: StagesConfig,
}

impl SequelConfig {
    /// Default location of the config file inside a project.
    pub fn default_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse sequel.toml")
    }

    /// Load from `path`, or the default location when `None`.
    /// A missing file at the default location yields the defaults.
    pub fn load_or_default(project_dir: &Path, path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Self::default_path(project_dir);
                if default.exists() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize sequel.toml")
    }

    /// Model name, overridden by `SEQUEL_MODEL`.
    pub fn model_name(&self) -> String {
        env_override(MODEL_ENV).unwrap_or_else(|| self.model.name.clone())
    }

    /// Base URL, overridden by `OPENAI_BASE_URL`.
    pub fn base_url(&self) -> String {
        env_override(BASE_URL_ENV).unwrap_or_else(|| self.model.base_url.clone())
    }

    /// API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        env_override(&self.model.api_key_env)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            stage_timeout: Duration::from_secs(self.pipeline.stage_timeout_secs),
            max_iterations: self.quality.max_iterations,
            quality_threshold: self.quality.threshold,
        }
    }

    pub fn stage_settings(&self, source_text: Option<String>) -> StageSettings {
        StageSettings {
            source_text,
            weights: self.quality.weights,
            generator_temperature: self.stages.content_generator.temperature,
            generator_max_tokens: self.stages.content_generator.max_tokens,
        }
    }

    /// Problems worth warning about. An empty list means the config is sane.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !(0.0..=10.0).contains(&self.quality.threshold) {
            warnings.push(format!(
                "quality.threshold {} is outside 0..=10",
                self.quality.threshold
            ));
        }

        let sum = self.quality.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            warnings.push(format!("quality.weights sum to {:.3}, expected 1.0", sum));
        }

        if self.quality.max_iterations > 10 {
            warnings.push(format!(
                "quality.max_iterations {} is unusually high (> 10)",
                self.quality.max_iterations
            ));
        }

        if self.pipeline.stage_timeout_secs == 0 {
            warnings.push("pipeline.stage_timeout_secs is 0".to_string());
        }
        if self.model.request_timeout_secs == 0 {
            warnings.push("model.request_timeout_secs is 0".to_string());
        }
        if self.pipeline.chapter_count == 0 {
            warnings.push("pipeline.chapter_count is 0".to_string());
        }

        let temperature = self.stages.content_generator.temperature;
        if !(0.0..=2.0).contains(&temperature) {
            warnings.push(format!(
                "stages.content_generator.temperature {} is outside 0..=2",
                temperature
            ));
        }

        warnings
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SequelConfig::parse("").unwrap();
        assert_eq!(config, SequelConfig::default());
        assert_eq!(config.pipeline.start_chapter, 81);
        assert_eq!(config.quality.threshold, 7.0);
        assert_eq!(config.stages.content_generator.max_tokens, 8000);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let config = SequelConfig::parse(
            r#"
[quality]
max_iterations = 4

[quality.weights]
literary_quality = 0.25
"#,
        )
        .unwrap();
        assert_eq!(config.quality.max_iterations, 4);
        assert_eq!(config.quality.threshold, 7.0);
        assert_eq!(config.quality.weights.style_consistency, 0.30);
        assert_eq!(config.quality.weights.literary_quality, 0.25);
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn test_validate_reports_each_problem() {
        let mut config = SequelConfig::default();
        config.quality.threshold = 11.0;
        config.quality.max_iterations = 20;
        config.pipeline.stage_timeout_secs = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 3, "{:?}", warnings);
        assert!(warnings[0].contains("threshold"));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(SequelConfig::parse("[quality\nthreshold = ").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = SequelConfig::default_path(dir.path());
        let mut config = SequelConfig::default();
        config.pipeline.source_file = Some(PathBuf::from("data/source.md"));
        config.save(&path).unwrap();

        let loaded = SequelConfig::load_or_default(dir.path(), None).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = SequelConfig::load_or_default(dir.path(), None).unwrap();
        assert_eq!(config, SequelConfig::default());
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(SequelConfig::load_or_default(dir.path(), Some(&missing)).is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let saved = std::env::var(MODEL_ENV).ok();

        let config = SequelConfig::parse("[model]\nname = \"file-model\"\napi_key_env = \"SEQUEL_TEST_KEY\"").unwrap();
        unsafe { std::env::remove_var(MODEL_ENV) };
        assert_eq!(config.model_name(), "file-model");

        unsafe { std::env::set_var(MODEL_ENV, "env-model") };
        assert_eq!(config.model_name(), "env-model");

        unsafe { std::env::set_var("SEQUEL_TEST_KEY", "  ") };
        assert!(config.api_key().is_none());
        unsafe { std::env::set_var("SEQUEL_TEST_KEY", "sk-test") };
        assert_eq!(config.api_key().as_deref(), Some("sk-test"));

        unsafe { std::env::remove_var("SEQUEL_TEST_KEY") };
        match saved {
            Some(val) => unsafe { std::env::set_var(MODEL_ENV, val) },
            None => unsafe { std::env::remove_var(MODEL_ENV) },
        }
    }

    #[test]
    fn test_orchestrator_config_mapping() {
        let mut config = SequelConfig::default();
        config.pipeline.stage_timeout_secs = 12;
        config.quality.max_iterations = 5;
        let orch = config.orchestrator_config();
        assert_eq!(orch.stage_timeout, Duration::from_secs(12));
        assert_eq!(orch.max_iterations, 5);
        let settings = config.stage_settings(Some("text".to_string()));
        assert_eq!(settings.generator_temperature, 0.8);
        assert_eq!(settings.source_text.as_deref(), Some("text"));
    }
}
