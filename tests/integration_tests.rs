//! Integration tests for the sequel CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn sequel() -> Command {
    let mut cmd = cargo_bin_cmd!("sequel");
    cmd.env_remove("RUST_LOG")
        .env_remove("SEQUEL_MODEL")
        .env_remove("OPENAI_BASE_URL");
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// The single `run_*` directory under `output`.
fn run_dir(project: &Path) -> PathBuf {
    let runs: Vec<PathBuf> = fs::read_dir(project.join("output"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with("run_"))
        .collect();
    assert_eq!(runs.len(), 1, "expected one run directory, got {:?}", runs);
    runs.into_iter().next().unwrap()
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_sequel_help() {
        sequel()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("config"));
    }

    #[test]
    fn test_sequel_version() {
        sequel().arg("--version").assert().success();
    }

    #[test]
    fn test_run_requires_ending() {
        sequel().arg("run").assert().failure();
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        sequel()
            .args(["--log-format", "yaml", "config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown log format"));
    }
}

mod run_command {
    use super::*;

    #[test]
    fn test_blank_ending_fails() {
        let dir = create_temp_project();
        sequel()
            .current_dir(dir.path())
            .args(["run", "--offline", "--ending", "   "])
            .assert()
            .failure()
            .stderr(predicate::str::contains("desired ending is empty"));
    }

    #[test]
    fn test_zero_chapters_fails() {
        let dir = create_temp_project();
        sequel()
            .current_dir(dir.path())
            .args(["run", "--offline", "--ending", "贾府衰败", "--chapters", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("chapter count must be at least 1"));
    }

    #[test]
    fn test_offline_run_writes_outputs() {
        let dir = create_temp_project();
        sequel()
            .current_dir(dir.path())
            .args([
                "run",
                "--offline",
                "--ending",
                "贾府衰败势如流",
                "--chapters",
                "3",
                "--start",
                "81",
                "--max-iterations",
                "1",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Continuation finished"));

        let run = run_dir(dir.path());
        for name in [
            "summary.json",
            "details.json",
            "quality_report.md",
            "knowledge_base.json",
            "strategy.json",
            "chapter_plan.json",
            "chapters/chapter_081.md",
            "chapters/chapter_082.md",
            "chapters/chapter_083.md",
            "quality/score_0.json",
        ] {
            assert!(run.join(name).exists(), "{} missing", name);
        }

        let chapter = fs::read_to_string(run.join("chapters/chapter_082.md")).unwrap();
        assert!(chapter.starts_with("# 第82回"));
    }

    #[test]
    fn test_offline_run_json_summary() {
        let dir = create_temp_project();
        let output = sequel()
            .current_dir(dir.path())
            .args([
                "run",
                "--offline",
                "--json",
                "--ending",
                "宝玉出家",
                "--chapters",
                "2",
                "--max-iterations",
                "0",
            ])
            .output()
            .unwrap();
        assert!(output.status.success());

        let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(summary["chapter_count"], 2);
        assert_eq!(summary["start_chapter"], 81);
        assert_eq!(summary["chapters"].as_array().unwrap().len(), 2);
        assert_eq!(summary["scoring_calls"], 1);
        assert_eq!(summary["complete"], false);
        assert_eq!(summary["completeness_report"]["data_analyzer"], "degraded");
        assert_eq!(summary["completeness_report"]["content_generator"], "degraded");
    }

    #[test]
    fn test_run_reads_start_chapter_from_config() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".sequel")).unwrap();
        fs::write(
            dir.path().join(".sequel/sequel.toml"),
            "[pipeline]\nstart_chapter = 90\n\n[quality]\nmax_iterations = 0\n",
        )
        .unwrap();

        let output = sequel()
            .current_dir(dir.path())
            .args(["run", "--offline", "--json", "--ending", "白茫茫大地真干净"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(summary["chapters"][0]["number"], 90);
    }

    #[test]
    fn test_missing_source_file_fails() {
        let dir = create_temp_project();
        sequel()
            .current_dir(dir.path())
            .args(["run", "--offline", "--ending", "x", "--source", "nope.txt"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read source text"));
    }
}

mod config_command {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        sequel()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No sequel.toml found"))
            .stdout(predicate::str::contains("threshold = 7"));
    }

    #[test]
    fn test_config_init_then_validate() {
        let dir = create_temp_project();
        sequel()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created sequel.toml"));
        assert!(dir.path().join(".sequel/sequel.toml").exists());

        sequel()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        sequel()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".sequel")).unwrap();
        fs::write(
            dir.path().join(".sequel/sequel.toml"),
            "[quality]\nthreshold = 12.0\n",
        )
        .unwrap();

        sequel()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("quality.threshold 12 is outside"));
    }
}
