use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sequel::logging::{LogFormat, init_tracing};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "sequel")]
#[command(version, about = "Multi-stage orchestrator for literary continuation")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to sequel.toml. Defaults to .sequel/sequel.toml in the project directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format: compact or json
    #[arg(long, default_value = "compact", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Continue the novel toward a desired ending
    Run(RunArgs),
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Desired ending for the continuation
    #[arg(short, long)]
    pub ending: String,

    /// Number of chapters to write (overrides sequel.toml)
    #[arg(short, long, allow_negative_numbers = true)]
    pub chapters: Option<i64>,

    /// First chapter number (overrides sequel.toml)
    #[arg(short, long)]
    pub start: Option<u32>,

    /// Source text for the analyzer (overrides sequel.toml)
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Quality threshold on the 0-10 scale
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Maximum revision rounds
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Skip the model entirely and produce fallback output
    #[arg(long)]
    pub offline: bool,

    /// Directory receiving run outputs
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default sequel.toml file
    Init,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run(args) => cmd::cmd_run(&cli, &project_dir, args).await?,
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, cli.config.as_deref(), command.clone())?
        }
    }

    Ok(())
}
