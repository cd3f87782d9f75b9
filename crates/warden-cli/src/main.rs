mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use warden_core::config::Config;
use warden_core::Phase;

/// workflow-warden -- check agent turns against the phased workflow.
#[derive(Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults to ~/.workflow-warden/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a single agent turn: quality analysis plus phase-gate result.
    Analyze {
        /// Workflow phase the turn was produced in.
        #[arg(long)]
        phase: Phase,
        /// Read the response text from a file instead of stdin.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Tool call made during the turn, as NAME or NAME:JSON. Repeatable.
        #[arg(long = "tool")]
        tools: Vec<String>,
        /// Emit JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Run a JSON-lines transcript through the enforcement pipeline.
    Replay {
        /// Transcript file, one turn record per line.
        transcript: PathBuf,
        /// Emit one JSON result per turn instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Validate a reflection answer.
    ReflectCheck {
        /// The reflection text to validate.
        text: String,
        /// Emit JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML.
    Config {
        /// Config file to load (overrides --config).
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Config { path: Some(path) } => Some(path.clone()),
        _ => cli.config.clone(),
    };
    let config = load_config(config_path)?;
    warden_telemetry::logging::init_from_format(
        "warden",
        &config.general.log_format,
        &config.general.log_level,
    );

    match cli.command {
        Commands::Analyze {
            phase,
            file,
            tools,
            json,
        } => {
            commands::analyze::run(phase, file.as_deref(), &tools, json).await?;
        }
        Commands::Replay { transcript, json } => {
            commands::replay::run(&config, &transcript, json).await?;
        }
        Commands::ReflectCheck { text, json } => {
            commands::reflect::run(&text, json)?;
        }
        Commands::Config { .. } => {
            commands::config::run(&config)?;
        }
    }

    Ok(())
}
