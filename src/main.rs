use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "fabula")]
#[command(version, about = "AI world-building pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file (default: ./fabula.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Verify the generation server is reachable and the model is ready
    Check,
    /// Run the pipeline end to end
    Run {
        /// Start from a specific phase (e.g. "phase3_world")
        #[arg(long)]
        from: Option<String>,
        /// Pre-extracted user context; skips the context-extraction phase
        #[arg(long)]
        context: Option<String>,
    },
    /// Execute a single phase against state restored from checkpoints
    Phase { name: String },
    /// Load the latest checkpoint for a phase into the working state
    Resume { phase: String },
    /// Inspect and manage snapshots
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// List models available on the generation server
    Models,
    /// Show latest checkpoints and the saved working state
    Status,
}

#[derive(Subcommand)]
pub enum CheckpointCommands {
    /// List snapshots, most recent first
    List {
        #[arg(long)]
        phase: Option<String>,
    },
    /// Print a snapshot's payload
    Show { id: String },
    /// Delete one snapshot
    Delete { id: String },
    /// Delete every snapshot for a phase
    Clear { phase: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "fabula=debug"
    } else {
        "fabula=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    let config = cli.config.as_deref();
    match &cli.command {
        Commands::Check => cmd::cmd_check(config).await?,
        Commands::Run { from, context } => {
            cmd::cmd_run(config, from.as_deref(), context.clone()).await?
        }
        Commands::Phase { name } => cmd::cmd_phase(config, name).await?,
        Commands::Resume { phase } => cmd::cmd_resume(config, phase)?,
        Commands::Checkpoints { command } => match command {
            CheckpointCommands::List { phase } => {
                cmd::cmd_checkpoints_list(config, phase.as_deref())?
            }
            CheckpointCommands::Show { id } => cmd::cmd_checkpoints_show(config, id)?,
            CheckpointCommands::Delete { id } => cmd::cmd_checkpoints_delete(config, id)?,
            CheckpointCommands::Clear { phase } => cmd::cmd_checkpoints_clear(config, phase)?,
        },
        Commands::Models => cmd::cmd_models(config).await?,
        Commands::Status => cmd::cmd_status(config)?,
    }

    Ok(())
}
