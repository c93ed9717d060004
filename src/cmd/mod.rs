//! CLI command implementations.
//!
//! | Module        | Commands handled                              |
//! |---------------|-----------------------------------------------|
//! | `run`         | `Check`, `Run`, `Phase`, `Resume`             |
//! | `checkpoints` | `Checkpoints`, `Models`, `Status`             |

pub mod checkpoints;
pub mod run;

pub use checkpoints::{
    cmd_checkpoints_clear, cmd_checkpoints_delete, cmd_checkpoints_list, cmd_checkpoints_show,
    cmd_models, cmd_status,
};
pub use run::{cmd_check, cmd_phase, cmd_resume, cmd_run};

use anyhow::{Context, Result};
use std::path::Path;

use fabula::checkpoint::CheckpointStore;
use fabula::client::GenerationClient;
use fabula::config::FabulaConfig;
use fabula::pipeline::Pipeline;
use fabula::prompts::PromptSet;

pub fn load_config(path: Option<&Path>) -> Result<FabulaConfig> {
    FabulaConfig::load_or_default(path)
}

/// Assemble a pipeline from configuration: HTTP client, checkpoint store,
/// and prompt templates.
pub fn build_pipeline(config: &FabulaConfig) -> Result<Pipeline> {
    let client = GenerationClient::from_config(config)?;
    let store = CheckpointStore::new(config.checkpoints.dir.clone())
        .context("Failed to open checkpoint store")?;
    let prompts = PromptSet::load_dir(&config.prompts.dir)?;
    Ok(Pipeline::new(config.clone(), client, store, prompts))
}
