//! Inspection commands — `fabula checkpoints ...`, `models`, `status`.

use anyhow::{Result, bail};
use console::style;
use std::path::Path;

use fabula::checkpoint::{CheckpointStore, SnapshotId};
use fabula::client::GenerationClient;
use fabula::pipeline::PhaseId;

use super::load_config;

fn open_store(config_path: Option<&Path>) -> Result<CheckpointStore> {
    let config = load_config(config_path)?;
    Ok(CheckpointStore::new(config.checkpoints.dir.clone())?)
}

pub fn cmd_checkpoints_list(config_path: Option<&Path>, phase: Option<&str>) -> Result<()> {
    let store = open_store(config_path)?;
    let ids = store.list(phase);
    if ids.is_empty() {
        println!("No checkpoints found");
        return Ok(());
    }
    for id in ids {
        println!("{id}");
    }
    Ok(())
}

pub fn cmd_checkpoints_show(config_path: Option<&Path>, id: &str) -> Result<()> {
    let store = open_store(config_path)?;
    let payload = store.load_by_id(&SnapshotId::from(id))?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

pub fn cmd_checkpoints_delete(config_path: Option<&Path>, id: &str) -> Result<()> {
    let store = open_store(config_path)?;
    if store.delete(&SnapshotId::from(id)) {
        println!("Deleted {id}");
        Ok(())
    } else {
        bail!("checkpoint '{id}' not found");
    }
}

pub fn cmd_checkpoints_clear(config_path: Option<&Path>, phase: &str) -> Result<()> {
    let store = open_store(config_path)?;
    let count = store.delete_phase(phase);
    println!("Deleted {count} checkpoint(s) for {phase}");
    Ok(())
}

pub async fn cmd_models(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let client = GenerationClient::from_config(&config)?;

    let models = client.list_models().await;
    if models.is_empty() {
        println!("No models available (is the server running?)");
        return Ok(());
    }
    for model in models {
        let marker = if model.name == config.model.name {
            style(" (configured)").green().to_string()
        } else {
            String::new()
        };
        println!("{}{marker}", model.name);
    }
    Ok(())
}

pub fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let mut store = open_store(config_path)?;

    println!("{}", style("Latest checkpoints").bold());
    for phase in PhaseId::ALL {
        match store.list(Some(phase.name())).into_iter().next() {
            Some(id) => println!("  {:<20} {id}", phase.name()),
            None => println!("  {:<20} {}", phase.name(), style("none").dim()),
        }
    }

    println!("\n{}", style("Working state").bold());
    if store.load_state(None) {
        println!("{}", store.state_summary());
    } else {
        println!("(no saved state)");
    }
    Ok(())
}
