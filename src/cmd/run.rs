//! Pipeline execution commands — `fabula check`, `run`, `phase`, `resume`.

use anyhow::{Result, anyhow, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use fabula::checkpoint::CheckpointStore;
use fabula::client::GenerationClient;
use fabula::pipeline::{PhaseId, PhaseReport, PhaseStatus, RunReport, execution_plan};

use super::{build_pipeline, load_config};

/// Verify the run prerequisites: server reachable, model ready.
pub async fn cmd_check(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let client = GenerationClient::from_config(&config)?;

    if !client.check_server().await {
        println!("Server {}: {}", config.base_url(), style("unreachable").red());
        bail!("generation server is not reachable; start it and retry");
    }
    println!("Server {}: {}", config.base_url(), style("ok").green());

    if !client.ensure_model_ready().await {
        println!("Model {}: {}", config.model.name, style("unavailable").red());
        bail!("model is not available and could not be pulled");
    }
    println!("Model {}: {}", config.model.name, style("ready").green());

    Ok(())
}

/// Run the pipeline from the given phase (default: the beginning).
pub async fn cmd_run(
    config_path: Option<&Path>,
    from: Option<&str>,
    context: Option<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut pipeline = build_pipeline(&config)?;

    let start = match from {
        Some(name) => parse_phase(name)?,
        None => PhaseId::Context,
    };

    pipeline.check_prerequisites().await?;
    if let Some(ctx) = context {
        pipeline.seed_context(ctx);
    }

    let plan = execution_plan(start, pipeline.results().contains("user_context"));
    let bar = ProgressBar::new(plan.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░"),
    );
    bar.set_prefix("Phases");

    let mut run = RunReport::new();
    for phase in plan {
        bar.set_message(phase.title().to_string());
        let report = pipeline.run_phase(phase).await?;
        bar.println(format_phase_line(&report));
        run.record(report);
        bar.inc(1);
    }
    run.finish();
    bar.finish_with_message("done");

    let report_path = run.save(&config.output.base_dir.join("runs"))?;
    println!(
        "\nRun {} — report at {}",
        if run.all_completed() {
            style("completed").green().to_string()
        } else {
            style("finished with degraded phases").yellow().to_string()
        },
        report_path.display()
    );
    Ok(())
}

/// Execute a single phase against state restored from prior checkpoints.
pub async fn cmd_phase(config_path: Option<&Path>, name: &str) -> Result<()> {
    let phase = parse_phase(name)?;
    let config = load_config(config_path)?;
    let mut pipeline = build_pipeline(&config)?;

    // Feed the phase from whatever earlier phases have committed.
    for earlier in PhaseId::ALL {
        if earlier.index() >= phase.index() {
            break;
        }
        pipeline.resume_from_checkpoint(earlier.name());
    }
    pipeline.seed_from_state();

    pipeline.check_prerequisites().await?;
    let report = pipeline.run_phase(phase).await?;
    println!("{}", format_phase_line(&report));
    Ok(())
}

/// Load the latest checkpoint for a phase into the working state and
/// persist it, without re-running anything.
pub fn cmd_resume(config_path: Option<&Path>, phase_name: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let mut store = CheckpointStore::new(config.checkpoints.dir.clone())?;

    // Pipeline-level resume needs a client; here we only need the store.
    let Some(payload) = store.load_latest(phase_name) else {
        bail!("no checkpoint found for phase '{phase_name}'");
    };
    let keys = payload.len();
    for (key, value) in payload {
        store.update(key, value);
    }
    let id = store.save_state(None)?;
    println!(
        "Restored {keys} key(s) from the latest {phase_name} checkpoint (state saved as {id})"
    );
    Ok(())
}

fn parse_phase(name: &str) -> Result<PhaseId> {
    PhaseId::from_name(name).ok_or_else(|| {
        let valid: Vec<&str> = PhaseId::ALL.iter().map(|p| p.name()).collect();
        anyhow!("unknown phase '{}'; valid phases: {}", name, valid.join(", "))
    })
}

fn format_phase_line(report: &PhaseReport) -> String {
    let status = match report.status {
        PhaseStatus::Completed => style("completed").green().to_string(),
        PhaseStatus::Partial => style("partial").yellow().to_string(),
        PhaseStatus::Failed => style("failed").red().to_string(),
        other => other.to_string(),
    };
    format!(
        "  {} {} ({}/{} steps)",
        style(&report.phase).bold(),
        status,
        report.steps_succeeded,
        report.steps_total
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phase_accepts_known_names() {
        assert_eq!(parse_phase("phase3_world").unwrap(), PhaseId::World);
    }

    #[test]
    fn test_parse_phase_rejects_unknown_names() {
        let err = parse_phase("phase9_bogus").unwrap_err();
        assert!(err.to_string().contains("valid phases"));
    }
}
