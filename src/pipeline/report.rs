//! Per-run record of phase outcomes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::phases::PhaseStatus;

/// Outcome of one phase within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: String,
    pub status: PhaseStatus,
    pub steps_total: usize,
    pub steps_succeeded: usize,
    /// Snapshot id committed for this phase, when the save succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl PhaseReport {
    pub fn begin(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            status: PhaseStatus::Running,
            steps_total: 0,
            steps_succeeded: 0,
            snapshot: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn finish(
        &mut self,
        status: PhaseStatus,
        steps_total: usize,
        steps_succeeded: usize,
        snapshot: Option<String>,
    ) {
        self.status = status;
        self.steps_total = steps_total;
        self.steps_succeeded = steps_succeeded;
        self.snapshot = snapshot;
        self.ended_at = Some(Utc::now());
    }
}

/// The full record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub phases: Vec<PhaseReport>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            phases: Vec::new(),
        }
    }

    pub fn record(&mut self, phase: PhaseReport) {
        self.phases.push(phase);
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Whether every recorded phase completed fully.
    pub fn all_completed(&self) -> bool {
        !self.phases.is_empty()
            && self
                .phases
                .iter()
                .all(|p| p.status == PhaseStatus::Completed)
    }

    /// Persist the report as JSON under `dir`, returning the file path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;

        let filename = format!(
            "run_{}_{}.json",
            self.started_at.format("%Y%m%d_%H%M%S"),
            &self.run_id.to_string()[..8]
        );
        let path = dir.join(filename);

        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
        Ok(path)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_phase_report_lifecycle() {
        let mut report = PhaseReport::begin("phase1_expansion");
        assert_eq!(report.status, PhaseStatus::Running);
        assert!(report.ended_at.is_none());

        report.finish(
            PhaseStatus::Partial,
            5,
            3,
            Some("phase1_expansion_20240101_090000".to_string()),
        );
        assert_eq!(report.status, PhaseStatus::Partial);
        assert_eq!(report.steps_succeeded, 3);
        assert!(report.ended_at.is_some());
    }

    #[test]
    fn test_run_report_save_round_trips() {
        let dir = tempdir().unwrap();
        let mut run = RunReport::new();

        let mut phase = PhaseReport::begin("phase0_context");
        phase.finish(PhaseStatus::Completed, 1, 1, None);
        run.record(phase);
        run.finish();

        let path = run.save(dir.path()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: RunReport = serde_json::from_str(&content).unwrap();

        assert_eq!(loaded.run_id, run.run_id);
        assert_eq!(loaded.phases.len(), 1);
        assert_eq!(loaded.phases[0].status, PhaseStatus::Completed);
    }

    #[test]
    fn test_all_completed() {
        let mut run = RunReport::new();
        assert!(!run.all_completed());

        let mut done = PhaseReport::begin("phase0_context");
        done.finish(PhaseStatus::Completed, 1, 1, None);
        run.record(done);
        assert!(run.all_completed());

        let mut partial = PhaseReport::begin("phase1_expansion");
        partial.finish(PhaseStatus::Partial, 5, 2, None);
        run.record(partial);
        assert!(!run.all_completed());
    }
}
