//! Durable, append-only snapshot store plus an in-memory working state.
//!
//! Each snapshot is one JSON document at
//! `<dir>/<phaseName>_<YYYYMMDD_HHMMSS>.json`. Timestamp components are
//! fixed-width and zero-padded, so lexicographic order over file stems
//! equals chronological order, and "latest" selection is a pure name sort.
//! A backward wall-clock adjustment between runs can therefore make an
//! older run's snapshot sort as latest; the collision suffix protects
//! same-second saves, not clock skew.
//!
//! Writes are atomic with respect to readers: the document is serialized
//! to a temp file in the same directory and renamed into place, so an
//! interrupted save never corrupts a previously committed snapshot.

use chrono::Local;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::CheckpointError;

/// Default name for working-state snapshots.
pub const DEFAULT_STATE_NAME: &str = "current_state";

/// Snapshot payload: a JSON object keyed by output name.
pub type Payload = serde_json::Map<String, Value>;

/// Identity of one snapshot: the file stem `<phaseName>_<timestamp>`,
/// possibly carrying a collision suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SnapshotId {
    fn from(stem: &str) -> Self {
        SnapshotId(stem.to_string())
    }
}

/// Snapshot history on disk plus the working-state scratchpad.
///
/// The working state is a single mutable mapping, independent of any
/// phase's snapshot. Under the pipeline's single-threaded execution model
/// it needs no locking; any future parallelization of independent steps
/// must add external synchronization around it first.
pub struct CheckpointStore {
    dir: PathBuf,
    state: Payload,
    stamp: Regex,
}

impl CheckpointStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CheckpointError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            state: Payload::new(),
            stamp: Regex::new(r"^\d{8}_\d{6}(_\d+)?$")
                .expect("timestamp pattern is a valid static regex"),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `payload` under `<phase_name>_<now>`, appending a numeric
    /// suffix when a snapshot with that name already exists.
    pub fn save(
        &self,
        phase_name: &str,
        payload: &Payload,
    ) -> Result<SnapshotId, CheckpointError> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        self.save_at(phase_name, payload, &timestamp)
    }

    fn save_at(
        &self,
        phase_name: &str,
        payload: &Payload,
        timestamp: &str,
    ) -> Result<SnapshotId, CheckpointError> {
        let base = format!("{phase_name}_{timestamp}");
        let mut stem = base.clone();
        let mut suffix = 2u32;
        while self.path_for(&stem).exists() {
            stem = format!("{base}_{suffix}");
            suffix += 1;
        }

        let path = self.path_for(&stem);
        let body = serde_json::to_vec_pretty(&Value::Object(payload.clone())).map_err(
            |source| CheckpointError::Decode {
                path: path.clone(),
                source,
            },
        )?;

        // Write-to-temp-then-publish so a reader never sees a partial file.
        let tmp = self.dir.join(format!(".{stem}.json.tmp"));
        fs::write(&tmp, &body).map_err(|source| CheckpointError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(snapshot = %stem, "checkpoint saved");
        Ok(SnapshotId(stem))
    }

    /// Latest snapshot for a phase, or absence when none exist.
    pub fn load_latest(&self, phase_name: &str) -> Option<Payload> {
        let latest = self.list(Some(phase_name)).into_iter().next()?;
        match self.load_by_id(&latest) {
            Ok(payload) => {
                debug!(snapshot = %latest, "loaded latest checkpoint");
                Some(payload)
            }
            Err(err) => {
                warn!(%err, snapshot = %latest, "failed to load latest checkpoint");
                None
            }
        }
    }

    /// Exact lookup, distinguishing a missing snapshot from a corrupt one.
    pub fn load_by_id(&self, id: &SnapshotId) -> Result<Payload, CheckpointError> {
        let path = self.path_for(id.as_str());
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(id.as_str().to_string()));
            }
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };

        let payload: Payload =
            serde_json::from_str(&content).map_err(|source| CheckpointError::Decode {
                path: path.clone(),
                source,
            })?;
        Ok(payload)
    }

    /// All snapshot ids, most recent first, optionally restricted to one
    /// phase. A snapshot belongs to a phase only when the remainder after
    /// `<phase>_` is a pure timestamp (plus optional collision suffix), so
    /// `phase1` never claims `phase1_expansion` snapshots.
    pub fn list(&self, phase_name: Option<&str>) -> Vec<SnapshotId> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, dir = %self.dir.display(), "failed to read checkpoint directory");
                return Vec::new();
            }
        };

        let mut ids: Vec<SnapshotId> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .filter(|stem| match phase_name {
                Some(phase) => self.belongs_to(stem, phase),
                None => true,
            })
            .map(SnapshotId)
            .collect();

        ids.sort();
        ids.reverse();
        ids
    }

    fn belongs_to(&self, stem: &str, phase_name: &str) -> bool {
        stem.strip_prefix(phase_name)
            .and_then(|rest| rest.strip_prefix('_'))
            .map(|rest| self.stamp.is_match(rest))
            .unwrap_or(false)
    }

    /// Delete one snapshot; `false` when it does not exist.
    pub fn delete(&self, id: &SnapshotId) -> bool {
        let path = self.path_for(id.as_str());
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(%err, snapshot = %id, "failed to delete snapshot");
                }
                false
            }
        }
    }

    /// Delete every snapshot belonging to a phase; returns the count removed.
    pub fn delete_phase(&self, phase_name: &str) -> usize {
        self.list(Some(phase_name))
            .iter()
            .filter(|id| self.delete(id))
            .count()
    }

    fn path_for(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.json"))
    }

    // --- working state -----------------------------------------------------

    /// Set one working-state key.
    pub fn update(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    /// Read one working-state key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.get(key).cloned()
    }

    /// Copy of the whole working state.
    pub fn state_snapshot(&self) -> Payload {
        self.state.clone()
    }

    pub fn clear_state(&mut self) {
        self.state.clear();
    }

    /// Persist the working state through the snapshot mechanism.
    pub fn save_state(&self, name: Option<&str>) -> Result<SnapshotId, CheckpointError> {
        self.save(name.unwrap_or(DEFAULT_STATE_NAME), &self.state)
    }

    /// Replace the working state from the latest snapshot under `name`.
    pub fn load_state(&mut self, name: Option<&str>) -> bool {
        match self.load_latest(name.unwrap_or(DEFAULT_STATE_NAME)) {
            Some(payload) => {
                self.state = payload;
                true
            }
            None => false,
        }
    }

    /// Human-readable preview of the working state, used by `status`.
    pub fn state_summary(&self) -> String {
        if self.state.is_empty() {
            return "(empty)".to_string();
        }

        let mut lines = Vec::with_capacity(self.state.len());
        for (key, value) in &self.state {
            let preview = match value {
                Value::String(s) if s.chars().count() > 100 => {
                    let head: String = s.chars().take(100).collect();
                    format!("{head}...")
                }
                Value::String(s) => s.clone(),
                Value::Array(items) => format!("<array with {} items>", items.len()),
                Value::Object(map) => format!("<object with {} keys>", map.len()),
                other => other.to_string(),
            };
            lines.push(format!("{key}: {preview}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn make_store() -> (CheckpointStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints")).unwrap();
        (store, dir)
    }

    fn payload(pairs: &[(&str, Value)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_save_then_load_latest_round_trips() {
        let (store, _dir) = make_store();
        let data = payload(&[
            ("text", json!("hello")),
            ("count", json!(3)),
            ("nested", json!({"a": [1, 2, null], "b": true})),
        ]);

        store.save("phase1_expansion", &data).unwrap();
        let loaded = store.load_latest("phase1_expansion").unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_load_latest_picks_newest_by_name() {
        let (store, _dir) = make_store();
        store
            .save_at("phase1", &payload(&[("v", json!("old"))]), "20240101_090000")
            .unwrap();
        store
            .save_at("phase1", &payload(&[("v", json!("new"))]), "20240101_100000")
            .unwrap();

        let loaded = store.load_latest("phase1").unwrap();
        assert_eq!(loaded.get("v"), Some(&json!("new")));
    }

    #[test]
    fn test_load_latest_absent_phase_returns_none() {
        let (store, _dir) = make_store();
        assert!(store.load_latest("phase9_missing").is_none());
    }

    #[test]
    fn test_same_second_saves_get_collision_suffix() {
        let (store, _dir) = make_store();
        let first = store
            .save_at("phase1", &payload(&[("v", json!(1))]), "20240101_120000")
            .unwrap();
        let second = store
            .save_at("phase1", &payload(&[("v", json!(2))]), "20240101_120000")
            .unwrap();

        assert_eq!(first.as_str(), "phase1_20240101_120000");
        assert_eq!(second.as_str(), "phase1_20240101_120000_2");

        // Both remain retrievable; the suffixed one sorts later.
        assert_eq!(store.load_by_id(&first).unwrap().get("v"), Some(&json!(1)));
        assert_eq!(store.load_by_id(&second).unwrap().get("v"), Some(&json!(2)));
        assert_eq!(store.load_latest("phase1").unwrap().get("v"), Some(&json!(2)));
    }

    #[test]
    fn test_saved_id_is_retrievable_by_load_by_id() {
        let (store, _dir) = make_store();
        let data = payload(&[("k", json!("v"))]);
        let id = store.save("phase2_characters", &data).unwrap();
        assert_eq!(store.load_by_id(&id).unwrap(), data);
    }

    #[test]
    fn test_load_by_id_distinguishes_missing_from_corrupt() {
        let (store, _dir) = make_store();

        let missing = store.load_by_id(&SnapshotId::from("phase1_20240101_000000"));
        assert!(matches!(missing, Err(CheckpointError::NotFound(_))));

        std::fs::write(store.dir().join("phase1_20240101_000000.json"), "{ nope").unwrap();
        let corrupt = store.load_by_id(&SnapshotId::from("phase1_20240101_000000"));
        assert!(matches!(corrupt, Err(CheckpointError::Decode { .. })));
    }

    #[test]
    fn test_list_is_most_recent_first_and_phase_scoped() {
        let (store, _dir) = make_store();
        store
            .save_at("phase1", &Payload::new(), "20240101_090000")
            .unwrap();
        store
            .save_at("phase1", &Payload::new(), "20240102_090000")
            .unwrap();
        store
            .save_at("phase2", &Payload::new(), "20240103_090000")
            .unwrap();

        let all = store.list(None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].as_str(), "phase2_20240103_090000");

        let phase1 = store.list(Some("phase1"));
        assert_eq!(phase1.len(), 2);
        assert_eq!(phase1[0].as_str(), "phase1_20240102_090000");
    }

    #[test]
    fn test_phase_prefix_does_not_leak_across_phases() {
        let (store, _dir) = make_store();
        store
            .save_at("phase1", &payload(&[("own", json!(true))]), "20240101_090000")
            .unwrap();
        store
            .save_at(
                "phase1_expansion",
                &payload(&[("other", json!(true))]),
                "20240105_090000",
            )
            .unwrap();

        // The later phase1_expansion snapshot must not be claimed by phase1.
        let loaded = store.load_latest("phase1").unwrap();
        assert_eq!(loaded.get("own"), Some(&json!(true)));
        assert_eq!(store.list(Some("phase1")).len(), 1);
    }

    #[test]
    fn test_interrupted_write_leaves_prior_snapshot_intact() {
        let (store, _dir) = make_store();
        let good = payload(&[("v", json!("committed"))]);
        store.save_at("phase1", &good, "20240101_090000").unwrap();

        // A crash mid-write leaves only the temp file behind.
        std::fs::write(
            store.dir().join(".phase1_20240101_100000.json.tmp"),
            "{\"v\": \"par",
        )
        .unwrap();

        assert_eq!(store.list(Some("phase1")).len(), 1);
        assert_eq!(store.load_latest("phase1").unwrap(), good);
    }

    #[test]
    fn test_delete_and_delete_phase() {
        let (store, _dir) = make_store();
        let id = store
            .save_at("phase1", &Payload::new(), "20240101_090000")
            .unwrap();
        store
            .save_at("phase1", &Payload::new(), "20240101_100000")
            .unwrap();

        assert!(store.delete(&id));
        assert!(!store.delete(&id));
        assert_eq!(store.delete_phase("phase1"), 1);
        assert!(store.list(Some("phase1")).is_empty());
    }

    #[test]
    fn test_working_state_update_and_get() {
        let (mut store, _dir) = make_store();
        assert!(store.get("theme").is_none());

        store.update("theme", json!("solarpunk harbor"));
        assert_eq!(store.get("theme"), Some(json!("solarpunk harbor")));
    }

    #[test]
    fn test_state_round_trips_through_snapshot_mechanism() {
        let (mut store, _dir) = make_store();
        store.update("plot", json!({"chapters": 10}));
        store.save_state(None).unwrap();

        let mut other = CheckpointStore::new(store.dir()).unwrap();
        assert!(other.load_state(None));
        assert_eq!(other.get("plot"), Some(json!({"chapters": 10})));
    }

    #[test]
    fn test_load_state_missing_returns_false() {
        let (mut store, _dir) = make_store();
        assert!(!store.load_state(Some("never_saved")));
    }

    #[test]
    fn test_state_summary_previews_values() {
        let (mut store, _dir) = make_store();
        assert_eq!(store.state_summary(), "(empty)");

        store.update("short", json!("abc"));
        store.update("long", json!("x".repeat(150)));
        store.update("list", json!([1, 2, 3]));

        let summary = store.state_summary();
        assert!(summary.contains("short: abc"));
        assert!(summary.contains("..."));
        assert!(summary.contains("<array with 3 items>"));
    }
}
