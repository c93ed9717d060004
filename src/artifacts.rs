//! Write-only sink for generated artifacts.
//!
//! Chapters, reference documents, and per-step intermediates land here.
//! The sink creates parent directories as needed; callers decide whether a
//! failed write matters (the pipeline logs and continues).

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ArtifactSink {
    base_dir: PathBuf,
}

impl ArtifactSink {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write plain text under `base_dir/rel`, returning the full path.
    pub fn save_text(&self, content: &str, rel: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.base_dir.join(rel.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create artifact directory: {}", parent.display())
            })?;
        }
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write artifact: {}", path.display()))?;
        debug!(path = %path.display(), chars = content.len(), "artifact saved");
        Ok(path)
    }

    /// Write a JSON value as YAML under `base_dir/rel`.
    pub fn save_yaml(&self, value: &Value, rel: impl AsRef<Path>) -> Result<PathBuf> {
        let body = serde_yaml::to_string(value).context("Failed to render artifact as YAML")?;
        self.save_text(&body, rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_save_text_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let sink = ArtifactSink::new(dir.path());

        let path = sink
            .save_text("once upon a time", "novels/chapter_01.txt")
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "once upon a time");
        assert!(dir.path().join("novels").is_dir());
    }

    #[test]
    fn test_save_yaml_renders_structure() {
        let dir = tempdir().unwrap();
        let sink = ArtifactSink::new(dir.path());

        let path = sink
            .save_yaml(
                &json!({"roles": ["navigator", "archivist"]}),
                "intermediate/03_role_list.yaml",
            )
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("roles:"));
        assert!(content.contains("navigator"));
    }
}
