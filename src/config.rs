//! Configuration for the fabula pipeline.
//!
//! Settings are read from a `fabula.toml` file with sensible defaults for
//! every field, so an empty (or missing) file yields a runnable
//! configuration pointed at a local generation server.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "http://localhost"
//! port = 11434
//! timeout_secs = 300
//! max_retries = 3
//! retry_delay_secs = 5
//!
//! [model]
//! name = "gpt-oss:20b"
//!
//! [checkpoints]
//! dir = "output/checkpoints"
//!
//! [output]
//! base_dir = "output"
//!
//! [prompts]
//! dir = "config/prompts"
//!
//! [phases.phase5_novels]
//! temperature = 1.0
//! num_predict = 4096
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Generation server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host, including scheme (default: "http://localhost")
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port (default: 11434)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-request timeout in seconds (default: 300)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum generation attempts before giving up (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between attempts in seconds (default: 5)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_host() -> String {
    "http://localhost".to_string()
}

fn default_port() -> u16 {
    11434
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

/// Target model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier on the generation server
    #[serde(default = "default_model_name")]
    pub name: String,
}

fn default_model_name() -> String {
    "gpt-oss:20b".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
        }
    }
}

/// Checkpoint storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory for snapshot files
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("output/checkpoints")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

/// Generated-artifact output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Base directory for intermediates, novels, and references
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

/// Prompt template settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Directory of YAML prompt template files
    #[serde(default = "default_prompts_dir")]
    pub dir: PathBuf,
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("config/prompts")
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            dir: default_prompts_dir(),
        }
    }
}

/// Sampling parameters for one phase's generation calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseTuning {
    pub temperature: f32,
    pub num_predict: u32,
}

impl Default for PhaseTuning {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            num_predict: 4096,
        }
    }
}

/// Per-phase override of sampling parameters; unset fields fall back to the
/// phase's authored defaults.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PhaseTuningOverride {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub num_predict: Option<u32>,
}

/// Top-level configuration, deserialized from `fabula.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabulaConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    /// Per-phase sampling overrides, keyed by phase name
    #[serde(default)]
    pub phases: HashMap<String, PhaseTuningOverride>,
}

impl FabulaConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: FabulaConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load from the given path, or from `fabula.toml` in the current
    /// directory, falling back to defaults when no file exists.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default_path = Path::new("fabula.toml");
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Full base URL of the generation server.
    pub fn base_url(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Resolve the sampling parameters for a phase: start from the phase's
    /// authored defaults and apply any `[phases.<name>]` override.
    pub fn tuning_for(&self, phase: &str, base: PhaseTuning) -> PhaseTuning {
        match self.phases.get(phase) {
            Some(over) => PhaseTuning {
                temperature: over.temperature.unwrap_or(base.temperature),
                num_predict: over.num_predict.unwrap_or(base.num_predict),
            },
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: FabulaConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.host, "http://localhost");
        assert_eq!(config.server.port, 11434);
        assert_eq!(config.server.max_retries, 3);
        assert_eq!(config.model.name, "gpt-oss:20b");
        assert_eq!(config.checkpoints.dir, PathBuf::from("output/checkpoints"));
    }

    #[test]
    fn test_base_url_joins_host_and_port() {
        let config = FabulaConfig::default();
        assert_eq!(config.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fabula.toml");
        fs::write(
            &path,
            r#"
[server]
port = 9999

[model]
name = "llama3:8b"
"#,
        )
        .unwrap();

        let config = FabulaConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.host, "http://localhost");
        assert_eq!(config.model.name, "llama3:8b");
    }

    #[test]
    fn test_load_invalid_toml_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fabula.toml");
        fs::write(&path, "[server\nport = 1").unwrap();

        let result = FabulaConfig::load(&path);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse config file")
        );
    }

    #[test]
    fn test_load_or_default_missing_path_errors() {
        let result = FabulaConfig::load_or_default(Some(Path::new("/nonexistent/fabula.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_tuning_for_applies_partial_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fabula.toml");
        fs::write(
            &path,
            r#"
[phases.phase5_novels]
temperature = 1.0
"#,
        )
        .unwrap();

        let config = FabulaConfig::load(&path).unwrap();
        let base = PhaseTuning {
            temperature: 0.7,
            num_predict: 2048,
        };

        let tuned = config.tuning_for("phase5_novels", base);
        assert_eq!(tuned.temperature, 1.0);
        assert_eq!(tuned.num_predict, 2048);

        let untouched = config.tuning_for("phase3_world", base);
        assert_eq!(untouched, base);
    }
}
