//! Prompt template registry.
//!
//! Templates live in YAML files inside a prompts directory; each file maps
//! template names to a `{system?, user}` pair, and `{placeholder}` markers
//! in the user text are substituted at call time. Template content is an
//! external collaborator — the pipeline only needs names to resolve and
//! placeholders to fill.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// One named template: an optional system prompt plus the user prompt body.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub user: String,
}

/// All loaded templates, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PromptSet {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptSet {
    /// Load every `*.yaml` file in `dir` and merge their template maps.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read prompts directory: {}", dir.display()))?;

        let mut templates = HashMap::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }

            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
            let file_templates: HashMap<String, PromptTemplate> = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse prompt file: {}", path.display()))?;

            debug!(file = %path.display(), count = file_templates.len(), "loaded prompt templates");
            templates.extend(file_templates);
        }

        Ok(Self { templates })
    }

    /// Build a set directly from `(name, user_template)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let templates = pairs
            .into_iter()
            .map(|(name, user)| {
                (
                    name.into(),
                    PromptTemplate {
                        system: None,
                        user: user.into(),
                    },
                )
            })
            .collect();
        Self { templates }
    }

    pub fn get(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Substitute `{name}` placeholders with the given values.
///
/// Placeholders with no matching value are left in place (and reported),
/// mirroring the tolerant behavior the pipeline relies on: a template
/// problem degrades the prompt, it does not halt the run.
pub fn format_prompt(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (name, value) in vars {
        result = result.replace(&format!("{{{name}}}"), value);
    }

    let leftover = Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*\}")
        .expect("placeholder pattern is a valid static regex");
    if let Some(m) = leftover.find(&result) {
        warn!(placeholder = m.as_str(), "prompt contains an unsubstituted placeholder");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_dir_merges_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("expansion.yaml"),
            r#"
desire_list:
  user: "List desires for: {user_context}"
ability_list:
  system: "You are a world builder."
  user: "List abilities for: {user_context}"
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("story.yml"),
            r#"
story_chapter:
  user: "Write chapter {chapter_number}"
"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let prompts = PromptSet::load_dir(dir.path()).unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts.get("desire_list").is_some());
        assert_eq!(
            prompts.get("ability_list").unwrap().system.as_deref(),
            Some("You are a world builder.")
        );
    }

    #[test]
    fn test_load_dir_missing_directory_errors() {
        let result = PromptSet::load_dir(Path::new("/nonexistent/prompts"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_dir_invalid_yaml_errors() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bad.yaml"), "a: [unclosed").unwrap();
        let result = PromptSet::load_dir(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_format_prompt_substitutes_all_vars() {
        let result = format_prompt(
            "Theme: {theme}, mood: {mood}",
            &[("theme", "neon harbor"), ("mood", "wistful")],
        );
        assert_eq!(result, "Theme: neon harbor, mood: wistful");
    }

    #[test]
    fn test_format_prompt_leaves_unknown_placeholders() {
        let result = format_prompt("{known} and {unknown}", &[("known", "yes")]);
        assert_eq!(result, "yes and {unknown}");
    }

    #[test]
    fn test_format_prompt_empty_value() {
        let result = format_prompt("before [{gap}] after", &[("gap", "")]);
        assert_eq!(result, "before [] after");
    }
}
