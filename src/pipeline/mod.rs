//! Phase orchestration.
//!
//! The pipeline executes a fixed sequence of phases, threading data
//! between them through an in-memory results map, invoking the generation
//! client once per step, and committing a checkpoint after every phase
//! regardless of outcome.
//!
//! The fault policy is degrade, never abort: a step whose declared
//! prerequisite is missing receives an empty string for that input and
//! still runs; a step whose generation comes back absent is omitted and
//! execution continues. The whole run aborts only when the prerequisite
//! gate fails before any phase has started.
//!
//! Everything runs on one logical thread: steps are awaited strictly one
//! at a time, with no fan-out, even inside groups that are logically
//! independent.

pub mod phases;
pub mod report;

pub use phases::{
    CHAPTER_COUNT, EXPANSION_STEPS, PhaseId, PhaseStatus, REFERENCE_DOCS, ReferenceDoc,
    SAMPLE_LIMIT, StepDef, WORLD_ELEMENTS, execution_plan,
};
pub use report::{PhaseReport, RunReport};

use rand::seq::IndexedRandom;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactSink;
use crate::checkpoint::{CheckpointStore, Payload};
use crate::client::{GenerationClient, GenerationRequest};
use crate::config::FabulaConfig;
use crate::errors::PipelineError;
use crate::prompts::{PromptSet, format_prompt};

/// How a step's output is obtained and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    Structured,
    Text,
}

/// Accumulating output map for one run. Keys are written at most once: a
/// later phase may add new keys but never silently overwrite an earlier
/// one — a refused write keeps the first value and is logged.
#[derive(Debug, Default)]
pub struct PipelineResults {
    map: Payload,
}

impl PipelineResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key, refusing overwrites. Returns whether the write landed.
    pub fn insert(&mut self, key: &str, value: Value) -> bool {
        if self.map.contains_key(key) {
            warn!(key, "duplicate result key refused; keeping first value");
            return false;
        }
        self.map.insert(key.to_string(), value);
        true
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Render a result for prompt substitution. A missing key becomes the
    /// empty string — the pipeline's deliberate degradation policy, not an
    /// error. Structured values are rendered as YAML.
    pub fn render(&self, key: &str) -> String {
        match self.map.get(key) {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => render_yaml(other),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_map(&self) -> &Payload {
        &self.map
    }
}

fn render_yaml(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| value.to_string())
}

/// Take a bounded random sample of the array under `results[key][inner]`.
/// Degrades to an empty selection when the source is missing or not a
/// list; never fails.
fn sample_list_items(results: &PipelineResults, key: &str, inner: &str) -> Vec<Value> {
    let items: Vec<Value> = results
        .get(key)
        .and_then(|v| v.get(inner))
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let take = items.len().min(SAMPLE_LIMIT);
    let mut rng = rand::rng();
    items.choose_multiple(&mut rng, take).cloned().collect()
}

/// The orchestrator: fixed phase sequence, checkpoint after each phase,
/// graceful degradation on partial failure.
pub struct Pipeline {
    client: GenerationClient,
    store: CheckpointStore,
    prompts: PromptSet,
    sink: ArtifactSink,
    config: FabulaConfig,
    results: PipelineResults,
}

impl Pipeline {
    pub fn new(
        config: FabulaConfig,
        client: GenerationClient,
        store: CheckpointStore,
        prompts: PromptSet,
    ) -> Self {
        let sink = ArtifactSink::new(config.output.base_dir.clone());
        Self {
            client,
            store,
            prompts,
            sink,
            config,
            results: PipelineResults::new(),
        }
    }

    pub fn results(&self) -> &PipelineResults {
        &self.results
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CheckpointStore {
        &mut self.store
    }

    /// Whole-run abort gate: the server must answer and the configured
    /// model must become ready. This is the only place the pipeline
    /// refuses to run; everything after degrades instead.
    pub async fn check_prerequisites(&self) -> Result<(), PipelineError> {
        if !self.client.check_server().await {
            return Err(PipelineError::Prerequisite(
                "generation server is not reachable".to_string(),
            ));
        }
        if !self.client.ensure_model_ready().await {
            return Err(PipelineError::Prerequisite(format!(
                "model {} is not available and could not be pulled",
                self.client.model()
            )));
        }
        Ok(())
    }

    /// Run every phase from `start` onward. A pre-seeded user context
    /// skips the context-extraction phase, as the source pipeline did.
    pub async fn run_from(
        &mut self,
        start: PhaseId,
        seed_context: Option<String>,
    ) -> Result<RunReport, PipelineError> {
        self.check_prerequisites().await?;

        if let Some(context) = seed_context {
            self.seed_context(context);
        }

        let skip_context = self.results.contains("user_context");
        if skip_context {
            debug!("user context already present; skipping context extraction");
        }

        let mut run = RunReport::new();
        for phase in execution_plan(start, skip_context) {
            let report = self.run_phase(phase).await?;
            run.record(report);
        }
        run.finish();
        Ok(run)
    }

    pub async fn run_full(
        &mut self,
        seed_context: Option<String>,
    ) -> Result<RunReport, PipelineError> {
        self.run_from(PhaseId::Context, seed_context).await
    }

    /// Execute one phase: run its steps, derive the terminal status from
    /// the step counts, commit the checkpoint unconditionally, and mirror
    /// the phase's outputs into the working state.
    pub async fn run_phase(&mut self, phase: PhaseId) -> Result<PhaseReport, PipelineError> {
        info!(phase = %phase, title = phase.title(), "phase starting");
        let mut report = PhaseReport::begin(phase.name());

        let (phase_out, total, succeeded) = match phase {
            PhaseId::Context => self.run_context().await,
            PhaseId::Expansion => self.run_expansion().await,
            PhaseId::Characters => self.run_characters().await,
            PhaseId::World => self.run_world().await,
            PhaseId::Plot => self.run_plot().await,
            PhaseId::Novels => self.run_novels().await,
            PhaseId::References => self.run_references().await,
        };

        let status = PhaseStatus::from_counts(total, succeeded);

        let snapshot = self.store.save(phase.name(), &phase_out)?;
        for (key, value) in &phase_out {
            self.store.update(key.clone(), value.clone());
        }

        match status {
            PhaseStatus::Completed => {
                info!(phase = %phase, steps = total, "phase completed")
            }
            PhaseStatus::Partial => warn!(
                phase = %phase,
                succeeded,
                total,
                "phase partially completed; continuing"
            ),
            _ => warn!(phase = %phase, "phase failed; continuing with empty result"),
        }

        report.finish(status, total, succeeded, Some(snapshot.to_string()));
        Ok(report)
    }

    /// Load the latest snapshot for a phase into the working state. Does
    /// not re-run the phase or continue to the next one — triggering
    /// subsequent phases is the caller's decision.
    pub fn resume_from_checkpoint(&mut self, phase_name: &str) -> bool {
        match self.store.load_latest(phase_name) {
            Some(payload) => {
                info!(
                    phase = phase_name,
                    keys = payload.len(),
                    "checkpoint restored into working state"
                );
                for (key, value) in payload {
                    self.store.update(key, value);
                }
                true
            }
            None => {
                warn!(phase = phase_name, "no checkpoint to resume from");
                false
            }
        }
    }

    /// Seed a pre-extracted user context, so the context-extraction phase
    /// can be skipped.
    pub fn seed_context(&mut self, context: String) {
        self.results.insert("user_context", Value::String(context));
    }

    /// Copy the working state into the results map, so restored
    /// checkpoints feed subsequent phases as inputs.
    pub fn seed_from_state(&mut self) {
        for (key, value) in self.store.state_snapshot() {
            self.results.insert(&key, value);
        }
    }

    // --- step execution ----------------------------------------------------

    async fn execute_step(
        &self,
        phase: PhaseId,
        prompt_name: &str,
        step_label: &str,
        vars: &[(&str, String)],
        kind: StepKind,
    ) -> Option<Value> {
        let Some(template) = self.prompts.get(prompt_name) else {
            warn!(
                phase = %phase,
                step = step_label,
                prompt = prompt_name,
                "no prompt template; step skipped"
            );
            return None;
        };

        let borrowed: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let user_prompt = format_prompt(&template.user, &borrowed);
        let tuning = self
            .config
            .tuning_for(phase.name(), phase.default_tuning());

        let mut request = GenerationRequest::new(self.client.model(), user_prompt)
            .temperature(tuning.temperature)
            .num_predict(tuning.num_predict);
        if let Some(system) = &template.system {
            request = request.system(system.clone());
        }

        info!(phase = %phase, step = step_label, "generating");
        let value = match kind {
            StepKind::Structured => self.client.generate_structured(&request, true).await,
            StepKind::Text => self
                .client
                .generate_text(&request)
                .await
                .map(Value::String),
        };

        if value.is_none() {
            warn!(phase = %phase, step = step_label, "step produced no output; continuing");
        }
        value
    }

    /// Render declared prerequisite keys into prompt variables, with the
    /// empty-string substitution for anything absent.
    fn prereq_vars<'a>(&self, keys: &[&'a str]) -> Vec<(&'a str, String)> {
        keys.iter().map(|k| (*k, self.results.render(k))).collect()
    }

    /// Merge a step's output into the run results (write-once) and the
    /// phase-local payload, optionally writing an intermediate artifact.
    fn record(&mut self, phase_out: &mut Payload, key: &str, value: Value, artifact: Option<String>) {
        if let Some(rel) = artifact {
            if let Err(err) = self.sink.save_yaml(&value, &rel) {
                warn!(%err, artifact = %rel, "failed to save intermediate artifact");
            }
        }
        if self.results.insert(key, value.clone()) {
            phase_out.insert(key.to_string(), value);
        }
    }

    // --- phase runners -----------------------------------------------------

    async fn run_context(&mut self) -> (Payload, usize, usize) {
        let mut out = Payload::new();
        let mut succeeded = 0;

        let value = self
            .execute_step(
                PhaseId::Context,
                "user_context",
                "user_context",
                &[],
                StepKind::Structured,
            )
            .await;
        if let Some(value) = value {
            self.record(
                &mut out,
                "user_context",
                value,
                Some("intermediate/00_user_context.yaml".to_string()),
            );
            succeeded = 1;
        }

        (out, 1, succeeded)
    }

    async fn run_expansion(&mut self) -> (Payload, usize, usize) {
        let mut out = Payload::new();
        let mut succeeded = 0;

        for (i, step) in EXPANSION_STEPS.iter().enumerate() {
            let vars = self.prereq_vars(step.prereqs);
            let value = self
                .execute_step(
                    PhaseId::Expansion,
                    step.prompt_name,
                    step.output_key,
                    &vars,
                    StepKind::Structured,
                )
                .await;
            if let Some(value) = value {
                let artifact = format!("intermediate/{:02}_{}.yaml", i + 1, step.output_key);
                self.record(&mut out, step.output_key, value, Some(artifact));
                succeeded += 1;
            }
        }

        (out, EXPANSION_STEPS.len(), succeeded)
    }

    async fn run_characters(&mut self) -> (Payload, usize, usize) {
        const SAMPLED: [(&str, &str, &str); 3] = [
            ("desire_list", "desires", "desire_sample"),
            ("ability_list", "abilities", "ability_sample"),
            ("role_list", "roles", "role_sample"),
        ];

        // The phase's minimum viable input: without any expansion output
        // there is nothing to assign to characters, so no step is
        // attempted and the phase yields an empty result.
        let have_any = SAMPLED.iter().any(|(key, _, _)| self.results.contains(key));
        if !have_any {
            warn!(
                phase = %PhaseId::Characters,
                "no expansion outputs available; phase cannot start"
            );
            return (Payload::new(), 1, 0);
        }

        let mut vars = self.prereq_vars(&["user_context", "plottype"]);
        for (key, inner, placeholder) in SAMPLED {
            let sample = sample_list_items(&self.results, key, inner);
            vars.push((placeholder, render_yaml(&Value::Array(sample))));
        }

        let mut out = Payload::new();
        let mut succeeded = 0;
        let value = self
            .execute_step(
                PhaseId::Characters,
                "characters",
                "characters_list",
                &vars,
                StepKind::Structured,
            )
            .await;
        if let Some(value) = value {
            self.record(
                &mut out,
                "characters_list",
                value,
                Some("intermediate/06_characters_list.yaml".to_string()),
            );
            succeeded = 1;
        }

        (out, 1, succeeded)
    }

    async fn run_world(&mut self) -> (Payload, usize, usize) {
        let mut out = Payload::new();
        let mut succeeded = 0;

        for (i, step) in WORLD_ELEMENTS.iter().enumerate() {
            let mut vars = self.prereq_vars(step.prereqs);
            vars.push(("plottype", self.results.render("plottype")));

            let value = self
                .execute_step(
                    PhaseId::World,
                    step.prompt_name,
                    step.output_key,
                    &vars,
                    StepKind::Structured,
                )
                .await;
            if let Some(value) = value {
                let artifact = format!("intermediate/{:02}_{}.yaml", 10 + i, step.output_key);
                self.record(&mut out, step.output_key, value, Some(artifact));
                succeeded += 1;
            }
        }

        (out, WORLD_ELEMENTS.len(), succeeded)
    }

    async fn run_plot(&mut self) -> (Payload, usize, usize) {
        let mut out = Payload::new();
        let mut succeeded = 0;
        let total = 1 + CHAPTER_COUNT * 3;

        let vars = self.prereq_vars(&["user_context", "plottype", "characters_list"]);
        let value = self
            .execute_step(PhaseId::Plot, "plot", "plot", &vars, StepKind::Structured)
            .await;
        if let Some(value) = value {
            self.record(
                &mut out,
                "plot",
                value,
                Some("intermediate/20_plot.yaml".to_string()),
            );
            succeeded += 1;
        }

        for n in 1..=CHAPTER_COUNT {
            // Within a chapter each step depends only on the immediately
            // preceding output.
            let chapter_key = format!("plot_{n}");
            let vars = vec![
                ("plot", self.results.render("plot")),
                ("chapter_number", n.to_string()),
            ];
            let value = self
                .execute_step(
                    PhaseId::Plot,
                    "extract_chapter",
                    &chapter_key,
                    &vars,
                    StepKind::Structured,
                )
                .await;
            if let Some(value) = value {
                let artifact = format!("intermediate/{}_{}.yaml", 20 + n, chapter_key);
                self.record(&mut out, &chapter_key, value, Some(artifact));
                succeeded += 1;
            }

            let keywords_key = format!("plot_keywords_{n}");
            let vars = vec![("chapter_plot", self.results.render(&chapter_key))];
            let value = self
                .execute_step(
                    PhaseId::Plot,
                    "extract_keywords",
                    &keywords_key,
                    &vars,
                    StepKind::Structured,
                )
                .await;
            if let Some(value) = value {
                let artifact = format!("intermediate/{}_{}.yaml", 30 + n, keywords_key);
                self.record(&mut out, &keywords_key, value, Some(artifact));
                succeeded += 1;
            }

            let reference_key = format!("plot_reference_{n}");
            let vars = vec![("keywords", self.results.render(&keywords_key))];
            let value = self
                .execute_step(
                    PhaseId::Plot,
                    "search_references",
                    &reference_key,
                    &vars,
                    StepKind::Structured,
                )
                .await;
            if let Some(value) = value {
                let artifact = format!("intermediate/{}_{}.yaml", 40 + n, reference_key);
                self.record(&mut out, &reference_key, value, Some(artifact));
                succeeded += 1;
            }
        }

        (out, total, succeeded)
    }

    async fn run_novels(&mut self) -> (Payload, usize, usize) {
        let mut out = Payload::new();
        let mut succeeded = 0;

        for n in 1..=CHAPTER_COUNT {
            let key = format!("story_{n}");
            let vars = vec![
                ("chapter_number", n.to_string()),
                ("characters_list", self.results.render("characters_list")),
                ("chapter_plot", self.results.render(&format!("plot_{n}"))),
                (
                    "chapter_references",
                    self.results.render(&format!("plot_reference_{n}")),
                ),
            ];

            let value = self
                .execute_step(PhaseId::Novels, "story_chapter", &key, &vars, StepKind::Text)
                .await;
            if let Some(value) = value {
                if let Some(text) = value.as_str() {
                    if let Err(err) = self
                        .sink
                        .save_text(text, format!("novels/chapter_{n:02}.txt"))
                    {
                        warn!(%err, chapter = n, "failed to save chapter text");
                    }
                }
                self.record(&mut out, &key, value, None);
                succeeded += 1;
            }
        }

        (out, CHAPTER_COUNT, succeeded)
    }

    async fn run_references(&mut self) -> (Payload, usize, usize) {
        let mut out = Payload::new();
        let mut succeeded = 0;

        // One extra document per world element actually produced, so the
        // document count varies with phase 4's success rate.
        let produced: Vec<&'static str> = WORLD_ELEMENTS
            .iter()
            .map(|s| s.output_key)
            .filter(|key| self.results.contains(key))
            .collect();
        let total = REFERENCE_DOCS.len() + produced.len();

        for doc in REFERENCE_DOCS {
            let vars = self.prereq_vars(doc.inputs);
            let value = self
                .execute_step(
                    PhaseId::References,
                    doc.prompt_name,
                    doc.filename,
                    &vars,
                    StepKind::Text,
                )
                .await;
            if let Some(value) = value {
                if let Some(text) = value.as_str() {
                    if let Err(err) = self
                        .sink
                        .save_text(text, format!("references/{}", doc.filename))
                    {
                        warn!(%err, document = doc.filename, "failed to save reference document");
                    }
                }
                self.record(&mut out, doc.filename, value, None);
                succeeded += 1;
            }
        }

        for element in produced {
            let filename = format!("{element}.md");
            let vars = vec![
                ("element_name", element.to_string()),
                ("element_data", self.results.render(element)),
            ];
            let value = self
                .execute_step(
                    PhaseId::References,
                    "reference_world_element",
                    &filename,
                    &vars,
                    StepKind::Text,
                )
                .await;
            if let Some(value) = value {
                if let Some(text) = value.as_str() {
                    if let Err(err) = self.sink.save_text(text, format!("references/{filename}")) {
                        warn!(%err, document = %filename, "failed to save reference document");
                    }
                }
                self.record(&mut out, &filename, value, None);
                succeeded += 1;
            }
        }

        (out, total, succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_results_insert_is_write_once() {
        let mut results = PipelineResults::new();
        assert!(results.insert("plot", json!("first")));
        assert!(!results.insert("plot", json!("second")));
        assert_eq!(results.get("plot"), Some(&json!("first")));
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_render_missing_key_is_empty_string() {
        let results = PipelineResults::new();
        assert_eq!(results.render("never_produced"), "");
    }

    #[test]
    fn test_render_string_passes_through() {
        let mut results = PipelineResults::new();
        results.insert("story_1", json!("It was a dark and stormy night."));
        assert_eq!(results.render("story_1"), "It was a dark and stormy night.");
    }

    #[test]
    fn test_render_structured_value_as_yaml() {
        let mut results = PipelineResults::new();
        results.insert("role_list", json!({"roles": ["navigator", "archivist"]}));
        let rendered = results.render("role_list");
        assert!(rendered.contains("roles:"));
        assert!(rendered.contains("navigator"));
    }

    #[test]
    fn test_sample_is_bounded_by_limit() {
        let mut results = PipelineResults::new();
        let desires: Vec<Value> = (0..25).map(|i| json!(format!("desire-{i}"))).collect();
        results.insert("desire_list", json!({ "desires": desires }));

        let sample = sample_list_items(&results, "desire_list", "desires");
        assert_eq!(sample.len(), SAMPLE_LIMIT);
    }

    #[test]
    fn test_sample_takes_all_when_population_is_small() {
        let mut results = PipelineResults::new();
        results.insert("role_list", json!({"roles": ["a", "b", "c"]}));

        let sample = sample_list_items(&results, "role_list", "roles");
        assert_eq!(sample.len(), 3);
    }

    #[test]
    fn test_sample_degrades_to_empty_when_source_missing() {
        let results = PipelineResults::new();
        assert!(sample_list_items(&results, "desire_list", "desires").is_empty());
    }

    #[test]
    fn test_sample_degrades_to_empty_when_not_a_list() {
        let mut results = PipelineResults::new();
        results.insert("desire_list", json!({"desires": "not a list"}));
        assert!(sample_list_items(&results, "desire_list", "desires").is_empty());
    }
}
