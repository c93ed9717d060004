//! Authored phase graph.
//!
//! The dependency structure is static configuration data, never computed
//! at runtime: each table below is the hand-authored list of steps for one
//! phase, in execution order, with the prerequisite output keys each step
//! declares. Prerequisites are not validated when the tables are authored;
//! presence is checked only at execution time, where a missing key
//! degrades to an empty-string input.

use serde::{Deserialize, Serialize};

use crate::config::PhaseTuning;

/// Number of chapters in the plot/novel phases.
pub const CHAPTER_COUNT: usize = 10;

/// Upper bound on sampled list items fed into character generation.
pub const SAMPLE_LIMIT: usize = 10;

/// One authored generation step.
#[derive(Debug, Clone, Copy)]
pub struct StepDef {
    /// Key the step writes into the pipeline results
    pub output_key: &'static str,
    /// Prompt template the step renders
    pub prompt_name: &'static str,
    /// Output keys of prior steps this step declares as inputs
    pub prereqs: &'static [&'static str],
}

/// Expansion phase: four independent list generations, then a selection
/// step whose sole declared prerequisite is the plot-type list.
pub const EXPANSION_STEPS: &[StepDef] = &[
    StepDef {
        output_key: "desire_list",
        prompt_name: "desire_list",
        prereqs: &["user_context"],
    },
    StepDef {
        output_key: "ability_list",
        prompt_name: "ability_list",
        prereqs: &["user_context"],
    },
    StepDef {
        output_key: "role_list",
        prompt_name: "role_list",
        prereqs: &["user_context"],
    },
    StepDef {
        output_key: "plottype_list",
        prompt_name: "plottype_list",
        prereqs: &[],
    },
    StepDef {
        output_key: "plottype",
        prompt_name: "plottype_selection",
        prereqs: &["plottype_list"],
    },
];

/// World-building chain: ten elements in a fixed order, each declaring an
/// explicit subset of previously produced elements. The order is part of
/// the design — it is not a topological sort over a general graph.
pub const WORLD_ELEMENTS: &[StepDef] = &[
    StepDef {
        output_key: "events",
        prompt_name: "events",
        prereqs: &[],
    },
    StepDef {
        output_key: "observation",
        prompt_name: "observation",
        prereqs: &["events"],
    },
    StepDef {
        output_key: "interpretation",
        prompt_name: "interpretation",
        prereqs: &["events", "observation"],
    },
    StepDef {
        output_key: "media",
        prompt_name: "media",
        prereqs: &["events", "observation", "interpretation"],
    },
    StepDef {
        output_key: "important_past_events",
        prompt_name: "important_past_events",
        prereqs: &["events", "observation", "interpretation", "media"],
    },
    StepDef {
        output_key: "social_structure",
        prompt_name: "social_structure",
        prereqs: &[
            "events",
            "observation",
            "interpretation",
            "media",
            "important_past_events",
        ],
    },
    StepDef {
        output_key: "living_environment",
        prompt_name: "living_environment",
        prereqs: &["social_structure"],
    },
    StepDef {
        output_key: "social_groups",
        prompt_name: "social_groups",
        prereqs: &["social_structure", "living_environment"],
    },
    StepDef {
        output_key: "people_list",
        prompt_name: "people_list",
        prereqs: &["social_structure", "living_environment", "social_groups"],
    },
    StepDef {
        output_key: "future_scenarios",
        prompt_name: "future_scenarios",
        prereqs: &[],
    },
];

/// One reference document in the fixed part of the reference phase.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceDoc {
    pub prompt_name: &'static str,
    pub filename: &'static str,
    /// Result keys rendered into the prompt
    pub inputs: &'static [&'static str],
}

/// Fixed reference documents; the phase additionally emits one document
/// per world element actually produced.
pub const REFERENCE_DOCS: &[ReferenceDoc] = &[
    ReferenceDoc {
        prompt_name: "reference_characters",
        filename: "characters.md",
        inputs: &["characters_list"],
    },
    ReferenceDoc {
        prompt_name: "reference_plot",
        filename: "plot.md",
        inputs: &["plot"],
    },
    ReferenceDoc {
        prompt_name: "reference_user_context",
        filename: "user_context.md",
        inputs: &["user_context"],
    },
    ReferenceDoc {
        prompt_name: "reference_desire_list",
        filename: "desire_list.md",
        inputs: &["desire_list"],
    },
    ReferenceDoc {
        prompt_name: "reference_ability_list",
        filename: "ability_list.md",
        inputs: &["ability_list"],
    },
    ReferenceDoc {
        prompt_name: "reference_role_list",
        filename: "role_list.md",
        inputs: &["role_list"],
    },
    ReferenceDoc {
        prompt_name: "reference_plottype_list",
        filename: "plottype_list.md",
        inputs: &["plottype_list", "plottype"],
    },
];

/// The seven pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    Context,
    Expansion,
    Characters,
    World,
    Plot,
    Novels,
    References,
}

impl PhaseId {
    pub const ALL: [PhaseId; 7] = [
        PhaseId::Context,
        PhaseId::Expansion,
        PhaseId::Characters,
        PhaseId::World,
        PhaseId::Plot,
        PhaseId::Novels,
        PhaseId::References,
    ];

    /// Checkpoint name for the phase.
    pub fn name(self) -> &'static str {
        match self {
            PhaseId::Context => "phase0_context",
            PhaseId::Expansion => "phase1_expansion",
            PhaseId::Characters => "phase2_characters",
            PhaseId::World => "phase3_world",
            PhaseId::Plot => "phase4_plot",
            PhaseId::Novels => "phase5_novels",
            PhaseId::References => "phase6_references",
        }
    }

    /// Human-readable title for progress output.
    pub fn title(self) -> &'static str {
        match self {
            PhaseId::Context => "Context extraction",
            PhaseId::Expansion => "Expansion",
            PhaseId::Characters => "Character generation",
            PhaseId::World => "World building",
            PhaseId::Plot => "Plot generation",
            PhaseId::Novels => "Chapter text generation",
            PhaseId::References => "Reference documents",
        }
    }

    /// Authored sampling defaults; `[phases.<name>]` config overrides apply
    /// on top of these.
    pub fn default_tuning(self) -> PhaseTuning {
        match self {
            PhaseId::Context => PhaseTuning {
                temperature: 0.7,
                num_predict: 2048,
            },
            PhaseId::Expansion => PhaseTuning {
                temperature: 0.8,
                num_predict: 4096,
            },
            PhaseId::Characters => PhaseTuning {
                temperature: 0.9,
                num_predict: 2048,
            },
            PhaseId::World => PhaseTuning {
                temperature: 0.7,
                num_predict: 4096,
            },
            PhaseId::Plot => PhaseTuning {
                temperature: 0.8,
                num_predict: 3072,
            },
            PhaseId::Novels => PhaseTuning {
                temperature: 1.0,
                num_predict: 4096,
            },
            PhaseId::References => PhaseTuning {
                temperature: 0.7,
                num_predict: 4096,
            },
        }
    }

    pub fn from_name(name: &str) -> Option<PhaseId> {
        PhaseId::ALL.iter().copied().find(|p| p.name() == name)
    }

    /// Position in the fixed execution order.
    pub fn index(self) -> usize {
        PhaseId::ALL
            .iter()
            .position(|p| *p == self)
            .expect("every PhaseId appears in ALL")
    }
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The ordered list of phases a run will execute, starting at `start` and
/// optionally skipping context extraction when a context is already seeded.
pub fn execution_plan(start: PhaseId, skip_context: bool) -> Vec<PhaseId> {
    PhaseId::ALL
        .into_iter()
        .filter(|p| p.index() >= start.index())
        .filter(|p| !(skip_context && *p == PhaseId::Context))
        .collect()
}

/// Lifecycle of one phase execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl PhaseStatus {
    /// Terminal status from step counts: every step produced a value →
    /// `Completed`; some but not all → `Partial`; none → `Failed` (which
    /// also covers the no-step-could-be-attempted case).
    pub fn from_counts(total: usize, succeeded: usize) -> PhaseStatus {
        if total > 0 && succeeded == total {
            PhaseStatus::Completed
        } else if succeeded > 0 {
            PhaseStatus::Partial
        } else {
            PhaseStatus::Failed
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Partial => "partial",
            PhaseStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}
