//! Stage catalogue and retry policy.
//!
//! The twelve stages are fixed. Each declares the inputs it needs, the
//! outputs it must produce, how its output is validated, and how long it
//! may run.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::StepNumber;

/// How a stage's output is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    JsonSchema,
    FlutterAnalyze,
    CompileAndTest,
    SchemaConsistency,
    DebugVerification,
    PlayableLoop,
    AssetsLoad,
    FpsStable,
    LevelRegression,
    AllTestsPass,
    ReleaseChecklist,
    ConstraintsGenerated,
}

/// Static metadata for one stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepDefinition {
    pub step: StepNumber,
    pub title: &'static str,
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
    pub validation: ValidationKind,
    pub timeout: Duration,
}

impl StepDefinition {
    pub fn name(&self) -> &'static str {
        self.step.name()
    }
}

const fn stage(
    step: StepNumber,
    title: &'static str,
    inputs: &'static [&'static str],
    outputs: &'static [&'static str],
    validation: ValidationKind,
    timeout_secs: u64,
) -> StepDefinition {
    StepDefinition {
        step,
        title,
        inputs,
        outputs,
        validation,
        timeout: Duration::from_secs(timeout_secs),
    }
}

/// The standard catalogue, indexed by `step number - 1`
pub static STAGES: [StepDefinition; 12] = [
    stage(
        StepNumber::PreProduction,
        "Pre-Production",
        &["genre", "constraints", "mechanic_pool"],
        &["gdd_spec"],
        ValidationKind::JsonSchema,
        120,
    ),
    stage(
        StepNumber::ProjectSetup,
        "Project Setup",
        &["gdd_spec", "template_repo"],
        &["github_repo", "local_path"],
        ValidationKind::FlutterAnalyze,
        300,
    ),
    stage(
        StepNumber::Architecture,
        "Architecture",
        &["local_path", "gdd_spec"],
        &["architecture_validated"],
        ValidationKind::CompileAndTest,
        300,
    ),
    stage(
        StepNumber::AnalyticsDesign,
        "Analytics Design",
        &["gdd_spec"],
        &["analytics_spec"],
        ValidationKind::SchemaConsistency,
        60,
    ),
    stage(
        StepNumber::AnalyticsImplementation,
        "Analytics Implementation",
        &["local_path", "analytics_spec"],
        &["analytics_implemented"],
        ValidationKind::DebugVerification,
        180,
    ),
    stage(
        StepNumber::CorePrototype,
        "Core Prototype",
        &["local_path", "gdd_spec", "selected_mechanics"],
        &["prototype_playable"],
        ValidationKind::PlayableLoop,
        600,
    ),
    stage(
        StepNumber::AssetGeneration,
        "Asset Generation",
        &["gdd_spec", "asset_style_guide"],
        &["assets_generated", "texture_atlases"],
        ValidationKind::AssetsLoad,
        900,
    ),
    stage(
        StepNumber::VerticalSlice,
        "Vertical Slice",
        &["local_path", "assets_generated"],
        &["vertical_slice_complete"],
        ValidationKind::FpsStable,
        600,
    ),
    stage(
        StepNumber::ContentProduction,
        "Content Production",
        &["local_path", "gdd_spec"],
        &["levels_generated", "ad_gating_configured"],
        ValidationKind::LevelRegression,
        600,
    ),
    stage(
        StepNumber::Testing,
        "Testing",
        &["local_path"],
        &["tests_passed", "qa_checklist"],
        ValidationKind::AllTestsPass,
        600,
    ),
    stage(
        StepNumber::ReleasePrep,
        "Release Prep",
        &["local_path", "gdd_spec"],
        &["release_ready", "store_metadata"],
        ValidationKind::ReleaseChecklist,
        600,
    ),
    stage(
        StepNumber::PostLaunch,
        "Post-Launch Learning",
        &["game_id", "analytics_events"],
        &["game_score", "next_batch_constraints"],
        ValidationKind::ConstraintsGenerated,
        300,
    ),
];

/// Static definition for a stage
pub fn stage_definition(step: StepNumber) -> &'static StepDefinition {
    &STAGES[usize::from(step.number() - 1)]
}

/// Stage catalogue used by an orchestrator, with optional timeout overrides
#[derive(Debug, Clone, Default)]
pub struct WorkflowDefinition {
    timeouts: HashMap<StepNumber, Duration>,
}

impl WorkflowDefinition {
    /// The fixed 12-stage pipeline
    pub fn standard() -> Self {
        Self::default()
    }

    /// Override one stage's timeout
    pub fn with_timeout(mut self, step: StepNumber, timeout: Duration) -> Self {
        self.timeouts.insert(step, timeout);
        self
    }

    pub fn definition(&self, step: StepNumber) -> &'static StepDefinition {
        stage_definition(step)
    }

    pub fn timeout(&self, step: StepNumber) -> Duration {
        self.timeouts
            .get(&step)
            .copied()
            .unwrap_or_else(|| stage_definition(step).timeout)
    }

    pub fn required_inputs(&self, step: StepNumber) -> &'static [&'static str] {
        stage_definition(step).inputs
    }

    pub fn expected_outputs(&self, step: StepNumber) -> &'static [&'static str] {
        stage_definition(step).outputs
    }

    pub fn stages(&self) -> impl Iterator<Item = &'static StepDefinition> {
        STAGES.iter()
    }
}

/// Retry policy for retryable step failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total executions allowed before a step fails terminally
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay before a failed step is re-enqueued, in seconds
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_seconds() -> u64 {
    60
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_seconds: default_backoff_seconds(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff_seconds: backoff.as_secs(),
        }
    }

    /// Delay before the next attempt; fixed, independent of the attempt
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds)
    }

    /// Check if a step that has failed `retry_count` times may run again
    pub fn should_retry(&self, retry_count: u32, max_retries: u32) -> bool {
        retry_count < max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_is_ordered() {
        for (idx, def) in STAGES.iter().enumerate() {
            assert_eq!(usize::from(def.step.number()), idx + 1);
            assert!(!def.outputs.is_empty());
        }
    }

    #[test]
    fn test_stage_metadata() {
        let def = stage_definition(StepNumber::PreProduction);
        assert_eq!(def.name(), "pre_production");
        assert_eq!(def.inputs, &["genre", "constraints", "mechanic_pool"]);
        assert_eq!(def.validation, ValidationKind::JsonSchema);
        assert_eq!(def.timeout, Duration::from_secs(120));

        let def = stage_definition(StepNumber::PostLaunch);
        assert_eq!(def.outputs, &["game_score", "next_batch_constraints"]);
    }

    #[test]
    fn test_timeout_override() {
        let workflow = WorkflowDefinition::standard()
            .with_timeout(StepNumber::Architecture, Duration::from_secs(2));

        assert_eq!(workflow.timeout(StepNumber::Architecture), Duration::from_secs(2));
        assert_eq!(workflow.timeout(StepNumber::Testing), Duration::from_secs(600));
    }

    #[test]
    fn test_retry_policy_is_fixed_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(), Duration::from_secs(60));
        assert!(policy.should_retry(2, 3));
        assert!(!policy.should_retry(3, 3));
    }

    #[test]
    fn test_retry_policy_yaml_defaults() {
        let policy: RetryPolicy = serde_yaml::from_str("max_retries: 5").unwrap();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff_seconds, 60);
    }
}
