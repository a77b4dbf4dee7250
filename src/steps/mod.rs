//! Executors for the twelve stages.
//!
//! Each executor talks to the outside world only through the collaborator
//! traits in [`crate::adapters`], so the same stage logic runs against the
//! local defaults and against test doubles.

pub mod analytics;
pub mod post_launch;
pub mod pre_production;
pub mod production;
pub mod project;
pub mod release;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::adapters::{Collaborators, CommitOutcome, Repository};
use crate::core::errors::StepError;
use crate::core::executor::{ExecutorRegistry, StepContext};
use crate::core::store::Store;
use crate::core::workflow::stage_definition;
use crate::domain::{Artifacts, DesignSpec, StepNumber, Validation};

pub use analytics::{AnalyticsDesignStep, AnalyticsImplementationStep};
pub use post_launch::PostLaunchStep;
pub use pre_production::PreProductionStep;
pub use production::{AssetGenerationStep, ContentProductionStep, CorePrototypeStep, VerticalSliceStep};
pub use project::{ArchitectureStep, ProjectSetupStep};
pub use release::{ReleasePrepStep, TestingStep};

/// Registry with an executor for every stage
pub fn standard_registry(collaborators: &Collaborators, store: Store) -> ExecutorRegistry {
    let repos = &collaborators.repositories;
    ExecutorRegistry::new()
        .with(Arc::new(PreProductionStep::new(
            store.clone(),
            Arc::clone(&collaborators.generator),
        )))
        .with(Arc::new(ProjectSetupStep::new(Arc::clone(repos))))
        .with(Arc::new(ArchitectureStep::new(Arc::clone(repos))))
        .with(Arc::new(AnalyticsDesignStep))
        .with(Arc::new(AnalyticsImplementationStep::new(Arc::clone(repos))))
        .with(Arc::new(CorePrototypeStep::new(Arc::clone(repos))))
        .with(Arc::new(AssetGenerationStep::new(Arc::clone(&collaborators.renderer))))
        .with(Arc::new(VerticalSliceStep::new(Arc::clone(repos))))
        .with(Arc::new(ContentProductionStep::new(Arc::clone(repos))))
        .with(Arc::new(TestingStep))
        .with(Arc::new(ReleasePrepStep::new(Arc::clone(repos))))
        .with(Arc::new(PostLaunchStep::new(
            store,
            Arc::clone(&collaborators.performance),
        )))
}

/// The job's design, parsed from the `gdd_spec` input
pub(crate) fn design(ctx: &StepContext) -> Result<DesignSpec, StepError> {
    DesignSpec::from_value(ctx.input("gdd_spec")?).ok_or_else(|| StepError::Input {
        step: ctx.step,
        missing: vec!["gdd_spec (valid design)".to_string()],
    })
}

/// The repository created by project setup
pub(crate) fn repository(ctx: &StepContext) -> Result<Repository, StepError> {
    let name = ctx.input_str("github_repo")?.to_string();
    let local_path = PathBuf::from(ctx.input_str("local_path")?);
    let url = ctx
        .inputs
        .get("repository_url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(Repository {
        name,
        url,
        local_path,
        created: false,
    })
}

/// Artifact value for a commit outcome
pub(crate) fn commit_ref(outcome: &CommitOutcome) -> Value {
    match outcome {
        CommitOutcome::Committed { id } => Value::String(id.clone()),
        CommitOutcome::Unchanged => Value::String("unchanged".to_string()),
    }
}

/// Pretty JSON for committed files
pub(crate) fn pretty(value: &impl serde::Serialize) -> Result<String, StepError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| StepError::transient(format!("failed to serialize output: {}", e)))
}

/// Every declared output of `step` is present
pub(crate) fn declared_outputs(step: StepNumber, artifacts: &Artifacts) -> Validation {
    let errors = artifacts
        .missing(stage_definition(step).outputs)
        .into_iter()
        .map(|key| format!("missing output artifact: {}", key))
        .collect();
    Validation::from_errors(errors, Vec::new())
}

/// True when `key` holds boolean `true`
pub(crate) fn flag(output: &Artifacts, key: &str) -> bool {
    output.get(key).and_then(Value::as_bool).unwrap_or(false)
}
