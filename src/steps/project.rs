//! Stages 2 and 3: repository setup and architecture scaffold.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::adapters::repository::repository_name;
use crate::adapters::RepositoryHost;
use crate::core::errors::StepError;
use crate::core::executor::{StepContext, StepExecutor, StepOutput};
use crate::domain::{Artifacts, StepNumber, Validation};

use super::{commit_ref, declared_outputs, design, flag, pretty, repository};

/// Module layout every generated game starts from
const ARCHITECTURE_MODULES: [&str; 6] = [
    "core_loop",
    "progression",
    "economy",
    "analytics",
    "ads",
    "ui",
];

/// Stage 2: create (or reuse) the game's repository and commit the design
pub struct ProjectSetupStep {
    repositories: Arc<dyn RepositoryHost>,
}

impl ProjectSetupStep {
    pub fn new(repositories: Arc<dyn RepositoryHost>) -> Self {
        Self { repositories }
    }
}

#[async_trait]
impl StepExecutor for ProjectSetupStep {
    fn step(&self) -> StepNumber {
        StepNumber::ProjectSetup
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let template = ctx.input_str("template_repo")?;
        let name = repository_name(&ctx.job.name);
        let repo = self.repositories.ensure_repository(&name, template).await?;

        let spec = ctx.input("gdd_spec")?;
        let outcome = self
            .repositories
            .commit(&repo, "design/gdd.json", &pretty(spec)?, "Add game design document")
            .await?;
        info!(repository = %repo.name, created = repo.created, "Project ready");

        let artifacts = Artifacts::new()
            .with("github_repo", repo.name.clone())
            .with("repository_url", repo.url.clone())
            .with("local_path", repo.local_path.display().to_string())
            .with("repository_created", repo.created)
            .with("gdd_commit", commit_ref(&outcome));
        Ok(StepOutput::new(artifacts).with_log(format!(
            "{} repository {}",
            if repo.created { "Created" } else { "Reused" },
            repo.name
        )))
    }
}

/// Stage 3: commit the module layout derived from the design
pub struct ArchitectureStep {
    repositories: Arc<dyn RepositoryHost>,
}

impl ArchitectureStep {
    pub fn new(repositories: Arc<dyn RepositoryHost>) -> Self {
        Self { repositories }
    }
}

#[async_trait]
impl StepExecutor for ArchitectureStep {
    fn step(&self) -> StepNumber {
        StepNumber::Architecture
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let spec = design(ctx)?;
        let repo = repository(ctx)?;

        let layout = json!({
            "modules": ARCHITECTURE_MODULES,
            "mechanics": spec.mechanic_names(),
            "fail_state": spec.fail_states.as_ref().map(|f| f.primary.clone()),
            "entry_point": "lib/main.dart",
        });
        let outcome = self
            .repositories
            .commit(&repo, "lib/architecture.json", &pretty(&layout)?, "Scaffold architecture")
            .await?;

        let validated = !spec.mechanic_names().is_empty() && spec.core_loop.is_some();
        let artifacts = Artifacts::new()
            .with("architecture_validated", validated)
            .with("architecture_modules", json!(ARCHITECTURE_MODULES))
            .with("architecture_commit", commit_ref(&outcome));
        Ok(StepOutput::new(artifacts))
    }

    async fn validate(&self, _ctx: &StepContext, output: &StepOutput) -> Validation {
        let mut errors = Vec::new();
        if !flag(&output.artifacts, "architecture_validated") {
            errors.push("architecture has no mechanics or core loop to wire".to_string());
        }
        declared_outputs(self.step(), &output.artifacts).merge(Validation::from_errors(errors, Vec::new()))
    }
}
