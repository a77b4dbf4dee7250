//! Stages 10 and 11: QA pass and store release.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::adapters::RepositoryHost;
use crate::core::errors::StepError;
use crate::core::executor::{StepContext, StepExecutor, StepOutput};
use crate::domain::{Artifacts, StepNumber, Validation};

use super::{commit_ref, declared_outputs, design, flag, pretty, repository};

/// Earlier artifacts the QA pass verifies, as (artifact, checklist item)
const QA_ITEMS: [(&str, &str); 6] = [
    ("architecture_validated", "Architecture compiles"),
    ("analytics_implemented", "Analytics events fire"),
    ("prototype_playable", "Core loop is playable"),
    ("vertical_slice_complete", "Vertical slice runs"),
    ("levels_generated", "All levels load"),
    ("ad_gating_configured", "Locked levels show the unlock prompt"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub item: String,
    pub passed: bool,
}

/// Stage 10: check every production artifact is in place
pub struct TestingStep;

#[async_trait]
impl StepExecutor for TestingStep {
    fn step(&self) -> StepNumber {
        StepNumber::Testing
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let checklist: Vec<ChecklistItem> = QA_ITEMS
            .iter()
            .map(|(key, item)| ChecklistItem {
                item: item.to_string(),
                passed: match ctx.inputs.get(key) {
                    Some(Value::Bool(b)) => *b,
                    Some(Value::Null) | None => false,
                    Some(Value::Array(items)) => !items.is_empty(),
                    Some(_) => true,
                },
            })
            .collect();
        let passed = checklist.iter().all(|c| c.passed);
        info!(job_id = %ctx.job_id(), passed, "QA pass finished");

        let checklist = serde_json::to_value(&checklist)
            .map_err(|e| StepError::transient(format!("failed to encode checklist: {}", e)))?;
        Ok(StepOutput::new(
            Artifacts::new()
                .with("tests_passed", passed)
                .with("qa_checklist", checklist),
        ))
    }

    async fn validate(&self, _ctx: &StepContext, output: &StepOutput) -> Validation {
        let failed: Vec<String> = output
            .artifacts
            .get("qa_checklist")
            .and_then(|v| serde_json::from_value::<Vec<ChecklistItem>>(v.clone()).ok())
            .unwrap_or_default()
            .into_iter()
            .filter(|c| !c.passed)
            .map(|c| format!("QA failed: {}", c.item))
            .collect();

        let mut errors = failed;
        if errors.is_empty() && !flag(&output.artifacts, "tests_passed") {
            errors.push("tests did not pass".to_string());
        }
        declared_outputs(self.step(), &output.artifacts).merge(Validation::from_errors(errors, Vec::new()))
    }
}

/// Store listing for a finished game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub title: String,
    pub short_description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub content_rating: String,
    pub monetization: String,
}

/// Stage 11: store listing, final commit and push
pub struct ReleasePrepStep {
    repositories: Arc<dyn RepositoryHost>,
}

impl ReleasePrepStep {
    pub fn new(repositories: Arc<dyn RepositoryHost>) -> Self {
        Self { repositories }
    }
}

#[async_trait]
impl StepExecutor for ReleasePrepStep {
    fn step(&self) -> StepNumber {
        StepNumber::ReleasePrep
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let spec = design(ctx)?;
        let repo = repository(ctx)?;

        let hook = spec
            .core_loop
            .as_ref()
            .map(|c| c.description.clone())
            .unwrap_or_default();
        let metadata = StoreMetadata {
            title: spec.game_name.clone(),
            short_description: if hook.is_empty() {
                format!("A {} game", spec.genre)
            } else {
                format!("A {} game. {}", spec.genre, hook)
            },
            category: spec.genre.clone(),
            tags: spec.mechanic_names(),
            content_rating: "everyone".to_string(),
            monetization: "rewarded_ads".to_string(),
        };

        let outcome = self
            .repositories
            .commit(&repo, "store/metadata.json", &pretty(&metadata)?, "Add store listing")
            .await?;
        self.repositories.push(&repo).await?;
        info!(repository = %repo.name, "Release pushed");

        let metadata = serde_json::to_value(&metadata)
            .map_err(|e| StepError::transient(format!("failed to encode store metadata: {}", e)))?;
        Ok(StepOutput::new(
            Artifacts::new()
                .with("release_ready", true)
                .with("store_metadata", metadata)
                .with("release_commit", commit_ref(&outcome)),
        ))
    }

    async fn validate(&self, _ctx: &StepContext, output: &StepOutput) -> Validation {
        let mut errors = Vec::new();
        match output
            .artifacts
            .get("store_metadata")
            .and_then(|v| serde_json::from_value::<StoreMetadata>(v.clone()).ok())
        {
            Some(metadata) => {
                if metadata.title.trim().is_empty() {
                    errors.push("store listing has no title".to_string());
                }
                if metadata.short_description.trim().is_empty() {
                    errors.push("store listing has no description".to_string());
                }
            }
            None => errors.push("store metadata is empty".to_string()),
        }
        declared_outputs(self.step(), &output.artifacts).merge(Validation::from_errors(errors, Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::Job;

    #[tokio::test]
    async fn test_qa_fails_on_missing_artifact() {
        let ctx = StepContext {
            job: Job::new("QA".into(), "runner".into(), None, Vec::new()),
            step: StepNumber::Testing,
            inputs: Artifacts::new()
                .with("local_path", "/tmp/qa")
                .with("architecture_validated", true)
                .with("analytics_implemented", true)
                .with("prototype_playable", true)
                .with("vertical_slice_complete", true)
                .with("levels_generated", json!([])),
            attempt: 1,
            idempotency_key: "k".into(),
        };
        let output = TestingStep.execute(&ctx).await.unwrap();
        let validation = TestingStep.validate(&ctx, &output).await;

        assert!(!validation.valid);
        assert_eq!(
            validation.errors,
            vec![
                "QA failed: All levels load".to_string(),
                "QA failed: Locked levels show the unlock prompt".to_string(),
            ]
        );
    }
}
