//! Stages 4 and 5: analytics event schema and its wiring.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::RepositoryHost;
use crate::core::errors::StepError;
use crate::core::executor::{StepContext, StepExecutor, StepOutput};
use crate::domain::design::REQUIRED_ANALYTICS_EVENTS;
use crate::domain::{Artifacts, StepNumber, Validation};

use super::{commit_ref, declared_outputs, design, pretty, repository};

/// Tracked event with the parameters it carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSchema {
    pub name: String,
    pub params: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSpec {
    pub events: Vec<EventSchema>,
    pub retention_tracking: bool,
    pub funnel_stages: Vec<String>,
}

impl AnalyticsSpec {
    pub fn event_names(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.name.as_str()).collect()
    }
}

fn params_for(event: &str) -> Vec<String> {
    let params: &[&str] = match event {
        "game_start" => &["session_id"],
        "level_start" | "level_complete" | "level_fail" | "level_unlocked" => &["level"],
        "unlock_prompt_shown" | "rewarded_ad_started" | "rewarded_ad_completed"
        | "rewarded_ad_failed" => &["level", "placement"],
        _ => &[],
    };
    params.iter().map(|p| p.to_string()).collect()
}

/// Stage 4: required events plus whatever the design asks for
pub struct AnalyticsDesignStep;

#[async_trait]
impl StepExecutor for AnalyticsDesignStep {
    fn step(&self) -> StepNumber {
        StepNumber::AnalyticsDesign
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let spec = design(ctx)?;
        let plan = spec.analytics_plan.unwrap_or_default();

        let mut names: Vec<String> = REQUIRED_ANALYTICS_EVENTS.iter().map(|e| e.to_string()).collect();
        for event in plan.events {
            if !names.contains(&event) {
                names.push(event);
            }
        }
        let analytics = AnalyticsSpec {
            events: names
                .into_iter()
                .map(|name| EventSchema {
                    params: params_for(&name),
                    name,
                })
                .collect(),
            retention_tracking: true,
            funnel_stages: plan.funnel_stages,
        };

        let value = serde_json::to_value(&analytics)
            .map_err(|e| StepError::transient(format!("failed to encode analytics spec: {}", e)))?;
        Ok(StepOutput::new(Artifacts::new().with("analytics_spec", value)))
    }

    async fn validate(&self, _ctx: &StepContext, output: &StepOutput) -> Validation {
        let declared = declared_outputs(self.step(), &output.artifacts);
        let Some(spec) = output
            .artifacts
            .get("analytics_spec")
            .and_then(|v| serde_json::from_value::<AnalyticsSpec>(v.clone()).ok())
        else {
            return declared.merge(Validation::from_errors(
                vec!["analytics_spec is not a valid event schema".into()],
                Vec::new(),
            ));
        };

        let names = spec.event_names();
        let errors = REQUIRED_ANALYTICS_EVENTS
            .iter()
            .filter(|required| !names.contains(*required))
            .map(|missing| format!("missing required event: {}", missing))
            .collect();
        declared.merge(Validation::from_errors(errors, Vec::new()))
    }
}

/// Stage 5: commit the event schema into the game
pub struct AnalyticsImplementationStep {
    repositories: Arc<dyn RepositoryHost>,
}

impl AnalyticsImplementationStep {
    pub fn new(repositories: Arc<dyn RepositoryHost>) -> Self {
        Self { repositories }
    }
}

#[async_trait]
impl StepExecutor for AnalyticsImplementationStep {
    fn step(&self) -> StepNumber {
        StepNumber::AnalyticsImplementation
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let repo = repository(ctx)?;
        let spec: AnalyticsSpec = serde_json::from_value(ctx.input("analytics_spec")?.clone())
            .map_err(|e| StepError::Input {
                step: ctx.step,
                missing: vec![format!("analytics_spec ({})", e)],
            })?;

        let outcome = self
            .repositories
            .commit(
                &repo,
                "lib/analytics/events.json",
                &pretty(&spec)?,
                "Wire analytics events",
            )
            .await?;

        let artifacts = Artifacts::new()
            .with("analytics_implemented", true)
            .with("events_wired", spec.events.len())
            .with("analytics_commit", commit_ref(&outcome));
        Ok(StepOutput::new(artifacts))
    }

    async fn validate(&self, ctx: &StepContext, output: &StepOutput) -> Validation {
        let expected = ctx
            .inputs
            .get("analytics_spec")
            .and_then(|v| v.get("events"))
            .and_then(Value::as_array)
            .map(|events| events.len() as u64)
            .unwrap_or(0);
        let wired = output
            .artifacts
            .get("events_wired")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let mut errors = Vec::new();
        if wired != expected {
            errors.push(format!("{} of {} events wired", wired, expected));
        }
        declared_outputs(self.step(), &output.artifacts).merge(Validation::from_errors(errors, Vec::new()))
    }
}
