//! Stage 1: generate a design distinct from the existing corpus.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::adapters::{ContentGenerator, GenerationRequest};
use crate::core::errors::StepError;
use crate::core::executor::{StepContext, StepExecutor, StepOutput};
use crate::core::store::Store;
use crate::domain::design::{REQUIRED_ANALYTICS_EVENTS, REQUIRED_SECTIONS};
use crate::domain::{Artifacts, Constraint, DesignSpec, StepNumber, Validation};
use crate::similarity::RegenerationLoop;

pub struct PreProductionStep {
    store: Store,
    regeneration: RegenerationLoop,
}

impl PreProductionStep {
    pub fn new(store: Store, generator: Arc<dyn ContentGenerator>) -> Self {
        Self {
            regeneration: RegenerationLoop::new(store.clone(), generator)
                .with_validator(validate_design),
            store,
        }
    }

    async fn request(&self, ctx: &StepContext) -> Result<GenerationRequest, StepError> {
        let genre = ctx.input_str("genre")?.to_string();
        let constraints: Vec<Constraint> = serde_json::from_value(ctx.input("constraints")?.clone())
            .map_err(|e| StepError::Input {
                step: ctx.step,
                missing: vec![format!("constraints ({})", e)],
            })?;
        let mechanic_pool: Vec<String> =
            serde_json::from_value(ctx.input("mechanic_pool")?.clone()).unwrap_or_default();

        let weights: HashMap<String, f64> = self
            .store
            .list_weights(Some(&genre))
            .await?
            .into_iter()
            .filter(|w| !w.is_genre_row())
            .map(|w| (w.mechanic_name, w.weight))
            .collect();

        Ok(GenerationRequest {
            job_id: ctx.job_id(),
            game_name: ctx.job.name.clone(),
            genre,
            attempt: 1,
            constraints,
            mechanic_pool,
            weights,
            ..Default::default()
        })
    }
}

#[async_trait]
impl StepExecutor for PreProductionStep {
    fn step(&self) -> StepNumber {
        StepNumber::PreProduction
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let request = self.request(ctx).await?;
        let accepted = self.regeneration.run(&ctx.job, request).await?;
        info!(
            job_id = %ctx.job_id(),
            attempts = accepted.attempts,
            score = accepted.score,
            warning = accepted.warning,
            "Design ready"
        );

        let spec = accepted.spec.to_value();
        let artifacts = Artifacts::new()
            .with("gdd_spec", spec.clone())
            .with("selected_mechanics", json!(accepted.mechanics))
            .with("similarity_score", accepted.score)
            .with("generation_attempts", accepted.attempts)
            .with("similarity_warning", accepted.warning);

        Ok(StepOutput::new(artifacts)
            .with_log(format!(
                "Generated '{}' after {} attempt(s), similarity {:.3}",
                accepted.spec.game_name, accepted.attempts, accepted.score
            ))
            .with_spec(spec, accepted.mechanics))
    }

    async fn validate(&self, _ctx: &StepContext, output: &StepOutput) -> Validation {
        match output.artifacts.get("gdd_spec") {
            Some(spec) => validate_design(spec),
            None => Validation::from_errors(vec!["missing output artifact: gdd_spec".into()], Vec::new()),
        }
    }
}

/// Schema check for a generated design
pub fn validate_design(value: &Value) -> Validation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(object) = value.as_object() else {
        return Validation::from_errors(vec!["design is not an object".into()], Vec::new());
    };
    for section in REQUIRED_SECTIONS {
        if object.get(section).map_or(true, Value::is_null) {
            errors.push(format!("missing section: {}", section));
        }
    }

    let Some(spec) = DesignSpec::from_value(value) else {
        errors.push("design does not match the expected shape".into());
        return Validation::from_errors(errors, warnings);
    };
    if spec.mechanics.primary.as_deref().map_or(true, str::is_empty) {
        errors.push("mechanics.primary is required".into());
    }

    let events = spec
        .analytics_plan
        .as_ref()
        .map(|p| p.events.clone())
        .unwrap_or_default();
    for required in REQUIRED_ANALYTICS_EVENTS {
        if !events.iter().any(|e| e == required) {
            warnings.push(format!("analytics plan is missing event: {}", required));
        }
    }

    match &spec.progression {
        Some(p) if p.free_levels.is_empty() || p.locked_levels.is_empty() => {
            warnings.push("progression has no free/locked level split".into());
        }
        None => warnings.push("progression has no level layout".into()),
        _ => {}
    }

    Validation::from_errors(errors, warnings)
}
