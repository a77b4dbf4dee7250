//! Stage 12: score the live game and feed the learning loop.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::adapters::PerformanceSource;
use crate::core::errors::StepError;
use crate::core::executor::{StepContext, StepExecutor, StepOutput};
use crate::core::store::Store;
use crate::domain::{Artifacts, StepNumber, Validation};
use crate::learning::LearningFeedbackEngine;

use super::declared_outputs;

pub struct PostLaunchStep {
    performance: Arc<dyn PerformanceSource>,
    learning: LearningFeedbackEngine,
}

impl PostLaunchStep {
    pub fn new(store: Store, performance: Arc<dyn PerformanceSource>) -> Self {
        Self {
            performance,
            learning: LearningFeedbackEngine::new(store),
        }
    }
}

fn encode<T: serde::Serialize>(value: &T, what: &str) -> Result<Value, StepError> {
    serde_json::to_value(value)
        .map_err(|e| StepError::transient(format!("failed to encode {}: {}", what, e)))
}

#[async_trait]
impl StepExecutor for PostLaunchStep {
    fn step(&self) -> StepNumber {
        StepNumber::PostLaunch
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let metrics = self.performance.collect(&ctx.job).await?;
        let report = self.learning.apply(&ctx.job, &metrics).await?;

        let artifacts = Artifacts::new()
            .with("game_score", report.score)
            .with("next_batch_constraints", encode(&report.constraints, "constraints")?)
            .with("performance_metrics", encode(&metrics, "metrics")?)
            .with("weight_adjustment", report.adjustment)
            .with("weights_updated", report.weights_updated.len())
            .with("feedback_already_applied", report.already_applied);

        Ok(StepOutput::new(artifacts).with_log(format!(
            "Game score {:.1}, {} constraint(s) for the next batch",
            report.score,
            report.constraints.len()
        )))
    }

    async fn validate(&self, _ctx: &StepContext, output: &StepOutput) -> Validation {
        let mut errors = Vec::new();
        if !output
            .artifacts
            .get("next_batch_constraints")
            .map_or(false, Value::is_array)
        {
            errors.push("next_batch_constraints is not a constraint list".to_string());
        }
        if !output
            .artifacts
            .get("game_score")
            .and_then(Value::as_f64)
            .map_or(false, |s| (0.0..=100.0).contains(&s))
        {
            errors.push("game_score outside 0..100".to_string());
        }
        declared_outputs(self.step(), &output.artifacts).merge(Validation::from_errors(errors, Vec::new()))
    }
}
