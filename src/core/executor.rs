//! Step executor contract and registry.
//!
//! An executor does the work of one stage. It receives the resolved inputs,
//! returns artifacts, and may veto its own output in `validate`. Executors
//! are registered once at startup; the orchestrator resolves them by step
//! number and never changes the registry afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{Artifacts, Job, StepNumber, Validation};

use super::errors::StepError;
use super::workflow::stage_definition;

/// Everything an executor may read
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job: Job,
    pub step: StepNumber,

    /// Declared inputs plus every completed step's artifacts
    pub inputs: Artifacts,

    /// 1-based execution attempt for this step
    pub attempt: u32,

    pub idempotency_key: String,
}

impl StepContext {
    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    /// Required input lookup; a missing key is an input error
    pub fn input(&self, key: &str) -> Result<&Value, StepError> {
        self.inputs.get(key).ok_or_else(|| StepError::Input {
            step: self.step,
            missing: vec![key.to_string()],
        })
    }

    /// String-valued input
    pub fn input_str(&self, key: &str) -> Result<&str, StepError> {
        self.input(key)?.as_str().ok_or_else(|| StepError::Input {
            step: self.step,
            missing: vec![format!("{} (string)", key)],
        })
    }
}

/// A new design spec produced by a step
#[derive(Debug, Clone, PartialEq)]
pub struct SpecUpdate {
    pub spec: Value,
    pub mechanics: Vec<String>,
}

/// Result of one successful execution
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub artifacts: Artifacts,
    pub logs: Vec<String>,
    pub spec: Option<SpecUpdate>,
}

impl StepOutput {
    pub fn new(artifacts: Artifacts) -> Self {
        Self {
            artifacts,
            ..Default::default()
        }
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    pub fn with_spec(mut self, spec: Value, mechanics: Vec<String>) -> Self {
        self.spec = Some(SpecUpdate { spec, mechanics });
        self
    }
}

/// Work for one stage of the pipeline
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// The stage this executor implements
    fn step(&self) -> StepNumber;

    /// Produce the stage's artifacts
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError>;

    /// Check the output; the default requires every declared output key
    async fn validate(&self, _ctx: &StepContext, output: &StepOutput) -> Validation {
        let missing = output.artifacts.missing(stage_definition(self.step()).outputs);
        if missing.is_empty() {
            Validation::ok()
        } else {
            Validation::from_errors(
                missing
                    .into_iter()
                    .map(|key| format!("missing output artifact: {}", key))
                    .collect(),
                Vec::new(),
            )
        }
    }

    /// Undo external side effects after a terminal failure
    async fn rollback(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }
}

/// Executors by step number, fixed after startup
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<StepNumber, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for the same step
    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) -> &mut Self {
        self.executors.insert(executor.step(), executor);
        self
    }

    pub fn with(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.register(executor);
        self
    }

    pub fn get(&self, step: StepNumber) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(&step).cloned()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut steps: Vec<u8> = self.executors.keys().map(|s| s.number()).collect();
        steps.sort_unstable();
        f.debug_struct("ExecutorRegistry").field("steps", &steps).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl StepExecutor for Echo {
        fn step(&self) -> StepNumber {
            StepNumber::AnalyticsDesign
        }

        async fn execute(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
            Ok(StepOutput::new(Artifacts::new().with("other", json!(1))))
        }
    }

    fn context() -> StepContext {
        StepContext {
            job: Job::new("Echo".into(), "casual".into(), None, Vec::new()),
            step: StepNumber::AnalyticsDesign,
            inputs: Artifacts::new().with("genre", json!("casual")),
            attempt: 1,
            idempotency_key: "k".into(),
        }
    }

    #[tokio::test]
    async fn test_default_validation_requires_declared_outputs() {
        let ctx = context();
        let output = Echo.execute(&ctx).await.unwrap();
        let validation = Echo.validate(&ctx, &output).await;
        assert!(!validation.valid);
        assert!(validation.errors[0].contains("analytics_spec"));

        let good = StepOutput::new(Artifacts::new().with("analytics_spec", json!({})));
        assert!(Echo.validate(&ctx, &good).await.valid);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ExecutorRegistry::new().with(Arc::new(Echo));
        assert!(registry.get(StepNumber::AnalyticsDesign).is_some());
        assert!(registry.get(StepNumber::Testing).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_input_is_input_error() {
        let ctx = context();
        assert_eq!(ctx.input_str("genre").unwrap(), "casual");
        let err = ctx.input("local_path").unwrap_err();
        assert!(matches!(err, StepError::Input { .. }));
    }
}
