//! Runs one step of one job.
//!
//! Each queued task is one invocation of [`Orchestrator::run_step`]. All
//! state lives in the store, so an invocation can land on any worker, be
//! delivered twice, or arrive after the job was cancelled. Failures are
//! captured into the step record and the generation log; only storage
//! errors escape as `Err`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::mechanics::mechanic_pool;
use crate::domain::{Artifacts, Event, EventType, Job, JobStatus, StepNumber, StepStatus, Validation};

use super::errors::{ErrorKind, StepError};
use super::executor::{ExecutorRegistry, StepContext, StepExecutor, StepOutput};
use super::state_machine::GameStateMachine;
use super::store::{generate_idempotency_key, Claim, FailureOutcome, StepCompletion, Store};
use super::workflow::{RetryPolicy, WorkflowDefinition};

/// Why an invocation did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    JobMissing,
    JobFinished,
    AlreadyCompleted,
    Busy,
}

/// What a single invocation did; the scheduler turns it into follow-up work
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// Committed; `next` is the step to enqueue, if any
    Completed {
        job_id: Uuid,
        step: StepNumber,
        next: Option<StepNumber>,
    },

    /// Retryable failure, step back to pending
    RetryScheduled {
        job_id: Uuid,
        step: StepNumber,
        retry_count: u32,
        delay: Duration,
    },

    /// Terminal failure; job is FAILED
    Failed {
        job_id: Uuid,
        step: StepNumber,
        kind: ErrorKind,
    },

    /// Duplicate or stale delivery
    Skipped {
        job_id: Uuid,
        step: u8,
        reason: SkipReason,
    },

    /// Refused by the transition guard or not a real step
    Rejected { job_id: Uuid, step: u8 },

    /// The job was cancelled before the step started
    Cancelled { job_id: Uuid },

    /// The step finished but its result was not applied
    Discarded { job_id: Uuid, step: StepNumber },
}

/// Step orchestrator
pub struct Orchestrator {
    store: Store,
    registry: ExecutorRegistry,
    workflow: WorkflowDefinition,
    retry: RetryPolicy,
    stale_after: Duration,
    template_repo: String,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        registry: ExecutorRegistry,
        workflow: WorkflowDefinition,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            workflow,
            retry,
            stale_after: Duration::from_secs(1800),
            template_repo: "template".to_string(),
        }
    }

    /// Treat running steps older than this as abandoned
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_template_repo(mut self, template_repo: impl Into<String>) -> Self {
        self.template_repo = template_repo.into();
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Execute `step` of `job_id`
    #[instrument(skip(self), fields(job_id = %job_id, step = step))]
    pub async fn run_step(&self, job_id: Uuid, step: u8) -> Result<StepEvent> {
        let Some(job) = self.store.get_job(job_id).await? else {
            warn!("Job not found, dropping task");
            return Ok(StepEvent::Skipped {
                job_id,
                step,
                reason: SkipReason::JobMissing,
            });
        };

        if job.is_cancelled() {
            info!("Job cancelled, not starting step");
            return Ok(StepEvent::Cancelled { job_id });
        }
        if matches!(
            job.status,
            JobStatus::Failed | JobStatus::Completed | JobStatus::Published
        ) {
            debug!(status = job.status.as_str(), "Job finished, dropping task");
            return Ok(StepEvent::Skipped {
                job_id,
                step,
                reason: SkipReason::JobFinished,
            });
        }

        let step_number = match StepNumber::try_from(step) {
            Ok(s) => s,
            Err(e) => {
                let err = StepError::from(e);
                error!(error = %err, "Rejected task");
                self.log(
                    &job,
                    None,
                    EventType::TransitionDenied,
                    format!("{}:step{}:invalid", job.id, step),
                    format!("Rejected task for step {}", step),
                    StepStatus::Failed,
                    Some(err.to_string()),
                )
                .await?;
                return Ok(StepEvent::Rejected { job_id, step });
            }
        };

        if let Some(record) = self.store.get_step(job_id, step_number).await? {
            if record.status == StepStatus::Completed {
                return self.skip(&job, step_number, SkipReason::AlreadyCompleted).await;
            }
        }

        let machine = GameStateMachine::new(job.id, job.current_step);
        if let Err(denied) = machine.check(step) {
            self.log(
                &job,
                Some(step_number),
                EventType::TransitionDenied,
                format!("{}:{}:denied:{}", job.id, step_number.name(), job.current_step),
                format!("Transition from {} to {} denied", job.current_step, step),
                StepStatus::Pending,
                Some(denied.to_string()),
            )
            .await?;
            return Ok(StepEvent::Rejected { job_id, step });
        }

        let record = match self
            .store
            .claim_step(job_id, step_number, self.stale_after)
            .await?
        {
            Claim::Claimed(record) => record,
            Claim::AlreadyCompleted => {
                return self.skip(&job, step_number, SkipReason::AlreadyCompleted).await
            }
            Claim::Busy { running } => {
                debug!(running = running.number(), "Another step is running");
                return self.skip(&job, step_number, SkipReason::Busy).await;
            }
            Claim::JobMissing => {
                return Ok(StepEvent::Skipped {
                    job_id,
                    step,
                    reason: SkipReason::JobMissing,
                })
            }
        };

        let ctx = self.context_for(&job, step_number, record.retry_count + 1).await?;
        info!(attempt = ctx.attempt, "Step started");
        self.log(
            &job,
            Some(step_number),
            EventType::StepStarted,
            ctx.idempotency_key.clone(),
            format!("Step '{}' attempt {}", step_number.name(), ctx.attempt),
            StepStatus::Running,
            None,
        )
        .await?;

        let started = Instant::now();
        let Some(executor) = self.registry.get(step_number) else {
            let err = StepError::configuration(format!("no executor registered for step {}", step_number));
            return self.fail(&job, &ctx, None, err, None, started).await;
        };

        let missing: Vec<String> = ctx
            .inputs
            .missing(self.workflow.required_inputs(step_number))
            .into_iter()
            .map(String::from)
            .collect();
        if !missing.is_empty() {
            let err = StepError::Input {
                step: step_number,
                missing,
            };
            return self.fail(&job, &ctx, Some(&executor), err, None, started).await;
        }

        let (output, validation) = match self.invoke(&executor, &ctx).await {
            Ok(result) => result,
            Err(err) => return self.fail(&job, &ctx, Some(&executor), err, None, started).await,
        };
        if !validation.valid {
            let err = StepError::Validation {
                errors: validation.errors.clone(),
            };
            return self
                .fail(&job, &ctx, Some(&executor), err, Some(&validation), started)
                .await;
        }

        self.commit(job, ctx, output, validation, started).await
    }

    /// Context a fresh invocation of `step` would receive
    pub async fn build_context(&self, job_id: Uuid, step: StepNumber) -> Result<StepContext> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Job not found: {}", job_id))?;
        let attempt = self
            .store
            .get_step(job_id, step)
            .await?
            .map(|r| r.retry_count + 1)
            .unwrap_or(1);
        self.context_for(&job, step, attempt).await
    }

    async fn context_for(&self, job: &Job, step: StepNumber, attempt: u32) -> Result<StepContext> {
        let inputs = self.resolve_inputs(job).await?;
        let idempotency_key =
            generate_idempotency_key(job.id, step.name(), &serde_json::to_string(&inputs)?);
        Ok(StepContext {
            job: job.clone(),
            step,
            inputs,
            attempt,
            idempotency_key,
        })
    }

    /// Engine-provided inputs plus every completed step's artifacts
    async fn resolve_inputs(&self, job: &Job) -> Result<Artifacts> {
        let events: Vec<Value> = self
            .store
            .analytics_events(job.id)
            .await?
            .into_iter()
            .map(|e| json!({"event_name": e.event_name, "level": e.level}))
            .collect();

        let mut inputs = Artifacts::new()
            .with("genre", job.genre.clone())
            .with("game_id", job.id.to_string())
            .with("constraints", serde_json::to_value(&job.constraints)?)
            .with("mechanic_pool", json!(mechanic_pool(&job.genre)))
            .with("template_repo", self.template_repo.clone())
            .with("analytics_events", Value::Array(events));

        if let Some(spec) = &job.spec {
            inputs.insert("gdd_spec", spec.clone());
            if let Some(style) = spec.get("asset_style_guide") {
                inputs.insert("asset_style_guide", style.clone());
            }
        }
        if !job.selected_mechanics.is_empty() {
            inputs.insert("selected_mechanics", json!(job.selected_mechanics));
        }

        inputs.extend(&self.store.completed_artifacts(job.id).await?);
        Ok(inputs)
    }

    /// Run execute + validate under the stage timeout
    async fn invoke(
        &self,
        executor: &Arc<dyn StepExecutor>,
        ctx: &StepContext,
    ) -> Result<(StepOutput, Validation), StepError> {
        let timeout = self.workflow.timeout(ctx.step);
        let task_executor = Arc::clone(executor);
        let task_ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            let output = task_executor.execute(&task_ctx).await?;
            let validation = task_executor.validate(&task_ctx, &output).await;
            Ok::<_, StepError>((output, validation))
        });
        let abort = handle.abort_handle();

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StepError::transient(format!(
                "executor crashed: {}",
                join_err
            ))),
            Err(_) => {
                abort.abort();
                Err(StepError::Timeout {
                    step: ctx.step,
                    timeout,
                })
            }
        }
    }

    async fn commit(
        &self,
        job: Job,
        ctx: StepContext,
        output: StepOutput,
        validation: Validation,
        started: Instant,
    ) -> Result<StepEvent> {
        let step = ctx.step;

        // Cooperative cancellation: a late result never advances a cancelled job
        let cancelled = self
            .store
            .get_job(job.id)
            .await?
            .map(|j| j.is_cancelled())
            .unwrap_or(true);
        let mut machine = GameStateMachine::new(job.id, job.current_step);
        if cancelled || machine.transition(step.number(), false).is_err() {
            return self.discard(&job, &ctx).await;
        }

        let completion = StepCompletion {
            artifacts: output.artifacts,
            validation,
            logs: (!output.logs.is_empty()).then(|| output.logs.join("\n")),
            spec: output.spec.map(|s| (s.spec, s.mechanics)),
        };
        if !self.store.complete_step(job.id, step, &completion).await? {
            return self.discard(&job, &ctx).await;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(duration_ms, "Step completed");
        let event = self
            .event(
                &job,
                Some(step),
                EventType::StepCompleted,
                ctx.idempotency_key.clone(),
                format!("Step '{}' completed in {}ms", step.name(), duration_ms),
                StepStatus::Completed,
            )
            .with_duration(duration_ms);
        self.store.append_event(&event).await?;

        if step.is_last() {
            info!("Job completed");
            self.log(
                &job,
                None,
                EventType::JobCompleted,
                format!("{}:complete", job.id),
                format!("Job '{}' completed all stages", job.name),
                StepStatus::Completed,
                None,
            )
            .await?;
            self.refresh_batch(&job).await?;
        }

        Ok(StepEvent::Completed {
            job_id: job.id,
            step,
            next: step.next(),
        })
    }

    async fn fail(
        &self,
        job: &Job,
        ctx: &StepContext,
        executor: Option<&Arc<dyn StepExecutor>>,
        err: StepError,
        validation: Option<&Validation>,
        started: Instant,
    ) -> Result<StepEvent> {
        let step = ctx.step;
        let kind = err.kind();
        let duration_ms = started.elapsed().as_millis() as u64;
        let message = err.to_string();

        let outcome = self
            .store
            .fail_attempt(job.id, step, &message, validation, kind.is_retryable(), &self.retry)
            .await?;

        match outcome {
            FailureOutcome::RetryScheduled { retry_count } => {
                let delay = self.retry.delay();
                warn!(
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Step failed, retrying"
                );
                let event = self
                    .event(
                        job,
                        Some(step),
                        EventType::StepRetrying,
                        format!("{}:retry:{}", ctx.idempotency_key, retry_count),
                        format!("Step '{}' failed, retrying in {:?}", step.name(), delay),
                        StepStatus::Pending,
                    )
                    .with_duration(duration_ms)
                    .with_error(message);
                self.store.append_event(&event).await?;
                Ok(StepEvent::RetryScheduled {
                    job_id: job.id,
                    step,
                    retry_count,
                    delay,
                })
            }
            FailureOutcome::Failed { retry_count } => {
                error!(retry_count, kind = kind.as_str(), error = %message, "Step failed permanently");
                let event = self
                    .event(
                        job,
                        Some(step),
                        EventType::StepFailed,
                        ctx.idempotency_key.clone(),
                        format!(
                            "Step '{}' failed after {} attempts ({})",
                            step.name(),
                            ctx.attempt,
                            kind.as_str()
                        ),
                        StepStatus::Failed,
                    )
                    .with_duration(duration_ms)
                    .with_error(message.clone());
                self.store.append_event(&event).await?;
                self.log(
                    job,
                    Some(step),
                    EventType::JobFailed,
                    format!("{}:failed", job.id),
                    format!("Job '{}' failed at step {}", job.name, step),
                    StepStatus::Failed,
                    Some(message),
                )
                .await?;

                if let Some(executor) = executor {
                    if let Err(e) = executor.rollback(ctx).await {
                        warn!(error = %e, "Rollback failed");
                    }
                }
                self.refresh_batch(job).await?;

                Ok(StepEvent::Failed {
                    job_id: job.id,
                    step,
                    kind,
                })
            }
        }
    }

    async fn discard(&self, job: &Job, ctx: &StepContext) -> Result<StepEvent> {
        warn!("Job changed while step was running, discarding result");
        self.store.release_step(job.id, ctx.step).await?;
        self.log(
            job,
            Some(ctx.step),
            EventType::ResultDiscarded,
            ctx.idempotency_key.clone(),
            format!("Result of '{}' discarded", ctx.step.name()),
            StepStatus::Pending,
            None,
        )
        .await?;
        Ok(StepEvent::Discarded {
            job_id: job.id,
            step: ctx.step,
        })
    }

    async fn skip(&self, job: &Job, step: StepNumber, reason: SkipReason) -> Result<StepEvent> {
        debug!(?reason, "Skipping duplicate delivery");
        self.log(
            job,
            Some(step),
            EventType::StepSkipped,
            format!("{}:{}:skip", job.id, step.name()),
            format!("Step '{}' skipped ({:?})", step.name(), reason),
            StepStatus::Skipped,
            None,
        )
        .await?;
        Ok(StepEvent::Skipped {
            job_id: job.id,
            step: step.number(),
            reason,
        })
    }

    async fn refresh_batch(&self, job: &Job) -> Result<()> {
        if let Some(batch_id) = job.batch_id {
            self.store.refresh_batch_status(batch_id).await?;
        }
        Ok(())
    }

    fn event(
        &self,
        job: &Job,
        step: Option<StepNumber>,
        event_type: EventType,
        idempotency_key: String,
        message: String,
        status: StepStatus,
    ) -> Event {
        Event::new(job.id, step, event_type, idempotency_key, message, status).with_batch(job.batch_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn log(
        &self,
        job: &Job,
        step: Option<StepNumber>,
        event_type: EventType,
        idempotency_key: String,
        message: String,
        status: StepStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut event = self.event(job, step, event_type, idempotency_key, message, status);
        event.error = error;
        self.store.append_event(&event).await
    }
}
