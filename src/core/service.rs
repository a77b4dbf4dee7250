//! Consumer-facing operations.
//!
//! Thin accessors and triggers over the store and the queue. Nothing here
//! executes a step; starting work means enqueueing a task for the worker
//! pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    merge_constraints, AnalyticsEvent, Batch, BatchStatus, Constraint, Event, EventType, Job,
    JobStatus, LearningWeight, RegenerationLog, SimilarityCheck, StepNumber, StepRecord,
    StepStatus, WeightSummary,
};
use crate::similarity::{SimilarityConfig, SimilarityEngine};

use super::queue::TaskQueue;
use super::state_machine::GameStateMachine;
use super::store::Store;

/// Errors returned to consumers
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("step {step} not found for job {job_id}")]
    StepNotFound { job_id: Uuid, step: u8 },

    #[error("cannot retry step {step}: {reason}")]
    RetryNotAllowed { step: u8, reason: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type FactoryResult<T> = std::result::Result<T, FactoryError>;

/// Largest number of games a single batch may hold
pub const MAX_BATCH_SIZE: u32 = 50;

/// Parameters for a new batch
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub name: Option<String>,
    pub game_count: Option<u32>,
    pub genre_mix: Vec<String>,
    pub constraints: Vec<Constraint>,

    /// Seed constraints from this batch's post-launch feedback
    pub inherit_from: Option<Uuid>,
}

/// Factory operations over one store and queue
#[derive(Clone)]
pub struct FactoryService {
    store: Store,
    queue: Arc<dyn TaskQueue>,
    max_retries: u32,
    batch_default_size: u32,
}

impl FactoryService {
    pub fn new(store: Store, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            store,
            queue,
            max_retries: 3,
            batch_default_size: 10,
        }
    }

    /// Automatic attempts each new step gets
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_batch_default_size(mut self, size: u32) -> Self {
        self.batch_default_size = size;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    /// Create a batch and its jobs; nothing runs until it is started
    #[instrument(skip(self, request), fields(inherit_from = ?request.inherit_from))]
    pub async fn create_batch(&self, request: BatchRequest) -> FactoryResult<(Batch, Vec<Job>)> {
        let count = request.game_count.unwrap_or(self.batch_default_size);
        if !(1..=MAX_BATCH_SIZE).contains(&count) {
            return Err(FactoryError::InvalidState(format!(
                "batch size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, count
            )));
        }

        let mut lists = Vec::new();
        if let Some(parent) = request.inherit_from {
            if self.store.get_batch(parent).await?.is_none() {
                return Err(FactoryError::BatchNotFound(parent));
            }
            lists.extend(self.store.batch_feedback_constraints(parent).await?);
        }
        // Explicit constraints override inherited ones of the same type
        lists.push(request.constraints);
        let constraints = merge_constraints(lists);

        let name = request
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("batch-{}", Utc::now().format("%Y%m%d-%H%M%S")));
        let batch = Batch::new(name, count, request.genre_mix, constraints, request.inherit_from);
        self.store.insert_batch(&batch).await?;

        let mut jobs = Vec::with_capacity(count as usize);
        for index in 0..count as usize {
            let job = Job::new(
                batch.job_name(index),
                batch.genre_for(index),
                Some(batch.id),
                batch.constraints.clone(),
            );
            self.insert_job(&job).await?;
            jobs.push(job);
        }

        info!(
            batch_id = %batch.id,
            jobs = jobs.len(),
            constraints = batch.constraints.len(),
            "Batch created"
        );
        Ok((batch, jobs))
    }

    /// Move a pending batch to running and enqueue its fan-out
    pub async fn start_batch(&self, batch_id: Uuid) -> FactoryResult<Batch> {
        let batch = self.require_batch(batch_id).await?;
        if batch.status != BatchStatus::Pending {
            return Err(FactoryError::InvalidState(format!(
                "batch {} is {}",
                batch_id,
                batch.status.as_str()
            )));
        }
        self.store.set_batch_status(batch_id, BatchStatus::Running).await?;
        self.queue.enqueue_batch_start(batch_id).await?;
        info!(%batch_id, "Batch started");
        self.require_batch(batch_id).await
    }

    pub async fn get_batch(&self, batch_id: Uuid) -> FactoryResult<Batch> {
        self.require_batch(batch_id).await
    }

    pub async fn list_batches(&self, limit: usize) -> FactoryResult<Vec<Batch>> {
        Ok(self.store.list_batches(limit).await?)
    }

    /// Cancel every unfinished job of a batch; returns how many changed
    pub async fn cancel_batch(&self, batch_id: Uuid) -> FactoryResult<usize> {
        self.require_batch(batch_id).await?;
        let mut cancelled = 0;
        for job in self.store.list_jobs(Some(batch_id)).await? {
            if self.cancel(&job).await? {
                cancelled += 1;
            }
        }
        self.store.set_batch_status(batch_id, BatchStatus::Cancelled).await?;
        info!(%batch_id, cancelled, "Batch cancelled");
        Ok(cancelled)
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Create a standalone job
    pub async fn create_job(
        &self,
        name: &str,
        genre: &str,
        constraints: Vec<Constraint>,
    ) -> FactoryResult<Job> {
        let job = Job::new(name.to_string(), genre.to_lowercase(), None, constraints);
        self.insert_job(&job).await?;
        info!(job_id = %job.id, genre = %job.genre, "Job created");
        Ok(job)
    }

    /// Enqueue step 1 of a job that has not started
    pub async fn start_job(&self, job_id: Uuid) -> FactoryResult<Job> {
        let job = self.require_job(job_id).await?;
        if job.status != JobStatus::Created || job.current_step != 0 {
            return Err(FactoryError::InvalidState(format!(
                "job {} is {} at step {}",
                job_id,
                job.status.as_str(),
                job.current_step
            )));
        }
        self.queue.enqueue_step(job_id, 1, Duration::ZERO).await?;
        Ok(job)
    }

    pub async fn get_job(&self, job_id: Uuid) -> FactoryResult<Job> {
        self.require_job(job_id).await
    }

    pub async fn list_jobs(&self, batch_id: Option<Uuid>) -> FactoryResult<Vec<Job>> {
        Ok(self.store.list_jobs(batch_id).await?)
    }

    pub async fn job_steps(&self, job_id: Uuid) -> FactoryResult<Vec<StepRecord>> {
        self.require_job(job_id).await?;
        Ok(self.store.list_steps(job_id).await?)
    }

    pub async fn get_step(&self, job_id: Uuid, step: u8) -> FactoryResult<StepRecord> {
        let number =
            StepNumber::try_from(step).map_err(|_| FactoryError::StepNotFound { job_id, step })?;
        self.store
            .get_step(job_id, number)
            .await?
            .ok_or(FactoryError::StepNotFound { job_id, step })
    }

    /// Cancel a job; steps in flight finish but their results are discarded
    pub async fn cancel_job(&self, job_id: Uuid) -> FactoryResult<bool> {
        let job = self.require_job(job_id).await?;
        let cancelled = self.cancel(&job).await?;
        if let Some(batch_id) = job.batch_id {
            self.store.refresh_batch_status(batch_id).await?;
        }
        Ok(cancelled)
    }

    /// Reset a failed step to pending and enqueue it.
    ///
    /// Without `force` the step must still have automatic attempts left.
    /// A forced retry bypasses the transition guard and the retry limit.
    #[instrument(skip(self), fields(job_id = %job_id, step = step, force = force))]
    pub async fn retry_step(&self, job_id: Uuid, step: u8, force: bool) -> FactoryResult<StepRecord> {
        let job = self.require_job(job_id).await?;
        let record = self.get_step(job_id, step).await?;

        if job.is_cancelled() {
            return Err(FactoryError::InvalidState(format!("job {} is cancelled", job_id)));
        }
        if record.status != StepStatus::Failed {
            return Err(FactoryError::RetryNotAllowed {
                step,
                reason: format!("step is {}, not failed", record.status.as_str()),
            });
        }
        if !force && !record.has_retries_left() {
            return Err(FactoryError::RetryNotAllowed {
                step,
                reason: format!(
                    "{} of {} attempts used; retry with force",
                    record.retry_count, record.max_retries
                ),
            });
        }

        let mut machine = GameStateMachine::new(job.id, job.current_step);
        machine
            .transition(step, force)
            .map_err(|e| FactoryError::RetryNotAllowed {
                step,
                reason: e.to_string(),
            })?;

        let record = self.store.reset_step(job_id, record.step).await?;
        let (event_type, message) = if force {
            (
                EventType::ForcedRetry,
                format!("Forced retry of step '{}'", record.step.name()),
            )
        } else {
            (
                EventType::StepRetrying,
                format!("Manual retry of step '{}'", record.step.name()),
            )
        };
        let event = Event::new(
            job_id,
            Some(record.step),
            event_type,
            format!("{}:{}:retry{}", job_id, record.step.name(), record.retry_count),
            message,
            StepStatus::Pending,
        )
        .with_batch(job.batch_id);
        self.store.append_event(&event).await?;

        self.queue.enqueue_step(job_id, step, Duration::ZERO).await?;
        warn!(retry_count = record.retry_count, "Step reset for retry");
        Ok(record)
    }

    /// Enqueue the next step of every job that can make progress.
    ///
    /// The in-process queue does not survive a restart; this rebuilds it
    /// from the store. Duplicates are harmless.
    pub async fn enqueue_runnable(&self) -> FactoryResult<usize> {
        let mut running_batches: HashMap<Uuid, bool> = HashMap::new();
        let mut enqueued = 0;
        for job in self.store.list_jobs(None).await? {
            if usize::from(job.current_step) >= StepNumber::ALL.len() {
                continue;
            }
            let runnable = match job.status {
                JobStatus::InProgress => true,
                JobStatus::Created => match job.batch_id {
                    Some(batch_id) => {
                        if !running_batches.contains_key(&batch_id) {
                            let running = self
                                .store
                                .get_batch(batch_id)
                                .await?
                                .map_or(false, |b| b.status == BatchStatus::Running);
                            running_batches.insert(batch_id, running);
                        }
                        running_batches.get(&batch_id).copied().unwrap_or(false)
                    }
                    None => false,
                },
                _ => false,
            };
            if runnable {
                self.queue
                    .enqueue_step(job.id, job.current_step + 1, Duration::ZERO)
                    .await?;
                enqueued += 1;
            }
        }
        info!(enqueued, "Runnable jobs enqueued");
        Ok(enqueued)
    }

    // ------------------------------------------------------------------
    // History and learning
    // ------------------------------------------------------------------

    pub fn similarity_config(&self) -> SimilarityConfig {
        SimilarityEngine::new().config()
    }

    pub async fn similarity_checks(&self, job_id: Uuid) -> FactoryResult<Vec<SimilarityCheck>> {
        self.require_job(job_id).await?;
        Ok(self.store.similarity_checks(job_id).await?)
    }

    pub async fn regeneration_logs(&self, job_id: Uuid) -> FactoryResult<Vec<RegenerationLog>> {
        self.require_job(job_id).await?;
        Ok(self.store.regeneration_logs(job_id).await?)
    }

    pub async fn recent_regenerations(&self, limit: usize) -> FactoryResult<Vec<RegenerationLog>> {
        Ok(self.store.recent_regenerations(limit).await?)
    }

    pub async fn learning_weights(&self, genre: Option<&str>) -> FactoryResult<Vec<LearningWeight>> {
        Ok(self.store.list_weights(genre).await?)
    }

    pub async fn weight_summaries(&self) -> FactoryResult<Vec<WeightSummary>> {
        Ok(self.store.weight_summaries().await?)
    }

    /// Record one player analytics event for a published game
    pub async fn record_analytics_event(
        &self,
        job_id: Uuid,
        event_name: &str,
        level: Option<u32>,
    ) -> FactoryResult<AnalyticsEvent> {
        self.require_job(job_id).await?;
        let event = AnalyticsEvent {
            id: Uuid::new_v4(),
            job_id,
            event_name: event_name.to_string(),
            level,
            created_at: Utc::now(),
        };
        self.store.insert_analytics_event(&event).await?;
        Ok(event)
    }

    pub async fn job_logs(&self, job_id: Uuid) -> FactoryResult<Vec<Event>> {
        self.require_job(job_id).await?;
        Ok(self.store.job_events(job_id).await?)
    }

    pub async fn batch_logs(&self, batch_id: Uuid) -> FactoryResult<Vec<Event>> {
        self.require_batch(batch_id).await?;
        Ok(self.store.batch_events(batch_id).await?)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn insert_job(&self, job: &Job) -> FactoryResult<()> {
        self.store.create_job(job, self.max_retries).await?;
        let event = Event::new(
            job.id,
            None,
            EventType::JobCreated,
            format!("{}:created", job.id),
            format!("Job '{}' created ({})", job.name, job.genre),
            StepStatus::Pending,
        )
        .with_batch(job.batch_id);
        self.store.append_event(&event).await?;
        Ok(())
    }

    async fn cancel(&self, job: &Job) -> FactoryResult<bool> {
        if !self.store.cancel_job(job.id).await? {
            return Ok(false);
        }
        let event = Event::new(
            job.id,
            None,
            EventType::JobCancelled,
            format!("{}:cancelled", job.id),
            format!("Job '{}' cancelled at step {}", job.name, job.current_step),
            StepStatus::Skipped,
        )
        .with_batch(job.batch_id);
        self.store.append_event(&event).await?;
        info!(job_id = %job.id, "Job cancelled");
        Ok(true)
    }

    async fn require_job(&self, job_id: Uuid) -> FactoryResult<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(FactoryError::JobNotFound(job_id))
    }

    async fn require_batch(&self, batch_id: Uuid) -> FactoryResult<Batch> {
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or(FactoryError::BatchNotFound(batch_id))
    }
}
