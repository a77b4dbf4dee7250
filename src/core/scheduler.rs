//! Concurrency-bounded worker pool.
//!
//! Pulls tasks from the queue, runs them on up to `worker_concurrency`
//! workers, and turns each [`StepEvent`] into follow-up tasks. Follow-ups
//! are enqueued only after the orchestrator returned, i.e. after the step's
//! transaction committed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::domain::{BatchStatus, Event, EventType, JobStatus, StepStatus};

use super::orchestrator::{Orchestrator, StepEvent};
use super::queue::{MemoryQueue, Task, TaskQueue};
use super::store::Store;

/// Counts from one `run_until_idle` drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkSummary {
    pub tasks: usize,
    pub completed_steps: usize,
    pub retries: usize,
    pub failed_steps: usize,
    pub errors: usize,
}

/// Worker pool over an in-process queue
#[derive(Clone)]
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    queue: MemoryQueue,
    store: Store,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, queue: MemoryQueue, concurrency: usize) -> Self {
        let store = orchestrator.store().clone();
        Self {
            orchestrator,
            queue,
            store,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn queue(&self) -> &MemoryQueue {
        &self.queue
    }

    /// Process tasks until the queue and every worker are idle
    #[instrument(skip(self))]
    pub async fn run_until_idle(&self) -> Result<WorkSummary> {
        let mut summary = WorkSummary::default();
        let mut workers: JoinSet<Result<Option<StepEvent>>> = JoinSet::new();

        loop {
            if self.queue.is_idle() && workers.is_empty() {
                break;
            }

            tokio::select! {
                Some(task) = self.queue.recv() => {
                    let permit = Arc::clone(&self.permits)
                        .acquire_owned()
                        .await
                        .context("Worker pool closed")?;
                    let worker = self.clone();
                    summary.tasks += 1;
                    workers.spawn(async move {
                        let _permit = permit;
                        let result = worker.process(task).await;
                        worker.queue.task_done();
                        result
                    });
                }
                Some(joined) = workers.join_next() => {
                    match joined {
                        Ok(Ok(Some(event))) => match event {
                            StepEvent::Completed { .. } => summary.completed_steps += 1,
                            StepEvent::RetryScheduled { .. } => summary.retries += 1,
                            StepEvent::Failed { .. } => summary.failed_steps += 1,
                            _ => {}
                        },
                        Ok(Ok(None)) => {}
                        Ok(Err(e)) => {
                            summary.errors += 1;
                            error!(error = %e, "Task failed");
                        }
                        Err(e) => {
                            summary.errors += 1;
                            error!(error = %e, "Worker crashed");
                        }
                    }
                }
                else => break,
            }
        }

        info!(
            tasks = summary.tasks,
            completed = summary.completed_steps,
            retries = summary.retries,
            failed = summary.failed_steps,
            "Queue drained"
        );
        Ok(summary)
    }

    /// Handle one task and enqueue its follow-ups
    pub async fn process(&self, task: Task) -> Result<Option<StepEvent>> {
        match task {
            Task::ExecuteStep { job_id, step } => {
                let event = self.orchestrator.run_step(job_id, step).await?;
                self.dispatch(&event).await?;
                Ok(Some(event))
            }
            Task::StartBatch { batch_id } => {
                self.fan_out(batch_id).await?;
                Ok(None)
            }
        }
    }

    async fn dispatch(&self, event: &StepEvent) -> Result<()> {
        match event {
            StepEvent::Completed {
                job_id,
                next: Some(next),
                ..
            } => {
                self.queue
                    .enqueue_step(*job_id, next.number(), Duration::ZERO)
                    .await
            }
            StepEvent::RetryScheduled {
                job_id,
                step,
                delay,
                ..
            } => self.queue.enqueue_step(*job_id, step.number(), *delay).await,
            _ => Ok(()),
        }
    }

    /// Enqueue step 1 for every job of the batch that has not started
    async fn fan_out(&self, batch_id: Uuid) -> Result<()> {
        let Some(batch) = self.store.get_batch(batch_id).await? else {
            error!(%batch_id, "Batch not found");
            return Ok(());
        };
        if batch.status == BatchStatus::Cancelled {
            return Ok(());
        }

        let jobs = self.store.list_jobs(Some(batch_id)).await?;
        let mut started = 0usize;
        for job in jobs {
            if job.status != JobStatus::Created || job.current_step != 0 {
                continue;
            }
            let event = Event::new(
                job.id,
                None,
                EventType::BatchStarted,
                format!("{}:{}:start", batch_id, job.id),
                format!("Batch '{}' started job '{}'", batch.name, job.name),
                StepStatus::Pending,
            )
            .with_batch(Some(batch_id));
            self.store.append_event(&event).await?;
            self.queue.enqueue_step(job.id, 1, Duration::ZERO).await?;
            started += 1;
        }

        info!(%batch_id, jobs = started, "Batch fanned out");
        Ok(())
    }
}
