//! Task queue between the service layer and the worker pool.
//!
//! Delivery is at-least-once: the orchestrator tolerates duplicate and
//! late tasks, so the queue never deduplicates.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// A unit of work for a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Run one step of one job
    ExecuteStep { job_id: Uuid, step: u8 },

    /// Fan a batch out into step-1 tasks
    StartBatch { batch_id: Uuid },
}

/// Where tasks are sent
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue `task`, deliverable after `delay`
    async fn enqueue(&self, task: Task, delay: Duration) -> Result<()>;

    async fn enqueue_step(&self, job_id: Uuid, step: u8, delay: Duration) -> Result<()> {
        self.enqueue(Task::ExecuteStep { job_id, step }, delay).await
    }

    async fn enqueue_batch_start(&self, batch_id: Uuid) -> Result<()> {
        self.enqueue(Task::StartBatch { batch_id }, Duration::ZERO)
            .await
    }
}

/// In-process queue backed by an unbounded channel.
///
/// Delayed tasks are held by a sleeping timer task and count as
/// outstanding until a worker reports them done.
#[derive(Clone)]
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<Task>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
    outstanding: Arc<AtomicUsize>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Next deliverable task; `None` once every sender is gone
    pub async fn recv(&self) -> Option<Task> {
        self.rx.lock().await.recv().await
    }

    /// Mark a received task as handled
    pub fn task_done(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    /// Tasks enqueued but not yet reported done
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, task: Task, delay: Duration) -> Result<()> {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        debug!(?task, delay_ms = delay.as_millis() as u64, "Enqueue");

        if delay.is_zero() {
            return self.tx.send(task).map_err(|e| {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                anyhow::anyhow!("Task queue closed: {:?}", e.0)
            });
        }

        let tx = self.tx.clone();
        let outstanding = Arc::clone(&self.outstanding);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(task).is_err() {
                outstanding.fetch_sub(1, Ordering::SeqCst);
            }
        });
        Ok(())
    }
}

/// Serialize a task for an external broker
pub fn encode_task(task: &Task) -> Result<String> {
    serde_json::to_string(task).context("Failed to encode task")
}

pub fn decode_task(raw: &str) -> Result<Task> {
    serde_json::from_str(raw).with_context(|| format!("Malformed task: {}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tasks_are_delivered_in_order() {
        let queue = MemoryQueue::new();
        let job_id = Uuid::new_v4();
        queue.enqueue_step(job_id, 1, Duration::ZERO).await.unwrap();
        queue.enqueue_step(job_id, 2, Duration::ZERO).await.unwrap();
        assert_eq!(queue.outstanding(), 2);

        assert_eq!(queue.recv().await, Some(Task::ExecuteStep { job_id, step: 1 }));
        queue.task_done();
        assert_eq!(queue.recv().await, Some(Task::ExecuteStep { job_id, step: 2 }));
        queue.task_done();
        assert!(queue.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_task_counts_as_outstanding() {
        let queue = MemoryQueue::new();
        let batch_id = Uuid::new_v4();
        queue
            .enqueue(Task::StartBatch { batch_id }, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(queue.outstanding(), 1);
        let task = queue.recv().await;
        assert_eq!(task, Some(Task::StartBatch { batch_id }));
    }

    #[test]
    fn test_task_wire_format() {
        let job_id = Uuid::nil();
        let raw = encode_task(&Task::ExecuteStep { job_id, step: 4 }).unwrap();
        assert!(raw.contains("\"task\":\"execute_step\""));
        assert_eq!(decode_task(&raw).unwrap(), Task::ExecuteStep { job_id, step: 4 });
        assert!(decode_task("{\"task\":\"nope\"}").is_err());
    }
}
