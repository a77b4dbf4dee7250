//! Generation log events.
//!
//! Every orchestration decision is recorded as an immutable event in the
//! `generation_logs` table, alongside the tracing stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::StepNumber;

/// A single entry in the append-only generation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The job this event belongs to
    pub job_id: Uuid,

    /// Batch of the job, when it belongs to one
    pub batch_id: Option<Uuid>,

    /// Step the event refers to (if applicable)
    pub step: Option<StepNumber>,

    /// Type of event
    pub event_type: EventType,

    /// Idempotency key format: "{job_id}:{step_name}:{input_hash}"
    pub idempotency_key: String,

    /// Human-readable summary
    pub message: String,

    /// Status of the step/job after this event
    pub status: StepStatus,

    /// Time taken in milliseconds (for finished steps)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        job_id: Uuid,
        step: Option<StepNumber>,
        event_type: EventType,
        idempotency_key: String,
        message: String,
        status: StepStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            job_id,
            batch_id: None,
            step,
            event_type,
            idempotency_key,
            message,
            status,
            duration_ms: None,
            error: None,
        }
    }

    /// Attach the job's batch
    pub fn with_batch(mut self, batch_id: Option<Uuid>) -> Self {
        self.batch_id = batch_id;
        self
    }

    /// Create an event with duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Create an event with error information
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    /// Severity used when the log is rendered
    pub fn level(&self) -> LogLevel {
        self.event_type.level()
    }
}

/// Types of events recorded while driving a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JobCreated,
    BatchStarted,
    JobCompleted,
    JobFailed,
    JobCancelled,

    /// A step has started execution
    StepStarted,

    /// A step completed successfully
    StepCompleted,

    /// A step failed terminally
    StepFailed,

    /// A step failed and was requeued with backoff
    StepRetrying,

    /// Duplicate delivery of a finished or busy step
    StepSkipped,

    /// The state machine refused a step
    TransitionDenied,

    /// A failed step was reset by an operator
    ForcedRetry,

    /// A generated design was too close to an existing job
    RegenerationTriggered,

    /// Regeneration attempts ran out and the last design was kept
    SimilarityWarning,

    /// A step finished after its job was cancelled
    ResultDiscarded,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobCreated => "job_created",
            Self::BatchStarted => "batch_started",
            Self::JobCompleted => "job_completed",
            Self::JobFailed => "job_failed",
            Self::JobCancelled => "job_cancelled",
            Self::StepStarted => "step_started",
            Self::StepCompleted => "step_completed",
            Self::StepFailed => "step_failed",
            Self::StepRetrying => "step_retrying",
            Self::StepSkipped => "step_skipped",
            Self::TransitionDenied => "transition_denied",
            Self::ForcedRetry => "forced_retry",
            Self::RegenerationTriggered => "regeneration_triggered",
            Self::SimilarityWarning => "similarity_warning",
            Self::ResultDiscarded => "result_discarded",
        }
    }

    pub fn level(&self) -> LogLevel {
        match self {
            Self::StepFailed | Self::JobFailed => LogLevel::Error,
            Self::StepRetrying
            | Self::TransitionDenied
            | Self::SimilarityWarning
            | Self::ResultDiscarded
            | Self::RegenerationTriggered => LogLevel::Warn,
            _ => LogLevel::Info,
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown event type: {}", s))
    }
}

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started, or waiting for a retry
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,

    /// Skipped (duplicate delivery)
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown step status: {}", other)),
        }
    }
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            Uuid::new_v4(),
            Some(StepNumber::ProjectSetup),
            EventType::StepStarted,
            "test-key".to_string(),
            "Starting project_setup".to_string(),
            StepStatus::Running,
        );

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::StepStarted);
        assert_eq!(parsed.status, StepStatus::Running);
        assert_eq!(parsed.step, Some(StepNumber::ProjectSetup));
    }

    #[test]
    fn test_event_builders() {
        let batch = Uuid::new_v4();
        let event = Event::new(
            Uuid::new_v4(),
            Some(StepNumber::Architecture),
            EventType::StepFailed,
            "test-key".to_string(),
            "architecture failed".to_string(),
            StepStatus::Failed,
        )
        .with_batch(Some(batch))
        .with_duration(1500)
        .with_error("Connection timeout".to_string());

        assert_eq!(event.batch_id, Some(batch));
        assert_eq!(event.duration_ms, Some(1500));
        assert_eq!(event.error, Some("Connection timeout".to_string()));
        assert_eq!(event.level(), LogLevel::Error);
    }

    #[test]
    fn test_event_type_round_trips_through_str() {
        let parsed: EventType = EventType::TransitionDenied.as_str().parse().unwrap();
        assert_eq!(parsed, EventType::TransitionDenied);
        assert!("nope".parse::<EventType>().is_err());
    }
}
