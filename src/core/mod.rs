//! Core orchestration logic.
//!
//! This module contains:
//! - Workflow: the fixed stage catalogue and retry policy
//! - StateMachine: the forward-only transition guard
//! - Store: SQLite persistence and the generation log
//! - Orchestrator: runs one step of one job
//! - Queue / Scheduler: task delivery and the worker pool
//! - Service: consumer-facing operations

pub mod engine;
pub mod errors;
pub mod executor;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod workflow;

// Re-export commonly used types
pub use engine::{Engine, EngineBuilder};
pub use errors::{ErrorKind, StepError};
pub use executor::{ExecutorRegistry, StepContext, StepExecutor, StepOutput};
pub use orchestrator::{Orchestrator, SkipReason, StepEvent};
pub use queue::{MemoryQueue, Task, TaskQueue};
pub use scheduler::{Scheduler, WorkSummary};
pub use service::{BatchRequest, FactoryError, FactoryService, MAX_BATCH_SIZE};
pub use state_machine::{can_transition, GameStateMachine, TransitionError};
pub use store::{generate_idempotency_key, hash_input, Store};
pub use workflow::{RetryPolicy, WorkflowDefinition};
