//! gamefactory - Durable 12-stage game generation workflow engine
//!
//! Drives game-generation jobs through a fixed pipeline of twelve stages,
//! persisting every step so any stage can fail, retry or resume on its own.
//!
//! # Architecture
//!
//! - Steps advance strictly one at a time; the transition guard rejects
//!   skips and the store allows a single running step per job
//! - Every decision is recorded in an append-only generation log
//! - Pre-production rejects designs too close to existing games and
//!   regenerates them a bounded number of times
//! - Post-launch metrics adjust learned weights and seed the next batch
//!
//! # Modules
//!
//! - `core`: Workflow, state machine, store, orchestrator, worker pool
//! - `domain`: Jobs, batches, steps, events, designs, constraints
//! - `adapters`: Collaborator traits and their local implementations
//! - `steps`: The twelve stage executors
//! - `similarity`: Design similarity scoring and regeneration
//! - `learning`: Performance scoring and weight feedback
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Create and run a batch of puzzle and runner games
//! gamefactory batch create --count 4 --genre puzzle --genre runner
//! gamefactory batch start <batch-id>
//! gamefactory work
//!
//! # Inspect a job and force-retry its failed step
//! gamefactory job steps <job-id>
//! gamefactory job retry <job-id> 3 --force
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod learning;
pub mod similarity;
pub mod steps;

// Re-export main types at crate root for convenience
pub use core::{Engine, FactoryError, FactoryService, Orchestrator};
pub use domain::{Batch, Event, EventType, Job, JobStatus, StepNumber};
pub use learning::LearningFeedbackEngine;
pub use similarity::SimilarityEngine;
