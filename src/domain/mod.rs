//! Domain types for the game factory.
//!
//! This module contains the core data structures:
//! - Job / Batch: units of work and their grouping
//! - Step records, stage numbers and validation results
//! - Events: the generation log
//! - Design specs, constraints, similarity history and learning weights

pub mod artifact;
pub mod constraint;
pub mod design;
pub mod events;
pub mod feedback;
pub mod history;
pub mod job;
pub mod mechanics;
pub mod step;

// Re-export commonly used types
pub use artifact::Artifacts;
pub use constraint::{merge_constraints, Constraint, ConstraintSet};
pub use design::DesignSpec;
pub use events::{Event, EventType, LogLevel, StepStatus};
pub use feedback::{
    AnalyticsEvent, FeedbackApplication, LearningWeight, PerformanceMetrics, WeightBounds,
    WeightSummary, WeightTarget,
};
pub use history::{RegenerationLog, RegenerationOutcome, SimilarityCheck};
pub use job::{Batch, BatchStatus, Job, JobStatus};
pub use step::{InvalidStepNumber, StepNumber, StepRecord, Validation, STEP_COUNT};
