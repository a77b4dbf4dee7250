//! Pipeline stages and their persisted records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::Artifacts;
use super::events::StepStatus;

/// Number of stages every job moves through
pub const STEP_COUNT: u8 = 12;

/// One of the twelve ordered pipeline stages.
///
/// Serialized as its number (1..=12) so persisted records and queue
/// payloads stay stable if names change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum StepNumber {
    PreProduction = 1,
    ProjectSetup = 2,
    Architecture = 3,
    AnalyticsDesign = 4,
    AnalyticsImplementation = 5,
    CorePrototype = 6,
    AssetGeneration = 7,
    VerticalSlice = 8,
    ContentProduction = 9,
    Testing = 10,
    ReleasePrep = 11,
    PostLaunch = 12,
}

impl StepNumber {
    pub const ALL: [StepNumber; 12] = [
        Self::PreProduction,
        Self::ProjectSetup,
        Self::Architecture,
        Self::AnalyticsDesign,
        Self::AnalyticsImplementation,
        Self::CorePrototype,
        Self::AssetGeneration,
        Self::VerticalSlice,
        Self::ContentProduction,
        Self::Testing,
        Self::ReleasePrep,
        Self::PostLaunch,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    /// Machine name used in logs, idempotency keys and the CLI
    pub fn name(self) -> &'static str {
        match self {
            Self::PreProduction => "pre_production",
            Self::ProjectSetup => "project_setup",
            Self::Architecture => "architecture",
            Self::AnalyticsDesign => "analytics_design",
            Self::AnalyticsImplementation => "analytics_implementation",
            Self::CorePrototype => "core_prototype",
            Self::AssetGeneration => "asset_generation",
            Self::VerticalSlice => "vertical_slice",
            Self::ContentProduction => "content_production",
            Self::Testing => "testing",
            Self::ReleasePrep => "release_prep",
            Self::PostLaunch => "post_launch",
        }
    }

    /// The stage that follows this one, `None` after post-launch
    pub fn next(self) -> Option<StepNumber> {
        StepNumber::try_from(self.number() + 1).ok()
    }

    pub fn is_last(self) -> bool {
        self == Self::PostLaunch
    }
}

impl TryFrom<u8> for StepNumber {
    type Error = InvalidStepNumber;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1..=STEP_COUNT => Ok(Self::ALL[usize::from(value - 1)]),
            other => Err(InvalidStepNumber(other)),
        }
    }
}

impl From<StepNumber> for u8 {
    fn from(step: StepNumber) -> u8 {
        step.number()
    }
}

impl fmt::Display for StepNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

/// A step number outside 1..=12
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid step number {0} (expected 1..={})", STEP_COUNT)]
pub struct InvalidStepNumber(pub u8);

/// Outcome of a step's `validate` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }

    pub fn from_errors(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Fold another validation into this one
    pub fn merge(mut self, other: Validation) -> Self {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.valid = self.errors.is_empty();
        self
    }
}

/// Persisted state of one stage of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub job_id: Uuid,
    pub step: StepNumber,
    pub status: StepStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub artifacts: Artifacts,
    pub validation: Option<Validation>,
    pub error_message: Option<String>,
    pub logs: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// Whether another automatic retry is allowed
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
