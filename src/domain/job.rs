//! Jobs and batches.
//!
//! A Job is one game moving through the 12-stage pipeline. Its progress is
//! `current_step` (0..=12); its status is orthogonal and may become FAILED
//! or CANCELLED at any step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::constraint::Constraint;

/// A single game moving through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job
    pub id: Uuid,

    /// Batch this job was created in
    pub batch_id: Option<Uuid>,

    /// Game name
    pub name: String,

    /// Genre, lowercase
    pub genre: String,

    pub status: JobStatus,

    /// Highest completed step (0 before step 1 completes)
    pub current_step: u8,

    /// Generated design spec, written by pre-production
    pub spec: Option<Value>,

    /// Mechanics picked by pre-production
    pub selected_mechanics: Vec<String>,

    /// Constraints handed to pre-production
    pub constraints: Vec<Constraint>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a job with no progress
    pub fn new(name: String, genre: String, batch_id: Option<Uuid>, constraints: Vec<Constraint>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_id,
            name,
            genre: genre.to_lowercase(),
            status: JobStatus::Created,
            current_step: 0,
            spec: None,
            selected_mechanics: Vec::new(),
            constraints,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Cancelled
    }
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Published,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Published => "published",
        }
    }

    /// No further step will run without operator action
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Published
        )
    }

    /// Jobs in these states take part in similarity comparisons
    pub fn is_comparable(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::InProgress | Self::Completed | Self::Published
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "published" => Ok(Self::Published),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Jobs created together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub name: String,
    pub status: BatchStatus,
    pub game_count: u32,
    pub genre_mix: Vec<String>,
    pub constraints: Vec<Constraint>,

    /// Batch whose feedback seeded `constraints`
    pub inherited_from: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn new(
        name: String,
        game_count: u32,
        genre_mix: Vec<String>,
        constraints: Vec<Constraint>,
        inherited_from: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            status: BatchStatus::Pending,
            game_count,
            genre_mix,
            constraints,
            inherited_from,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Genre for the job at `index`, assigned round-robin over the mix
    pub fn genre_for(&self, index: usize) -> String {
        if self.genre_mix.is_empty() {
            return DEFAULT_GENRE.to_string();
        }
        self.genre_mix[index % self.genre_mix.len()].to_lowercase()
    }

    /// Name for the job at `index` (`<batch>-<genre>-NN`)
    pub fn job_name(&self, index: usize) -> String {
        format!("{}-{}-{:02}", self.name, self.genre_for(index), index + 1)
    }
}

/// Genre used when a batch has an empty genre mix
pub const DEFAULT_GENRE: &str = "platformer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown batch status: {}", other)),
        }
    }
}
