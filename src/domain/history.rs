//! Append-only similarity and regeneration history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Result of comparing one candidate design against the corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityCheck {
    pub id: Uuid,
    pub job_id: Uuid,
    pub attempt_number: u32,

    /// Highest score against any comparable peer
    pub score: f64,

    /// Per-factor scores against the closest peer
    pub breakdown: BTreeMap<String, f64>,
    pub most_similar_job_id: Option<Uuid>,
    pub is_similar: bool,
    pub triggered_regeneration: bool,

    /// The candidate design and mechanics that were scored
    pub candidate: Value,
    pub candidate_mechanics: Vec<String>,

    pub created_at: DateTime<Utc>,
}

/// Why a candidate was regenerated and what happened next
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationLog {
    pub id: Uuid,
    pub job_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub attempt_number: u32,
    pub reason: String,
    pub score: f64,
    pub similar_to_job_id: Option<Uuid>,

    /// Exclusions that were in force for this attempt
    pub constraints_applied: Value,
    pub outcome: RegenerationOutcome,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationOutcome {
    /// A new candidate will be generated with more exclusions
    Regenerated,

    /// No attempts left; the candidate was kept with a warning
    AcceptedWithWarning,
}

impl RegenerationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regenerated => "regenerated",
            Self::AcceptedWithWarning => "accepted_with_warning",
        }
    }
}

impl std::str::FromStr for RegenerationOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regenerated" => Ok(Self::Regenerated),
            "accepted_with_warning" => Ok(Self::AcceptedWithWarning),
            other => Err(format!("unknown regeneration outcome: {}", other)),
        }
    }
}

/// Reason recorded when the similarity threshold is crossed
pub const REASON_SIMILARITY_EXCEEDED: &str = "similarity_threshold_exceeded";
