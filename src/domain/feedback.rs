//! Performance signal and learned weights.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Learned bias for one mechanic (or `genre:<genre>`) within a genre
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningWeight {
    pub mechanic_name: String,
    pub genre: String,
    pub weight: f64,
    pub sample_count: u32,
    pub avg_retention: f64,
    pub avg_completion: f64,
    pub avg_ad_opt_in: f64,
    pub updated_at: DateTime<Utc>,
}

/// Prefix of synthetic per-genre weight rows
pub const GENRE_WEIGHT_PREFIX: &str = "genre:";

impl LearningWeight {
    pub fn is_genre_row(&self) -> bool {
        self.mechanic_name.starts_with(GENRE_WEIGHT_PREFIX)
    }
}

/// Name of the synthetic weight row for a genre
pub fn genre_weight_name(genre: &str) -> String {
    format!("{}{}", GENRE_WEIGHT_PREFIX, genre)
}

/// Aggregated player behaviour for one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_events: u64,
    pub game_starts: u64,
    pub level_completes: u64,
    pub level_fails: u64,
    pub ad_shown: u64,
    pub ad_completed: u64,
    pub completion_rate: f64,
    pub fail_rate: f64,
    pub ad_opt_in_rate: f64,
    pub retention_proxy: f64,
}

/// A raw analytics event reported by a published game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub id: Uuid,
    pub job_id: Uuid,
    pub event_name: String,
    pub level: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Per-genre roll-up of learning weights
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightSummary {
    pub genre: String,
    pub mechanics: usize,
    pub average_weight: f64,
    pub total_samples: u64,
    pub genre_weight: Option<f64>,
}

/// Inclusive range a learned weight is clamped to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightBounds {
    pub min: f64,
    pub max: f64,
}

impl WeightBounds {
    pub fn clamp(&self, weight: f64) -> f64 {
        weight.clamp(self.min, self.max)
    }
}

/// Bounds for per-mechanic weights
pub const MECHANIC_WEIGHT_BOUNDS: WeightBounds = WeightBounds { min: 0.1, max: 2.0 };

/// Bounds for the synthetic `genre:<genre>` rows
pub const GENRE_WEIGHT_BOUNDS: WeightBounds = WeightBounds { min: 0.5, max: 2.0 };

/// Weight value for a row that has never been adjusted
pub const NEUTRAL_WEIGHT: f64 = 1.0;

/// One weight row to adjust when feedback is applied
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTarget {
    pub mechanic_name: String,
    pub bounds: WeightBounds,
}

/// Feedback from one finished job, applied at most once
#[derive(Debug, Clone)]
pub struct FeedbackApplication {
    pub job_id: Uuid,
    pub genre: String,
    pub targets: Vec<WeightTarget>,
    pub adjustment: f64,
    pub score: f64,
    pub metrics: PerformanceMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_clamp() {
        assert_eq!(MECHANIC_WEIGHT_BOUNDS.clamp(2.3), 2.0);
        assert_eq!(MECHANIC_WEIGHT_BOUNDS.clamp(0.02), 0.1);
        assert_eq!(GENRE_WEIGHT_BOUNDS.clamp(0.45), 0.5);
        assert_eq!(GENRE_WEIGHT_BOUNDS.clamp(1.3), 1.3);
    }

    #[test]
    fn test_genre_rows_are_prefixed() {
        assert_eq!(genre_weight_name("puzzle"), "genre:puzzle");
    }
}
