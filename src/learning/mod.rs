//! Learning feedback loop.
//!
//! Turns a finished game's player metrics into a score, nudges the learned
//! weights of the mechanics it used, and synthesizes constraints for the
//! next batch's pre-production.

pub mod metrics;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::store::Store;
use crate::domain::feedback::{
    genre_weight_name, GENRE_WEIGHT_BOUNDS, MECHANIC_WEIGHT_BOUNDS,
};
use crate::domain::{
    Constraint, DesignSpec, FeedbackApplication, Job, LearningWeight, PerformanceMetrics,
    WeightTarget,
};

pub use metrics::aggregate;

/// Score weights: retention, completion, ad opt-in
const RETENTION_WEIGHT: f64 = 0.4;
const COMPLETION_WEIGHT: f64 = 0.3;
const AD_OPT_IN_WEIGHT: f64 = 0.3;

const HIGH_SCORE: f64 = 70.0;
const MID_SCORE: f64 = 40.0;
const PREFER_GENRE_SCORE: f64 = 60.0;

const REWARD: f64 = 0.10;
const PENALTY: f64 = -0.05;

const PREFER_WEIGHT: f64 = 1.2;
const AVOID_WEIGHT: f64 = 0.5;
const MIN_SAMPLES: u32 = 3;
const PREFER_LIMIT: usize = 5;
const AVOID_LIMIT: usize = 3;

const LOW_COMPLETION: f64 = 0.3;
const LOW_AD_OPT_IN: f64 = 0.2;
const REDUCED_DIFFICULTY: f64 = 0.8;

/// Game score in [0, 100]
pub fn score(metrics: &PerformanceMetrics) -> f64 {
    let raw = RETENTION_WEIGHT * metrics.retention_proxy
        + COMPLETION_WEIGHT * metrics.completion_rate
        + AD_OPT_IN_WEIGHT * metrics.ad_opt_in_rate;
    (raw * 100.0).clamp(0.0, 100.0)
}

/// Weight delta for a score
pub fn adjustment(score: f64) -> f64 {
    if score >= HIGH_SCORE {
        REWARD
    } else if score >= MID_SCORE {
        0.0
    } else {
        PENALTY
    }
}

/// Constraints for the next batch from the genre's weights and this game's metrics
pub fn synthesize_constraints(
    genre: &str,
    weights: &[LearningWeight],
    metrics: &PerformanceMetrics,
    score: f64,
) -> Vec<Constraint> {
    let mut constraints = Vec::new();
    let mechanics: Vec<&LearningWeight> = weights
        .iter()
        .filter(|w| w.genre == genre && !w.is_genre_row())
        .collect();

    let mut strong: Vec<&LearningWeight> = mechanics
        .iter()
        .copied()
        .filter(|w| w.weight >= PREFER_WEIGHT && w.sample_count >= MIN_SAMPLES)
        .collect();
    strong.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    if !strong.is_empty() {
        constraints.push(Constraint::PreferMechanics {
            value: strong
                .iter()
                .take(PREFER_LIMIT)
                .map(|w| w.mechanic_name.clone())
                .collect(),
            reason: "High-performing mechanics based on player data".to_string(),
        });
    }

    let mut weak: Vec<&LearningWeight> = mechanics
        .iter()
        .copied()
        .filter(|w| w.weight <= AVOID_WEIGHT && w.sample_count >= MIN_SAMPLES)
        .collect();
    weak.sort_by(|a, b| a.weight.total_cmp(&b.weight));
    if !weak.is_empty() {
        constraints.push(Constraint::AvoidMechanics {
            value: weak
                .iter()
                .take(AVOID_LIMIT)
                .map(|w| w.mechanic_name.clone())
                .collect(),
            reason: "Low-performing mechanics based on player data".to_string(),
        });
    }

    if metrics.completion_rate < LOW_COMPLETION {
        constraints.push(Constraint::ReduceDifficulty {
            value: REDUCED_DIFFICULTY,
            reason: format!(
                "Low completion rate ({:.0}%)",
                metrics.completion_rate * 100.0
            ),
        });
    }

    if metrics.ad_opt_in_rate < LOW_AD_OPT_IN {
        constraints.push(Constraint::ImproveValueProposition {
            value: true,
            reason: format!("Low ad opt-in rate ({:.0}%)", metrics.ad_opt_in_rate * 100.0),
        });
    }

    if score >= PREFER_GENRE_SCORE {
        constraints.push(Constraint::PreferGenre {
            value: genre.to_string(),
            reason: format!("Genre performed well (score: {:.1})", score),
        });
    }

    constraints
}

/// What one feedback application did
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackReport {
    pub score: f64,
    pub adjustment: f64,

    /// Rows written; empty when this job's feedback was already applied
    pub weights_updated: Vec<LearningWeight>,
    pub already_applied: bool,
    pub constraints: Vec<Constraint>,
}

/// Applies player feedback to the shared weight table
#[derive(Clone)]
pub struct LearningFeedbackEngine {
    store: Store,
}

impl LearningFeedbackEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Score a finished job and update weights for its mechanics and genre.
    ///
    /// Safe to call repeatedly: weights move only the first time for a job.
    #[instrument(skip(self, job, metrics), fields(job_id = %job.id, genre = %job.genre))]
    pub async fn apply(&self, job: &Job, metrics: &PerformanceMetrics) -> Result<FeedbackReport> {
        let score = score(metrics);
        let adjustment = adjustment(score);

        let mut targets: Vec<WeightTarget> = used_mechanics(job)
            .into_iter()
            .map(|mechanic_name| WeightTarget {
                mechanic_name,
                bounds: MECHANIC_WEIGHT_BOUNDS,
            })
            .collect();
        targets.push(WeightTarget {
            mechanic_name: genre_weight_name(&job.genre),
            bounds: GENRE_WEIGHT_BOUNDS,
        });

        let application = FeedbackApplication {
            job_id: job.id,
            genre: job.genre.clone(),
            targets,
            adjustment,
            score,
            metrics: metrics.clone(),
        };
        let applied = self.store.apply_feedback(&application).await?;
        let already_applied = applied.is_none();

        let weights = self.store.list_weights(Some(&job.genre)).await?;
        let constraints = synthesize_constraints(&job.genre, &weights, metrics, score);

        info!(
            score,
            adjustment,
            already_applied,
            constraints = constraints.len(),
            "Feedback applied"
        );
        Ok(FeedbackReport {
            score,
            adjustment,
            weights_updated: applied.unwrap_or_default(),
            already_applied,
            constraints,
        })
    }
}

/// Mechanics the job shipped with
fn used_mechanics(job: &Job) -> Vec<String> {
    if !job.selected_mechanics.is_empty() {
        return job.selected_mechanics.clone();
    }
    job.spec
        .as_ref()
        .and_then(DesignSpec::from_value)
        .map(|spec| spec.mechanic_names())
        .unwrap_or_default()
}
