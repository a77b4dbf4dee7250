//! Design similarity scoring.
//!
//! Seven weighted factors, each in [0, 1], summed into one score. A
//! candidate is rejected when its score against the single closest peer
//! reaches the threshold.

pub mod regeneration;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use uuid::Uuid;

use crate::domain::{DesignSpec, Job};

pub use regeneration::{AcceptedDesign, RegenerationLoop};

/// Inclusive rejection threshold
pub const SIMILARITY_THRESHOLD: f64 = 0.80;

/// Generation attempts per job before a design is accepted with a warning
pub const MAX_REGENERATION_ATTEMPTS: u32 = 5;

/// Tolerance so that a weighted sum landing on 0.80 counts as 0.80
const SCORE_EPSILON: f64 = 1e-9;

pub const FACTOR_WEIGHTS: [(&str, f64); 7] = [
    ("genre", 0.20),
    ("mechanics", 0.25),
    ("core_loop", 0.15),
    ("visual_style", 0.15),
    ("difficulty", 0.10),
    ("economy", 0.10),
    ("name", 0.05),
];

const STOP_WORDS: [&str; 7] = ["game", "the", "a", "an", "of", "in", "on"];

const SESSION_TOLERANCE_SECONDS: i64 = 30;
const EARN_RATE_MIN_RATIO: f64 = 0.8;

/// A design to compare, with its owning job when it has one
#[derive(Debug, Clone)]
pub struct Candidate {
    pub job_id: Option<Uuid>,
    pub name: String,
    pub genre: String,
    pub mechanics: Vec<String>,
    pub spec: DesignSpec,
}

impl Candidate {
    pub fn from_spec(job_id: Option<Uuid>, spec: DesignSpec) -> Self {
        Self {
            job_id,
            name: spec.game_name.clone(),
            genre: spec.genre.clone(),
            mechanics: spec.mechanic_names(),
            spec,
        }
    }

    /// Comparable view of a stored job; `None` without a parseable spec
    pub fn from_job(job: &Job) -> Option<Self> {
        let spec = DesignSpec::from_value(job.spec.as_ref()?)?;
        let mut candidate = Self::from_spec(Some(job.id), spec);
        if candidate.name.is_empty() {
            candidate.name = job.name.clone();
        }
        if candidate.genre.is_empty() {
            candidate.genre = job.genre.clone();
        }
        if !job.selected_mechanics.is_empty() {
            candidate.mechanics = job.selected_mechanics.clone();
        }
        Some(candidate)
    }
}

/// Best match of a candidate against the corpus
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub score: f64,
    pub most_similar_job_id: Option<Uuid>,
    pub breakdown: BTreeMap<String, f64>,
    pub is_similar: bool,
}

/// Threshold and limits exposed to consumers
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityConfig {
    pub threshold: f64,
    pub max_attempts: u32,
}

/// Pure similarity scorer
#[derive(Debug, Clone, Copy)]
pub struct SimilarityEngine {
    threshold: f64,
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self {
            threshold: SIMILARITY_THRESHOLD,
        }
    }
}

impl SimilarityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> SimilarityConfig {
        SimilarityConfig {
            threshold: self.threshold,
            max_attempts: MAX_REGENERATION_ATTEMPTS,
        }
    }

    /// Inclusive threshold check
    pub fn is_too_similar(&self, score: f64) -> bool {
        score + SCORE_EPSILON >= self.threshold
    }

    /// Per-factor scores of `a` against `b`
    pub fn compare(&self, a: &Candidate, b: &Candidate) -> BTreeMap<String, f64> {
        let factors = [
            genre_score(a, b),
            jaccard(a.mechanics.iter().cloned(), b.mechanics.iter().cloned()),
            core_loop_score(&a.spec, &b.spec),
            visual_score(&a.spec, &b.spec),
            difficulty_score(&a.spec, &b.spec),
            economy_score(&a.spec, &b.spec),
            jaccard(significant_words(&a.name), significant_words(&b.name)),
        ];
        FACTOR_WEIGHTS
            .iter()
            .zip(factors)
            .map(|((name, _), score)| (name.to_string(), score))
            .collect()
    }

    /// Weighted sum of a breakdown
    pub fn overall(&self, breakdown: &BTreeMap<String, f64>) -> f64 {
        FACTOR_WEIGHTS
            .iter()
            .map(|(name, weight)| weight * breakdown.get(*name).copied().unwrap_or(0.0))
            .sum()
    }

    /// Maximum similarity over `peers`, skipping the candidate's own job
    pub fn max_similarity(&self, candidate: &Candidate, peers: &[Candidate]) -> SimilarityResult {
        let mut best = SimilarityResult::default();
        let mut found = false;

        for peer in peers {
            if candidate.job_id.is_some() && peer.job_id == candidate.job_id {
                continue;
            }
            let breakdown = self.compare(candidate, peer);
            let score = self.overall(&breakdown);
            if !found || score > best.score {
                found = true;
                best = SimilarityResult {
                    score,
                    most_similar_job_id: peer.job_id,
                    breakdown,
                    is_similar: false,
                };
            }
        }

        best.is_similar = found && self.is_too_similar(best.score);
        best
    }
}

fn genre_score(a: &Candidate, b: &Candidate) -> f64 {
    if a.genre == b.genre {
        1.0
    } else {
        0.0
    }
}

/// |A ∩ B| / |A ∪ B|; two empty sets score 0
fn jaccard<I, J>(a: I, b: J) -> f64
where
    I: IntoIterator<Item = String>,
    J: IntoIterator<Item = String>,
{
    let a: BTreeSet<String> = a.into_iter().collect();
    let b: BTreeSet<String> = b.into_iter().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

fn fraction(checks: &[bool]) -> f64 {
    if checks.is_empty() {
        return 0.0;
    }
    checks.iter().filter(|c| **c).count() as f64 / checks.len() as f64
}

fn core_loop_score(a: &DesignSpec, b: &DesignSpec) -> f64 {
    let (Some(a), Some(b)) = (&a.core_loop, &b.core_loop) else {
        return 0.0;
    };
    fraction(&[
        a.primary_action == b.primary_action,
        a.reward_trigger == b.reward_trigger,
        (a.session_length_target_seconds - b.session_length_target_seconds).abs()
            <= SESSION_TOLERANCE_SECONDS,
    ])
}

fn visual_score(a: &DesignSpec, b: &DesignSpec) -> f64 {
    let (Some(a), Some(b)) = (&a.asset_style_guide, &b.asset_style_guide) else {
        return 0.0;
    };
    let mut total = fraction(&[
        a.art_style == b.art_style,
        a.ui_theme == b.ui_theme,
        a.audio_style == b.audio_style,
    ]) * 3.0;
    let mut checks = 3.0;

    if !a.color_palette.is_empty() && !b.color_palette.is_empty() {
        let matching = a
            .color_palette
            .iter()
            .filter(|(key, value)| b.color_palette.get(*key) == Some(*value))
            .count();
        total += matching as f64 / a.color_palette.len().max(b.color_palette.len()) as f64;
        checks += 1.0;
    }
    total / checks
}

fn difficulty_score(a: &DesignSpec, b: &DesignSpec) -> f64 {
    let (Some(a), Some(b)) = (&a.difficulty_curve, &b.difficulty_curve) else {
        return 0.0;
    };
    jaccard(a.factors.iter().cloned(), b.factors.iter().cloned())
}

fn economy_score(a: &DesignSpec, b: &DesignSpec) -> f64 {
    let (Some(a), Some(b)) = (&a.economy, &b.economy) else {
        return 0.0;
    };
    let earn_close = a.earn_per_level > 0.0
        && b.earn_per_level > 0.0
        && a.earn_per_level.min(b.earn_per_level) / a.earn_per_level.max(b.earn_per_level)
            >= EARN_RATE_MIN_RATIO;
    fraction(&[a.currency == b.currency, earn_close])
}

fn significant_words(name: &str) -> Vec<String> {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::design::{CoreLoop, Economy, StyleGuide};

    fn candidate(name: &str, mechanics: &[&str]) -> Candidate {
        let mechanics: Vec<String> = mechanics.iter().map(|m| m.to_string()).collect();
        Candidate::from_spec(
            Some(Uuid::new_v4()),
            DesignSpec {
                game_name: name.to_string(),
                genre: "puzzle".to_string(),
                mechanics: crate::domain::design::MechanicSlots::from_names(&mechanics),
                core_loop: Some(CoreLoop {
                    description: String::new(),
                    primary_action: "swap_tiles".into(),
                    reward_trigger: "level_complete".into(),
                    session_length_target_seconds: 180,
                }),
                economy: Some(Economy {
                    currency: "coins".into(),
                    earn_per_level: 10.0,
                    ad_reward_multiplier: 2.0,
                    no_iap: true,
                }),
                asset_style_guide: Some(StyleGuide {
                    art_style: "pixel_retro".into(),
                    ui_theme: "modern_minimal".into(),
                    audio_style: "upbeat_casual".into(),
                    color_palette: Default::default(),
                }),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_genre_is_exact_match() {
        let a = candidate("a", &["tile_swap"]);
        let mut b = candidate("b", &["tile_swap"]);
        assert_eq!(genre_score(&a, &b), 1.0);

        b.genre = "Puzzle".to_string();
        assert_eq!(genre_score(&a, &b), 0.0);
    }

    #[test]
    fn test_jaccard_edge_cases() {
        assert_eq!(jaccard(Vec::new(), Vec::new()), 0.0);
        assert_eq!(jaccard(vec!["a".to_string()], vec!["a".to_string()]), 1.0);
        assert_eq!(
            jaccard(vec!["a".to_string(), "b".to_string()], vec!["b".to_string(), "c".to_string()]),
            1.0 / 3.0
        );
    }

    #[test]
    fn test_name_ignores_stop_words_and_case() {
        assert_eq!(significant_words("The Game of Tiles"), vec!["tiles".to_string()]);
        assert_eq!(
            jaccard(significant_words("Tile Storm"), significant_words("the TILE storm")),
            1.0
        );
    }

    #[test]
    fn test_missing_sections_score_zero() {
        let a = DesignSpec::default();
        let b = candidate("x", &["tile_swap"]).spec;
        assert_eq!(core_loop_score(&a, &b), 0.0);
        assert_eq!(visual_score(&a, &b), 0.0);
        assert_eq!(economy_score(&a, &b), 0.0);
        assert_eq!(difficulty_score(&a, &b), 0.0);
    }

    #[test]
    fn test_session_and_earn_tolerances() {
        let a = candidate("a", &["tile_swap"]);
        let mut b = candidate("b", &["tile_swap"]);
        if let Some(core) = b.spec.core_loop.as_mut() {
            core.session_length_target_seconds = 210;
        }
        assert_eq!(core_loop_score(&a.spec, &b.spec), 1.0);
        if let Some(core) = b.spec.core_loop.as_mut() {
            core.session_length_target_seconds = 211;
        }
        assert!((core_loop_score(&a.spec, &b.spec) - 2.0 / 3.0).abs() < 1e-9);

        if let Some(economy) = b.spec.economy.as_mut() {
            economy.earn_per_level = 12.5;
        }
        assert_eq!(economy_score(&a.spec, &b.spec), 1.0);
        if let Some(economy) = b.spec.economy.as_mut() {
            economy.earn_per_level = 13.0;
        }
        assert_eq!(economy_score(&a.spec, &b.spec), 0.5);
    }

    #[test]
    fn test_palette_counts_only_when_both_present() {
        let a = candidate("a", &[]);
        let mut b = candidate("b", &[]);
        assert_eq!(visual_score(&a.spec, &b.spec), 1.0);

        if let Some(style) = b.spec.asset_style_guide.as_mut() {
            style.color_palette.insert("primary".into(), "#000000".into());
        }
        // Only one side has a palette
        assert_eq!(visual_score(&a.spec, &b.spec), 1.0);
    }

    #[test]
    fn test_max_similarity_skips_self_and_picks_closest() {
        let engine = SimilarityEngine::new();
        let me = candidate("Tile Storm", &["tile_swap", "match_three"]);
        let mut self_copy = me.clone();
        self_copy.name = "copy".into();
        let far = candidate("Other", &["path_connect"]);
        let near = candidate("Tile Storm", &["tile_swap", "match_three"]);

        let result = engine.max_similarity(&me, &[self_copy, far, near.clone()]);
        assert_eq!(result.most_similar_job_id, near.job_id);
        assert!(result.is_similar);
    }

    #[test]
    fn test_no_peers_is_not_similar() {
        let engine = SimilarityEngine::new();
        let result = engine.max_similarity(&candidate("Solo", &["tile_swap"]), &[]);
        assert_eq!(result.score, 0.0);
        assert!(!result.is_similar);
        assert!(result.most_similar_job_id.is_none());
    }
}
