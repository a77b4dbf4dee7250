//! Deterministic template-based design generator.
//!
//! Produces a complete design from per-genre tables. Each attempt rotates
//! art style, primary action, session length and earn rate so that a
//! regenerated candidate really differs from the one it replaces.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::design::{
    AnalyticsPlan, CoreLoop, DifficultyCurve, DifficultyMilestone, Economy, FailStates,
    MechanicSlots, Progression, StyleGuide, REQUIRED_ANALYTICS_EVENTS,
};
use crate::domain::mechanics::mechanic_pool;
use crate::domain::{ConstraintSet, DesignSpec};

use super::{ContentGenerator, GenerationError, GenerationRequest};

/// Art styles with their (primary, secondary, accent, background, text) palettes
const ART_STYLES: [(&str, [&str; 5]); 10] = [
    ("colorful_cartoon", ["#4CAF50", "#2196F3", "#FF9800", "#E8F5E9", "#212121"]),
    ("neon_futuristic", ["#00E5FF", "#FF00FF", "#76FF03", "#0D0D0D", "#FFFFFF"]),
    ("clean_minimal", ["#3F51B5", "#9C27B0", "#00BCD4", "#FAFAFA", "#37474F"]),
    ("pixel_retro", ["#E91E63", "#9C27B0", "#FFEB3B", "#1A1A2E", "#EAEAEA"]),
    ("soft_pastel", ["#F48FB1", "#CE93D8", "#80DEEA", "#FFF8E1", "#5D4037"]),
    ("dark_gothic", ["#B71C1C", "#4A148C", "#FFD600", "#121212", "#E0E0E0"]),
    ("hand_drawn", ["#795548", "#607D8B", "#FF5722", "#FFF3E0", "#3E2723"]),
    ("flat_modern", ["#1976D2", "#388E3C", "#FBC02D", "#ECEFF1", "#263238"]),
    ("watercolor", ["#81D4FA", "#A5D6A7", "#FFCC80", "#FFFDE7", "#455A64"]),
    ("low_poly", ["#26A69A", "#5C6BC0", "#EF5350", "#FAFAFA", "#37474F"]),
];

const PALETTE_KEYS: [&str; 5] = ["primary", "secondary", "accent", "background", "text"];

/// Per-genre template
struct GenreTemplate {
    core_loop: &'static str,
    primary_actions: [&'static str; 5],
    fail_condition: &'static str,
    difficulty_factors: [&'static str; 3],
}

fn template_for(genre: &str) -> GenreTemplate {
    match genre {
        "platformer" => GenreTemplate {
            core_loop: "Run and jump through levels, avoid hazards, reach the goal",
            primary_actions: ["jump", "double_jump", "wall_jump", "dash", "slide"],
            fail_condition: "fall_or_hit_enemy",
            difficulty_factors: ["platform_spacing", "enemy_count", "time_limit"],
        },
        "runner" => GenreTemplate {
            core_loop: "Run endlessly, dodge obstacles, collect coins",
            primary_actions: ["lane_switch", "jump", "slide", "roll", "boost"],
            fail_condition: "hit_obstacle",
            difficulty_factors: ["speed", "obstacle_density", "lane_changes"],
        },
        "puzzle" => GenreTemplate {
            core_loop: "Solve puzzles by manipulating pieces to reach a goal state",
            primary_actions: ["swap_tiles", "rotate", "match", "connect", "slide"],
            fail_condition: "no_moves_remaining",
            difficulty_factors: ["grid_size", "tile_types", "move_limit"],
        },
        "shooter" => GenreTemplate {
            core_loop: "Shoot enemies, dodge projectiles, survive waves",
            primary_actions: ["shoot", "aim_shoot", "auto_shoot", "charge_shot", "rapid_fire"],
            fail_condition: "health_depleted",
            difficulty_factors: ["enemy_count", "enemy_speed", "enemy_types"],
        },
        _ => GenreTemplate {
            core_loop: "Tap targets quickly and accurately to score points",
            primary_actions: ["tap", "hold", "swipe", "drag", "flick"],
            fail_condition: "timer_expired",
            difficulty_factors: ["target_count", "time_limit", "precision"],
        },
    }
}

const MILESTONES: [(u32, f64, &str); 5] = [
    (1, 0.1, "Tutorial"),
    (3, 0.3, "First challenge"),
    (5, 0.5, "Midpoint"),
    (7, 0.7, "Hard"),
    (10, 1.0, "Finale"),
];

const MECHANICS_PER_GAME: usize = 3;

/// Template generator used when no external generator is configured
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Pick mechanics: preferred first, then by learned weight.
    ///
    /// Excluded and avoided mechanics are dropped; if exclusions empty the
    /// pool, exclusions are ignored but avoidance still applies.
    fn select_mechanics(&self, request: &GenerationRequest) -> Vec<String> {
        let pool = if request.mechanic_pool.is_empty() {
            mechanic_pool(&request.genre)
        } else {
            request.mechanic_pool.clone()
        };
        let avoided = request.constraints.avoided_mechanics();
        let preferred = request.constraints.preferred_mechanics();

        let allowed: Vec<&String> = pool.iter().filter(|m| !avoided.contains(*m)).collect();
        let mut candidates: Vec<&String> = allowed
            .iter()
            .copied()
            .filter(|m| !request.excluded_mechanics.contains(*m))
            .collect();
        if candidates.is_empty() {
            candidates = allowed;
        }

        let weight = |m: &String| request.weights.get(m).copied().unwrap_or(1.0);
        // Stable sort keeps catalogue order among equals
        candidates.sort_by(|a, b| {
            let pa = preferred.contains(*a);
            let pb = preferred.contains(*b);
            pb.cmp(&pa)
                .then_with(|| weight(*b).partial_cmp(&weight(*a)).unwrap_or(Ordering::Equal))
        });
        candidates
            .into_iter()
            .take(MECHANICS_PER_GAME)
            .cloned()
            .collect()
    }

    fn select_style(&self, request: &GenerationRequest) -> (&'static str, [&'static str; 5]) {
        let mut available: Vec<&(&str, [&str; 5])> = ART_STYLES
            .iter()
            .filter(|(name, _)| !request.excluded_styles.contains(*name))
            .collect();
        if available.is_empty() {
            available = ART_STYLES.iter().collect();
        }
        let idx = attempt_index(request.attempt) % available.len();
        *available[idx]
    }
}

fn attempt_index(attempt: u32) -> usize {
    attempt.saturating_sub(1) as usize
}

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<DesignSpec, GenerationError> {
        let mechanics = self.select_mechanics(request);
        if mechanics.is_empty() {
            return Err(GenerationError::NoMechanics {
                genre: request.genre.clone(),
            });
        }

        let genre = request.genre.to_lowercase();
        let template = template_for(&genre);
        let step = i64::from(request.attempt.max(1) - 1);
        let (art_style, palette) = self.select_style(request);
        let primary_action =
            template.primary_actions[attempt_index(request.attempt) % template.primary_actions.len()];

        let difficulty_scale = request.constraints.difficulty_scale().unwrap_or(1.0);
        let ad_reward_multiplier = if request.constraints.wants_better_value() {
            3.0
        } else {
            2.0
        };

        Ok(DesignSpec {
            game_name: request.game_name.clone(),
            genre: genre.clone(),
            generation_attempt: request.attempt,
            mechanics: MechanicSlots::from_names(&mechanics),
            core_loop: Some(CoreLoop {
                description: template.core_loop.to_string(),
                primary_action: primary_action.to_string(),
                reward_trigger: "level_complete".to_string(),
                session_length_target_seconds: 180 + 30 * step,
            }),
            progression: Some(Progression::default()),
            economy: Some(Economy {
                currency: "coins".to_string(),
                earn_per_level: (10 + 5 * step) as f64,
                ad_reward_multiplier,
                no_iap: true,
            }),
            fail_states: Some(FailStates {
                primary: template.fail_condition.to_string(),
                retry_cost: "none".to_string(),
                game_over_trigger: template.fail_condition.to_string(),
            }),
            difficulty_curve: Some(DifficultyCurve {
                factors: template.difficulty_factors.iter().map(|f| f.to_string()).collect(),
                scale: difficulty_scale,
                milestones: MILESTONES
                    .iter()
                    .map(|(level, difficulty, description)| DifficultyMilestone {
                        level: *level,
                        difficulty: difficulty * difficulty_scale,
                        description: description.to_string(),
                    })
                    .collect(),
            }),
            analytics_plan: Some(AnalyticsPlan {
                events: REQUIRED_ANALYTICS_EVENTS.iter().map(|e| e.to_string()).collect(),
                retention_tracking: true,
                funnel_stages: vec![
                    "game_start".to_string(),
                    "level_complete".to_string(),
                    "unlock_prompt_shown".to_string(),
                    "rewarded_ad_completed".to_string(),
                ],
            }),
            asset_style_guide: Some(StyleGuide {
                art_style: art_style.to_string(),
                ui_theme: "modern_minimal".to_string(),
                audio_style: "upbeat_casual".to_string(),
                color_palette: PALETTE_KEYS
                    .iter()
                    .zip(palette.iter())
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            }),
            similarity_warning: None,
            similarity_score: None,
            extra: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use super::*;
    use crate::domain::Constraint;

    fn request(genre: &str, attempt: u32) -> GenerationRequest {
        GenerationRequest {
            game_name: "Test Game".into(),
            genre: genre.into(),
            attempt,
            mechanic_pool: mechanic_pool(genre),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_attempt_uses_base_values() {
        let spec = TemplateGenerator::new().generate(&request("puzzle", 1)).await.unwrap();

        assert_eq!(spec.mechanic_names(), vec!["tile_swap", "match_three", "move_limit"]);
        let core = spec.core_loop.unwrap();
        assert_eq!(core.primary_action, "swap_tiles");
        assert_eq!(core.session_length_target_seconds, 180);
        assert_eq!(spec.economy.unwrap().earn_per_level, 10.0);
        assert_eq!(spec.asset_style_guide.unwrap().art_style, "colorful_cartoon");
    }

    #[tokio::test]
    async fn test_attempts_rotate_values() {
        let spec = TemplateGenerator::new().generate(&request("runner", 3)).await.unwrap();
        let core = spec.core_loop.unwrap();
        assert_eq!(core.primary_action, "slide");
        assert_eq!(core.session_length_target_seconds, 240);
        assert_eq!(spec.economy.unwrap().earn_per_level, 20.0);
    }

    #[tokio::test]
    async fn test_exclusions_are_honoured() {
        let mut req = request("puzzle", 2);
        req.excluded_mechanics = BTreeSet::from(["tile_swap".to_string(), "match_three".to_string()]);
        req.excluded_styles = BTreeSet::from(["colorful_cartoon".to_string()]);

        let spec = TemplateGenerator::new().generate(&req).await.unwrap();
        let names = spec.mechanic_names();
        assert!(!names.contains(&"tile_swap".to_string()));
        assert!(!names.contains(&"match_three".to_string()));
        // Index 1 of the remaining styles
        assert_eq!(spec.art_style(), Some("clean_minimal"));
    }

    #[tokio::test]
    async fn test_constraints_and_weights_shape_selection() {
        let mut req = request("puzzle", 1);
        req.weights = HashMap::from([("path_connect".to_string(), 1.8)]);
        req.constraints = vec![
            Constraint::PreferMechanics {
                value: vec!["gravity_flip".into()],
                reason: String::new(),
            },
            Constraint::AvoidMechanics {
                value: vec!["tile_swap".into()],
                reason: String::new(),
            },
            Constraint::ReduceDifficulty {
                value: 0.8,
                reason: String::new(),
            },
            Constraint::ImproveValueProposition {
                value: true,
                reason: String::new(),
            },
        ];

        let spec = TemplateGenerator::new().generate(&req).await.unwrap();
        assert_eq!(
            spec.mechanic_names(),
            vec!["gravity_flip", "path_connect", "match_three"]
        );
        let curve = spec.difficulty_curve.unwrap();
        assert!((curve.milestones[4].difficulty - 0.8).abs() < 1e-9);
        assert_eq!(spec.economy.unwrap().ad_reward_multiplier, 3.0);
    }
}
