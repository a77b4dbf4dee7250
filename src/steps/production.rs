//! Stages 6 to 9: prototype, assets, vertical slice and level content.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::adapters::{AssetRenderer, AssetRequest, RepositoryHost};
use crate::core::errors::StepError;
use crate::core::executor::{StepContext, StepExecutor, StepOutput};
use crate::domain::design::{DifficultyMilestone, Progression};
use crate::domain::{Artifacts, StepNumber, Validation};

use super::{commit_ref, declared_outputs, design, flag, pretty, repository};

/// Stage 6: commit a playable loop built from the selected mechanics
pub struct CorePrototypeStep {
    repositories: Arc<dyn RepositoryHost>,
}

impl CorePrototypeStep {
    pub fn new(repositories: Arc<dyn RepositoryHost>) -> Self {
        Self { repositories }
    }
}

#[async_trait]
impl StepExecutor for CorePrototypeStep {
    fn step(&self) -> StepNumber {
        StepNumber::CorePrototype
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let spec = design(ctx)?;
        let repo = repository(ctx)?;
        let mechanics: Vec<String> =
            serde_json::from_value(ctx.input("selected_mechanics")?.clone()).unwrap_or_default();

        let prototype = json!({
            "core_loop": spec.core_loop,
            "mechanics": mechanics,
            "fail_states": spec.fail_states,
        });
        let outcome = self
            .repositories
            .commit(&repo, "lib/prototype.json", &pretty(&prototype)?, "Add core prototype")
            .await?;

        let playable = spec.core_loop.is_some() && !mechanics.is_empty();
        Ok(StepOutput::new(
            Artifacts::new()
                .with("prototype_playable", playable)
                .with("prototype_commit", commit_ref(&outcome)),
        ))
    }

    async fn validate(&self, _ctx: &StepContext, output: &StepOutput) -> Validation {
        let mut errors = Vec::new();
        if !flag(&output.artifacts, "prototype_playable") {
            errors.push("prototype has no playable loop".to_string());
        }
        declared_outputs(self.step(), &output.artifacts).merge(Validation::from_errors(errors, Vec::new()))
    }
}

/// Assets every game ships with, as (name, kind)
const ASSET_SET: [(&str, &str); 6] = [
    ("player", "sprite"),
    ("obstacle", "sprite"),
    ("collectible", "sprite"),
    ("background", "background"),
    ("hud", "ui"),
    ("unlock_prompt", "ui"),
];

/// Stage 7: render the asset set in the design's style
pub struct AssetGenerationStep {
    renderer: Arc<dyn AssetRenderer>,
}

impl AssetGenerationStep {
    pub fn new(renderer: Arc<dyn AssetRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl StepExecutor for AssetGenerationStep {
    fn step(&self) -> StepNumber {
        StepNumber::AssetGeneration
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let style = ctx.input("asset_style_guide")?.clone();

        let mut assets = Vec::with_capacity(ASSET_SET.len());
        let mut atlases = BTreeSet::new();
        for (name, kind) in ASSET_SET {
            let request = AssetRequest {
                name: name.to_string(),
                kind: kind.to_string(),
                style: style.clone(),
            };
            let rendered = self.renderer.render(ctx.job_id(), &request).await?;
            atlases.insert(rendered.atlas.clone());
            assets.push(json!({
                "name": rendered.name,
                "path": rendered.path.display().to_string(),
                "atlas": rendered.atlas,
            }));
        }
        info!(job_id = %ctx.job_id(), assets = assets.len(), "Assets rendered");

        Ok(StepOutput::new(
            Artifacts::new()
                .with("assets_generated", Value::Array(assets))
                .with("texture_atlases", json!(atlases)),
        ))
    }

    async fn validate(&self, _ctx: &StepContext, output: &StepOutput) -> Validation {
        let mut errors = Vec::new();
        let paths: Vec<String> = output
            .artifacts
            .get("assets_generated")
            .and_then(Value::as_array)
            .map(|assets| {
                assets
                    .iter()
                    .filter_map(|a| a.get("path").and_then(Value::as_str).map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        if paths.len() != ASSET_SET.len() {
            errors.push(format!("{} of {} assets rendered", paths.len(), ASSET_SET.len()));
        }
        for path in paths {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                errors.push(format!("asset does not load: {}", path));
            }
        }
        declared_outputs(self.step(), &output.artifacts).merge(Validation::from_errors(errors, Vec::new()))
    }

    async fn rollback(&self, ctx: &StepContext) -> Result<(), StepError> {
        warn!(job_id = %ctx.job_id(), "Purging partially rendered assets");
        self.renderer.purge(ctx.job_id()).await?;
        Ok(())
    }
}

/// Frame budget at 60 fps
const FRAME_BUDGET_MS: f64 = 1000.0 / 60.0;

/// Estimated draw cost per texture atlas
const ATLAS_COST_MS: f64 = 1.5;

/// Stage 8: first level wired to the rendered assets
pub struct VerticalSliceStep {
    repositories: Arc<dyn RepositoryHost>,
}

impl VerticalSliceStep {
    pub fn new(repositories: Arc<dyn RepositoryHost>) -> Self {
        Self { repositories }
    }
}

#[async_trait]
impl StepExecutor for VerticalSliceStep {
    fn step(&self) -> StepNumber {
        StepNumber::VerticalSlice
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let repo = repository(ctx)?;
        let assets = ctx.input("assets_generated")?.clone();
        let atlases = ctx
            .inputs
            .get("texture_atlases")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);

        let slice = json!({ "level": 1, "assets": assets });
        let outcome = self
            .repositories
            .commit(&repo, "lib/levels/level_1.json", &pretty(&slice)?, "Add vertical slice")
            .await?;

        let frame_time_ms = atlases as f64 * ATLAS_COST_MS;
        Ok(StepOutput::new(
            Artifacts::new()
                .with("vertical_slice_complete", true)
                .with("estimated_frame_time_ms", frame_time_ms)
                .with("vertical_slice_commit", commit_ref(&outcome)),
        ))
    }

    async fn validate(&self, _ctx: &StepContext, output: &StepOutput) -> Validation {
        let mut errors = Vec::new();
        let frame_time = output
            .artifacts
            .get("estimated_frame_time_ms")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        if frame_time > FRAME_BUDGET_MS {
            errors.push(format!(
                "frame time {:.1}ms exceeds {:.1}ms budget",
                frame_time, FRAME_BUDGET_MS
            ));
        }
        declared_outputs(self.step(), &output.artifacts).merge(Validation::from_errors(errors, Vec::new()))
    }
}

/// One generated level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelPlan {
    pub level: u32,
    pub difficulty: f64,
    pub locked: bool,
}

/// Difficulty at `level`, linear between milestones
pub fn difficulty_at(level: u32, level_count: u32, milestones: &[DifficultyMilestone]) -> f64 {
    let mut points: Vec<&DifficultyMilestone> = milestones.iter().collect();
    points.sort_by_key(|m| m.level);

    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return f64::from(level) / f64::from(level_count.max(1));
    };
    if level <= first.level {
        return first.difficulty;
    }
    if level >= last.level {
        return last.difficulty;
    }
    for pair in points.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if level >= lo.level && level <= hi.level {
            if hi.level == lo.level {
                return hi.difficulty;
            }
            let t = f64::from(level - lo.level) / f64::from(hi.level - lo.level);
            return lo.difficulty + t * (hi.difficulty - lo.difficulty);
        }
    }
    last.difficulty
}

/// Level list for a progression
pub fn level_layout(progression: &Progression, milestones: &[DifficultyMilestone]) -> Vec<LevelPlan> {
    (1..=progression.level_count)
        .map(|level| LevelPlan {
            level,
            difficulty: difficulty_at(level, progression.level_count, milestones),
            locked: progression.locked_levels.contains(&level),
        })
        .collect()
}

/// Regression checks on a level list
pub fn check_levels(levels: &[LevelPlan], progression: &Progression) -> Vec<String> {
    let mut errors = Vec::new();
    for pair in levels.windows(2) {
        if pair[1].difficulty < pair[0].difficulty {
            errors.push(format!(
                "difficulty drops from level {} to level {}",
                pair[0].level, pair[1].level
            ));
        }
    }
    if progression.free_levels.is_empty() {
        errors.push("no free levels".to_string());
    }
    if progression.locked_levels.is_empty() {
        errors.push("no ad-gated levels".to_string());
    }
    for level in levels {
        let free = progression.free_levels.contains(&level.level);
        if free == level.locked {
            errors.push(format!("level {} must be either free or locked", level.level));
        }
    }
    errors
}

/// Stage 9: full level set with ad gating
pub struct ContentProductionStep {
    repositories: Arc<dyn RepositoryHost>,
}

impl ContentProductionStep {
    pub fn new(repositories: Arc<dyn RepositoryHost>) -> Self {
        Self { repositories }
    }
}

#[async_trait]
impl StepExecutor for ContentProductionStep {
    fn step(&self) -> StepNumber {
        StepNumber::ContentProduction
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let spec = design(ctx)?;
        let repo = repository(ctx)?;
        let progression = spec.progression.clone().unwrap_or_default();
        let milestones = spec
            .difficulty_curve
            .as_ref()
            .map(|c| c.milestones.clone())
            .unwrap_or_default();

        let levels = level_layout(&progression, &milestones);
        let gating = json!({
            "free_levels": progression.free_levels,
            "locked_levels": progression.locked_levels,
            "unlock_mechanism": progression.unlock_mechanism,
        });
        let outcome = self
            .repositories
            .commit(&repo, "assets/levels.json", &pretty(&levels)?, "Generate levels")
            .await?;

        let levels = serde_json::to_value(&levels)
            .map_err(|e| StepError::transient(format!("failed to encode levels: {}", e)))?;
        Ok(StepOutput::new(
            Artifacts::new()
                .with("levels_generated", levels)
                .with("ad_gating_configured", gating)
                .with("content_commit", commit_ref(&outcome)),
        ))
    }

    async fn validate(&self, ctx: &StepContext, output: &StepOutput) -> Validation {
        let declared = declared_outputs(self.step(), &output.artifacts);
        let levels: Vec<LevelPlan> = output
            .artifacts
            .get("levels_generated")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let progression = design(ctx)
            .ok()
            .and_then(|s| s.progression)
            .unwrap_or_default();

        let mut errors = check_levels(&levels, &progression);
        if levels.is_empty() {
            errors.push("no levels generated".to_string());
        }
        declared.merge(Validation::from_errors(errors, Vec::new()))
    }
}
