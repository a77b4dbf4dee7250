//! Typed view of a generated game design.
//!
//! Jobs store the design as an opaque JSON blob. The engine only reads the
//! sections it compares or validates; anything else is carried through in
//! `extra` untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Game design document produced by pre-production
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignSpec {
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub generation_attempt: u32,
    #[serde(default)]
    pub mechanics: MechanicSlots,
    pub core_loop: Option<CoreLoop>,
    pub progression: Option<Progression>,
    pub economy: Option<Economy>,
    pub fail_states: Option<FailStates>,
    pub difficulty_curve: Option<DifficultyCurve>,
    pub analytics_plan: Option<AnalyticsPlan>,
    pub asset_style_guide: Option<StyleGuide>,

    /// Set when regeneration ran out of attempts
    #[serde(rename = "_similarity_warning", default, skip_serializing_if = "Option::is_none")]
    pub similarity_warning: Option<bool>,
    #[serde(rename = "_similarity_score", default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DesignSpec {
    /// Parse a stored blob leniently; missing sections stay `None`
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Mechanic names in slot order
    pub fn mechanic_names(&self) -> Vec<String> {
        self.mechanics.names()
    }

    pub fn art_style(&self) -> Option<&str> {
        self.asset_style_guide
            .as_ref()
            .map(|s| s.art_style.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MechanicSlots {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub tertiary: Option<String>,
}

impl MechanicSlots {
    pub fn from_names(names: &[String]) -> Self {
        Self {
            primary: names.first().cloned(),
            secondary: names.get(1).cloned(),
            tertiary: names.get(2).cloned(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        [&self.primary, &self.secondary, &self.tertiary]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreLoop {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub primary_action: String,
    #[serde(default)]
    pub reward_trigger: String,
    #[serde(default)]
    pub session_length_target_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progression {
    pub level_count: u32,
    pub free_levels: Vec<u32>,
    pub locked_levels: Vec<u32>,
    pub unlock_mechanism: String,
    #[serde(default)]
    pub difficulty_ramp: String,
}

impl Default for Progression {
    fn default() -> Self {
        Self {
            level_count: 10,
            free_levels: vec![1, 2, 3],
            locked_levels: (4..=10).collect(),
            unlock_mechanism: "rewarded_ad".to_string(),
            difficulty_ramp: "linear".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Economy {
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub earn_per_level: f64,
    #[serde(default)]
    pub ad_reward_multiplier: f64,
    #[serde(default)]
    pub no_iap: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailStates {
    pub primary: String,
    #[serde(default)]
    pub retry_cost: String,
    #[serde(default)]
    pub game_over_trigger: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DifficultyCurve {
    #[serde(default)]
    pub factors: Vec<String>,

    /// Multiplier applied to milestone difficulty (1.0 = unscaled)
    #[serde(default = "default_scale")]
    pub scale: f64,

    #[serde(default)]
    pub milestones: Vec<DifficultyMilestone>,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyMilestone {
    pub level: u32,
    pub difficulty: f64,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsPlan {
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub retention_tracking: bool,
    #[serde(default)]
    pub funnel_stages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleGuide {
    #[serde(default)]
    pub art_style: String,
    #[serde(default)]
    pub ui_theme: String,
    #[serde(default)]
    pub audio_style: String,
    #[serde(default)]
    pub color_palette: BTreeMap<String, String>,
}

/// Analytics events every generated game must emit
pub const REQUIRED_ANALYTICS_EVENTS: [&str; 9] = [
    "game_start",
    "level_start",
    "level_complete",
    "level_fail",
    "unlock_prompt_shown",
    "rewarded_ad_started",
    "rewarded_ad_completed",
    "rewarded_ad_failed",
    "level_unlocked",
];

/// Top-level sections a design must contain
pub const REQUIRED_SECTIONS: [&str; 10] = [
    "game_name",
    "genre",
    "mechanics",
    "core_loop",
    "progression",
    "economy",
    "fail_states",
    "difficulty_curve",
    "analytics_plan",
    "asset_style_guide",
];
