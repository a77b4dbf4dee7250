//! Constraints synthesized by the feedback loop.
//!
//! Constraints travel from a finished job's post-launch step to the next
//! batch's pre-production step. Only content generation interprets them.

use serde::{Deserialize, Serialize};

/// Instruction for future generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    PreferMechanics {
        value: Vec<String>,
        #[serde(default)]
        reason: String,
    },
    AvoidMechanics {
        value: Vec<String>,
        #[serde(default)]
        reason: String,
    },
    /// Scale factor applied to the difficulty curve
    ReduceDifficulty {
        value: f64,
        #[serde(default)]
        reason: String,
    },
    ImproveValueProposition {
        value: bool,
        #[serde(default)]
        reason: String,
    },
    PreferGenre {
        value: String,
        #[serde(default)]
        reason: String,
    },
}

impl Constraint {
    /// The `type` tag, used to merge constraint lists
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PreferMechanics { .. } => "prefer_mechanics",
            Self::AvoidMechanics { .. } => "avoid_mechanics",
            Self::ReduceDifficulty { .. } => "reduce_difficulty",
            Self::ImproveValueProposition { .. } => "improve_value_proposition",
            Self::PreferGenre { .. } => "prefer_genre",
        }
    }
}

/// Merge constraint lists, keeping one constraint per kind (later lists win)
pub fn merge_constraints<I>(lists: I) -> Vec<Constraint>
where
    I: IntoIterator<Item = Vec<Constraint>>,
{
    let mut merged: Vec<Constraint> = Vec::new();
    for list in lists {
        for constraint in list {
            match merged.iter().position(|c| c.kind() == constraint.kind()) {
                Some(idx) => merged[idx] = constraint,
                None => merged.push(constraint),
            }
        }
    }
    merged
}

/// Helpers for reading constraint lists
pub trait ConstraintSet {
    fn preferred_mechanics(&self) -> Vec<String>;
    fn avoided_mechanics(&self) -> Vec<String>;
    fn difficulty_scale(&self) -> Option<f64>;
    fn wants_better_value(&self) -> bool;
}

impl ConstraintSet for [Constraint] {
    fn preferred_mechanics(&self) -> Vec<String> {
        self.iter()
            .filter_map(|c| match c {
                Constraint::PreferMechanics { value, .. } => Some(value.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn avoided_mechanics(&self) -> Vec<String> {
        self.iter()
            .filter_map(|c| match c {
                Constraint::AvoidMechanics { value, .. } => Some(value.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn difficulty_scale(&self) -> Option<f64> {
        self.iter().find_map(|c| match c {
            Constraint::ReduceDifficulty { value, .. } => Some(*value),
            _ => None,
        })
    }

    fn wants_better_value(&self) -> bool {
        self.iter()
            .any(|c| matches!(c, Constraint::ImproveValueProposition { value: true, .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constraint_wire_format() {
        let constraint = Constraint::PreferGenre {
            value: "puzzle".into(),
            reason: "Genre performed well (score: 80.0)".into(),
        };
        let json = serde_json::to_value(&constraint).unwrap();
        assert_eq!(json["type"], "prefer_genre");
        assert_eq!(json["value"], "puzzle");

        let parsed: Constraint =
            serde_json::from_value(json!({"type": "reduce_difficulty", "value": 0.8})).unwrap();
        assert_eq!(parsed.kind(), "reduce_difficulty");
    }

    #[test]
    fn test_merge_keeps_latest_per_kind() {
        let older = vec![
            Constraint::PreferGenre { value: "runner".into(), reason: String::new() },
            Constraint::ReduceDifficulty { value: 0.8, reason: String::new() },
        ];
        let newer = vec![Constraint::PreferGenre { value: "puzzle".into(), reason: String::new() }];

        let merged = merge_constraints(vec![older, newer]);
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged[0],
            Constraint::PreferGenre { value: "puzzle".into(), reason: String::new() }
        );
    }

    #[test]
    fn test_constraint_set_accessors() {
        let constraints = vec![
            Constraint::AvoidMechanics { value: vec!["gravity_flip".into()], reason: String::new() },
            Constraint::ImproveValueProposition { value: true, reason: String::new() },
        ];
        assert_eq!(constraints.avoided_mechanics(), vec!["gravity_flip".to_string()]);
        assert!(constraints.preferred_mechanics().is_empty());
        assert!(constraints.wants_better_value());
        assert_eq!(constraints.difficulty_scale(), None);
    }
}
