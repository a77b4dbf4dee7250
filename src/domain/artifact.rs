//! Artifacts produced by pipeline steps.
//!
//! Artifacts are opaque JSON values keyed by output name. Later steps read
//! them back as inputs, so keys follow the stage catalogue's output names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named outputs of one step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artifacts(BTreeMap<String, Value>);

impl Artifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Keys from `expected` that are absent
    pub fn missing<'a>(&self, expected: &[&'a str]) -> Vec<&'a str> {
        expected
            .iter()
            .copied()
            .filter(|key| !self.contains(key))
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Copy every entry of `other` over this map
    pub fn extend(&mut self, other: &Artifacts) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_outputs() {
        let artifacts = Artifacts::new()
            .with("github_repo", "gamefactory-sky-hop")
            .with("local_path", "/tmp/sky-hop");

        assert!(artifacts.missing(&["github_repo", "local_path"]).is_empty());
        assert_eq!(
            artifacts.missing(&["github_repo", "architecture_validated"]),
            vec!["architecture_validated"]
        );
    }

    #[test]
    fn test_artifacts_serialize_as_plain_object() {
        let artifacts = Artifacts::new().with("game_score", 80.0);
        let json = serde_json::to_value(&artifacts).unwrap();
        assert_eq!(json, json!({"game_score": 80.0}));

        let parsed: Artifacts = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, artifacts);
    }
}
