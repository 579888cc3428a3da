//! The access-control model definition.
//!
//! Mirrors the sectioned key/value model file: request, policy and role
//! definitions, the matcher expression and the effect expression.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Model sections, each a key → expression map.
///
/// Keys follow the conventional names: `r` for the request definition, `p`
/// for the policy definition, `g` for roles, `m` for the matcher and `e` for
/// the effect expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelDefinition {
    pub request_definition: BTreeMap<String, String>,
    pub policy_definition: BTreeMap<String, String>,
    pub role_definition: BTreeMap<String, String>,
    pub matchers: BTreeMap<String, String>,
    pub policy_effect: BTreeMap<String, String>,
}

impl ModelDefinition {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// The model every rule table in this repository is written against.
    pub fn standard() -> Self {
        Self::new()
            .with_request("r", "sub, obj, act")
            .with_policy("p", "sub, obj, act, cls, eft")
            .with_policy("p2", "sub, obj, act, eft")
            .with_role("g", "_, _")
            .with_matcher(
                "m",
                "g(r.sub, p.sub) && keyMatch(r.obj, p.obj) && r.act == p.act",
            )
            .with_effect(
                "e",
                "some(where (p.eft == allow)) && !some(where (p.eft == deny))",
            )
    }

    pub fn with_request(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_definition.insert(key.into(), value.into());
        self
    }

    pub fn with_policy(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.policy_definition.insert(key.into(), value.into());
        self
    }

    pub fn with_role(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.role_definition.insert(key.into(), value.into());
        self
    }

    pub fn with_matcher(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.matchers.insert(key.into(), value.into());
        self
    }

    pub fn with_effect(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.policy_effect.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_model_has_required_keys() {
        let model = ModelDefinition::standard();
        assert!(model.request_definition.contains_key("r"));
        assert!(model.policy_definition.contains_key("p"));
        assert!(!model.matchers["m"].is_empty());
        assert!(!model.policy_effect["e"].is_empty());
    }

    #[test]
    fn deserializes_with_missing_sections() {
        let model: ModelDefinition =
            serde_json::from_str(r#"{"request_definition": {"r": "sub, obj, act"}}"#)
                .expect("deserialize model");
        assert_eq!(model.request_definition.len(), 1);
        assert!(model.policy_definition.is_empty());
    }
}
