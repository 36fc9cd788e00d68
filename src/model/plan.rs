//! Plan Files
//!
//! Loads a branchified plan — the tree's node arena, its branches, and the
//! global seed values — from JSON or YAML. Plans are produced by the tree
//! builder; this crate only consumes them.

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::model::types::{Branch, Value};
use crate::tree::{Tree, TreeStep};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("cannot read plan file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON plan: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML plan: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A deserialized plan document.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Plan {
    pub nodes: Vec<TreeStep>,
    pub branches: Vec<Branch>,
    /// Seeds copied into the global namespace at every branch start.
    pub global_init: IndexMap<String, Value>,
}

impl Plan {
    pub fn from_json(content: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self, PlanError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a plan from a file, picking the format by extension
    /// (`.yaml`/`.yml` is YAML, anything else JSON).
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    /// Split into the tree and the runner's global seeds.
    pub fn into_tree(self) -> (Tree, IndexMap<String, Value>) {
        (Tree::new(self.nodes, self.branches), self.global_init)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_plan() {
        let plan = Plan::from_json(
            r#"{
                "nodes": [
                    {"text": "Open page", "lineNumber": 4, "filename": "suite.plan"}
                ],
                "branches": [
                    {
                        "steps": [
                            {"text": "{x}='1'", "lineNumber": 5,
                             "varsBeingSet": [{"name": "x", "value": "'1'"}]},
                            {"text": "check", "lineNumber": 6, "branchIndents": 1,
                             "codeBlock": "log(x)"}
                        ]
                    }
                ],
                "globalInit": {"env": "ci", "retries": 2}
            }"#,
        )
        .unwrap();

        assert_eq!(plan.nodes.len(), 1);
        assert_eq!(plan.nodes[0].line_number, 4);
        assert_eq!(plan.branches.len(), 1);
        let steps = &plan.branches[0].steps;
        assert_eq!(steps[0].vars_being_set[0].name, "x");
        assert!(!steps[0].vars_being_set[0].is_local);
        assert_eq!(steps[1].code_block.as_deref(), Some("log(x)"));
        assert_eq!(plan.global_init.get("env"), Some(&Value::Str("ci".into())));
        assert_eq!(plan.global_init.get("retries"), Some(&Value::Num(2.0)));
    }

    #[test]
    fn test_yaml_plan() {
        let plan = Plan::from_yaml(
            "branches:\n  - steps:\n      - text: hello\n        lineNumber: 1\n",
        )
        .unwrap();
        assert_eq!(plan.branches[0].steps[0].text, "hello");
    }

    #[test]
    fn test_into_tree() {
        let plan = Plan::from_json(r#"{"branches": [{"steps": []}, {"steps": []}]}"#).unwrap();
        let (tree, seeds) = plan.into_tree();
        assert_eq!(tree.total_branches(), 2);
        assert!(seeds.is_empty());
    }
}
