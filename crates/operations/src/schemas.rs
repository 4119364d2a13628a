//! Structured outputs exchanged with the model: the project blueprint, phase
//! concepts, and the smaller payloads returned by fixer and setup
//! operations.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq, Eq)]
pub struct FileConcept {
    pub path: String,
    pub purpose: String,
    #[serde(default)]
    pub changes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq, Eq)]
pub struct PhaseConcept {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub last_phase: bool,
    #[serde(default)]
    pub files: Vec<FileConcept>,
    #[serde(default)]
    pub install_commands: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, PartialEq, Eq)]
#[serde(default)]
pub struct Blueprint {
    pub title: String,
    pub description: String,
    pub detailed_description: String,
    pub project_name: String,
    pub color_palette: Vec<String>,
    pub views: Vec<String>,
    pub user_flow: String,
    pub data_flow: String,
    pub architecture: String,
    pub pitfalls: Vec<String>,
    pub frameworks: Vec<String>,
    pub implementation_roadmap: Vec<String>,
    pub initial_phase: Option<PhaseConcept>,
}

/// Keys a client-supplied blueprint patch may touch. `project_name` is
/// deliberately absent; renames go through their own validated path.
pub const BLUEPRINT_PATCH_ALLOW_LIST: &[&str] = &[
    "title",
    "description",
    "detailed_description",
    "color_palette",
    "views",
    "user_flow",
    "data_flow",
    "architecture",
    "pitfalls",
    "frameworks",
    "implementation_roadmap",
];

impl Blueprint {
    /// Apply a patch, ignoring any key outside the allow-list.
    pub fn apply_patch(&mut self, patch: &serde_json::Map<String, serde_json::Value>) {
        for (key, value) in patch {
            if !BLUEPRINT_PATCH_ALLOW_LIST.contains(&key.as_str()) {
                tracing::debug!(key, "Ignoring blueprint patch key outside allow-list");
                continue;
            }
            let result = match key.as_str() {
                "title" => assign(&mut self.title, value),
                "description" => assign(&mut self.description, value),
                "detailed_description" => assign(&mut self.detailed_description, value),
                "color_palette" => assign(&mut self.color_palette, value),
                "views" => assign(&mut self.views, value),
                "user_flow" => assign(&mut self.user_flow, value),
                "data_flow" => assign(&mut self.data_flow, value),
                "architecture" => assign(&mut self.architecture, value),
                "pitfalls" => assign(&mut self.pitfalls, value),
                "frameworks" => assign(&mut self.frameworks, value),
                "implementation_roadmap" => assign(&mut self.implementation_roadmap, value),
                _ => Ok(()),
            };
            if let Err(err) = result {
                tracing::warn!(key, "Blueprint patch value has wrong shape: {err}");
            }
        }
    }
}

fn assign<T: for<'de> Deserialize<'de>>(
    target: &mut T,
    value: &serde_json::Value,
) -> Result<(), serde_json::Error> {
    *target = serde_json::from_value(value.clone())?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct GeneratedFileOutput {
    pub path: String,
    pub purpose: String,
    pub contents: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(default)]
pub struct PhaseImplementationOutcome {
    pub files: Vec<GeneratedFileOutput>,
    pub commands: Vec<String>,
    pub deleted_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandsPayload {
    pub commands: Vec<String>,
    pub deleted_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SetupCommandsPayload {
    pub commands: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_ignores_unknown_and_forbidden_keys() {
        let mut blueprint = Blueprint {
            title: "Old".to_string(),
            project_name: "keep-me".to_string(),
            ..Default::default()
        };
        let patch = serde_json::json!({
            "title": "New",
            "project_name": "hacked",
            "totally_unknown": 42,
            "frameworks": ["react", "hono"],
        });
        blueprint.apply_patch(patch.as_object().unwrap());
        assert_eq!(blueprint.title, "New");
        assert_eq!(blueprint.project_name, "keep-me");
        assert_eq!(blueprint.frameworks, vec!["react", "hono"]);
    }

    #[test]
    fn wrong_shaped_value_is_skipped() {
        let mut blueprint = Blueprint::default();
        let patch = serde_json::json!({ "frameworks": "not an array" });
        blueprint.apply_patch(patch.as_object().unwrap());
        assert!(blueprint.frameworks.is_empty());
    }

    #[test]
    fn phase_concept_defaults_optional_fields() {
        let phase: PhaseConcept = serde_json::from_str(
            r#"{"name": "Setup", "description": "bootstrap the app"}"#,
        )
        .unwrap();
        assert!(!phase.last_phase);
        assert!(phase.files.is_empty());
        assert!(phase.install_commands.is_empty());
    }
}
