//! Starter templates. Each template is a directory under
//! `<assets>/templates/<name>/` whose files seed a new project. A template
//! may carry a `template.json` manifest describing protected files and the
//! commands used for analysis and preview.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use utils::assets::asset_dir;

use crate::services::sandbox::SandboxFile;

pub const DEFAULT_TEMPLATE: &str = "react-vite";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// `template.json` manifest; every field has a sensible default so templates
/// without a manifest still work.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct TemplateManifest {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub do_not_touch_files: Vec<String>,
    #[serde(default)]
    pub redacted_files: Vec<String>,
    #[serde(default = "default_lint_command")]
    pub lint_command: String,
    #[serde(default = "default_typecheck_command")]
    pub typecheck_command: String,
    #[serde(default = "default_dev_command")]
    pub dev_command: String,
}

fn default_lint_command() -> String {
    "bun run lint".to_string()
}

fn default_typecheck_command() -> String {
    "bunx tsc --noEmit --pretty false".to_string()
}

fn default_dev_command() -> String {
    "bun run dev".to_string()
}

impl Default for TemplateManifest {
    fn default() -> Self {
        Self {
            description: String::new(),
            do_not_touch_files: Vec::new(),
            redacted_files: Vec::new(),
            lint_command: default_lint_command(),
            typecheck_command: default_typecheck_command(),
            dev_command: default_dev_command(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateDetails {
    pub name: String,
    pub manifest: TemplateManifest,
    pub files: Vec<SandboxFile>,
}

fn templates_dir() -> PathBuf {
    asset_dir().join("templates")
}

pub fn list_templates() -> Result<Vec<String>, TemplateError> {
    let dir = templates_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Resolve the template for a user query. Selection is a name match when the
/// query mentions a known template, otherwise the default.
pub fn select_template(query: &str) -> String {
    match list_templates() {
        Ok(names) => {
            let lowered = query.to_lowercase();
            names
                .iter()
                .find(|name| lowered.contains(name.as_str()))
                .cloned()
                .unwrap_or_else(|| {
                    if names.contains(&DEFAULT_TEMPLATE.to_string()) || names.is_empty() {
                        DEFAULT_TEMPLATE.to_string()
                    } else {
                        names[0].clone()
                    }
                })
        }
        Err(_) => DEFAULT_TEMPLATE.to_string(),
    }
}

pub fn load_template(name: &str) -> Result<TemplateDetails, TemplateError> {
    let root = templates_dir().join(name);
    if !root.is_dir() {
        return Err(TemplateError::NotFound(name.to_string()));
    }

    let manifest_path = root.join("template.json");
    let manifest = if manifest_path.exists() {
        serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)?
    } else {
        TemplateManifest::default()
    };

    let mut files = Vec::new();
    collect_files(&root, &root, &mut files)?;
    files.retain(|f| f.path != "template.json");

    Ok(TemplateDetails {
        name: name.to_string(),
        manifest,
        files,
    })
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<SandboxFile>,
) -> Result<(), TemplateError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .expect("entry under root")
                .to_string_lossy()
                .replace('\\', "/");
            out.push(SandboxFile {
                path: rel,
                contents: std::fs::read(&path)?,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_defaults_apply_to_empty_json() {
        let manifest: TemplateManifest = serde_json::from_str("{}").unwrap();
        assert_eq!(manifest.dev_command, "bun run dev");
        assert!(manifest.do_not_touch_files.is_empty());
    }

    #[test]
    fn select_template_falls_back_to_default() {
        // With no templates directory present the default name is returned.
        assert_eq!(select_template("build me a todo list"), DEFAULT_TEMPLATE);
    }
}
