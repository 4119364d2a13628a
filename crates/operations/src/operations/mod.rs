//! The operations registry: each module is a pure call from context to
//! result, wrapping one model role used by the agent (blueprint generation,
//! phase generation/implementation, file regeneration, fixers, setup
//! assistance, user conversation).

use services::services::{
    deployment_manager::{RuntimeError, StaticAnalysisResult},
    file_manager::FileState,
};

pub mod blueprint;
pub mod conversation;
pub mod fast_code_fixer;
pub mod file_regeneration;
pub mod phase_generation;
pub mod phase_implementation;
pub mod setup;
pub mod simple_codegen;

/// Snapshot of everything currently wrong with the running app, rendered
/// into prompts for the generation and fixer operations.
#[derive(Debug, Clone, Default)]
pub struct IssueSnapshot {
    pub runtime_errors: Vec<RuntimeError>,
    pub static_analysis: StaticAnalysisResult,
}

impl IssueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.runtime_errors.is_empty()
            && self.static_analysis.lint.issues.is_empty()
            && self.static_analysis.typecheck.issues.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.runtime_errors.is_empty() {
            out.push_str("Runtime errors:\n");
            for error in &self.runtime_errors {
                out.push_str(&format!("- {}\n", error.message));
            }
        }
        for (label, report) in [
            ("Typecheck", &self.static_analysis.typecheck),
            ("Lint", &self.static_analysis.lint),
        ] {
            if !report.issues.is_empty() {
                out.push_str(&format!("{label} issues:\n"));
                for issue in &report.issues {
                    out.push_str(&format!(
                        "- {}:{}:{} {} {}\n",
                        issue.file, issue.line, issue.column, issue.code, issue.message
                    ));
                }
            }
        }
        if out.is_empty() {
            out.push_str("No known issues.\n");
        }
        out
    }
}

pub(crate) fn render_files(files: &[FileState]) -> String {
    let mut out = String::new();
    for file in files {
        out.push_str(&format!(
            "<file path=\"{}\" purpose=\"{}\">\n{}\n</file>\n",
            file.file_path, file.file_purpose, file.file_contents
        ));
    }
    out
}
