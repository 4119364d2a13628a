//! Durable per-project agent state. Everything here survives a restart via
//! the agent store; pending images, the abort handle and the GitHub token
//! cache are deliberately kept out and live only in [`crate::core::Agent`].

use std::collections::BTreeMap;

use operations::schemas::{Blueprint, PhaseConcept};
use serde::{Deserialize, Serialize};
use services::services::file_manager::FileState;
use ts_rs::TS;
use utils::text::looks_like_command;
use uuid::Uuid;

pub const MAX_PHASES: u32 = 12;
/// Queued user input tops the phases budget back up to this floor.
pub const PHASES_RECHARGE_FLOOR: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DevState {
    #[default]
    Idle,
    PhaseGenerating,
    PhaseImplementing,
    Reviewing,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorKind {
    #[default]
    Phasic,
    Agentic,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct PhaseState {
    pub concept: PhaseConcept,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, Default)]
#[serde(default)]
pub struct AgentIdentity {
    pub agent_id: Uuid,
    pub session_id: String,
    pub host_name: String,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, Default)]
#[serde(default)]
pub struct AgentState {
    pub behavior: BehaviorKind,
    pub identity: AgentIdentity,
    pub query: String,
    pub blueprint: Option<Blueprint>,
    pub template_name: String,
    /// Ordered, append-only during a run.
    pub generated_phases: Vec<PhaseState>,
    pub files: BTreeMap<String, FileState>,
    pub commands_history: Vec<String>,
    pub last_package_json: Option<String>,
    pub pending_user_inputs: Vec<String>,
    pub project_updates: Vec<String>,
    pub dev_state: DevState,
    pub phases_counter: u32,
    pub mvp_generated: bool,
    pub reviewing_initiated: bool,
    pub should_be_generating: bool,
    pub last_deep_debug_transcript: Option<String>,
    /// Agentic behavior scratchpad; unused on the phasic path.
    pub current_plan: Option<String>,
}

impl AgentState {
    pub fn new(agent_id: Uuid, query: String, template_name: String) -> Self {
        Self {
            identity: AgentIdentity {
                agent_id,
                session_id: Uuid::new_v4().to_string(),
                host_name: hostname(),
                user_id: None,
            },
            query,
            template_name,
            phases_counter: MAX_PHASES,
            ..Default::default()
        }
    }

    /// Record executed commands: only entries that look like commands, each
    /// kept once, order preserved.
    pub fn record_commands(&mut self, commands: &[String]) {
        for command in commands {
            let command = command.trim();
            if !looks_like_command(command) {
                continue;
            }
            if self.commands_history.iter().any(|c| c == command) {
                continue;
            }
            self.commands_history.push(command.to_string());
        }
    }

    pub fn last_incomplete_phase(&self) -> Option<PhaseState> {
        self.generated_phases
            .iter()
            .rev()
            .find(|phase| !phase.completed)
            .cloned()
    }

    pub fn completed_phase_names(&self) -> Vec<String> {
        self.generated_phases
            .iter()
            .filter(|phase| phase.completed)
            .map(|phase| phase.concept.name.clone())
            .collect()
    }

    pub fn append_phase(&mut self, concept: PhaseConcept) {
        self.generated_phases.push(PhaseState {
            concept,
            completed: false,
        });
    }

    /// A phase flips from incomplete to complete at most once.
    pub fn mark_phase_complete(&mut self, name: &str) {
        if let Some(phase) = self
            .generated_phases
            .iter_mut()
            .find(|phase| phase.concept.name == name && !phase.completed)
        {
            phase.completed = true;
        }
    }

    pub fn recharge_phases(&mut self) {
        self.phases_counter = self.phases_counter.max(PHASES_RECHARGE_FLOOR);
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_history_is_filtered_and_deduplicated() {
        let mut state = AgentState::new(Uuid::new_v4(), "q".to_string(), "t".to_string());
        state.record_commands(&[
            "bun install zod".to_string(),
            "bun install zod".to_string(),
            "Please wait while I install".to_string(),
            "bun add undefined".to_string(),
            "rm -rf src/old".to_string(),
        ]);
        assert_eq!(
            state.commands_history,
            vec!["bun install zod".to_string(), "rm -rf src/old".to_string()]
        );
        assert!(state.commands_history.iter().all(|c| !c.contains(" undefined")));
    }

    #[test]
    fn phase_completion_is_one_way() {
        let mut state = AgentState::new(Uuid::new_v4(), "q".to_string(), "t".to_string());
        state.append_phase(PhaseConcept {
            name: "Core".to_string(),
            description: String::new(),
            last_phase: false,
            files: Vec::new(),
            install_commands: Vec::new(),
        });
        assert!(state.last_incomplete_phase().is_some());
        state.mark_phase_complete("Core");
        assert!(state.last_incomplete_phase().is_none());
        assert_eq!(state.completed_phase_names(), vec!["Core"]);
    }

    #[test]
    fn recharge_tops_up_but_never_lowers() {
        let mut state = AgentState::new(Uuid::new_v4(), "q".to_string(), "t".to_string());
        state.phases_counter = 1;
        state.recharge_phases();
        assert_eq!(state.phases_counter, PHASES_RECHARGE_FLOOR);
        state.phases_counter = 7;
        state.recharge_phases();
        assert_eq!(state.phases_counter, 7);
    }

    #[test]
    fn state_roundtrips_through_json() {
        let state = AgentState::new(Uuid::new_v4(), "build a todo".to_string(), "react-vite".to_string());
        let raw = serde_json::to_string(&state).unwrap();
        let back: AgentState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.query, "build a todo");
        assert_eq!(back.phases_counter, MAX_PHASES);
    }
}
