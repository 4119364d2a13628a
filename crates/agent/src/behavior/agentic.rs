//! Agentic behavior: plan-driven generation. The state shape
//! (`current_plan`) is reserved; the build loop itself is not implemented
//! yet and the phasic path is used for all production traffic.

use crate::behavior::{AgentInfra, BuildError};
use crate::state::DevState;

pub async fn build(infra: &dyn AgentInfra) -> Result<(), BuildError> {
    tracing::warn!("Agentic behavior requested but not implemented; returning to idle");
    let mut state = infra.state().write().await;
    state.current_plan.get_or_insert_with(String::new);
    state.dev_state = DevState::Idle;
    Ok(())
}
