//! Process-wide registry of live agents.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::core::{Agent, AgentDeps};

#[derive(Clone)]
pub struct AgentManager {
    agents: Arc<DashMap<Uuid, Arc<Agent>>>,
    deps: AgentDeps,
}

impl AgentManager {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            agents: Arc::new(DashMap::new()),
            deps,
        }
    }

    pub fn get(&self, agent_id: Uuid) -> Option<Arc<Agent>> {
        self.agents.get(&agent_id).map(|entry| entry.clone())
    }

    /// Look up a live agent or revive it from its on-disk store.
    pub async fn get_or_create(&self, agent_id: Uuid) -> anyhow::Result<Arc<Agent>> {
        if let Some(agent) = self.get(agent_id) {
            return Ok(agent);
        }
        let agent = Agent::open(agent_id, self.deps.clone()).await?;
        // A concurrent open of the same agent keeps the first one in.
        let entry = self
            .agents
            .entry(agent_id)
            .or_insert_with(|| agent.clone());
        Ok(entry.clone())
    }

    /// Used by tests to register agents built on an in-memory store.
    pub fn insert(&self, agent: Arc<Agent>) {
        self.agents.insert(agent.id(), agent);
    }

    /// Drop a live agent. Durable state stays on disk; the in-memory GitHub
    /// token cache and pending images die with the instance.
    pub fn evict(&self, agent_id: Uuid) {
        self.agents.remove(&agent_id);
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
