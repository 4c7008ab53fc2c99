//! Agent lookup
//!
//! Thread-safe registry of the agents the router can resolve, with utterance
//! matching scoped to each agent's own utterance list.

use super::Agent;
use crate::error::DispatchResult;
use crate::routing::matcher::{IntentCandidate, IntentMatcher, SemanticMatcher, UtteranceSet};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Agent lookup contract consumed by the router and the handoff loop
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn get_agent_optional(&self, agent_id: &str) -> Option<Arc<dyn Agent>>;

    /// Best candidate across every agent's utterances, if any
    async fn match_agent_by_utterance(
        &self,
        message: &str,
        semantic: Option<&dyn SemanticMatcher>,
    ) -> DispatchResult<Option<IntentCandidate>>;
}

/// Registry kept in memory; agents keep registration order
#[derive(Default)]
pub struct InMemoryAgentRegistry {
    agents: RwLock<Vec<Arc<dyn Agent>>>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, replacing one with the same id in place
    pub fn register(&self, agent: Arc<dyn Agent>) {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        let agent_id = agent.id().to_string();

        match agents.iter().position(|existing| existing.id() == agent_id) {
            Some(index) => {
                agents[index] = agent;
                debug!(agent_id = %agent_id, "Replaced agent");
            }
            None => {
                agents.push(agent);
                info!(agent_id = %agent_id, total = agents.len(), "Registered agent");
            }
        }
    }

    pub fn with_agent(self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    pub fn unregister(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.write().unwrap_or_else(PoisonError::into_inner);
        let before = agents.len();
        agents.retain(|agent| agent.id() != agent_id);
        before != agents.len()
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        agents.iter().find(|agent| agent.id() == agent_id).cloned()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        agents.iter().map(|agent| agent.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn utterance_sets(&self) -> Vec<UtteranceSet> {
        let agents = self.agents.read().unwrap_or_else(PoisonError::into_inner);
        agents
            .iter()
            .filter(|agent| !agent.settings().utterances.is_empty())
            .map(|agent| UtteranceSet::new(agent.id(), agent.settings().utterances.clone()))
            .collect()
    }
}

#[async_trait]
impl AgentDirectory for InMemoryAgentRegistry {
    async fn get_agent_optional(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.get(agent_id)
    }

    async fn match_agent_by_utterance(
        &self,
        message: &str,
        semantic: Option<&dyn SemanticMatcher>,
    ) -> DispatchResult<Option<IntentCandidate>> {
        let sets = self.utterance_sets();
        if sets.is_empty() {
            return Ok(None);
        }
        let outcome = IntentMatcher::match_utterances(message, &sets, semantic).await?;
        Ok(outcome.winner)
    }
}
