//! Config-declared agent with a canned reply

use super::{Agent, AgentInput, AgentSettings, AgentResponse, HandoffRequest};
use crate::config::AgentSection;
use crate::error::BoxError;
use async_trait::async_trait;
use tracing::debug;

/// Replies with fixed text (or echoes the message) and optionally hands off
#[derive(Debug, Clone)]
pub struct StaticAgent {
    id: String,
    settings: AgentSettings,
    reply: Option<String>,
    handoff_to: Option<String>,
}

impl StaticAgent {
    pub fn new(id: impl Into<String>, settings: AgentSettings, reply: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            settings,
            reply: Some(reply.into()),
            handoff_to: None,
        }
    }

    /// Agent that echoes every message back
    pub fn echo(id: impl Into<String>, settings: AgentSettings) -> Self {
        Self {
            id: id.into(),
            settings,
            reply: None,
            handoff_to: None,
        }
    }

    pub fn from_config(section: &AgentSection) -> Self {
        Self {
            id: section.id.clone(),
            settings: AgentSettings::from(section),
            reply: section.reply.clone(),
            handoff_to: section.handoff_to.clone(),
        }
    }

    pub fn with_handoff_to(mut self, agent_id: impl Into<String>) -> Self {
        self.handoff_to = Some(agent_id.into());
        self
    }
}

#[async_trait]
impl Agent for StaticAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    async fn generate(&self, input: AgentInput) -> Result<AgentResponse, BoxError> {
        debug!(
            agent_id = %self.id,
            history_len = input.history.len(),
            "Static agent replying"
        );

        let content = match &self.reply {
            Some(reply) => reply.clone(),
            None => format!("[{}] {}", self.id, input.message),
        };

        let response = AgentResponse::text(content);
        Ok(match &self.handoff_to {
            Some(target) => response.with_handoff(HandoffRequest::to(target.clone())),
            None => response,
        })
    }
}
