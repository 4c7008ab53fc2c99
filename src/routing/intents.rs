//! Global intent set
//!
//! An intent maps a set of utterances to an action. Agent actions are handed
//! to the executor; every other action runs inline while routing.

use crate::agent::response::AgentResponse;
use crate::config::{IntentActionConfig, IntentSection};
use crate::error::BoxError;
use crate::history::HistoryEntry;
use crate::routing::matcher::UtteranceSet;
use crate::Metadata;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Programmatic intent action
#[async_trait]
pub trait IntentHandler: Send + Sync {
    async fn handle(
        &self,
        message: &str,
        history: &[HistoryEntry],
        metadata: &Metadata,
    ) -> Result<AgentResponse, BoxError>;
}

/// What happens when an intent wins
#[derive(Clone)]
pub enum IntentAction {
    Agent { agent_id: String },
    Pipeline { pipeline_id: String },
    Reply { content: String },
    Handler(Arc<dyn IntentHandler>),
}

impl fmt::Debug for IntentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentAction::Agent { agent_id } => {
                f.debug_struct("Agent").field("agent_id", agent_id).finish()
            }
            IntentAction::Pipeline { pipeline_id } => f
                .debug_struct("Pipeline")
                .field("pipeline_id", pipeline_id)
                .finish(),
            IntentAction::Reply { content } => {
                f.debug_struct("Reply").field("content", content).finish()
            }
            IntentAction::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

impl From<&IntentActionConfig> for IntentAction {
    fn from(config: &IntentActionConfig) -> Self {
        match config {
            IntentActionConfig::Agent { agent_id } => IntentAction::Agent {
                agent_id: agent_id.clone(),
            },
            IntentActionConfig::Pipeline { pipeline_id } => IntentAction::Pipeline {
                pipeline_id: pipeline_id.clone(),
            },
            IntentActionConfig::Reply { content } => IntentAction::Reply {
                content: content.clone(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Intent {
    pub id: String,
    pub utterances: Vec<String>,
    pub action: IntentAction,
}

impl Intent {
    pub fn new(id: impl Into<String>, utterances: Vec<String>, action: IntentAction) -> Self {
        Self {
            id: id.into(),
            utterances,
            action,
        }
    }
}

/// Registered intents in declaration order
#[derive(Debug, Clone, Default)]
pub struct IntentSet {
    intents: Vec<Intent>,
}

impl IntentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(sections: &[IntentSection]) -> Self {
        Self {
            intents: sections
                .iter()
                .map(|section| {
                    Intent::new(
                        section.id.clone(),
                        section.utterances.clone(),
                        IntentAction::from(&section.action),
                    )
                })
                .collect(),
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intents.push(intent);
        self
    }

    pub fn get(&self, intent_id: &str) -> Option<&Intent> {
        self.intents.iter().find(|intent| intent.id == intent_id)
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn utterance_sets(&self) -> Vec<UtteranceSet> {
        self.intents
            .iter()
            .map(|intent| UtteranceSet::new(intent.id.clone(), intent.utterances.clone()))
            .collect()
    }
}
