//! Dispatcher configuration
//!
//! Loaded from TOML. Declares the agents the dispatcher can route to, the
//! optional rule router, the global intent set and the dispatch limits.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Default ceiling on consecutive handoffs for one incoming message
pub const DEFAULT_MAX_HANDOFF_DEPTH: usize = 10;

/// Default inbound message length limit, in characters
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 32_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub agents: Vec<AgentSection>,
    /// Rule router configuration (optional)
    pub rules: Option<RulesSection>,
    #[serde(default)]
    pub intents: Vec<IntentSection>,
}

/// Dispatch limits and fallbacks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchSection {
    /// Agent used when no other routing stage matches
    pub default_agent: Option<String>,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_max_handoff_depth")]
    pub max_handoff_depth: usize,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            default_agent: None,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            max_handoff_depth: DEFAULT_MAX_HANDOFF_DEPTH,
        }
    }
}

/// One routable agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// Agent identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Example phrases used for direct utterance matching
    #[serde(default)]
    pub utterances: Vec<String>,
    #[serde(default = "default_true")]
    pub persist_history: bool,
    /// When false the agent sees no prior turns
    #[serde(default = "default_true")]
    pub sequential_visibility: bool,
    /// Canned reply for config-declared agents
    pub reply: Option<String>,
    /// Config-declared agents hand off to this agent after replying
    pub handoff_to: Option<String>,
}

/// Rule router configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RulesSection {
    /// Agent chosen when no rule matches (reported as a fallback)
    pub default_agent: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSection {
    pub name: String,
    /// Case-insensitive regular expressions
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Case-insensitive substrings, checked after patterns
    #[serde(default)]
    pub keywords: Vec<String>,
    pub agent: String,
}

/// One entry of the global intent set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentSection {
    pub id: String,
    pub utterances: Vec<String>,
    pub action: IntentActionConfig,
}

/// Declarative intent action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentActionConfig {
    Agent { agent_id: String },
    Pipeline { pipeline_id: String },
    Reply { content: String },
}

fn default_true() -> bool {
    true
}

fn default_max_message_length() -> usize {
    DEFAULT_MAX_MESSAGE_LENGTH
}

fn default_max_handoff_depth() -> usize {
    DEFAULT_MAX_HANDOFF_DEPTH
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid agent ID format: {0}")]
    InvalidAgentId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DispatchConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DispatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross references between agents, rules and intents
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut known = HashSet::new();
        for agent in &self.agents {
            validate_agent_id(&agent.id)?;
            if !known.insert(agent.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Duplicate agent id '{}'",
                    agent.id
                )));
            }
        }

        let require_agent = |agent_id: &str, context: &str| -> Result<(), ConfigError> {
            if known.contains(agent_id) {
                Ok(())
            } else {
                Err(ConfigError::InvalidConfig(format!(
                    "{context} references unknown agent '{agent_id}'"
                )))
            }
        };

        if self.dispatch.max_handoff_depth == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_handoff_depth must be at least 1".to_string(),
            ));
        }
        if self.dispatch.max_message_length == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_message_length must be at least 1".to_string(),
            ));
        }

        if let Some(default_agent) = &self.dispatch.default_agent {
            require_agent(default_agent, "dispatch.default_agent")?;
        }

        for agent in &self.agents {
            if let Some(target) = &agent.handoff_to {
                require_agent(target, &format!("agent '{}' handoff_to", agent.id))?;
            }
        }

        if let Some(rules) = &self.rules {
            if let Some(default_agent) = &rules.default_agent {
                require_agent(default_agent, "rules.default_agent")?;
            }
            for rule in &rules.rules {
                rule.validate()?;
                require_agent(&rule.agent, &format!("rule '{}'", rule.name))?;
            }
        }

        let mut intent_ids = HashSet::new();
        for intent in &self.intents {
            if !intent_ids.insert(intent.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Duplicate intent id '{}'",
                    intent.id
                )));
            }
            if let IntentActionConfig::Agent { agent_id } = &intent.action {
                require_agent(agent_id, &format!("intent '{}'", intent.id))?;
            }
        }

        Ok(())
    }

    /// Look up a declared agent
    pub fn agent(&self, agent_id: &str) -> Option<&AgentSection> {
        self.agents.iter().find(|agent| agent.id == agent_id)
    }
}

impl RuleSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.patterns.is_empty() && self.keywords.is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "Rule '{}' needs at least one pattern or keyword",
                self.name
            )));
        }
        for pattern in &self.patterns {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    ConfigError::InvalidConfig(format!(
                        "Rule '{}' has invalid pattern '{pattern}': {e}",
                        self.name
                    ))
                })?;
        }
        Ok(())
    }
}

/// Validate agent ID format
fn validate_agent_id(agent_id: &str) -> Result<(), ConfigError> {
    let valid_chars = agent_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if agent_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidAgentId(format!(
            "Agent ID '{agent_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
