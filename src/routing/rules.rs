//! Rule-based routing
//!
//! A configured rule router takes over routing entirely. Rules are checked in
//! declaration order; the first rule whose pattern or keyword matches decides
//! the agent. With no match the router's default agent is used and the
//! decision is flagged as a fallback.

use crate::config::{ConfigError, RulesSection};
use crate::error::BoxError;
use crate::routing::matcher::MatchType;
use crate::Metadata;
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Agent chosen by a rule router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDecision {
    pub agent_id: String,
    /// Name of the matching rule; `None` for fallbacks
    pub rule: Option<String>,
    pub match_type: Option<MatchType>,
    pub fallback: bool,
}

/// Rule router contract
#[async_trait]
pub trait RuleRouter: Send + Sync {
    /// `Ok(None)` when no rule matches and there is no default agent
    async fn route(&self, message: &str, metadata: &Metadata)
        -> Result<Option<RuleDecision>, BoxError>;
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    patterns: Vec<Regex>,
    keywords: Vec<String>,
    agent_id: String,
}

/// Regex and keyword rule engine
#[derive(Debug, Clone, Default)]
pub struct PatternRuleRouter {
    rules: Vec<CompiledRule>,
    default_agent: Option<String>,
}

impl PatternRuleRouter {
    pub fn new(default_agent: Option<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_agent,
        }
    }

    pub fn from_config(section: &RulesSection) -> Result<Self, ConfigError> {
        let mut router = Self::new(section.default_agent.clone());
        for rule in &section.rules {
            router = router.with_rule(&rule.name, &rule.patterns, &rule.keywords, &rule.agent)?;
        }
        Ok(router)
    }

    /// Append a rule; patterns are compiled case-insensitively
    pub fn with_rule(
        mut self,
        name: &str,
        patterns: &[String],
        keywords: &[String],
        agent_id: &str,
    ) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        ConfigError::InvalidConfig(format!(
                            "Rule '{name}' has invalid pattern '{pattern}': {e}"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.rules.push(CompiledRule {
            name: name.to_string(),
            patterns,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            agent_id: agent_id.to_string(),
        });
        Ok(self)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Synchronous rule evaluation
    pub fn evaluate(&self, message: &str) -> Option<RuleDecision> {
        let lowered = message.to_lowercase();

        for rule in &self.rules {
            let match_type = if rule.patterns.iter().any(|p| p.is_match(message)) {
                Some(MatchType::Regex)
            } else if rule.keywords.iter().any(|k| lowered.contains(k.as_str())) {
                Some(MatchType::Keyword)
            } else {
                None
            };

            if let Some(match_type) = match_type {
                debug!(rule = %rule.name, agent_id = %rule.agent_id, ?match_type, "Rule matched");
                return Some(RuleDecision {
                    agent_id: rule.agent_id.clone(),
                    rule: Some(rule.name.clone()),
                    match_type: Some(match_type),
                    fallback: false,
                });
            }
        }

        self.default_agent.as_ref().map(|agent_id| {
            debug!(agent_id = %agent_id, "No rule matched, using rule default");
            RuleDecision {
                agent_id: agent_id.clone(),
                rule: None,
                match_type: None,
                fallback: true,
            }
        })
    }
}

#[async_trait]
impl RuleRouter for PatternRuleRouter {
    async fn route(
        &self,
        message: &str,
        _metadata: &Metadata,
    ) -> Result<Option<RuleDecision>, BoxError> {
        Ok(self.evaluate(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleSection;

    fn router() -> PatternRuleRouter {
        PatternRuleRouter::from_config(&RulesSection {
            default_agent: Some("general".to_string()),
            rules: vec![
                RuleSection {
                    name: "help".to_string(),
                    patterns: vec!["^help".to_string()],
                    keywords: vec!["assist".to_string()],
                    agent: "help-agent".to_string(),
                },
                RuleSection {
                    name: "billing".to_string(),
                    patterns: vec![],
                    keywords: vec!["Invoice".to_string(), "refund".to_string()],
                    agent: "billing-agent".to_string(),
                },
            ],
        })
        .unwrap()
    }

    #[test]
    fn test_pattern_match_reports_regex() {
        let decision = router().evaluate("Help me please").unwrap();
        assert_eq!(decision.agent_id, "help-agent");
        assert_eq!(decision.rule.as_deref(), Some("help"));
        assert_eq!(decision.match_type, Some(MatchType::Regex));
        assert!(!decision.fallback);
    }

    #[test]
    fn test_keyword_match_is_case_insensitive_substring() {
        let decision = router().evaluate("where is my INVOICE?").unwrap();
        assert_eq!(decision.agent_id, "billing-agent");
        assert_eq!(decision.match_type, Some(MatchType::Keyword));
    }

    #[test]
    fn test_first_rule_wins() {
        // Matches both the help keyword and the billing keyword
        let decision = router().evaluate("can you assist with a refund").unwrap();
        assert_eq!(decision.rule.as_deref(), Some("help"));
    }

    #[test]
    fn test_no_match_falls_back_to_default() {
        let decision = router().evaluate("what's the weather").unwrap();
        assert_eq!(decision.agent_id, "general");
        assert!(decision.fallback);
        assert!(decision.rule.is_none());
    }

    #[test]
    fn test_no_match_without_default_is_none() {
        let router = PatternRuleRouter::new(None)
            .with_rule("help", &["^help".to_string()], &[], "help-agent")
            .unwrap();
        assert!(router.evaluate("hello").is_none());
        assert_eq!(router.rule_count(), 1);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = PatternRuleRouter::new(None).with_rule("bad", &["(".to_string()], &[], "a");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(msg)) if msg.contains("bad")));
    }
}
