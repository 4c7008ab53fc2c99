//! Router: layered fallback decision procedure
//!
//! Stages run in a fixed order and the first one that resolves wins:
//!
//! 1. rule router (when configured it decides alone, including its fallback)
//! 2. direct agent utterances
//! 3. pipeline utterances (the pipeline runs inline)
//! 4. global intents (non-agent actions run inline)
//! 5. configured default agent
//!
//! Every stage attempt opens one tracer span. Span handling never changes the
//! routing decision.

use crate::agent::response::AgentResponse;
use crate::agent::Agent;
use crate::error::{DispatchError, DispatchResult, RouteType};
use crate::history::HistoryEntry;
use crate::observability::{AttributeValue, SpanStatus};
use crate::pipeline::PipelineRunOptions;
use crate::routing::intents::IntentAction;
use crate::routing::matcher::{IntentCandidate, IntentMatcher, MatchType};
use crate::services::DispatchServices;
use crate::Metadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const STAGE_RULE: &str = "router.rule";
pub const STAGE_AGENT_UTTERANCE: &str = "router.agent_utterance";
pub const STAGE_PIPELINE_UTTERANCE: &str = "router.pipeline_utterance";
pub const STAGE_INTENT: &str = "router.intent";
pub const STAGE_DEFAULT: &str = "router.default";

/// Outcome of one routing decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingTarget {
    Agent { agent_id: String },
    Pipeline { pipeline_id: String },
    Intent { intent_id: String },
    Default { agent_id: String },
    None,
}

impl RoutingTarget {
    pub fn label(&self) -> &'static str {
        match self {
            RoutingTarget::Agent { .. } => "agent",
            RoutingTarget::Pipeline { .. } => "pipeline",
            RoutingTarget::Intent { .. } => "intent",
            RoutingTarget::Default { .. } => "default",
            RoutingTarget::None => "none",
        }
    }

    /// Id of the agent, pipeline or intent the message was routed to
    pub fn target_id(&self) -> Option<&str> {
        match self {
            RoutingTarget::Agent { agent_id } | RoutingTarget::Default { agent_id } => {
                Some(agent_id)
            }
            RoutingTarget::Pipeline { pipeline_id } => Some(pipeline_id),
            RoutingTarget::Intent { intent_id } => Some(intent_id),
            RoutingTarget::None => None,
        }
    }

    pub fn route_type(&self) -> Option<RouteType> {
        match self {
            RoutingTarget::Agent { .. } => Some(RouteType::Agent),
            RoutingTarget::Pipeline { .. } => Some(RouteType::Pipeline),
            RoutingTarget::Intent { .. } => Some(RouteType::Intent),
            RoutingTarget::Default { .. } => Some(RouteType::Default),
            RoutingTarget::None => None,
        }
    }
}

impl fmt::Display for RoutingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target_id() {
            Some(id) => write!(f, "{}:{id}", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// What the caller still has to do with a routing decision
#[derive(Clone)]
pub enum RouteResolution {
    /// Agent the executor must invoke
    Invoke(Arc<dyn Agent>),
    /// Response already produced inline (pipelines and intent actions)
    Completed(AgentResponse),
    Unresolved,
}

impl fmt::Debug for RouteResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteResolution::Invoke(agent) => f.debug_tuple("Invoke").field(&agent.id()).finish(),
            RouteResolution::Completed(response) => {
                f.debug_tuple("Completed").field(response).finish()
            }
            RouteResolution::Unresolved => f.write_str("Unresolved"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub target: RoutingTarget,
    pub resolution: RouteResolution,
    pub match_type: Option<MatchType>,
    pub confidence: Option<f64>,
    /// Name of the rule that decided, for rule-router decisions
    pub rule: Option<String>,
    /// Set for every rule-router decision, fallbacks included
    pub decided_by_rule: bool,
    /// True when a default was used instead of a match
    pub fallback: bool,
}

impl RouteResult {
    pub fn none() -> Self {
        Self {
            target: RoutingTarget::None,
            resolution: RouteResolution::Unresolved,
            match_type: None,
            confidence: None,
            rule: None,
            decided_by_rule: false,
            fallback: false,
        }
    }

    fn invoke(target: RoutingTarget, agent: Arc<dyn Agent>) -> Self {
        Self {
            target,
            resolution: RouteResolution::Invoke(agent),
            ..Self::none()
        }
    }

    fn completed(target: RoutingTarget, response: AgentResponse) -> Self {
        Self {
            target,
            resolution: RouteResolution::Completed(response),
            ..Self::none()
        }
    }

    fn with_candidate(mut self, candidate: &IntentCandidate) -> Self {
        self.match_type = Some(candidate.match_type);
        self.confidence = Some(candidate.confidence);
        self
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.resolution, RouteResolution::Unresolved)
    }

    /// Route type used to tag execution failures of this route
    pub fn route_type(&self) -> RouteType {
        if self.decided_by_rule {
            return RouteType::Rule;
        }
        self.target.route_type().unwrap_or(RouteType::Default)
    }

    pub fn agent(&self) -> Option<&Arc<dyn Agent>> {
        match &self.resolution {
            RouteResolution::Invoke(agent) => Some(agent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub conversation_id: Option<String>,
    pub metadata: Metadata,
}

pub struct Router {
    services: DispatchServices,
    default_agent: Option<String>,
}

impl Router {
    pub fn new(services: DispatchServices, default_agent: Option<String>) -> Self {
        Self {
            services,
            default_agent,
        }
    }

    /// Decide where `message` goes
    ///
    /// Fails only when an inline pipeline or intent execution fails, when the
    /// rule router fails, or when the semantic matcher fails.
    pub async fn route(
        &self,
        message: &str,
        previous_messages: &[HistoryEntry],
        options: &RouteOptions,
    ) -> DispatchResult<RouteResult> {
        if self.services.rules.is_some() {
            let result = self
                .traced(STAGE_RULE, message, self.route_by_rule(message, options))
                .await?;
            return Ok(result.unwrap_or_else(RouteResult::none));
        }

        if let Some(result) = self
            .traced(STAGE_AGENT_UTTERANCE, message, self.route_by_agent_utterance(message))
            .await?
        {
            return Ok(result);
        }

        if self.services.pipelines.is_some() {
            if let Some(result) = self
                .traced(
                    STAGE_PIPELINE_UTTERANCE,
                    message,
                    self.route_by_pipeline_utterance(message, previous_messages, options),
                )
                .await?
            {
                return Ok(result);
            }
        }

        if !self.services.intents.is_empty() {
            if let Some(result) = self
                .traced(
                    STAGE_INTENT,
                    message,
                    self.route_by_intent(message, previous_messages, options),
                )
                .await?
            {
                return Ok(result);
            }
        }

        if self.default_agent.is_some() {
            if let Some(result) = self
                .traced(STAGE_DEFAULT, message, self.route_to_default())
                .await?
            {
                return Ok(result);
            }
        }

        info!("No route found for message");
        Ok(RouteResult::none())
    }

    async fn traced<F>(
        &self,
        stage: &str,
        message: &str,
        attempt: F,
    ) -> DispatchResult<Option<RouteResult>>
    where
        F: Future<Output = DispatchResult<Option<RouteResult>>>,
    {
        let mut span = self.services.tracer.start_span(
            stage,
            vec![(
                "message.length".to_string(),
                AttributeValue::from(message.chars().count()),
            )],
        );

        let result = attempt.await;

        match &result {
            Ok(found) => {
                let matched = found.as_ref().is_some_and(RouteResult::is_resolved);
                span.set_attribute("matched", AttributeValue::from(matched));
                if let Some(found) = found {
                    span.set_attribute("route.target", AttributeValue::from(found.target.to_string()));
                }
                span.set_status(SpanStatus::Ok, None);
            }
            Err(e) => {
                span.set_attribute("matched", AttributeValue::from(false));
                span.record_exception(e);
                span.set_status(SpanStatus::Error, Some(&e.to_string()));
            }
        }
        span.end();

        result
    }

    async fn route_by_rule(
        &self,
        message: &str,
        options: &RouteOptions,
    ) -> DispatchResult<Option<RouteResult>> {
        let Some(rules) = &self.services.rules else {
            return Ok(None);
        };

        let decision = rules
            .route(message, &options.metadata)
            .await
            .map_err(|e| DispatchError::route_execution(RouteType::Rule, e))?;

        let Some(decision) = decision else {
            debug!("Rule router made no decision");
            return Ok(Some(RouteResult::none()));
        };

        let Some(agent) = self.services.agents.get_agent_optional(&decision.agent_id).await else {
            warn!(
                agent_id = %decision.agent_id,
                rule = decision.rule.as_deref().unwrap_or("default"),
                "Rule router chose an unknown agent"
            );
            return Ok(Some(RouteResult::none()));
        };

        let target = if decision.fallback {
            RoutingTarget::Default {
                agent_id: decision.agent_id.clone(),
            }
        } else {
            RoutingTarget::Agent {
                agent_id: decision.agent_id.clone(),
            }
        };

        debug!(target = %target, fallback = decision.fallback, "Rule router decided");
        Ok(Some(RouteResult {
            match_type: decision.match_type,
            rule: decision.rule,
            decided_by_rule: true,
            fallback: decision.fallback,
            ..RouteResult::invoke(target, agent)
        }))
    }

    async fn route_by_agent_utterance(&self, message: &str) -> DispatchResult<Option<RouteResult>> {
        let candidate = self
            .services
            .agents
            .match_agent_by_utterance(message, self.services.semantic.as_deref())
            .await?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };

        match self.services.agents.get_agent_optional(&candidate.intent_id).await {
            Some(agent) => Ok(Some(
                RouteResult::invoke(
                    RoutingTarget::Agent {
                        agent_id: candidate.intent_id.clone(),
                    },
                    agent,
                )
                .with_candidate(&candidate),
            )),
            None => {
                debug!(agent_id = %candidate.intent_id, "Utterance matched a missing agent");
                Ok(None)
            }
        }
    }

    async fn route_by_pipeline_utterance(
        &self,
        message: &str,
        previous_messages: &[HistoryEntry],
        options: &RouteOptions,
    ) -> DispatchResult<Option<RouteResult>> {
        let Some(pipelines) = &self.services.pipelines else {
            return Ok(None);
        };

        let Some(candidate) = pipelines
            .match_pipeline_by_utterance(message, self.services.semantic.as_deref())
            .await?
        else {
            return Ok(None);
        };

        let response = self
            .run_pipeline(&candidate.intent_id, message, previous_messages, options, RouteType::Pipeline)
            .await?;

        Ok(Some(
            RouteResult::completed(
                RoutingTarget::Pipeline {
                    pipeline_id: candidate.intent_id.clone(),
                },
                response,
            )
            .with_candidate(&candidate),
        ))
    }

    async fn route_by_intent(
        &self,
        message: &str,
        previous_messages: &[HistoryEntry],
        options: &RouteOptions,
    ) -> DispatchResult<Option<RouteResult>> {
        let intents = &self.services.intents;
        let outcome = IntentMatcher::match_utterances(
            message,
            &intents.utterance_sets(),
            self.services.semantic.as_deref(),
        )
        .await?;

        let Some(candidate) = outcome.winner else {
            return Ok(None);
        };
        let Some(intent) = intents.get(&candidate.intent_id) else {
            return Ok(None);
        };

        let target = RoutingTarget::Intent {
            intent_id: intent.id.clone(),
        };
        debug!(intent_id = %intent.id, action = ?intent.action, "Intent matched");

        let result = match &intent.action {
            IntentAction::Agent { agent_id } => {
                match self.services.agents.get_agent_optional(agent_id).await {
                    Some(agent) => RouteResult::invoke(target, agent),
                    None => {
                        warn!(intent_id = %intent.id, agent_id = %agent_id, "Intent names an unknown agent");
                        return Ok(None);
                    }
                }
            }
            IntentAction::Pipeline { pipeline_id } => {
                let response = self
                    .run_pipeline(pipeline_id, message, previous_messages, options, RouteType::Intent)
                    .await?;
                RouteResult::completed(target, response)
            }
            IntentAction::Reply { content } => {
                RouteResult::completed(target, AgentResponse::text(content.clone()))
            }
            IntentAction::Handler(handler) => {
                let response = handler
                    .handle(message, previous_messages, &options.metadata)
                    .await
                    .map_err(|e| DispatchError::route_execution(RouteType::Intent, e))?;
                RouteResult::completed(target, response)
            }
        };

        Ok(Some(result.with_candidate(&candidate)))
    }

    async fn route_to_default(&self) -> DispatchResult<Option<RouteResult>> {
        let Some(agent_id) = &self.default_agent else {
            return Ok(None);
        };

        match self.services.agents.get_agent_optional(agent_id).await {
            Some(agent) => Ok(Some(RouteResult {
                fallback: true,
                ..RouteResult::invoke(
                    RoutingTarget::Default {
                        agent_id: agent_id.clone(),
                    },
                    agent,
                )
            })),
            None => {
                warn!(agent_id = %agent_id, "Default agent is not registered");
                Ok(None)
            }
        }
    }

    async fn run_pipeline(
        &self,
        pipeline_id: &str,
        message: &str,
        previous_messages: &[HistoryEntry],
        options: &RouteOptions,
        route_type: RouteType,
    ) -> DispatchResult<AgentResponse> {
        let pipelines = self.services.pipelines.as_ref().ok_or_else(|| {
            DispatchError::route_execution(
                route_type,
                format!("No pipeline directory available for '{pipeline_id}'").into(),
            )
        })?;

        let run_options = PipelineRunOptions {
            conversation_id: options.conversation_id.clone(),
            metadata: options.metadata.clone(),
        };

        pipelines
            .execute_pipeline(pipeline_id, message, previous_messages, &run_options)
            .await
            .map_err(|e| DispatchError::route_execution(route_type, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentSettings, InMemoryAgentRegistry, StaticAgent};
    use crate::history::InMemoryHistory;
    use crate::routing::intents::{Intent, IntentSet};
    use crate::routing::rules::PatternRuleRouter;

    fn registry(ids: &[&str]) -> Arc<InMemoryAgentRegistry> {
        let registry = InMemoryAgentRegistry::new();
        for id in ids {
            registry.register(Arc::new(StaticAgent::new(
                *id,
                AgentSettings::default(),
                format!("from {id}"),
            )));
        }
        Arc::new(registry)
    }

    fn services(agents: Arc<InMemoryAgentRegistry>) -> crate::services::DispatchServicesBuilder {
        DispatchServices::builder(agents, Arc::new(InMemoryHistory::new()))
    }

    #[tokio::test]
    async fn test_default_when_nothing_matches() {
        let router = Router::new(
            services(registry(&["general"])).build(),
            Some("general".to_string()),
        );

        let result = router.route("anything", &[], &RouteOptions::default()).await.unwrap();
        assert_eq!(
            result.target,
            RoutingTarget::Default {
                agent_id: "general".to_string()
            }
        );
        assert!(result.fallback);
        assert_eq!(result.route_type(), RouteType::Default);
    }

    #[tokio::test]
    async fn test_none_without_default() {
        let router = Router::new(services(registry(&["general"])).build(), None);
        let result = router.route("anything", &[], &RouteOptions::default()).await.unwrap();
        assert_eq!(result.target, RoutingTarget::None);
        assert!(!result.is_resolved());
    }

    #[tokio::test]
    async fn test_rule_to_missing_agent_is_none_not_default() {
        let rules = PatternRuleRouter::new(Some("general".to_string()))
            .with_rule("help", &["^help".to_string()], &[], "ghost")
            .unwrap();
        let router = Router::new(
            services(registry(&["general"]))
                .with_rules(Arc::new(rules))
                .build(),
            Some("general".to_string()),
        );

        let result = router.route("help me", &[], &RouteOptions::default()).await.unwrap();
        assert_eq!(result.target, RoutingTarget::None);
    }

    #[tokio::test]
    async fn test_reply_intent_completes_inline() {
        let intents = IntentSet::new().with_intent(Intent::new(
            "greeting",
            vec!["hello".to_string()],
            IntentAction::Reply {
                content: "Hi there!".to_string(),
            },
        ));
        let router = Router::new(
            services(registry(&[])).with_intents(intents).build(),
            None,
        );

        let result = router.route("Hello", &[], &RouteOptions::default()).await.unwrap();
        assert_eq!(
            result.target,
            RoutingTarget::Intent {
                intent_id: "greeting".to_string()
            }
        );
        assert_eq!(result.match_type, Some(MatchType::Exact));
        match result.resolution {
            RouteResolution::Completed(response) => assert_eq!(response.content, "Hi there!"),
            other => panic!("expected inline completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_intent_with_missing_agent_falls_to_default() {
        let intents = IntentSet::new().with_intent(Intent::new(
            "billing",
            vec!["invoice".to_string()],
            IntentAction::Agent {
                agent_id: "ghost".to_string(),
            },
        ));
        let router = Router::new(
            services(registry(&["general"])).with_intents(intents).build(),
            Some("general".to_string()),
        );

        let result = router.route("invoice", &[], &RouteOptions::default()).await.unwrap();
        assert!(matches!(result.target, RoutingTarget::Default { .. }));
    }

    #[test]
    fn test_target_serialization_is_tagged() {
        let value = serde_json::to_value(RoutingTarget::Agent {
            agent_id: "a".to_string(),
        })
        .unwrap();
        assert_eq!(value["type"], "agent");
        assert_eq!(value["agent_id"], "a");
        assert_eq!(
            serde_json::to_value(RoutingTarget::None).unwrap()["type"],
            "none"
        );
        assert_eq!(
            RoutingTarget::Pipeline {
                pipeline_id: "p".to_string()
            }
            .to_string(),
            "pipeline:p"
        );
    }
}
