//! Top-level entry point
//!
//! Validates the message and resolves the conversation before anything is
//! written, routes it, executes the chosen target and follows handoffs. Both
//! the single-result and the streamed paths write the same history.

use crate::agent::response::AgentResponse;
use crate::agent::{Executor, InMemoryAgentRegistry, StaticAgent};
use crate::config::{
    ConfigError, DispatchConfig, DispatchSection, IntentActionConfig, DEFAULT_MAX_HANDOFF_DEPTH,
    DEFAULT_MAX_MESSAGE_LENGTH,
};
use crate::error::{DispatchError, DispatchResult, RouteType};
use crate::handoff::{HandoffHop, HandoffOrchestrator};
use crate::history::{HistoryPolicy, InMemoryHistory};
use crate::pipeline::PipelineDirectory;
use crate::routing::intents::IntentSet;
use crate::routing::matcher::MatchType;
use crate::routing::router::{RouteOptions, RouteResolution, RouteResult, Router, RoutingTarget};
use crate::routing::rules::PatternRuleRouter;
use crate::services::DispatchServices;
use crate::stream::{EventStream, HopSource, StreamRequest, StreamSynthesizer};
use crate::Metadata;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, Instrument};

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub conversation_id: Option<String>,
    /// Generate a conversation id when none is given
    pub auto_create_conversation: bool,
    pub metadata: Metadata,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            conversation_id: None,
            auto_create_conversation: true,
            metadata: Metadata::new(),
        }
    }
}

impl ProcessOptions {
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn without_auto_create(mut self) -> Self {
        self.auto_create_conversation = false;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of processing one message
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub conversation_id: String,
    pub route: RoutingTarget,
    pub match_type: Option<MatchType>,
    pub fallback: bool,
    pub response: AgentResponse,
    pub final_agent_id: Option<String>,
    pub handoff_depth: usize,
    pub handoff_chain: Vec<HandoffHop>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub default_agent: Option<String>,
    pub max_message_length: usize,
    pub max_handoff_depth: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            default_agent: None,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            max_handoff_depth: DEFAULT_MAX_HANDOFF_DEPTH,
        }
    }
}

impl From<&DispatchSection> for DispatchSettings {
    fn from(section: &DispatchSection) -> Self {
        Self {
            default_agent: section.default_agent.clone(),
            max_message_length: section.max_message_length,
            max_handoff_depth: section.max_handoff_depth,
        }
    }
}

pub struct Dispatcher {
    services: DispatchServices,
    settings: DispatchSettings,
    router: Router,
    executor: Executor,
    orchestrator: HandoffOrchestrator,
    synthesizer: StreamSynthesizer,
}

impl Dispatcher {
    pub fn new(services: DispatchServices, settings: DispatchSettings) -> Self {
        let executor = Executor::new(HistoryPolicy::new(services.history.clone()));
        let orchestrator = HandoffOrchestrator::new(services.agents.clone(), executor.clone())
            .with_max_depth(settings.max_handoff_depth);
        let synthesizer = StreamSynthesizer::new(executor.clone(), orchestrator.clone());
        let router = Router::new(services.clone(), settings.default_agent.clone());

        Self {
            services,
            settings,
            router,
            executor,
            orchestrator,
            synthesizer,
        }
    }

    /// Dispatcher over config-declared static agents and an in-memory history
    ///
    /// Intents routing to a pipeline need a pipeline directory, so configs
    /// declaring them are rejected here; see [`Dispatcher::from_config_with_pipelines`].
    pub fn from_config(config: &DispatchConfig) -> DispatchResult<Self> {
        if let Some((intent_id, pipeline_id)) = pipeline_intents(config).next() {
            return Err(ConfigError::InvalidConfig(format!(
                "Intent '{intent_id}' runs pipeline '{pipeline_id}' but no pipeline directory was given"
            ))
            .into());
        }
        Self::build_from_config(config, None)
    }

    /// Like [`Dispatcher::from_config`], with pipelines available to routing and intents
    pub fn from_config_with_pipelines(
        config: &DispatchConfig,
        pipelines: Arc<dyn PipelineDirectory>,
    ) -> DispatchResult<Self> {
        for (intent_id, pipeline_id) in pipeline_intents(config) {
            if !pipelines.contains_pipeline(pipeline_id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Intent '{intent_id}' runs unknown pipeline '{pipeline_id}'"
                ))
                .into());
            }
        }
        Self::build_from_config(config, Some(pipelines))
    }

    fn build_from_config(
        config: &DispatchConfig,
        pipelines: Option<Arc<dyn PipelineDirectory>>,
    ) -> DispatchResult<Self> {
        config.validate()?;

        let registry = InMemoryAgentRegistry::new();
        for section in &config.agents {
            registry.register(Arc::new(StaticAgent::from_config(section)));
        }

        let mut builder =
            DispatchServices::builder(Arc::new(registry), Arc::new(InMemoryHistory::new()))
                .with_intents(IntentSet::from_config(&config.intents));
        if let Some(rules) = &config.rules {
            builder = builder.with_rules(Arc::new(PatternRuleRouter::from_config(rules)?));
        }
        if let Some(pipelines) = pipelines {
            builder = builder.with_pipelines(pipelines);
        }

        Ok(Self::new(builder.build(), DispatchSettings::from(&config.dispatch)))
    }

    pub fn services(&self) -> &DispatchServices {
        &self.services
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Route, execute and follow handoffs for one message
    pub async fn process(
        &self,
        message: &str,
        options: ProcessOptions,
    ) -> DispatchResult<DispatchOutcome> {
        self.validate(message)?;
        let conversation_id = self.resolve_conversation(&options).await?;
        let span = crate::route_span!(conversation_id = %conversation_id);

        async {
            let route = self.route(message, &conversation_id, &options).await?;
            let route_type = route.route_type();
            let source_id = route.target.target_id().unwrap_or_default().to_string();

            let (initial, initial_agent_id) = match &route.resolution {
                RouteResolution::Invoke(agent) => {
                    let response = self
                        .executor
                        .execute(agent, message, &conversation_id, &options.metadata, route_type)
                        .await?;
                    (response, Some(agent.id().to_string()))
                }
                RouteResolution::Completed(response) => {
                    self.persist_inline(&conversation_id, message, response).await?;
                    (response.clone(), None)
                }
                RouteResolution::Unresolved => return Err(DispatchError::NoRouteFound),
            };

            let chain = self
                .orchestrator
                .run(
                    initial,
                    &source_id,
                    initial_agent_id,
                    message,
                    &conversation_id,
                    &options.metadata,
                )
                .await?;

            info!(
                route = %route.target,
                final_agent_id = chain.final_agent_id.as_deref().unwrap_or("none"),
                handoff_depth = chain.depth,
                "Message processed"
            );

            Ok(DispatchOutcome {
                conversation_id: conversation_id.clone(),
                route: route.target,
                match_type: route.match_type,
                fallback: route.fallback,
                response: chain.response,
                final_agent_id: chain.final_agent_id,
                handoff_depth: chain.depth,
                handoff_chain: chain.chain,
            })
        }
        .instrument(span)
        .await
    }

    /// Route the message, then stream every hop of the execution
    ///
    /// Validation, conversation and routing failures are returned before the
    /// stream exists; execution failures arrive as the stream's last item.
    pub async fn process_stream(
        &self,
        message: &str,
        options: ProcessOptions,
    ) -> DispatchResult<EventStream> {
        self.validate(message)?;
        let conversation_id = self.resolve_conversation(&options).await?;

        let route = self
            .route(message, &conversation_id, &options)
            .instrument(crate::route_span!(conversation_id = %conversation_id))
            .await?;
        let route_type = route.route_type();

        let initial = match route.resolution {
            RouteResolution::Invoke(agent) => HopSource::Agent {
                agent,
                message: message.to_string(),
                route_type,
            },
            RouteResolution::Completed(response) => {
                self.persist_inline(&conversation_id, message, &response).await?;
                HopSource::Completed {
                    response,
                    source_id: route.target.target_id().unwrap_or_default().to_string(),
                }
            }
            RouteResolution::Unresolved => return Err(DispatchError::NoRouteFound),
        };

        Ok(self.synthesizer.run(StreamRequest {
            conversation_id,
            original_message: message.to_string(),
            metadata: options.metadata,
            initial,
        }))
    }

    /// Send a message straight to `agent_id`, bypassing routing
    pub async fn process_with_agent(
        &self,
        agent_id: &str,
        message: &str,
        options: ProcessOptions,
    ) -> DispatchResult<DispatchOutcome> {
        self.validate(message)?;
        let agent = self
            .services
            .agents
            .get_agent_optional(agent_id)
            .await
            .ok_or_else(|| DispatchError::agent_not_found(agent_id))?;
        let conversation_id = self.resolve_conversation(&options).await?;

        let response = self
            .executor
            .execute(&agent, message, &conversation_id, &options.metadata, RouteType::Agent)
            .await?;
        let chain = self
            .orchestrator
            .run(
                response,
                agent_id,
                Some(agent_id.to_string()),
                message,
                &conversation_id,
                &options.metadata,
            )
            .await?;

        Ok(DispatchOutcome {
            conversation_id,
            route: RoutingTarget::Agent {
                agent_id: agent_id.to_string(),
            },
            match_type: None,
            fallback: false,
            response: chain.response,
            final_agent_id: chain.final_agent_id,
            handoff_depth: chain.depth,
            handoff_chain: chain.chain,
        })
    }

    fn validate(&self, message: &str) -> DispatchResult<()> {
        if message.trim().is_empty() {
            return Err(DispatchError::validation("Message must not be empty"));
        }
        let length = message.chars().count();
        if length > self.settings.max_message_length {
            return Err(DispatchError::validation(format!(
                "Message is {length} characters, limit is {}",
                self.settings.max_message_length
            )));
        }
        Ok(())
    }

    async fn resolve_conversation(&self, options: &ProcessOptions) -> DispatchResult<String> {
        match &options.conversation_id {
            Some(id) if !id.trim().is_empty() => Ok(id.clone()),
            _ if !options.auto_create_conversation => Err(DispatchError::ConversationIdRequired),
            _ => self
                .services
                .history
                .generate_conversation_id()
                .await
                .map_err(DispatchError::history),
        }
    }

    async fn route(
        &self,
        message: &str,
        conversation_id: &str,
        options: &ProcessOptions,
    ) -> DispatchResult<RouteResult> {
        let previous = self.executor.policy().load(conversation_id).await?;
        let route_options = RouteOptions {
            conversation_id: Some(conversation_id.to_string()),
            metadata: options.metadata.clone(),
        };
        self.router.route(message, &previous, &route_options).await
    }

    /// Pipelines and intent actions complete during routing; record that exchange
    async fn persist_inline(
        &self,
        conversation_id: &str,
        message: &str,
        response: &AgentResponse,
    ) -> DispatchResult<()> {
        let policy = self.executor.policy();
        policy.persist_inbound(conversation_id, message, true).await?;
        policy.persist_response(conversation_id, response, None, true).await
    }
}

/// `(intent id, pipeline id)` for every intent that runs a pipeline
fn pipeline_intents(config: &DispatchConfig) -> impl Iterator<Item = (&str, &str)> {
    config.intents.iter().filter_map(|intent| match &intent.action {
        IntentActionConfig::Pipeline { pipeline_id } => {
            Some((intent.id.as_str(), pipeline_id.as_str()))
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ConversationHistory;

    fn dispatcher(toml: &str) -> Dispatcher {
        Dispatcher::from_config(&DispatchConfig::from_toml_str(toml).unwrap()).unwrap()
    }

    const CONFIG: &str = r#"
[dispatch]
default_agent = "general"
max_message_length = 20

[[agents]]
id = "general"
reply = "general here"

[[intents]]
id = "greeting"
utterances = ["hello"]
action = { type = "reply", content = "Hi!" }
"#;

    #[tokio::test]
    async fn test_blank_and_long_messages_rejected() {
        let dispatcher = dispatcher(CONFIG);
        assert!(matches!(
            dispatcher.process("   ", ProcessOptions::default()).await,
            Err(DispatchError::Validation { .. })
        ));
        assert!(matches!(
            dispatcher
                .process(&"x".repeat(21), ProcessOptions::default())
                .await,
            Err(DispatchError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_conversation_id_required_without_auto_create() {
        let dispatcher = dispatcher(CONFIG);
        let result = dispatcher
            .process("hi", ProcessOptions::default().without_auto_create())
            .await;
        assert!(matches!(result, Err(DispatchError::ConversationIdRequired)));
    }

    #[tokio::test]
    async fn test_inline_intent_reply_is_persisted() {
        let dispatcher = dispatcher(CONFIG);
        let outcome = dispatcher
            .process("hello", ProcessOptions::default().with_conversation_id("c1"))
            .await
            .unwrap();

        assert_eq!(outcome.response.content, "Hi!");
        assert_eq!(outcome.final_agent_id, None);
        let entries = dispatcher.services().history.get_history("c1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].text(), Some("Hi!"));
    }

    #[tokio::test]
    async fn test_process_with_unknown_agent() {
        let dispatcher = dispatcher(CONFIG);
        let result = dispatcher
            .process_with_agent("ghost", "hi", ProcessOptions::default())
            .await;
        assert!(matches!(result, Err(DispatchError::AgentNotFound { agent_id }) if agent_id == "ghost"));
    }

    #[test]
    fn test_settings_from_section() {
        let settings = DispatchSettings::from(&DispatchSection::default());
        assert_eq!(settings, DispatchSettings::default());
    }
}
