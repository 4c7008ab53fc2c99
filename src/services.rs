//! Collaborators shared by the router, executor and handoff loop
//!
//! Optional services are plain `Option` fields; routing stages whose service
//! is absent are skipped.

use crate::agent::AgentDirectory;
use crate::history::ConversationHistory;
use crate::observability::{Tracer, TracingTracer};
use crate::pipeline::PipelineDirectory;
use crate::routing::intents::IntentSet;
use crate::routing::matcher::SemanticMatcher;
use crate::routing::rules::RuleRouter;
use std::sync::Arc;

#[derive(Clone)]
pub struct DispatchServices {
    pub agents: Arc<dyn AgentDirectory>,
    pub history: Arc<dyn ConversationHistory>,
    pub pipelines: Option<Arc<dyn PipelineDirectory>>,
    pub rules: Option<Arc<dyn RuleRouter>>,
    pub intents: Arc<IntentSet>,
    pub semantic: Option<Arc<dyn SemanticMatcher>>,
    pub tracer: Arc<dyn Tracer>,
}

impl DispatchServices {
    pub fn builder(
        agents: Arc<dyn AgentDirectory>,
        history: Arc<dyn ConversationHistory>,
    ) -> DispatchServicesBuilder {
        DispatchServicesBuilder {
            services: DispatchServices {
                agents,
                history,
                pipelines: None,
                rules: None,
                intents: Arc::new(IntentSet::new()),
                semantic: None,
                tracer: Arc::new(TracingTracer),
            },
        }
    }
}

pub struct DispatchServicesBuilder {
    services: DispatchServices,
}

impl DispatchServicesBuilder {
    pub fn with_pipelines(mut self, pipelines: Arc<dyn PipelineDirectory>) -> Self {
        self.services.pipelines = Some(pipelines);
        self
    }

    pub fn with_rules(mut self, rules: Arc<dyn RuleRouter>) -> Self {
        self.services.rules = Some(rules);
        self
    }

    pub fn with_intents(mut self, intents: IntentSet) -> Self {
        self.services.intents = Arc::new(intents);
        self
    }

    pub fn with_semantic_matcher(mut self, semantic: Arc<dyn SemanticMatcher>) -> Self {
        self.services.semantic = Some(semantic);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.services.tracer = tracer;
        self
    }

    pub fn build(self) -> DispatchServices {
        self.services
    }
}
