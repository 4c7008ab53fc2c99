//! Pipelines: multi-step execution units invoked by id
//!
//! Pipelines run inline during routing and never reach the executor. This
//! module only carries the lookup contract and a registry of runners; what a
//! pipeline does internally belongs to its runner.

use crate::agent::response::AgentResponse;
use crate::error::{BoxError, DispatchResult};
use crate::history::HistoryEntry;
use crate::routing::matcher::{IntentCandidate, IntentMatcher, SemanticMatcher, UtteranceSet};
use crate::Metadata;
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescriptor {
    pub id: String,
    pub description: String,
    pub utterances: Vec<String>,
}

impl PipelineDescriptor {
    pub fn new(id: impl Into<String>, utterances: Vec<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            utterances,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineRunOptions {
    pub conversation_id: Option<String>,
    pub metadata: Metadata,
}

/// Pipeline lookup and execution contract
#[async_trait]
pub trait PipelineDirectory: Send + Sync {
    fn contains_pipeline(&self, pipeline_id: &str) -> bool;

    async fn match_pipeline_by_utterance(
        &self,
        message: &str,
        semantic: Option<&dyn SemanticMatcher>,
    ) -> DispatchResult<Option<IntentCandidate>>;

    async fn execute_pipeline(
        &self,
        pipeline_id: &str,
        message: &str,
        history: &[HistoryEntry],
        options: &PipelineRunOptions,
    ) -> Result<AgentResponse, BoxError>;
}

/// Body of one pipeline
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(
        &self,
        message: &str,
        history: &[HistoryEntry],
        options: &PipelineRunOptions,
    ) -> Result<AgentResponse, BoxError>;
}

struct RegisteredPipeline {
    descriptor: PipelineDescriptor,
    runner: Arc<dyn PipelineRunner>,
}

/// In-memory pipeline directory
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: RwLock<Vec<RegisteredPipeline>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: PipelineDescriptor, runner: Arc<dyn PipelineRunner>) {
        let mut pipelines = self.pipelines.write().unwrap_or_else(PoisonError::into_inner);
        pipelines.retain(|p| p.descriptor.id != descriptor.id);
        info!(pipeline_id = %descriptor.id, "Registered pipeline");
        pipelines.push(RegisteredPipeline { descriptor, runner });
    }

    pub fn with_pipeline(
        self,
        descriptor: PipelineDescriptor,
        runner: Arc<dyn PipelineRunner>,
    ) -> Self {
        self.register(descriptor, runner);
        self
    }

    pub fn descriptors(&self) -> Vec<PipelineDescriptor> {
        let pipelines = self.pipelines.read().unwrap_or_else(PoisonError::into_inner);
        pipelines.iter().map(|p| p.descriptor.clone()).collect()
    }

    fn runner(&self, pipeline_id: &str) -> Option<Arc<dyn PipelineRunner>> {
        let pipelines = self.pipelines.read().unwrap_or_else(PoisonError::into_inner);
        pipelines
            .iter()
            .find(|p| p.descriptor.id == pipeline_id)
            .map(|p| p.runner.clone())
    }
}

#[async_trait]
impl PipelineDirectory for PipelineRegistry {
    fn contains_pipeline(&self, pipeline_id: &str) -> bool {
        self.runner(pipeline_id).is_some()
    }

    async fn match_pipeline_by_utterance(
        &self,
        message: &str,
        semantic: Option<&dyn SemanticMatcher>,
    ) -> DispatchResult<Option<IntentCandidate>> {
        let sets: Vec<UtteranceSet> = self
            .descriptors()
            .into_iter()
            .filter(|d| !d.utterances.is_empty())
            .map(|d| UtteranceSet::new(d.id, d.utterances))
            .collect();

        if sets.is_empty() {
            return Ok(None);
        }
        Ok(IntentMatcher::match_utterances(message, &sets, semantic)
            .await?
            .winner)
    }

    async fn execute_pipeline(
        &self,
        pipeline_id: &str,
        message: &str,
        history: &[HistoryEntry],
        options: &PipelineRunOptions,
    ) -> Result<AgentResponse, BoxError> {
        let runner = self
            .runner(pipeline_id)
            .ok_or_else(|| format!("Pipeline '{pipeline_id}' is not registered"))?;

        debug!(pipeline_id = %pipeline_id, history_len = history.len(), "Executing pipeline");
        runner.run(message, history, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl PipelineRunner for Upper {
        async fn run(
            &self,
            message: &str,
            _history: &[HistoryEntry],
            _options: &PipelineRunOptions,
        ) -> Result<AgentResponse, BoxError> {
            Ok(AgentResponse::text(message.to_uppercase()))
        }
    }

    fn registry() -> PipelineRegistry {
        PipelineRegistry::new().with_pipeline(
            PipelineDescriptor::new("shout", vec!["^shout".to_string()])
                .with_description("Upper-cases the message"),
            Arc::new(Upper),
        )
    }

    #[tokio::test]
    async fn test_match_and_execute() {
        let registry = registry();
        let candidate = registry
            .match_pipeline_by_utterance("shout this", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candidate.intent_id, "shout");

        let response = registry
            .execute_pipeline("shout", "shout this", &[], &PipelineRunOptions::default())
            .await
            .unwrap();
        assert_eq!(response.content, "SHOUT THIS");
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_error() {
        let result = registry()
            .execute_pipeline("missing", "x", &[], &PipelineRunOptions::default())
            .await;
        assert!(result.unwrap_err().to_string().contains("missing"));
    }

    #[test]
    fn test_reregister_replaces() {
        let registry = registry();
        registry.register(PipelineDescriptor::new("shout", vec![]), Arc::new(Upper));
        let descriptors = registry.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert!(descriptors[0].utterances.is_empty());
    }
}
