//! Mock implementations for testing
//!
//! Provides scripted agents, a pipeline directory, a recording tracer and
//! semantic matchers so routing and handoff behaviour can be exercised
//! without real models or stores.

use crate::agent::response::AgentResponse;
use crate::agent::{Agent, AgentEventStream, AgentInput, AgentSettings, AgentStreamEvent};
use crate::error::{BoxError, DispatchResult};
use crate::history::HistoryEntry;
use crate::observability::{AttributeValue, RouteSpan, SpanStatus, Tracer};
use crate::pipeline::{PipelineDescriptor, PipelineDirectory, PipelineRunOptions};
use crate::routing::matcher::{IntentCandidate, IntentMatcher, SemanticMatcher, UtteranceSet};
use async_trait::async_trait;
use futures::stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

/// Agent answering from a queue of responses; the last one repeats
#[derive(Debug)]
pub struct ScriptedAgent {
    id: String,
    settings: AgentSettings,
    responses: Mutex<VecDeque<AgentResponse>>,
    last: Mutex<Option<AgentResponse>>,
    pub inputs: Arc<Mutex<Vec<AgentInput>>>,
}

impl ScriptedAgent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            settings: AgentSettings::default(),
            responses: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_utterances(mut self, utterances: &[&str]) -> Self {
        self.settings.utterances = utterances.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn with_response(mut self, response: AgentResponse) -> Self {
        self.responses.get_mut().push_back(response);
        self
    }

    pub fn replying(self, content: &str) -> Self {
        self.with_response(AgentResponse::text(content))
    }

    pub async fn inputs(&self) -> Vec<AgentInput> {
        self.inputs.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.inputs.lock().await.len()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    async fn generate(&self, input: AgentInput) -> Result<AgentResponse, BoxError> {
        self.inputs.lock().await.push(input);

        let next = self.responses.lock().await.pop_front();
        let mut last = self.last.lock().await;
        match next {
            Some(response) => {
                *last = Some(response.clone());
                Ok(response)
            }
            None => Ok(last
                .clone()
                .unwrap_or_else(|| AgentResponse::text(format!("{} has nothing to say", self.id)))),
        }
    }
}

/// Agent that streams scripted native events, one script per call
#[derive(Debug)]
pub struct StreamingScriptedAgent {
    id: String,
    settings: AgentSettings,
    scripts: StdMutex<VecDeque<Vec<Result<AgentStreamEvent, String>>>>,
    pub inputs: Arc<Mutex<Vec<AgentInput>>>,
}

impl StreamingScriptedAgent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            settings: AgentSettings::default(),
            scripts: StdMutex::new(VecDeque::new()),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_stream(self, events: Vec<AgentStreamEvent>) -> Self {
        self.push_script(events.into_iter().map(Ok).collect());
        self
    }

    /// Script that emits `events` and then fails with `message`
    pub fn with_failing_stream(self, events: Vec<AgentStreamEvent>, message: &str) -> Self {
        let mut script: Vec<_> = events.into_iter().map(Ok).collect();
        script.push(Err(message.to_string()));
        self.push_script(script);
        self
    }

    fn push_script(&self, script: Vec<Result<AgentStreamEvent, String>>) {
        self.scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(script);
    }

    pub async fn inputs(&self) -> Vec<AgentInput> {
        self.inputs.lock().await.clone()
    }
}

#[async_trait]
impl Agent for StreamingScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    async fn generate(&self, _input: AgentInput) -> Result<AgentResponse, BoxError> {
        Err(format!("{} only streams", self.id).into())
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn stream(&self, input: AgentInput) -> Result<AgentEventStream, BoxError> {
        self.inputs.lock().await.push(input);
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| format!("{} has no stream scripted", self.id))?;

        Ok(Box::pin(stream::iter(
            script
                .into_iter()
                .map(|item| item.map_err(BoxError::from)),
        )))
    }
}

/// Agent whose every call fails
#[derive(Debug)]
pub struct FailingAgent {
    id: String,
    settings: AgentSettings,
    message: String,
}

impl FailingAgent {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            settings: AgentSettings::default(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Agent for FailingAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    async fn generate(&self, _input: AgentInput) -> Result<AgentResponse, BoxError> {
        Err(self.message.clone().into())
    }
}

/// One recorded pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineExecution {
    pub pipeline_id: String,
    pub message: String,
    pub history_len: usize,
}

/// Pipeline directory with canned outcomes
#[derive(Debug, Default)]
pub struct MockPipelines {
    pipelines: Vec<(PipelineDescriptor, Result<AgentResponse, String>)>,
    pub executions: Arc<Mutex<Vec<PipelineExecution>>>,
}

impl MockPipelines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, id: &str, utterances: &[&str], response: AgentResponse) -> Self {
        self.pipelines.push((
            PipelineDescriptor::new(id, utterances.iter().map(|u| u.to_string()).collect()),
            Ok(response),
        ));
        self
    }

    pub fn with_failing_pipeline(mut self, id: &str, utterances: &[&str], message: &str) -> Self {
        self.pipelines.push((
            PipelineDescriptor::new(id, utterances.iter().map(|u| u.to_string()).collect()),
            Err(message.to_string()),
        ));
        self
    }

    pub async fn executions(&self) -> Vec<PipelineExecution> {
        self.executions.lock().await.clone()
    }
}

#[async_trait]
impl PipelineDirectory for MockPipelines {
    fn contains_pipeline(&self, pipeline_id: &str) -> bool {
        self.pipelines.iter().any(|(d, _)| d.id == pipeline_id)
    }

    async fn match_pipeline_by_utterance(
        &self,
        message: &str,
        semantic: Option<&dyn SemanticMatcher>,
    ) -> DispatchResult<Option<IntentCandidate>> {
        let sets: Vec<UtteranceSet> = self
            .pipelines
            .iter()
            .map(|(descriptor, _)| UtteranceSet::new(&descriptor.id, descriptor.utterances.clone()))
            .collect();
        Ok(IntentMatcher::match_utterances(message, &sets, semantic)
            .await?
            .winner)
    }

    async fn execute_pipeline(
        &self,
        pipeline_id: &str,
        message: &str,
        history: &[HistoryEntry],
        _options: &PipelineRunOptions,
    ) -> Result<AgentResponse, BoxError> {
        self.executions.lock().await.push(PipelineExecution {
            pipeline_id: pipeline_id.to_string(),
            message: message.to_string(),
            history_len: history.len(),
        });

        match self.pipelines.iter().find(|(d, _)| d.id == pipeline_id) {
            Some((_, Ok(response))) => Ok(response.clone()),
            Some((_, Err(message))) => Err(message.clone().into()),
            None => Err(format!("Pipeline '{pipeline_id}' is not registered").into()),
        }
    }
}

/// Span as seen by the recording tracer once ended
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSpan {
    pub name: String,
    pub attributes: Vec<(String, AttributeValue)>,
    pub status: SpanStatus,
    pub exceptions: Vec<String>,
}

impl RecordedSpan {
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Tracer keeping every ended span
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    spans: Arc<StdMutex<Vec<RecordedSpan>>>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<RecordedSpan> {
        self.spans
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn span_names(&self) -> Vec<String> {
        self.spans().into_iter().map(|span| span.name).collect()
    }
}

struct RecordingSpan {
    record: RecordedSpan,
    sink: Arc<StdMutex<Vec<RecordedSpan>>>,
}

impl RouteSpan for RecordingSpan {
    fn set_attribute(&mut self, key: &str, value: AttributeValue) {
        self.record.attributes.push((key.to_string(), value));
    }

    fn set_status(&mut self, status: SpanStatus, _description: Option<&str>) {
        self.record.status = status;
    }

    fn record_exception(&mut self, error: &(dyn std::error::Error + 'static)) {
        self.record.exceptions.push(error.to_string());
    }

    fn end(self: Box<Self>) {
        self.sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(self.record);
    }
}

impl Tracer for RecordingTracer {
    fn start_span(
        &self,
        name: &str,
        attributes: Vec<(String, AttributeValue)>,
    ) -> Box<dyn RouteSpan> {
        Box::new(RecordingSpan {
            record: RecordedSpan {
                name: name.to_string(),
                attributes,
                status: SpanStatus::Unset,
                exceptions: Vec::new(),
            },
            sink: self.spans.clone(),
        })
    }
}

/// Scores `confidence` when message and utterance share a word of 4+ letters
#[derive(Debug, Clone, Copy)]
pub struct KeywordSemanticMatcher {
    pub confidence: f64,
}

impl KeywordSemanticMatcher {
    pub fn new(confidence: f64) -> Self {
        Self { confidence }
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl SemanticMatcher for KeywordSemanticMatcher {
    async fn score(&self, message: &str, utterance: &str) -> Result<Option<f64>, BoxError> {
        let message_words = words(message);
        let shared = words(utterance).iter().any(|w| message_words.contains(w));
        Ok(shared.then_some(self.confidence))
    }
}

/// Semantic matcher whose backend is always down
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSemanticMatcher;

#[async_trait]
impl SemanticMatcher for FailingSemanticMatcher {
    async fn score(&self, _message: &str, _utterance: &str) -> Result<Option<f64>, BoxError> {
        Err("semantic backend unavailable".into())
    }
}
