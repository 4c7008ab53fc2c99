//! Handoff chain tests
//!
//! Follows agent-to-agent transfers through the dispatcher and checks the
//! final response, chain bookkeeping and what each hop writes to history.


use agent_dispatch::agent::{AgentResponse, AgentSettings, HandoffRequest};
use agent_dispatch::dispatcher::ProcessOptions;
use agent_dispatch::error::DispatchError;
use agent_dispatch::history::MessageRole;
use agent_dispatch::testing::{FailingAgent, MockPipelines, ScriptedAgent};
use agent_dispatch::RoutingTarget;
use serde_json::json;
use std::sync::Arc;
use test_helpers::TestRig;

fn texts(entries: &[agent_dispatch::HistoryEntry]) -> Vec<(MessageRole, String)> {
    entries
        .iter()
        .map(|entry| (entry.role, entry.text().unwrap_or_default().to_string()))
        .collect()
}

#[tokio::test]
async fn test_single_handoff_returns_target_response() {
    let rig = TestRig::new(vec![]);
    rig.agents.register(Arc::new(ScriptedAgent::new("a").with_response(
        AgentResponse::text("passing you along").with_handoff(HandoffRequest::to("b").with_message("continue")),
    )));
    rig.agents.register(Arc::new(ScriptedAgent::new("b").replying("done")));
    let dispatcher = rig.dispatcher(Some("a"));

    let outcome = dispatcher
        .process("start", ProcessOptions::default().with_conversation_id("conv-1"))
        .await
        .unwrap();

    assert_eq!(outcome.response.content, "done");
    assert_eq!(outcome.handoff_depth, 1);
    assert_eq!(outcome.final_agent_id.as_deref(), Some("b"));
    assert_eq!(outcome.handoff_chain.len(), 1);
    assert_eq!(outcome.handoff_chain[0].from_agent_id, "a");
    assert_eq!(outcome.handoff_chain[0].to_agent_id, "b");
    assert_eq!(outcome.handoff_chain[0].message, "continue");

    assert_eq!(
        texts(&rig.history_of("conv-1").await),
        vec![
            (MessageRole::User, "start".to_string()),
            (MessageRole::Assistant, "passing you along".to_string()),
            (MessageRole::User, "continue".to_string()),
            (MessageRole::Assistant, "done".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_ping_pong_stops_at_depth_limit() {
    let rig = TestRig::new(vec![]);
    let a = Arc::new(ScriptedAgent::new("a").with_response(
        AgentResponse::text("to b").with_handoff(HandoffRequest::to("b")),
    ));
    let b = Arc::new(ScriptedAgent::new("b").with_response(
        AgentResponse::text("to a").with_handoff(HandoffRequest::to("a")),
    ));
    rig.agents.register(a.clone());
    rig.agents.register(b.clone());
    let dispatcher = rig.dispatcher(Some("a"));

    let outcome = dispatcher
        .process("ping", ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.handoff_depth, 10);
    assert_eq!(outcome.handoff_chain.len(), 10);
    assert_eq!(outcome.final_agent_id.as_deref(), Some("a"));
    assert_eq!(outcome.response.content, "to b");
    assert!(outcome.response.handoff.is_some());

    // One routed call plus ten hops
    assert_eq!(a.call_count().await + b.call_count().await, 11);
    for (index, hop) in outcome.handoff_chain.iter().enumerate() {
        assert_eq!(hop.depth, index + 1);
        // Without a replacement message every hop carries the original
        assert_eq!(hop.message, "ping");
    }
}

#[tokio::test]
async fn test_handoff_to_unknown_agent_keeps_last_response() {
    let rig = TestRig::new(vec![]);
    rig.agents.register(Arc::new(ScriptedAgent::new("a").with_response(
        AgentResponse::text("try ghost").with_handoff(HandoffRequest::to("ghost")),
    )));
    let dispatcher = rig.dispatcher(Some("a"));

    let outcome = dispatcher
        .process("hello", ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.response.content, "try ghost");
    assert_eq!(outcome.handoff_depth, 0);
    assert!(outcome.handoff_chain.is_empty());
    assert_eq!(outcome.final_agent_id.as_deref(), Some("a"));
}

#[tokio::test]
async fn test_failing_target_is_reported_as_handoff_error() {
    let rig = TestRig::new(vec![]);
    rig.agents.register(Arc::new(ScriptedAgent::new("a").with_response(
        AgentResponse::text("over to b").with_handoff(HandoffRequest::to("b")),
    )));
    rig.agents.register(Arc::new(FailingAgent::new("b", "model unavailable")));
    let dispatcher = rig.dispatcher(Some("a"));

    let err = dispatcher
        .process("hello", ProcessOptions::default())
        .await
        .unwrap_err();

    match err {
        DispatchError::Handoff {
            from_agent_id,
            to_agent_id,
            depth,
            source,
        } => {
            assert_eq!(from_agent_id, "a");
            assert_eq!(to_agent_id, "b");
            assert_eq!(depth, 1);
            assert!(source.to_string().contains("model unavailable"));
        }
        other => panic!("expected handoff error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handoff_context_is_appended_to_original_message() {
    let rig = TestRig::new(vec![]);
    rig.agents.register(Arc::new(ScriptedAgent::new("a").with_response(
        AgentResponse::text("").with_handoff(HandoffRequest::to("b").with_context(json!({"order": 42}))),
    )));
    let b = Arc::new(ScriptedAgent::new("b").replying("found it"));
    rig.agents.register(b.clone());
    let dispatcher = rig.dispatcher(Some("a"));

    dispatcher
        .process("where is my order", ProcessOptions::default())
        .await
        .unwrap();

    let inputs = b.inputs().await;
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].message, "where is my order\n\nContext: {\"order\":42}");
}

#[tokio::test]
async fn test_sequential_visibility_controls_prior_turns() {
    let rig = TestRig::new(vec![]);
    rig.agents.register(Arc::new(ScriptedAgent::new("a").with_response(
        AgentResponse::text("first").with_handoff(HandoffRequest::to("b")),
    )));
    let b = Arc::new(ScriptedAgent::new("b").replying("second").with_response(
        AgentResponse::text("handing to c").with_handoff(HandoffRequest::to("c")),
    ));
    let c = Arc::new(ScriptedAgent::new("c").replying("third").with_settings(AgentSettings {
        sequential_visibility: false,
        ..AgentSettings::default()
    }));
    rig.agents.register(b.clone());
    rig.agents.register(c.clone());
    let dispatcher = rig.dispatcher(Some("a"));

    let outcome = dispatcher
        .process("go", ProcessOptions::default())
        .await
        .unwrap();
    // b's first scripted reply has no handoff, so the chain stops there
    assert_eq!(outcome.response.content, "second");
    assert_eq!(outcome.final_agent_id.as_deref(), Some("b"));

    // b sees the user turn and a's reply
    let b_inputs = b.inputs().await;
    assert_eq!(b_inputs[0].history.len(), 2);

    let outcome = dispatcher
        .process(
            "again",
            ProcessOptions::default().with_conversation_id(outcome.conversation_id),
        )
        .await
        .unwrap();
    assert_eq!(outcome.response.content, "third");
    assert_eq!(outcome.final_agent_id.as_deref(), Some("c"));
    assert!(c.inputs().await[0].history.is_empty());
}

#[tokio::test]
async fn test_pipeline_response_can_hand_off() {
    let rig = TestRig::new(vec![]);
    rig.agents.register(Arc::new(ScriptedAgent::new("writer").replying("summary written")));
    let pipelines = MockPipelines::new().with_pipeline(
        "research",
        &["^research"],
        AgentResponse::text("notes").with_handoff(HandoffRequest::to("writer").with_message("summarize the notes")),
    );
    let dispatcher = rig.dispatcher_with(
        rig.services().with_pipelines(Arc::new(pipelines)).build(),
        None,
    );

    let outcome = dispatcher
        .process("research tokio", ProcessOptions::default().with_conversation_id("conv-p"))
        .await
        .unwrap();

    assert_eq!(
        outcome.route,
        RoutingTarget::Pipeline {
            pipeline_id: "research".to_string()
        }
    );
    assert_eq!(outcome.response.content, "summary written");
    assert_eq!(outcome.handoff_chain[0].from_agent_id, "research");
    assert_eq!(outcome.final_agent_id.as_deref(), Some("writer"));

    assert_eq!(
        texts(&rig.history_of("conv-p").await),
        vec![
            (MessageRole::User, "research tokio".to_string()),
            (MessageRole::Assistant, "notes".to_string()),
            (MessageRole::User, "summarize the notes".to_string()),
            (MessageRole::Assistant, "summary written".to_string()),
        ]
    );
}
