//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading a dispatch configuration
//! from disk and building a dispatcher from it.

use agent_dispatch::agent::AgentResponse;
use agent_dispatch::config::{ConfigError, DispatchConfig, IntentActionConfig};
use agent_dispatch::dispatcher::{Dispatcher, ProcessOptions};
use agent_dispatch::routing::MatchType;
use agent_dispatch::testing::MockPipelines;
use agent_dispatch::{DispatchError, RoutingTarget};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

const SUPPORT_DESK: &str = r#"
[dispatch]
default_agent = "general"
max_handoff_depth = 3

[[agents]]
id = "general"
description = "Catch-all assistant"
reply = "How can I help?"

[[agents]]
id = "help-agent"
utterances = ["password reset"]
reply = "Let me find the right person."
handoff_to = "general"

[rules]
default_agent = "general"

[[rules.rules]]
name = "help"
patterns = ["^help"]
keywords = ["assist"]
agent = "help-agent"

[[intents]]
id = "greeting"
utterances = ["hello"]
action = { type = "reply", content = "Hello!" }
"#;

const BILLING_DESK: &str = r#"
[dispatch]
default_agent = "general"

[[agents]]
id = "general"
reply = "How can I help?"

[[intents]]
id = "billing"
utterances = ["invoice"]
action = { type = "pipeline", pipeline_id = "billing-flow" }
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_file() {
    let file = write_config(SUPPORT_DESK);
    let config = DispatchConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.dispatch.default_agent.as_deref(), Some("general"));
    assert_eq!(config.dispatch.max_handoff_depth, 3);
    assert_eq!(config.agents.len(), 2);
    assert_eq!(config.agent("help-agent").unwrap().utterances, vec!["password reset"]);
    assert_eq!(config.rules.as_ref().unwrap().rules[0].agent, "help-agent");
    assert_eq!(
        config.intents[0].action,
        IntentActionConfig::Reply {
            content: "Hello!".to_string()
        }
    );
}

#[test]
fn test_missing_file_is_read_error() {
    let err = DispatchConfig::load_from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::FileRead(_)));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let file = write_config("[[agents]\nid = ");
    let err = DispatchConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::TomlParse(_)));
}

#[test]
fn test_rule_referencing_unknown_agent_is_rejected() {
    let file = write_config(
        r#"
[[agents]]
id = "general"

[rules]
[[rules.rules]]
name = "billing"
keywords = ["invoice"]
agent = "billing"
"#,
    );
    let err = DispatchConfig::load_from_file(file.path()).unwrap_err();
    match err {
        ConfigError::InvalidConfig(message) => {
            assert!(message.contains("billing"), "{message}")
        }
        other => panic!("expected invalid config, got {other:?}"),
    }
}

#[test]
fn test_invalid_agent_id_is_rejected() {
    let file = write_config("[[agents]]\nid = \"has spaces\"\n");
    let err = DispatchConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidAgentId(_)));
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = DispatchConfig::from_toml_str(SUPPORT_DESK).unwrap();
    let rendered = toml::to_string_pretty(&config).unwrap();
    assert_eq!(DispatchConfig::from_toml_str(&rendered).unwrap(), config);
}

#[tokio::test]
async fn test_dispatcher_from_loaded_config_uses_rules() {
    let file = write_config(SUPPORT_DESK);
    let config = DispatchConfig::load_from_file(file.path()).unwrap();
    let dispatcher = Dispatcher::from_config(&config).unwrap();

    let outcome = dispatcher
        .process("help with my account", ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(
        outcome.route,
        RoutingTarget::Agent {
            agent_id: "help-agent".to_string()
        }
    );
    assert_eq!(outcome.match_type, Some(MatchType::Regex));
    // help-agent hands off to general after replying
    assert_eq!(outcome.response.content, "How can I help?");
    assert_eq!(outcome.final_agent_id.as_deref(), Some("general"));
    assert_eq!(outcome.handoff_depth, 1);

    let fallback = dispatcher
        .process("what's the weather", ProcessOptions::default())
        .await
        .unwrap();
    assert!(fallback.fallback);
    assert_eq!(
        fallback.route,
        RoutingTarget::Default {
            agent_id: "general".to_string()
        }
    );
}

#[test]
fn test_pipeline_intent_needs_pipeline_directory() {
    let config = DispatchConfig::from_toml_str(BILLING_DESK).unwrap();

    let err = Dispatcher::from_config(&config).err().unwrap();
    match err {
        DispatchError::Config(ConfigError::InvalidConfig(msg)) => {
            assert!(msg.contains("billing"));
            assert!(msg.contains("billing-flow"));
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn test_pipeline_intent_must_name_known_pipeline() {
    let config = DispatchConfig::from_toml_str(BILLING_DESK).unwrap();
    let pipelines = MockPipelines::new().with_pipeline("refunds", &[], AgentResponse::text("x"));

    let err = Dispatcher::from_config_with_pipelines(&config, Arc::new(pipelines))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        DispatchError::Config(ConfigError::InvalidConfig(msg)) if msg.contains("billing-flow")
    ));
}

#[tokio::test]
async fn test_pipeline_intent_runs_through_directory() {
    let config = DispatchConfig::from_toml_str(BILLING_DESK).unwrap();
    let pipelines = Arc::new(MockPipelines::new().with_pipeline(
        "billing-flow",
        &["^refund"],
        AgentResponse::text("Your invoice is on its way."),
    ));
    let dispatcher = Dispatcher::from_config_with_pipelines(&config, pipelines.clone()).unwrap();

    let outcome = dispatcher
        .process("invoice", ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(
        outcome.route,
        RoutingTarget::Intent {
            intent_id: "billing".to_string()
        }
    );
    assert_eq!(outcome.response.content, "Your invoice is on its way.");
    let executions = pipelines.executions().await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].pipeline_id, "billing-flow");
}
