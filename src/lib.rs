//! Agent Dispatch
//!
//! Routes an incoming conversational message to the right handler (an agent,
//! a pipeline or an intent), executes it and follows handoffs between agents
//! through a bounded chain, producing either a single response or one ordered
//! event stream. It also decides what of each exchange is written to
//! conversation history.
//!
//! # Overview
//!
//! - [`routing`]: hybrid utterance matching, rules, intents and the router
//! - [`agent`]: the agent contract, registry and executor
//! - [`handoff`]: the bounded handoff loop
//! - [`stream`]: the event vocabulary and stream synthesizer
//! - [`history`]: conversation entries and the persistence policy
//! - [`dispatcher`]: the top-level entry point
//!
//! # Quick Start
//!
//! ```rust
//! use agent_dispatch::config::DispatchConfig;
//! use agent_dispatch::dispatcher::{Dispatcher, ProcessOptions};
//!
//! # tokio_test::block_on(async {
//! let config = DispatchConfig::from_toml_str(r#"
//! [dispatch]
//! default_agent = "general"
//!
//! [[agents]]
//! id = "general"
//! reply = "How can I help?"
//! "#).unwrap();
//!
//! let dispatcher = Dispatcher::from_config(&config).unwrap();
//! let outcome = dispatcher
//!     .process("hello there", ProcessOptions::default())
//!     .await
//!     .unwrap();
//!
//! assert_eq!(outcome.response.content, "How can I help?");
//! assert!(outcome.fallback);
//! # });
//! ```

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handoff;
pub mod history;
pub mod observability;
pub mod pipeline;
pub mod routing;
pub mod services;
pub mod stream;
pub mod testing;

/// Free-form request metadata handed to rule routers, pipelines and agents
pub type Metadata = serde_json::Map<String, serde_json::Value>;

pub use agent::{Agent, AgentResponse, HandoffRequest, ToolCall, ToolCallError};
pub use config::{ConfigError, DispatchConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher, ProcessOptions};
pub use error::{BoxError, DispatchError, DispatchResult, ErrorCode, RouteType};
pub use history::{ConversationHistory, HistoryEntry, ToolOutcomeRecord};
pub use routing::{MatchType, RoutingTarget};
pub use services::DispatchServices;
pub use stream::{EventStream, StreamEvent, StreamEventKind};
