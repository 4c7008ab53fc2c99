//! Routing
//!
//! - [`matcher`]: hybrid exact/regex/semantic utterance matching
//! - [`intents`]: the global intent set and its actions
//! - [`rules`]: the rule-router contract and a regex/keyword rule engine
//! - [`router`]: the layered decision procedure tying them together

pub mod intents;
pub mod matcher;
pub mod router;
pub mod rules;

pub use intents::{Intent, IntentAction, IntentHandler, IntentSet};
pub use matcher::{IntentCandidate, IntentMatcher, MatchOutcome, MatchType, SemanticMatcher, UtteranceSet};
pub use router::{RouteOptions, RouteResolution, RouteResult, Router, RoutingTarget};
pub use rules::{PatternRuleRouter, RuleDecision, RuleRouter};
