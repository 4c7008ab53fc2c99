//! Error taxonomy for message dispatch
//!
//! Every failure the dispatcher can surface maps to exactly one variant of
//! [`DispatchError`]. Reaching the handoff depth limit is not an error: it is
//! logged as a warning and the last response is returned.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Boxed error returned by external collaborators (agents, pipelines, stores)
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which routing path produced a failing execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    Agent,
    Default,
    Pipeline,
    Intent,
    Rule,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::Agent => "agent",
            RouteType::Default => "default",
            RouteType::Pipeline => "pipeline",
            RouteType::Intent => "intent",
            RouteType::Rule => "rule",
        }
    }
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for dispatch operations
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("No route found for message")]
    NoRouteFound,

    #[error("Route execution failed ({route_type}): {source}")]
    RouteExecution {
        route_type: RouteType,
        #[source]
        source: BoxError,
    },

    #[error("Handoff from '{from_agent_id}' to '{to_agent_id}' failed at depth {depth}: {source}")]
    Handoff {
        from_agent_id: String,
        to_agent_id: String,
        depth: usize,
        #[source]
        source: Box<DispatchError>,
    },

    #[error("Conversation id is required")]
    ConversationIdRequired,

    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    #[error("Intent matching failed: {source}")]
    Matching {
        #[source]
        source: BoxError,
    },

    #[error("Conversation history error: {source}")]
    History {
        #[source]
        source: BoxError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Stable, wire-facing error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationFailed,
    NoRouteFound,
    RouteExecutionFailed,
    HandoffFailed,
    ConversationIdRequired,
    AgentNotFound,
    MatchingFailed,
    HistoryUnavailable,
    ConfigurationError,
}

/// Sanitized error payload for outward adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_type: Option<RouteType>,
}

impl DispatchError {
    /// Map to a stable code plus a message safe to show outside the process
    pub fn to_error_details(&self) -> ErrorDetails {
        let code = self.code();
        let route_type = match self {
            DispatchError::RouteExecution { route_type, .. } => Some(*route_type),
            DispatchError::Handoff { .. } => Some(RouteType::Agent),
            _ => None,
        };

        ErrorDetails {
            code,
            message: sanitize_error_message(&self.to_string()),
            route_type,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::Validation { .. } => ErrorCode::ValidationFailed,
            DispatchError::NoRouteFound => ErrorCode::NoRouteFound,
            DispatchError::RouteExecution { .. } => ErrorCode::RouteExecutionFailed,
            DispatchError::Handoff { .. } => ErrorCode::HandoffFailed,
            DispatchError::ConversationIdRequired => ErrorCode::ConversationIdRequired,
            DispatchError::AgentNotFound { .. } => ErrorCode::AgentNotFound,
            DispatchError::Matching { .. } => ErrorCode::MatchingFailed,
            DispatchError::History { .. } => ErrorCode::HistoryUnavailable,
            DispatchError::Config(_) => ErrorCode::ConfigurationError,
        }
    }

    /// Create validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Wrap a collaborator failure with the route type that produced it
    pub fn route_execution(route_type: RouteType, source: BoxError) -> Self {
        Self::RouteExecution { route_type, source }
    }

    /// Wrap the failure of a handoff hop
    pub fn handoff<F: Into<String>, T: Into<String>>(
        from_agent_id: F,
        to_agent_id: T,
        depth: usize,
        source: DispatchError,
    ) -> Self {
        Self::Handoff {
            from_agent_id: from_agent_id.into(),
            to_agent_id: to_agent_id.into(),
            depth,
            source: Box::new(source),
        }
    }

    /// Create agent-not-found error
    pub fn agent_not_found<S: Into<String>>(agent_id: S) -> Self {
        Self::AgentNotFound {
            agent_id: agent_id.into(),
        }
    }

    pub fn matching(source: BoxError) -> Self {
        Self::Matching { source }
    }

    pub fn history(source: BoxError) -> Self {
        Self::History { source }
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Redact credentials and sensitive paths, then cap the length
fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;
