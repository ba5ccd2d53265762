//! Error types for a3s-relay

use thiserror::Error;

/// Errors that can occur in the relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Transport handshake or delivery failure on a single connection
    #[error("Connection error for session '{session}': {reason}")]
    Connection { session: String, reason: String },

    /// No subscriber or adapter available for a message
    #[error("Routing error: {0}")]
    Routing(String),

    /// Tool name not present in the registry
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    /// Tool name registered twice
    #[error("Tool already registered: {name}")]
    DuplicateTool { name: String },

    /// Profile name not present in the policy
    #[error("Unknown tool profile: {name}")]
    UnknownProfile { name: String },

    /// Group name not present in the policy
    #[error("Unknown tool group: {name}")]
    UnknownGroup { name: String },

    /// Policy rejected the call
    #[error("Tool '{tool}' is not allowed for profile '{profile}'")]
    PolicyDenied { profile: String, tool: String },

    /// Tool implementation failed
    #[error("Tool '{tool}' failed: {reason}")]
    Tool { tool: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether the error is an expected policy outcome rather than a fault
    pub fn is_policy_denied(&self) -> bool {
        matches!(self, RelayError::PolicyDenied { .. })
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
