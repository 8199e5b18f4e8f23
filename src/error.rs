//! Error types for the Agents SDK
//!
//! "Not ready yet" is never an error here. Every poll surface reports
//! pending work through `Option`, `bool` or an explicit state enum, and the
//! external driver decides when to call again.

use thiserror::Error;

/// Result type alias for the Agents SDK
pub type Result<T> = std::result::Result<T, AgentsError>;

/// Main error type for the Agents SDK
#[derive(Debug, Error)]
pub enum AgentsError {
    /// Unknown id for a run, handoff, validation, request or registry entry
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Caller is not allowed to perform the action
    #[error("Unauthorized: {caller} may not {action}")]
    Unauthorized { caller: String, action: String },

    /// The agent already has a run in flight
    #[error("Agent busy: {agent}")]
    Busy { agent: String },

    /// A live registry entry already uses this name
    #[error("Duplicate name: {name}")]
    DuplicateName { name: String },

    /// Enumeration past the end of an append-only list
    #[error("Index out of bounds: {index} >= {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Second attempt to complete a pending request
    #[error("Request already fulfilled: {id}")]
    AlreadyFulfilled { id: String },

    /// Guardrail invoked for the direction it is not configured for
    #[error("Guardrail {guardrail} is not an {expected} guardrail")]
    WrongDirection {
        guardrail: String,
        expected: &'static str,
    },

    /// Result requested before the owning lifecycle was closed
    #[error("Not completed: {id}")]
    NotCompleted { id: String },

    /// Handoff request that can never succeed
    #[error("Invalid handoff: {message}")]
    InvalidHandoff { message: String },

    /// A capability backend reported a failure
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AgentsError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for AgentsError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
