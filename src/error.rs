//! Error types for VendBot.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Repository errors. Every variant is treated as a repository failure by
/// the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

/// Channel (transport) errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("No channel known for user {user_id}")]
    UnknownRecipient { user_id: String },

    #[error("Invalid update format: {0}")]
    InvalidUpdate(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Unrecoverable workflow failures. Recoverable outcomes (bad input, stale
/// selections) are transitions, not errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Repository failure: {0}")]
    Repository(#[from] DatabaseError),

    #[error("Transport failure: {0}")]
    Transport(#[from] ChannelError),

    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("Workflow {callee} cannot be invoked from {caller}: a return to another workflow is already pending")]
    NestingTooDeep { caller: String, callee: String },

    #[error("Data bag does not belong to workflow {workflow}")]
    DataMismatch { workflow: String },

    #[error("Workflow {workflow} has no state {state}")]
    UnknownState { workflow: String, state: String },

    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Acting user {0} has no account")]
    UnknownActor(String),
}
