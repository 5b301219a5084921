// Error types for the realtime subsystem

use thiserror::Error;

/// Result type alias for realtime operations
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Errors that can occur while serving realtime connections
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Session store lookup error
    #[error("session store error: {0}")]
    Session(String),

    /// Change-log or TA-assignment source error
    #[error("event source error: {0}")]
    Source(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RealtimeError {
    /// Create a session store error
    pub fn session(msg: impl Into<String>) -> Self {
        RealtimeError::Session(msg.into())
    }

    /// Create an event source error
    pub fn source(msg: impl Into<String>) -> Self {
        RealtimeError::Source(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        RealtimeError::Configuration(msg.into())
    }
}
