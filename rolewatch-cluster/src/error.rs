//! Error types for the polling core

use thiserror::Error;

/// Cluster polling error types
///
/// Probe failures never show up here: they are folded into the node
/// classification. What remains are setup mistakes and the durable state.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("No sentinel reported a healthy master for {0}")]
    NoQuorum(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cluster polling operations
pub type Result<T> = std::result::Result<T, Error>;
