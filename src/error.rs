//! Error types for admission control.
//!
//! Rejections are not errors: a request refused by a policy comes back as an
//! [`AdmissionResult`](crate::decision::AdmissionResult) with `granted == false`.
//! The types here cover configuration problems, counter store failures and
//! corrupted internal state.

use std::time::Duration;
use thiserror::Error;

/// Result type for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Main error type for admission operations.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Counter store error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection error (e.g., Redis connection failed).
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A policy name that is not in the policy table.
    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),

    /// Internal invariant violated; the request must fail rather than be guessed at.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AdmissionError {
    /// Whether the failure came from a store that may answer on a later attempt.
    ///
    /// Distributed policies route these through their configured failure policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            Self::Connection(ConnectionError::AuthFailed(_)) => false,
            Self::Connection(_) => true,
            _ => false,
        }
    }
}

/// Counter store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Generic storage operation failed.
    #[error("{message}")]
    OperationFailed {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The store returned a value that is not a counter.
    #[error("Unexpected reply for key {key}: {reply}")]
    UnexpectedReply {
        /// Key that was read.
        key: String,
        /// Description of what came back.
        reply: String,
    },

    /// Connection pool exhausted.
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl StorageError {
    /// Create a new operation failed error.
    pub fn operation_failed(message: impl Into<String>, retryable: bool) -> Self {
        Self::OperationFailed {
            message: message.into(),
            retryable,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationFailed { retryable, .. } => *retryable,
            Self::PoolExhausted => true,
            Self::UnexpectedReply { .. } => false,
        }
    }
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A policy whose parameters don't make sense.
    #[error("Invalid policy {name}: {reason}")]
    InvalidPolicy {
        /// Policy name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Two policies registered under one name.
    #[error("Duplicate policy: {0}")]
    DuplicatePolicy(String),

    /// A route or pipeline referring to a policy that does not exist.
    #[error("Unknown policy {policy} referenced by {referrer}")]
    UnknownPolicy {
        /// The missing policy.
        policy: String,
        /// Route or component that referenced it.
        referrer: String,
    },

    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// The policy table could not be parsed.
    #[error("Malformed policy table: {0}")]
    Parse(String),
}

impl ConfigError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to connect.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// A store call exceeded its deadline.
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
}
