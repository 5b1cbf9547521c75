// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for record replication.
//!
//! Errors are categorized by their source (broker, record store,
//! configuration, etc.) and carry enough context to be logged on their own.
//! Per-message results that are *expected* to fail (unknown kinds, malformed
//! payloads) are not errors here; they are modelled as outcome enums in
//! [`crate::dispatch`] and [`crate::sync_client`].
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Broker` | Yes | Broker connect/publish/consume failures, timeouts |
//! | `Store` | Yes | Record store temporarily unavailable |
//! | `Sqlite` | No | Local SQLite errors (needs operator attention) |
//! | `Config` | No | Configuration invalid |
//! | `EnvelopeDecode` | No | Broker message is not a valid envelope |
//! | `PayloadDecode` | No | Envelope payload is not a valid record |
//! | `InvalidState` | No | Subscriber state machine violation |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`ReplicationError::is_retryable()`] to decide whether an operation
//! should be retried. The subscriber leaves messages unacknowledged only for
//! retryable failures; non-retryable ones are acknowledged and dropped.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Broker connection or command error.
    ///
    /// Typically retryable (network timeouts, connection drops).
    #[error("Broker error ({operation}): {message}")]
    Broker {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// The record store rejected or could not complete an operation.
    ///
    /// Retryable - the store may be temporarily unavailable.
    #[error("Record store error: {0}")]
    Store(String),

    /// SQLite error in the durable record store.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A broker message could not be decoded as an event envelope.
    #[error("Envelope decode error: {0}")]
    EnvelopeDecode(String),

    /// An envelope payload could not be decoded into a record.
    #[error("Payload decode error: {0}")]
    PayloadDecode(String),

    /// State machine violation (e.g. starting a subscriber twice).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a broker error from a redis::RedisError
    pub fn broker(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Broker {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a broker error without source
    pub fn broker_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Broker {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Broker { .. } => true,
            Self::Store(_) => true,
            Self::Sqlite(_) => false,
            Self::Config(_) => false,
            Self::EnvelopeDecode(_) => false, // Data quality
            Self::PayloadDecode(_) => false,  // Data quality
            Self::InvalidState { .. } => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Broker { .. } => "broker",
            Self::Store(_) => "store",
            Self::Sqlite(_) => "sqlite",
            Self::Config(_) => "config",
            Self::EnvelopeDecode(_) => "envelope_decode",
            Self::PayloadDecode(_) => "payload_decode",
            Self::InvalidState { .. } => "invalid_state",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<redis::RedisError> for ReplicationError {
    fn from(e: redis::RedisError) -> Self {
        Self::broker("unknown", e)
    }
}
