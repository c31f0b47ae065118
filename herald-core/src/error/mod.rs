//! Error types and handling framework.
//!
//! This module provides a hierarchical error type system with
//! domain-specific error categories for the Herald pipeline:
//! - `HeraldError` - Top-level error type
//!   - `RelayError` - Relay transport and consumer errors
//!   - `StorageError` - Record persistence errors
//!   - `DeliveryError` - Push delivery errors (best-effort, never escalated)
//!   - `AuthError` - Caller authorization errors (never retried)
//!   - `TaskError` - Task pool and async task errors
//!
//! Transient categories expose `is_retryable` so retry wrappers can decide
//! whether another attempt is worthwhile; authorization errors are always
//! surfaced immediately.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relay transport and consumer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayError {
    /// Publishing to a topic failed.
    #[error("relay publish to '{topic}' failed: {reason}")]
    PublishFailed {
        /// Topic name.
        topic: String,
        /// Failure reason.
        reason: String,
    },

    /// An envelope could not be deserialized.
    #[error("relay payload on '{topic}' could not be decoded: {reason}")]
    Decode {
        /// Topic name.
        topic: String,
        /// Failure reason.
        reason: String,
    },

    /// A consumer handler failed for one delivery attempt.
    #[error("relay handler on '{topic}' failed: {reason}")]
    HandlerFailed {
        /// Topic name.
        topic: String,
        /// Failure reason.
        reason: String,
    },

    /// The topic's consumer lane is closed.
    #[error("relay topic '{topic}' is closed")]
    TopicClosed {
        /// Topic name.
        topic: String,
    },
}

impl RelayError {
    /// Returns true if another delivery attempt may succeed.
    ///
    /// Decode failures are included: the payload is retried until the
    /// attempt budget is exhausted, then escalated like any other failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::TopicClosed { .. })
    }
}

/// Record persistence errors.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageError {
    /// A write could not be applied.
    #[error("storage write for {entity} failed: {reason}")]
    WriteFailed {
        /// Entity kind being written.
        entity: String,
        /// Failure reason.
        reason: String,
    },

    /// No row was affected (missing id or wrong owner - indistinguishable).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind.
        entity: String,
        /// Identifier that matched nothing.
        id: String,
    },

    /// The backend is unreachable.
    #[error("storage unavailable: {reason}")]
    Unavailable {
        /// Failure reason.
        reason: String,
    },
}

impl StorageError {
    /// Returns true if another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }
}

/// Push delivery errors.
///
/// These are best-effort: a failed delivery tears down the affected
/// connection and is never surfaced to the sender.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryError {
    /// The client side of the connection is gone.
    #[error("connection {connection_id} is closed")]
    ConnectionClosed {
        /// Connection id.
        connection_id: u64,
    },

    /// The connection's frame queue is saturated.
    #[error("connection {connection_id} queue is full")]
    QueueFull {
        /// Connection id.
        connection_id: u64,
    },

    /// A frame payload could not be serialized.
    #[error("frame encoding failed: {reason}")]
    Encode {
        /// Failure reason.
        reason: String,
    },
}

/// Caller authorization errors. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthError {
    /// The caller is not allowed to perform the action.
    #[error("denied: {action}")]
    Denied {
        /// Action that was refused.
        action: String,
    },

    /// No authenticated principal is available.
    #[error("no authenticated principal")]
    Unauthenticated,
}

/// Task pool and async task errors.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskError {
    /// A monitored task failed on one attempt.
    #[error("task '{task}' failed: {reason}")]
    Failed {
        /// Task name.
        task: String,
        /// Failure reason.
        reason: String,
    },

    /// A monitored task exhausted its retry budget.
    #[error("task '{task}' exhausted after {attempts} attempts: {reason}")]
    Exhausted {
        /// Task name.
        task: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure reason.
        reason: String,
    },
}

/// Top-level error type for the Herald pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeraldError {
    /// Relay error.
    #[error("{0}")]
    Relay(#[from] RelayError),

    /// Storage error.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// Push delivery error.
    #[error("{0}")]
    Delivery(#[from] DeliveryError),

    /// Authorization error.
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// Task error.
    #[error("{0}")]
    Task(#[from] TaskError),
}

impl HeraldError {
    /// Returns the error category as a string (used as a logging field).
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Relay(_) => "relay",
            Self::Storage(_) => "storage",
            Self::Delivery(_) => "delivery",
            Self::Auth(_) => "auth",
            Self::Task(_) => "task",
        }
    }

    /// Returns true if another attempt may succeed.
    ///
    /// Authorization and delivery errors are never retried: the former are
    /// surfaced immediately, the latter are recovered by reconnect + replay.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Relay(e) => e.is_retryable(),
            Self::Storage(e) => e.is_retryable(),
            Self::Delivery(_) | Self::Auth(_) => false,
            Self::Task(e) => matches!(e, TaskError::Failed { .. }),
        }
    }
}

/// A specialized Result type for Herald operations.
pub type Result<T> = std::result::Result<T, HeraldError>;
