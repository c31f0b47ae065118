//! # Herald Core
//!
//! Core types for the Herald notification and real-time delivery pipeline.
//!
//! This crate provides:
//! - Identifier newtypes and millisecond timestamps
//! - The hierarchical error type system
//! - Ambient task context (principal + request id) with scoped propagation
//! - Storage ports with in-memory implementations
//!
//! Persistence, identity and object storage are external collaborators of
//! the pipeline; they appear here only as ports (`store`) so the event and
//! push crates stay independent of any concrete backend.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod error;
pub mod store;
pub mod types;

pub use context::{Principal, Role, TaskContext};
pub use error::{AuthError, DeliveryError, HeraldError, RelayError, StorageError, TaskError};
pub use types::{
    ChannelId, ContentId, EventId, MessageId, NotificationId, RequestId, Timestamp, UserId,
};
