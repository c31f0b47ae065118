//! # Herald Events
//!
//! Event-driven core of the Herald pipeline.
//!
//! This crate provides:
//! - The closed [`event::DomainEvent`] set and its payload views
//! - An in-process typed event bus with commit-gated delivery
//! - Bounded, context-propagating task pools
//! - Bounded retry with an explicit per-attempt state machine
//! - The durable event relay (publisher bridge + retry-wrapped consumers)
//! - Per-recipient notification fan-out with caller authorization
//! - Failure capture for exhausted async tasks
//! - Content upload supervision
//!
//! # Flow
//!
//! A mutation commits, its unit of work drains after-commit events onto the
//! event pool, the relay bridge publishes a durable copy of the relayed
//! kinds, the relay consumers resolve recipients and persist notification
//! records, and the secondary events they emit drive cache invalidation and
//! real-time push. Purely local events skip the relay and ride the bus
//! directly.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod content;
pub mod event;
pub mod failure;
pub mod fanout;
pub mod notify;
pub mod pool;
pub mod relay;
pub mod retry;
pub mod uow;

pub use bus::{DeliveryMode, EventBus, EventHandler};
pub use content::{ContentStorage, InMemoryContentStorage, UploadSupervisor};
pub use event::{
    ChannelView, ChannelVisibility, ContentStatus, DomainEvent, EventKind, MessageView, RoleChange,
};
pub use failure::FailureCapture;
pub use fanout::attach_fanout;
pub use notify::{CacheEvictHandler, NotificationCache, NotificationService};
pub use pool::{PoolConfig, PoolsConfig, TaskPool};
pub use relay::{
    InMemoryRelay, RelayBridge, RelayConfig, RelayConsumer, RelayEnvelope, RelayHandler,
    RelayMessage, RelayTransport,
};
pub use retry::{RetryConfig, RetryExhausted, RetryPolicy, RetryState};
pub use uow::UnitOfWork;
