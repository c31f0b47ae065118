//! # Herald Push
//!
//! Real-time push delivery for the Herald pipeline.
//!
//! This crate provides:
//! - A per-recipient connection registry (multi-device capable)
//! - A capacity-bounded, replayable FIFO event log
//! - The push service: connect/replay, send, broadcast, keep-alive
//! - text/event-stream frame encoding
//! - Bus handlers bridging committed domain events to live pushes
//! - Per-channel message streams (`channels.<channelId>.messages`)
//!
//! # Delivery contract
//!
//! At-least-once per currently open connection. A failed write tears down
//! only the affected connection; reconnecting clients supply their
//! last-seen event id and replay whatever the bounded log still retains.
//! Events evicted before a reconnect are permanently lost to that client.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod event;
pub mod frame;
pub mod handler;
pub mod replay;
pub mod service;
pub mod stream;

pub use config::PushConfig;
pub use connection::{ConnectionId, ConnectionRegistry, PushConnection};
pub use event::{PushEvent, PushTarget};
pub use frame::PushFrame;
pub use handler::PushHandler;
pub use replay::ReplayLog;
pub use service::{PushService, PushSubscription};
pub use stream::{ChannelStreamRouter, MessageStreamHandler};
