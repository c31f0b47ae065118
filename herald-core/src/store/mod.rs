//! Storage ports.
//!
//! Persistence is an external collaborator of the pipeline: these traits are
//! the only surface the event and push crates see. Each port ships with an
//! in-memory implementation used by tests and local runs, mirroring how the
//! concrete backends behave (including the not-found ambiguity of
//! owner-scoped deletes).

mod directory;
mod failure;
mod notification;

pub use directory::{InMemoryDirectory, RecipientDirectory};
pub use failure::{AsyncTaskFailureRecord, FailureStore, InMemoryFailureStore};
pub use notification::{
    InMemoryNotificationStore, NotificationKind, NotificationRecord, NotificationStore,
};
