//! Identifier and time types shared across the pipeline.

mod id;
mod timestamp;

pub use id::{ChannelId, ContentId, EventId, MessageId, NotificationId, RequestId, UserId};
pub use timestamp::Timestamp;
