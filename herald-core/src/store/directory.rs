//! Recipient resolution port.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StorageError;
use crate::types::{ChannelId, UserId};

/// Port resolving which users should receive channel-scoped notifications.
///
/// Backed by the channel membership / read-status tables in production; the
/// pipeline only ever asks one question of it.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Members of the channel that have notifications enabled.
    async fn notifiable_members(&self, channel_id: ChannelId)
        -> Result<Vec<UserId>, StorageError>;
}

/// In-memory directory for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    members: DashMap<ChannelId, Vec<(UserId, bool)>>,
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel member with the given notification preference.
    pub fn add_member(&self, channel_id: ChannelId, user_id: UserId, notifications_enabled: bool) {
        self.members
            .entry(channel_id)
            .or_default()
            .push((user_id, notifications_enabled));
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryDirectory {
    async fn notifiable_members(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<UserId>, StorageError> {
        Ok(self
            .members
            .get(&channel_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, enabled)| *enabled)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }
}
