//! Push service configuration.
//!
//! This module provides configuration for the push service including:
//! - Connection idle timeout
//! - Keep-alive interval
//! - Replay log capacity
//! - Per-connection frame buffering

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Push service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Connection idle timeout in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Keep-alive ping interval in seconds.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// Capacity of the bounded replay log.
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,

    /// Maximum number of queued frames per connection.
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            replay_capacity: default_replay_capacity(),
            frame_buffer: default_frame_buffer(),
        }
    }
}

impl PushConfig {
    /// Returns the idle timeout as a Duration.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Returns the keep-alive interval as a Duration.
    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

fn default_idle_timeout() -> u64 {
    300 // 5 minutes
}

fn default_keepalive_interval() -> u64 {
    1800 // 30 minutes
}

fn default_replay_capacity() -> usize {
    100
}

fn default_frame_buffer() -> usize {
    256
}
