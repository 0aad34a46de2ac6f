// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use duration_str::deserialize_option_duration;
use serde::{Deserialize, Serialize};

/// Upper bound for any call timeout (10 hours).
pub const MAX_TIMEOUT: Duration = Duration::from_secs(36000);

/// Per-connection session settings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SessionConfig {
    /// Receive window of each call: the capacity of its inbound queue,
    /// announced to the peer as its send credit.
    #[serde(default = "default_window")]
    window: u32,

    /// Frames buffered towards the connection writer.
    #[serde(default = "default_outbound_queue")]
    outbound_queue: usize,

    /// Largest accepted frame, in bytes.
    #[serde(default = "default_max_frame_size")]
    max_frame_size: usize,

    /// Timeout applied to calls that do not set their own.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    default_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            window: default_window(),
            outbound_queue: default_outbound_queue(),
            max_frame_size: default_max_frame_size(),
            default_timeout: None,
        }
    }
}

fn default_window() -> u32 {
    32
}

fn default_outbound_queue() -> usize {
    128
}

fn default_max_frame_size() -> usize {
    4 * 1024 * 1024
}

impl SessionConfig {
    pub fn new() -> Self {
        SessionConfig::default()
    }

    pub fn with_window(self, window: u32) -> Self {
        SessionConfig { window, ..self }
    }

    pub fn with_outbound_queue(self, outbound_queue: usize) -> Self {
        SessionConfig {
            outbound_queue,
            ..self
        }
    }

    pub fn with_max_frame_size(self, max_frame_size: usize) -> Self {
        SessionConfig {
            max_frame_size,
            ..self
        }
    }

    pub fn with_default_timeout(self, default_timeout: Option<Duration>) -> Self {
        SessionConfig {
            default_timeout,
            ..self
        }
    }

    /// Never below one: a zero window could not carry any message.
    pub fn window(&self) -> u32 {
        self.window.max(1)
    }

    pub fn outbound_queue(&self) -> usize {
        self.outbound_queue.max(1)
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_configuration_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.window(), 32);
        assert_eq!(config.outbound_queue(), 128);
        assert_eq!(config.max_frame_size(), 4 * 1024 * 1024);
        assert_eq!(config.default_timeout(), None);
    }

    #[test]
    fn test_session_configuration_from_yaml() {
        let config: SessionConfig =
            serde_yaml::from_str("window: 4\ndefault_timeout: 1500ms\n").unwrap();
        assert_eq!(config.window(), 4);
        assert_eq!(config.outbound_queue(), 128);
        assert_eq!(config.default_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_zero_window_is_clamped() {
        let config = SessionConfig::new().with_window(0).with_outbound_queue(0);
        assert_eq!(config.window(), 1);
        assert_eq!(config.outbound_queue(), 1);
    }
}
