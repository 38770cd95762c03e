//! Timeouts applied to the relay conversation.
//!
//! The pool never bounds a whole delivery; these only stop a single
//! handshake or command from hanging a Connection forever.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client-side SMTP timeouts for a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTimeouts {
    /// Timeout for establishing the TCP connection and TLS handshake.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// Timeout for a single command/reply exchange (EHLO, AUTH, NOOP, MAIL, RCPT).
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::command_secs")]
    pub command_secs: u64,

    /// Timeout for transmitting the message body and reading the final reply.
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,
}

impl RelayTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }
}

impl Default for RelayTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect_secs(),
            command_secs: defaults::command_secs(),
            data_secs: defaults::data_secs(),
        }
    }
}

mod defaults {
    pub const fn connect_secs() -> u64 {
        30
    }

    pub const fn command_secs() -> u64 {
        30
    }

    pub const fn data_secs() -> u64 {
        120
    }
}
