//! Test support utilities for delivery tests
//!
//! A plaintext mock relay plus helpers to point a relay configuration at it.
#![allow(dead_code)]

pub mod mock_server;

use std::net::SocketAddr;

use courier_common::config::{Credential, RelayConfig, RelayTimeouts, SecurityConfig};

pub use mock_server::{MockSmtpServer, SmtpCommand};

/// Relay configuration for a plaintext relay at `addr` with short timeouts.
pub fn plain_relay_config(addr: SocketAddr) -> RelayConfig {
    RelayConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        principal: "courier@example.com".to_string(),
        credential: Credential::new("app-password"),
        security: SecurityConfig::plain(),
        timeouts: RelayTimeouts {
            connect_secs: 2,
            command_secs: 2,
            data_secs: 5,
        },
        ..RelayConfig::default()
    }
}
