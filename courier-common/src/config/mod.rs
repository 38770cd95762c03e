//! Configuration types for courier.
//!
//! Everything here is supplied once at process startup and never mutated
//! afterwards. Values come from an optional RON file and are then overlaid
//! with environment variables, so deployments can keep credentials out of
//! the file entirely.
//!
//! ## Modules
//!
//! - [`security`]: implicit TLS vs plain transport and certificate validation
//! - [`timeouts`]: per-command timeouts for the relay conversation

pub mod security;
pub mod timeouts;

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

pub use security::{CertificatePolicy, RelaySecurity, SecurityConfig};
pub use timeouts::RelayTimeouts;

use crate::ConfigurationError;

pub const ENV_RELAY_HOST: &str = "COURIER_RELAY_HOST";
pub const ENV_RELAY_PORT: &str = "COURIER_RELAY_PORT";
pub const ENV_RELAY_PRINCIPAL: &str = "COURIER_RELAY_PRINCIPAL";
pub const ENV_RELAY_CREDENTIAL: &str = "COURIER_RELAY_CREDENTIAL";
pub const ENV_POOL_SIZE: &str = "COURIER_POOL_SIZE";
pub const ENV_MAX_ATTEMPTS: &str = "COURIER_MAX_ATTEMPTS";

/// A secret that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for the authentication exchange only.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Where and how to authenticate against the upstream relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Default: `smtp.gmail.com`
    #[serde(default = "defaults::host")]
    pub host: String,

    /// Default: 465 (SMTPS)
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Login name for `AUTH`
    #[serde(default)]
    pub principal: String,

    /// Password for `AUTH`
    #[serde(default)]
    pub credential: Credential,

    /// Envelope sender and `From` header. Defaults to the principal.
    #[serde(default)]
    pub sender: Option<String>,

    /// Name announced in `EHLO`. Default: `localhost`
    #[serde(default = "defaults::helo_name")]
    pub helo_name: String,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub timeouts: RelayTimeouts,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            principal: String::default(),
            credential: Credential::default(),
            sender: None,
            helo_name: defaults::helo_name(),
            security: SecurityConfig::default(),
            timeouts: RelayTimeouts::default(),
        }
    }
}

impl RelayConfig {
    /// `host:port`, suitable for `TcpStream::connect`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The address mail is sent from.
    #[must_use]
    pub fn sender(&self) -> &str {
        self.sender.as_deref().unwrap_or(&self.principal)
    }

    /// Overlay values from the environment on top of whatever was loaded from file.
    ///
    /// # Errors
    /// If a numeric variable cannot be parsed.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_RELAY_HOST) {
            self.host = host;
        }

        if let Some(port) = lookup(ENV_RELAY_PORT) {
            self.port = port
                .parse()
                .map_err(|e| ConfigurationError::invalid("relay.port", format!("{port}: {e}")))?;
        }

        if let Some(principal) = lookup(ENV_RELAY_PRINCIPAL) {
            self.principal = principal;
        }

        if let Some(credential) = lookup(ENV_RELAY_CREDENTIAL) {
            self.credential = Credential::new(credential);
        }

        Ok(())
    }

    /// Reject settings the relay could never accept.
    ///
    /// # Errors
    /// Missing principal or credential, an empty host or a zero port.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.host.trim().is_empty() {
            return Err(ConfigurationError::Missing("relay.host"));
        }

        if self.port == 0 {
            return Err(ConfigurationError::invalid("relay.port", "port must be non-zero"));
        }

        if self.principal.trim().is_empty() {
            return Err(ConfigurationError::Missing("relay.principal"));
        }

        if self.credential.is_empty() {
            return Err(ConfigurationError::Missing("relay.credential"));
        }

        Ok(())
    }
}

/// Size of the connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of long-lived relay connections. Fixed for the process lifetime.
    ///
    /// Default: 5
    #[serde(default = "defaults::pool_size")]
    pub size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: defaults::pool_size(),
        }
    }
}

impl PoolConfig {
    /// # Errors
    /// If `COURIER_POOL_SIZE` is not a number.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(size) = lookup(ENV_POOL_SIZE) {
            self.size = size
                .parse()
                .map_err(|e| ConfigurationError::invalid("pool.size", format!("{size}: {e}")))?;
        }

        Ok(())
    }

    /// # Errors
    /// If the pool would hold no connections.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.size == 0 {
            return Err(ConfigurationError::invalid("pool.size", "must be at least 1"));
        }
        Ok(())
    }
}

/// Retry behaviour of a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Retry budget: the maximum number of send attempts, including the first.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Optional deadline for each send attempt. Unbounded when absent.
    #[serde(default)]
    pub attempt_timeout_secs: Option<u64>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            attempt_timeout_secs: None,
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_secs.map(Duration::from_secs)
    }

    /// # Errors
    /// If `COURIER_MAX_ATTEMPTS` is not a number.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(attempts) = lookup(ENV_MAX_ATTEMPTS) {
            self.max_attempts = attempts.parse().map_err(|e| {
                ConfigurationError::invalid("delivery.max_attempts", format!("{attempts}: {e}"))
            })?;
        }

        Ok(())
    }

    /// # Errors
    /// If the retry budget would allow no attempt at all, or the deadline is zero.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::invalid(
                "delivery.max_attempts",
                "must be at least 1",
            ));
        }

        if self.attempt_timeout_secs == Some(0) {
            return Err(ConfigurationError::invalid(
                "delivery.attempt_timeout_secs",
                "must be non-zero when set",
            ));
        }

        Ok(())
    }
}

mod defaults {
    pub fn host() -> String {
        "smtp.gmail.com".to_string()
    }

    pub const fn port() -> u16 {
        465
    }

    pub fn helo_name() -> String {
        "localhost".to_string()
    }

    pub const fn pool_size() -> usize {
        5
    }

    pub const fn max_attempts() -> u32 {
        3
    }
}
