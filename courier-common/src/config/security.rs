//! Transport security for relay sessions.

use serde::{Deserialize, Serialize};

/// How the session to the relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelaySecurity {
    /// Implicit TLS from the first byte (SMTPS, usually port 465).
    #[default]
    Tls,

    /// Plain TCP with no encryption at all.
    ///
    /// **WARNING**: Credentials travel in clear text. Only use against a local
    /// relay or in tests.
    Plain,
}

/// TLS certificate validation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CertificatePolicy {
    /// Whether to accept invalid TLS certificates (self-signed, expired, etc.).
    ///
    /// **SECURITY WARNING**: Setting this to `true` disables certificate validation
    /// and makes the connection vulnerable to man-in-the-middle attacks.
    ///
    /// Default: `false` (validate certificates)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Complete security configuration for a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// Default: `Tls`
    #[serde(default)]
    pub mode: RelaySecurity,

    /// Default: `accept_invalid_certs = false`
    #[serde(default)]
    pub certificate: CertificatePolicy,
}

impl SecurityConfig {
    /// Implicit TLS with certificate validation.
    #[must_use]
    pub const fn tls() -> Self {
        Self {
            mode: RelaySecurity::Tls,
            certificate: CertificatePolicy {
                accept_invalid_certs: false,
            },
        }
    }

    /// Plain TCP.
    ///
    /// **WARNING**: Only use for testing or a relay on the loopback interface.
    #[must_use]
    pub const fn plain() -> Self {
        Self {
            mode: RelaySecurity::Plain,
            certificate: CertificatePolicy {
                accept_invalid_certs: false,
            },
        }
    }

    /// Implicit TLS that accepts self-signed certificates.
    ///
    /// **WARNING**: Only use in test environments.
    #[must_use]
    pub const fn insecure() -> Self {
        Self {
            mode: RelaySecurity::Tls,
            certificate: CertificatePolicy {
                accept_invalid_certs: true,
            },
        }
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.mode, RelaySecurity::Tls)
    }

    /// Returns `true` if invalid certificates should be accepted.
    ///
    /// **SECURITY WARNING**: This indicates certificate validation is disabled.
    #[must_use]
    pub const fn accepts_invalid_certs(&self) -> bool {
        self.certificate.accept_invalid_certs
    }
}
