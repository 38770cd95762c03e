//! Typed errors for pooled delivery.
//!
//! Failures are split by what the caller can do about them:
//! - transport faults leave the session unusable and are worth a reconnect
//! - relay rejections keep the session, and 5xx replies are not retried
//! - rejected credentials are fatal until the configuration changes

use std::time::Duration;

use courier_smtp::client::ClientError;
use thiserror::Error;

/// Failure of a single connection operation.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No session is held; the connection must be (re)established first.
    #[error("Connection is not established")]
    Disconnected,

    /// Socket-level failure, or the relay hung up.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// TLS handshake or configuration failure.
    #[error("TLS failure: {0}")]
    Tls(String),

    /// The relay refused the credentials, or offered no usable mechanism.
    ///
    /// `code` is absent when no reply was involved.
    #[error("Authentication rejected: {message}")]
    Authentication { code: Option<u16>, message: String },

    /// The relay refused the transaction.
    #[error("Relay rejected the message: {code} {message}")]
    Rejected { code: u16, message: String },

    /// A step of the conversation exceeded its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The relay answered with something that is not SMTP.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The message could not be assembled from the given fields.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl ConnectionError {
    /// Returns `true` if retrying the same request cannot succeed.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::Rejected { code, .. } => *code >= 500,
            Self::InvalidMessage(_) => true,
            Self::Authentication { .. } => self.is_fatal(),
            _ => false,
        }
    }

    /// Returns `true` if no reconnect will help: the relay refused who we are.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Authentication { code: None, .. } => true,
            Self::Authentication {
                code: Some(code), ..
            } => *code >= 500,
            _ => false,
        }
    }

    /// Returns `true` if the session can no longer be trusted after this error.
    #[must_use]
    pub const fn invalidates_session(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::Transport(_)
                | Self::Tls(_)
                | Self::Timeout(_)
                | Self::Protocol(_)
                | Self::Authentication { .. }
        )
    }

    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Transport(_) => "transport",
            Self::Tls(_) => "tls",
            Self::Authentication { .. } => "authentication",
            Self::Rejected { .. } => "rejected",
            Self::Timeout(_) => "timeout",
            Self::Protocol(_) => "protocol",
            Self::InvalidMessage(_) => "invalid_message",
        }
    }
}

/// Convert from SMTP `ClientError` to `ConnectionError`.
///
/// Replies become `Rejected`; callers that are in the middle of `AUTH`
/// re-map them to `Authentication`.
impl From<ClientError> for ConnectionError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message } => Self::Rejected { code, message },
            ClientError::Io(e) => Self::Transport(format!("I/O error: {e}")),
            ClientError::ConnectionClosed => {
                Self::Transport("Connection closed unexpectedly".to_string())
            }
            ClientError::TlsError(msg) => Self::Tls(msg),
            ClientError::AuthUnsupported(offered) => Self::Authentication {
                code: None,
                message: format!("no supported mechanism (server offers: {offered})"),
            },
            ClientError::ParseError(msg) => Self::Protocol(msg),
            ClientError::Utf8Error(e) => Self::Protocol(format!("UTF-8 decoding error: {e}")),
        }
    }
}

/// Failure to hand out a connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has been shut down.
    #[error("Connection pool is closed")]
    Closed,

    /// A pool needs at least one connection.
    #[error("Connection pool size must be at least 1")]
    Empty,
}

/// Why a delivery gave up.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Terminal failure of a delivery: the retry budget is spent, or the relay
/// refused in a way retrying cannot change.
#[derive(Debug, Error)]
#[error("Delivery failed after {attempts} attempt(s): {cause}")]
pub struct DeliveryFailed {
    /// Send attempts made, never more than the retry budget.
    pub attempts: u32,
    #[source]
    pub cause: FailureCause,
}

impl DeliveryFailed {
    /// Returns `true` if the relay refused permanently.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match &self.cause {
            FailureCause::Connection(e) => e.is_permanent(),
            FailureCause::Pool(_) => false,
        }
    }

    pub(crate) const fn reason(&self) -> &'static str {
        match &self.cause {
            FailureCause::Connection(e) => e.kind(),
            FailureCause::Pool(_) => "pool_closed",
        }
    }
}
