//! The seam between a pooled connection and the relay it talks to.
//!
//! [`Relay`] opens authenticated sessions; [`RelaySession`] is one such
//! session. Production code uses [`SmtpRelay`]. [`MockRelay`] is a scripted,
//! in-memory stand-in for exercising the pool without a network.

mod mock;
mod smtp;

use std::fmt;

use async_trait::async_trait;
use courier_common::config::RelayConfig;

pub use mock::MockRelay;
pub use smtp::SmtpRelay;

use crate::ConnectionError;

/// A fully rendered message and the addresses it travels between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub recipient: String,
    /// RFC 5322 message, CRLF line endings, not yet dot-stuffed.
    pub message: String,
}

/// Opens sessions against an upstream relay.
#[async_trait]
pub trait Relay: Send + Sync + fmt::Debug {
    /// Open a transport, read the greeting and authenticate.
    ///
    /// A returned session is always authenticated.
    ///
    /// # Errors
    ///
    /// Fails if the relay cannot be reached or refuses the credentials.
    async fn open(&self, config: &RelayConfig) -> Result<Box<dyn RelaySession>, ConnectionError>;
}

/// One authenticated session with the relay.
#[async_trait]
pub trait RelaySession: Send + fmt::Debug {
    /// Cheap round trip proving the session is still usable.
    ///
    /// # Errors
    ///
    /// Fails if the relay does not answer with success.
    async fn probe(&mut self) -> Result<(), ConnectionError>;

    /// Run one mail transaction.
    ///
    /// # Errors
    ///
    /// Fails if the relay rejects the transaction or the transport breaks.
    async fn transmit(&mut self, envelope: &Envelope) -> Result<(), ConnectionError>;

    /// Abandon a half-finished transaction. Best-effort.
    async fn reset(&mut self);

    /// Say goodbye and close the transport. Best-effort.
    async fn quit(&mut self);
}
