//! A single long-lived, authenticated relay session.

use std::{sync::Arc, time::Duration};

use courier_common::{config::RelayConfig, internal, tracing};
use courier_metrics::{DeliveryMetrics, SendOutcome};
use courier_smtp::client::MessageBuilder;
use tokio::time::Instant;

use crate::{
    ConnectionError,
    relay::{Envelope, Relay, RelaySession},
};

/// Result of checking whether a connection can carry mail.
#[derive(Debug)]
pub enum Health {
    /// The session answered the liveness probe.
    Live,
    /// No usable session; a reconnect may fix it.
    NeedsReconnect(ConnectionError),
    /// Reconnecting will not help until the configuration changes.
    Fatal(ConnectionError),
}

impl Health {
    fn from_error(error: ConnectionError) -> Self {
        if error.is_fatal() {
            Self::Fatal(error)
        } else {
            Self::NeedsReconnect(error)
        }
    }

    fn into_result(self) -> Result<(), ConnectionError> {
        match self {
            Self::Live => Ok(()),
            Self::NeedsReconnect(error) | Self::Fatal(error) => Err(error),
        }
    }
}

/// A handle over at most one authenticated session with the relay.
///
/// A connection may be disconnected at any point in its life, including
/// straight after construction; [`Connection::connect`] brings it back.
pub struct Connection {
    id: usize,
    config: Arc<RelayConfig>,
    relay: Arc<dyn Relay>,
    session: Option<Box<dyn RelaySession>>,
    metrics: Option<Arc<DeliveryMetrics>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("relay", &self.config.address())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a disconnected connection.
    #[must_use]
    pub fn new(
        id: usize,
        config: Arc<RelayConfig>,
        relay: Arc<dyn Relay>,
        metrics: Option<Arc<DeliveryMetrics>>,
    ) -> Self {
        Self {
            id,
            config,
            relay,
            session: None,
            metrics,
        }
    }

    /// Identity of this connection, unique within its pool.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Whether a session is held. Says nothing about whether it still works.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Probe the session. A session that fails the probe is discarded.
    pub async fn health(&mut self) -> Health {
        let Some(session) = self.session.as_mut() else {
            return Health::NeedsReconnect(ConnectionError::Disconnected);
        };

        match session.probe().await {
            Ok(()) => Health::Live,
            Err(error) => {
                tracing::debug!(connection = self.id, "Liveness probe failed: {error}");
                self.session = None;
                Health::from_error(error)
            }
        }
    }

    /// Confirm the session is still usable, without ever reconnecting.
    ///
    /// # Errors
    ///
    /// `Disconnected` if there is no session, or the probe's failure.
    pub async fn validate(&mut self) -> Result<(), ConnectionError> {
        self.health().await.into_result()
    }

    /// Make sure a live, authenticated session is held.
    ///
    /// Does nothing if the current session passes the liveness probe.
    ///
    /// # Errors
    ///
    /// If the relay cannot be reached or refuses the credentials. The
    /// connection is left disconnected.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        match self.health().await {
            Health::Live => Ok(()),
            Health::NeedsReconnect(_) | Health::Fatal(_) => self.reconnect().await,
        }
    }

    /// Replace the session with a freshly authenticated one, without probing
    /// the old one first.
    ///
    /// # Errors
    ///
    /// If the relay cannot be reached or refuses the credentials. The
    /// connection is left disconnected.
    pub async fn reconnect(&mut self) -> Result<(), ConnectionError> {
        self.close().await;

        match self.relay.open(&self.config).await {
            Ok(session) => {
                internal!(
                    level = DEBUG,
                    "Connection {} established to {}",
                    self.id,
                    self.config.address()
                );
                self.session = Some(session);
                Ok(())
            }
            Err(error) => {
                if error.is_fatal() {
                    tracing::error!(
                        connection = self.id,
                        relay = %self.config.address(),
                        "Relay refused credentials: {error}"
                    );
                }
                Err(error)
            }
        }
    }

    /// Send a plain-text message to `to`.
    ///
    /// # Errors
    ///
    /// `Disconnected` if no session is held, or the relay's rejection or
    /// transport failure.
    pub async fn send(&mut self, to: &str, subject: &str, body: &str) -> Result<(), ConnectionError> {
        self.send_within(None, to, subject, body).await
    }

    /// Like [`Connection::send`], giving up after `deadline` if one is set.
    ///
    /// The attempt's duration is recorded whatever the outcome.
    ///
    /// # Errors
    ///
    /// As for [`Connection::send`], plus `Timeout` when the deadline passes.
    pub async fn send_within(
        &mut self,
        deadline: Option<Duration>,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), ConnectionError> {
        let started = Instant::now();

        let result = match deadline {
            Some(deadline) => {
                let attempt = tokio::time::timeout(deadline, self.transmit(to, subject, body)).await;
                attempt.unwrap_or(Err(ConnectionError::Timeout(deadline)))
            }
            None => self.transmit(to, subject, body).await,
        };

        if let Err(error) = &result
            && error.invalidates_session()
        {
            // The relay's view of an interrupted transaction is unknown
            self.session = None;
        }

        if let Some(metrics) = &self.metrics {
            let outcome = if result.is_ok() {
                SendOutcome::Sent
            } else {
                SendOutcome::Failed
            };
            metrics.record_send_duration(started.elapsed(), outcome);
        }

        result
    }

    async fn transmit(&mut self, to: &str, subject: &str, body: &str) -> Result<(), ConnectionError> {
        let session = self.session.as_mut().ok_or(ConnectionError::Disconnected)?;

        let sender = self.config.sender();
        let message = MessageBuilder::new()
            .from(sender)
            .to(to)
            .subject(subject)
            .body(body)
            .build()
            .map_err(|e| ConnectionError::InvalidMessage(e.to_string()))?;

        let envelope = Envelope {
            sender: sender.to_string(),
            recipient: to.to_string(),
            message,
        };

        match session.transmit(&envelope).await {
            Ok(()) => {
                internal!(level = DEBUG, "Connection {} delivered mail to {to}", self.id);
                Ok(())
            }
            Err(error) => {
                if matches!(error, ConnectionError::Rejected { .. }) {
                    session.reset().await;
                }
                Err(error)
            }
        }
    }

    /// Say goodbye to the relay and drop the session. Never fails, and is a
    /// no-op when already disconnected.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.quit().await;
            internal!(level = DEBUG, "Connection {} closed", self.id);
        }
    }

    /// Drop the session without talking to the relay.
    pub fn discard_session(&mut self) {
        self.session = None;
    }

    pub(crate) fn take_session(&mut self) -> Option<Box<dyn RelaySession>> {
        self.session.take()
    }
}
