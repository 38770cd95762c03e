//! Deliver one message through the pool with a bounded retry budget.

use courier_common::{config::DeliveryConfig, internal, tracing};
use courier_metrics::ReconnectTrigger;

use crate::{ConnectionError, ConnectionPool, DeliveryFailed};

/// Proof of a successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Send attempts it took, including the successful one.
    pub attempts: u32,
    /// Identity of the pooled connection that carried the message.
    pub connection: usize,
}

/// Sends mail over pooled connections.
///
/// Cheap to clone; every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct DeliveryService {
    pool: ConnectionPool,
    config: DeliveryConfig,
}

impl DeliveryService {
    #[must_use]
    pub const fn new(pool: ConnectionPool, config: DeliveryConfig) -> Self {
        Self { pool, config }
    }

    #[must_use]
    pub const fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Send a plain-text message to `to`.
    ///
    /// Waits for a free connection, then makes up to `max_attempts` send
    /// attempts, reconnecting the same connection between attempts. Every
    /// failure is retried until the budget is spent. The connection always
    /// goes back to the pool.
    ///
    /// # Errors
    ///
    /// `DeliveryFailed` once the budget is spent, or if the pool is closed.
    pub async fn deliver(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, DeliveryFailed> {
        let mut conn = self.pool.acquire().await.map_err(|e| DeliveryFailed {
            attempts: 0,
            cause: e.into(),
        })?;

        let budget = self.config.max_attempts.max(1);
        let deadline = self.config.attempt_timeout();
        let mut attempts = 0;

        let outcome: Result<(), ConnectionError> = loop {
            attempts += 1;

            let error = match conn.send_within(deadline, to, subject, body).await {
                Ok(()) => break Ok(()),
                Err(error) => error,
            };

            if attempts >= budget {
                break Err(error);
            }

            tracing::warn!(
                connection = conn.id(),
                attempt = attempts,
                budget,
                "Send failed, reconnecting before retry: {error}"
            );

            let reconnected = conn.connect().await;
            if let Some(metrics) = self.pool.metrics() {
                metrics.record_reconnect(ReconnectTrigger::Retry, reconnected.is_ok());
            }
            // The next attempt fails on its own if this did not work
            if let Err(error) = reconnected {
                tracing::debug!(connection = conn.id(), "Reconnect failed: {error}");
            }
        };

        let connection = conn.id();
        self.pool.release(conn).await;

        match outcome {
            Ok(()) => {
                internal!(
                    level = INFO,
                    "Delivered to {to} via connection {connection} after {attempts} attempt(s)"
                );
                if let Some(metrics) = self.pool.metrics() {
                    metrics.record_delivery_success(attempts);
                }
                Ok(DeliveryReceipt {
                    attempts,
                    connection,
                })
            }
            Err(error) => {
                let failed = DeliveryFailed {
                    attempts,
                    cause: error.into(),
                };
                tracing::error!(connection, "Failed to deliver to {to}: {failed}");
                if let Some(metrics) = self.pool.metrics() {
                    metrics.record_delivery_failure(attempts, failed.reason());
                }
                Err(failed)
            }
        }
    }
}
