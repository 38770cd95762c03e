use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_common::{
    config::{RelayConfig, RelayTimeouts},
    internal, tracing,
};
use courier_smtp::client::{ClientConfig, ClientError, SmtpClient, tls_config};
use once_cell::sync::OnceCell;

use super::{Envelope, Relay, RelaySession};
use crate::ConnectionError;

/// Relay reached over SMTP, with implicit TLS unless configured otherwise.
///
/// The rustls configuration is built on first use and shared by every
/// session this relay opens.
#[derive(Debug, Default)]
pub struct SmtpRelay {
    tls: OnceCell<Arc<ClientConfig>>,
}

impl SmtpRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tls_config(&self, config: &RelayConfig) -> Result<Arc<ClientConfig>, ConnectionError> {
        self.tls
            .get_or_try_init(|| {
                if config.security.accepts_invalid_certs() {
                    tracing::warn!(
                        relay = %config.host,
                        "SECURITY WARNING: TLS certificate validation is disabled for this relay"
                    );
                }
                tls_config(config.security.accepts_invalid_certs())
            })
            .cloned()
            .map_err(ConnectionError::from)
    }

    async fn connect(&self, config: &RelayConfig) -> Result<SmtpClient, ConnectionError> {
        let address = config.address();
        let limit = config.timeouts.connect();

        if config.security.is_tls() {
            let tls = self.tls_config(config)?;
            within(limit, SmtpClient::connect_tls(&address, &config.host, tls)).await
        } else {
            tracing::warn!(relay = %address, "Connecting to relay without TLS");
            within(limit, SmtpClient::connect(&address)).await
        }
    }
}

#[async_trait]
impl Relay for SmtpRelay {
    async fn open(&self, config: &RelayConfig) -> Result<Box<dyn RelaySession>, ConnectionError> {
        let mut client = self.connect(config).await?;
        let command = config.timeouts.command();

        within(command, client.read_greeting()).await?;
        let ehlo = within(command, client.ehlo(&config.helo_name)).await?;

        within(
            command,
            client.authenticate(&ehlo, &config.principal, config.credential.expose()),
        )
        .await
        .map_err(|e| match e {
            ConnectionError::Rejected { code, message } => ConnectionError::Authentication {
                code: Some(code),
                message: format!("{code} {message}"),
            },
            other => other,
        })?;

        internal!(
            level = DEBUG,
            "Authenticated with {} as {}",
            config.address(),
            config.principal
        );

        Ok(Box::new(SmtpSession {
            client,
            timeouts: config.timeouts,
        }))
    }
}

/// An authenticated SMTP session.
#[derive(Debug)]
struct SmtpSession {
    client: SmtpClient,
    timeouts: RelayTimeouts,
}

#[async_trait]
impl RelaySession for SmtpSession {
    async fn probe(&mut self) -> Result<(), ConnectionError> {
        within(self.timeouts.command(), self.client.noop()).await?;
        Ok(())
    }

    async fn transmit(&mut self, envelope: &Envelope) -> Result<(), ConnectionError> {
        let command = self.timeouts.command();

        within(command, self.client.mail_from(&envelope.sender)).await?;
        within(command, self.client.rcpt_to(&envelope.recipient)).await?;
        within(command, self.client.data()).await?;
        within(self.timeouts.data(), self.client.send_data(&envelope.message)).await?;

        Ok(())
    }

    async fn reset(&mut self) {
        if let Err(e) = within(self.timeouts.command(), self.client.rset()).await {
            tracing::debug!("RSET failed: {e}");
        }
    }

    async fn quit(&mut self) {
        if let Err(e) = within(self.timeouts.command(), self.client.quit()).await {
            tracing::debug!("QUIT failed: {e}");
        }
    }
}

/// Run one step of the conversation under a deadline.
async fn within<T>(
    limit: Duration,
    step: impl Future<Output = Result<T, ClientError>> + Send,
) -> Result<T, ConnectionError> {
    tokio::time::timeout(limit, step)
        .await
        .map_err(|_| ConnectionError::Timeout(limit))?
        .map_err(ConnectionError::from)
}
