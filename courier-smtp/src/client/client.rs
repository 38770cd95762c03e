//! SMTP client session over implicit TLS or plain TCP.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use courier_common::{incoming, outgoing, tracing};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use super::error::{ClientError, Result};
use super::response::Response;

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// An SMTP client connection that can be either plain TCP or TLS-wrapped.
enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    /// Sends data over the connection.
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Reads data from the connection into the provided buffer.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn shutdown(&mut self) {
        let _ = match self {
            Self::Plain(stream) => stream.shutdown().await,
            Self::Tls(stream) => stream.shutdown().await,
        };
    }
}

/// Build the rustls client configuration used for implicit-TLS sessions.
///
/// Meant to be built once per relay and shared between sessions; loading the
/// platform trust store is not free.
///
/// # Errors
///
/// Returns an error if a platform certificate cannot be added to the store.
pub fn tls_config(accept_invalid_certs: bool) -> Result<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        root_store
            .add(cert)
            .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
    }
    // Log errors but don't fail if some certs couldn't be loaded
    if !certs.errors.is_empty() {
        tracing::warn!(?certs.errors, "Some certificates could not be loaded");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    Ok(Arc::new(config))
}

/// A certificate verifier that accepts all certificates (for testing only).
#[derive(Debug)]
struct NoVerifier;

impl tokio_rustls::rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[tokio_rustls::rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: tokio_rustls::rustls::pki_types::UnixTime,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::ServerCertVerified,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<tokio_rustls::rustls::SignatureScheme> {
        vec![
            tokio_rustls::rustls::SignatureScheme::RSA_PKCS1_SHA256,
            tokio_rustls::rustls::SignatureScheme::RSA_PSS_SHA256,
            tokio_rustls::rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            tokio_rustls::rustls::SignatureScheme::ED25519,
        ]
    }
}

/// An SMTP client for sending commands and receiving responses.
///
/// Only the most recent reply is retained, so a session can stay open for
/// the lifetime of the process.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    last_response: Option<Response>,
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("connected", &self.is_connected())
            .field("tls", &matches!(self.connection, Some(ClientConnection::Tls(_))))
            .finish_non_exhaustive()
    }
}

impl SmtpClient {
    fn from_connection(connection: ClientConnection) -> Self {
        Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            last_response: None,
        }
    }

    /// Opens a plain TCP session to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_connection(ClientConnection::Plain(stream)))
    }

    /// Opens a session to `addr` that is TLS from the first byte (SMTPS).
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection or the TLS handshake fails.
    pub async fn connect_tls(
        addr: &str,
        server_domain: &str,
        config: Arc<ClientConfig>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        let server_name = ServerName::try_from(server_domain.to_string())
            .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

        let tls_stream = TlsConnector::from(config)
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::TlsError(e.to_string()))?;

        Ok(Self::from_connection(ClientConnection::Tls(Box::new(
            tls_stream,
        ))))
    }

    /// Returns `true` while the underlying stream has not been closed.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Returns the last response received, if any.
    #[must_use]
    pub const fn last_response(&self) -> Option<&Response> {
        self.last_response.as_ref()
    }

    /// Reads the initial server greeting, which must be a 220.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the server refuses the session.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        let greeting = self.read_response().await?;
        expect(greeting, |code| code == 220)
    }

    /// Sends a command to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        outgoing!("{command}");
        self.write_line(command).await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let data = format!("{line}\r\n");
        let result = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(data.as_bytes())
            .await;

        if result.is_err() {
            self.connection = None;
        }
        result
    }

    /// Sends a raw command and reads the response.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        self.read_response().await
    }

    /// Sends a line that must not appear in logs (credentials).
    async fn secret_command(&mut self, line: &str) -> Result<Response> {
        outgoing!("<redacted>");
        self.write_line(line).await?;
        self.read_response().await
    }

    /// Sends EHLO with the specified domain; the reply lists the extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or is rejected.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        let response = self.command(&format!("EHLO {domain}")).await?;
        expect(response, |code| code == 250)
    }

    /// Authenticates with the first mechanism the server advertises out of
    /// `PLAIN` and `LOGIN`.
    ///
    /// # Errors
    ///
    /// Returns `AuthUnsupported` if neither mechanism is offered, and an SMTP
    /// error (typically 535) if the credentials are rejected.
    pub async fn authenticate(
        &mut self,
        ehlo: &Response,
        username: &str,
        password: &str,
    ) -> Result<Response> {
        let mechanisms = ehlo.auth_mechanisms();

        if mechanisms.iter().any(|m| m == "PLAIN") {
            self.auth_plain(username, password).await
        } else if mechanisms.iter().any(|m| m == "LOGIN") {
            self.auth_login(username, password).await
        } else {
            Err(ClientError::AuthUnsupported(mechanisms.join(" ")))
        }
    }

    /// `AUTH PLAIN` with an initial response (RFC 4616).
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the credentials are rejected.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = STANDARD.encode(format!("\0{username}\0{password}"));
        let response = self.secret_command(&format!("AUTH PLAIN {token}")).await?;
        expect(response, |code| code == 235)
    }

    /// `AUTH LOGIN`: username and password each answer a 334 challenge.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails or the credentials are rejected.
    pub async fn auth_login(&mut self, username: &str, password: &str) -> Result<Response> {
        let challenge = self.command("AUTH LOGIN").await?;
        expect(challenge, |code| code == 334)?;

        let challenge = self.secret_command(&STANDARD.encode(username)).await?;
        expect(challenge, |code| code == 334)?;

        let response = self.secret_command(&STANDARD.encode(password)).await?;
        expect(response, |code| code == 235)
    }

    /// Sends NOOP; a 250 reply proves the session is still usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer with success.
    pub async fn noop(&mut self) -> Result<Response> {
        let response = self.command("NOOP").await?;
        expect(response, |code| code == 250)
    }

    /// Sends MAIL FROM command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or is rejected.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        let response = self.command(&format!("MAIL FROM:<{from}>")).await?;
        expect(response, |code| code == 250)
    }

    /// Sends RCPT TO command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or is rejected.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        let response = self.command(&format!("RCPT TO:<{to}>")).await?;
        expect(response, |code| code == 250 || code == 251)
    }

    /// Sends DATA command; the server must answer 354.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or is rejected.
    pub async fn data(&mut self) -> Result<Response> {
        let response = self.command("DATA").await?;
        expect(response, |code| code == 354)
    }

    /// Sends the message content, dot-stuffed, followed by the end-of-data marker.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails or the message is not accepted.
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let mut payload = dot_stuff(data);

        // Ensure data ends with CRLF before the terminating dot
        if !payload.ends_with("\r\n") {
            payload.push_str("\r\n");
        }
        payload.push_str(".\r\n");

        outgoing!("<{} bytes of message data>", payload.len());

        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;

        if let Err(e) = connection.send(payload.as_bytes()).await {
            self.connection = None;
            return Err(e);
        }

        let response = self.read_response().await?;
        expect(response, |code| code == 250)
    }

    /// Sends RSET to abandon the current transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rset(&mut self) -> Result<Response> {
        let response = self.command("RSET").await?;
        expect(response, |code| code == 250)
    }

    /// Sends QUIT and closes the stream, whatever the server answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be exchanged.
    pub async fn quit(&mut self) -> Result<Response> {
        let response = self.command("QUIT").await;
        if let Some(mut connection) = self.connection.take() {
            connection.shutdown().await;
        }
        response
    }

    /// Reads a complete SMTP response from the server.
    ///
    /// Any failure here leaves the stream in an unknown position, so the
    /// connection is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the response is malformed.
    async fn read_response(&mut self) -> Result<Response> {
        let result = self.read_response_inner().await;
        match &result {
            Ok(response) => {
                incoming!("{} {}", response.code, response.message());
                self.last_response = Some(response.clone());
            }
            Err(_) => self.connection = None,
        }
        result
    }

    async fn read_response_inner(&mut self) -> Result<Response> {
        loop {
            // Try to parse a complete response from the buffer
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                // Remove consumed bytes from buffer
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                return Ok(response);
            }

            // Need more data - read from connection
            if self.buffer_pos >= self.buffer.len() {
                // Buffer is full but no complete response - expand buffer
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

/// Turn a reply outside the accepted codes into an `SmtpError`.
fn expect(response: Response, accept: impl Fn(u16) -> bool) -> Result<Response> {
    if accept(response.code) {
        Ok(response)
    } else {
        Err(ClientError::SmtpError {
            code: response.code,
            message: response.message(),
        })
    }
}

/// Double every leading dot (RFC 5321 section 4.5.2).
fn dot_stuff(data: &str) -> String {
    let mut stuffed = String::with_capacity(data.len() + 16);
    for line in data.split_inclusive('\n') {
        if line.starts_with('.') {
            stuffed.push('.');
        }
        stuffed.push_str(line);
    }
    stuffed
}
