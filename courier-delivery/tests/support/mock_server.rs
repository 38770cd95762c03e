//! Mock SMTP relay for exercising the SMTP-backed connection pool
//!
//! This module provides a configurable plaintext mock relay that can:
#![allow(dead_code)] // Test utility module - not all methods used in every test
//! - Advertise and answer `AUTH PLAIN` / `AUTH LOGIN`
//! - Simulate transaction outcomes (success, temporary and permanent rejection)
//! - Drop connections after a number of commands
//! - Track received commands and accepted connections for verification
//!
//! # Example
//!
//! ```rust,no_run
//! use support::mock_server::MockSmtpServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MockSmtpServer::builder()
//!     .with_auth_response(535, "5.7.8 Authentication credentials invalid")
//!     .build()
//!     .await?;
//!
//! // Point a plaintext relay config at server.addr()
//!
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// EHLO command with hostname
    Ehlo(String),
    /// AUTH command with mechanism
    Auth(String),
    /// MAIL FROM command
    MailFrom(String),
    /// RCPT TO command
    RcptTo(String),
    /// DATA command
    Data,
    /// Message content (after DATA), dot-stuffing removed
    MessageContent(String),
    /// NOOP command
    Noop,
    /// RSET command
    Rset,
    /// QUIT command
    Quit,
    /// Unknown/other command
    Other(String),
}

/// Response configuration for SMTP commands
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// SMTP status code (e.g., 250, 550)
    pub code: u16,
    /// Response message
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

/// Mock SMTP server configuration
#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    capabilities: Vec<String>,
    auth_response: SmtpResponse,
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    data_end_response: SmtpResponse,

    // Failure injection
    drop_after_commands: Option<usize>,
    response_delay: Option<Duration>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "Mock SMTP Relay"),
            capabilities: vec![
                "mock.relay".to_string(),
                "AUTH PLAIN LOGIN".to_string(),
                "SIZE 10000000".to_string(),
            ],
            auth_response: SmtpResponse::new(235, "2.7.0 Accepted"),
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            data_end_response: SmtpResponse::new(250, "OK: Message accepted"),
            drop_after_commands: None,
            response_delay: None,
        }
    }
}

impl MockServerConfig {
    fn ehlo_bytes(&self) -> Vec<u8> {
        let mut response = String::new();
        let last = self.capabilities.len().saturating_sub(1);

        for (i, cap) in self.capabilities.iter().enumerate() {
            let separator = if i < last { '-' } else { ' ' };
            let _ = write!(&mut response, "250{separator}{cap}\r\n");
        }

        response.into_bytes()
    }
}

#[derive(Default)]
struct Shared {
    commands: RwLock<Vec<SmtpCommand>>,
    connections: AtomicUsize,
    shutdown: AtomicBool,
}

/// Mock SMTP server for testing
pub struct MockSmtpServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl MockSmtpServer {
    /// Create a new builder for configuring the mock server
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder::new()
    }

    /// Get the address the server is listening on
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get all commands received by the server
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.shared.commands.read().await.clone()
    }

    /// Bodies of every accepted message
    pub async fn messages(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|cmd| match cmd {
                SmtpCommand::MessageContent(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    /// Number of TCP connections accepted so far
    #[must_use]
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::Relaxed)
    }

    /// Stop accepting connections
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
    }

    async fn record(shared: &Shared, command: SmtpCommand) {
        shared.commands.write().await.push(command);
    }

    /// Handle a single client connection
    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        shared: Arc<Shared>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut handled = 0;

        writer.write_all(&config.greeting.to_bytes()).await?;
        writer.flush().await?;

        loop {
            line.clear();

            // Silently close the connection, as a relay dropping idle clients would
            if let Some(drop_after) = config.drop_after_commands
                && handled >= drop_after
            {
                return Ok(());
            }

            let Ok(read) = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await
            else {
                return Ok(());
            };
            if read? == 0 {
                return Ok(());
            }
            handled += 1;

            let cmd_line = line.trim_end().to_string();
            let (verb, argument) = cmd_line
                .split_once(' ')
                .map_or((cmd_line.as_str(), ""), |(v, a)| (v, a));

            let (response, command) = match verb.to_uppercase().as_str() {
                "EHLO" => (config.ehlo_bytes(), SmtpCommand::Ehlo(argument.to_string())),
                "AUTH" => {
                    let mechanism = argument
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_uppercase();

                    if mechanism == "LOGIN" {
                        // Username and password each answer a challenge
                        for challenge in ["VXNlcm5hbWU6", "UGFzc3dvcmQ6"] {
                            writer
                                .write_all(format!("334 {challenge}\r\n").as_bytes())
                                .await?;
                            writer.flush().await?;
                            line.clear();
                            if reader.read_line(&mut line).await? == 0 {
                                return Ok(());
                            }
                        }
                    }

                    (config.auth_response.to_bytes(), SmtpCommand::Auth(mechanism))
                }
                "MAIL" => (
                    config.mail_from_response.to_bytes(),
                    SmtpCommand::MailFrom(argument.to_string()),
                ),
                "RCPT" => (
                    config.rcpt_to_response.to_bytes(),
                    SmtpCommand::RcptTo(argument.to_string()),
                ),
                "DATA" => {
                    Self::record(&shared, SmtpCommand::Data).await;
                    writer
                        .write_all(&SmtpResponse::new(354, "End data with <CR><LF>.<CR><LF>").to_bytes())
                        .await?;
                    writer.flush().await?;

                    let mut content = String::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line == ".\r\n" {
                            break;
                        }
                        content.push_str(line.strip_prefix('.').unwrap_or(&line));
                    }

                    (
                        config.data_end_response.to_bytes(),
                        SmtpCommand::MessageContent(content),
                    )
                }
                "NOOP" => (SmtpResponse::new(250, "OK").to_bytes(), SmtpCommand::Noop),
                "RSET" => (SmtpResponse::new(250, "OK").to_bytes(), SmtpCommand::Rset),
                "QUIT" => {
                    Self::record(&shared, SmtpCommand::Quit).await;
                    writer
                        .write_all(&SmtpResponse::new(221, "Bye").to_bytes())
                        .await?;
                    writer.flush().await?;
                    return Ok(());
                }
                _ => (
                    SmtpResponse::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(cmd_line.clone()),
                ),
            };

            Self::record(&shared, command).await;

            if let Some(delay) = config.response_delay {
                tokio::time::sleep(delay).await;
            }

            writer.write_all(&response).await?;
            writer.flush().await?;
        }
    }
}

/// Builder for configuring a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    fn new() -> Self {
        Self {
            config: MockServerConfig::default(),
        }
    }

    /// Set the greeting message
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Replace the EHLO capability lines (the first is the server name)
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    /// Set the final reply to AUTH
    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the MAIL FROM response
    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the RCPT TO response
    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    /// Set the response after message content (after `<CRLF>.<CRLF>`)
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    /// Drop each connection after N commands
    #[must_use]
    pub const fn with_network_error_after_commands(mut self, count: usize) -> Self {
        self.config.drop_after_commands = Some(count);
        self
    }

    /// Add a delay before sending each response
    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.config.response_delay = Some(delay);
        self
    }

    /// Build and start the mock SMTP server
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to a port
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        // Bind to a random available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let shared = Arc::new(Shared::default());

        let server_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                if server_shared.shutdown.load(Ordering::Relaxed) {
                    break;
                }

                // Accept connection with timeout to allow checking shutdown flag
                let accept_result = timeout(Duration::from_millis(100), listener.accept()).await;

                if let Ok(Ok((stream, _peer))) = accept_result {
                    server_shared.connections.fetch_add(1, Ordering::Relaxed);

                    let config = Arc::clone(&config);
                    let shared = Arc::clone(&server_shared);
                    tokio::spawn(async move {
                        if let Err(e) = MockSmtpServer::handle_client(stream, config, shared).await
                        {
                            tracing::debug!("Mock server client error: {}", e);
                        }
                    });
                }
            }
        });

        Ok(MockSmtpServer { addr, shared })
    }
}
