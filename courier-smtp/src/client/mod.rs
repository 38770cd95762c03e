//! SMTP client used to submit mail to an authenticated relay.
//!
//! Unlike a one-shot transaction runner, [`SmtpClient`] exposes each command
//! so a caller can hold a session open, probe it with `NOOP`, and run many
//! `MAIL`/`RCPT`/`DATA` transactions over it.
//!
//! # Examples
//!
//! ```no_run
//! use courier_smtp::client::{MessageBuilder, SmtpClient, tls_config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client =
//!     SmtpClient::connect_tls("smtp.example.com:465", "smtp.example.com", tls_config(false)?)
//!         .await?;
//! client.read_greeting().await?;
//! let ehlo = client.ehlo("client.example.com").await?;
//! client.authenticate(&ehlo, "user@example.com", "secret").await?;
//!
//! let message = MessageBuilder::new()
//!     .from("user@example.com")
//!     .to("recipient@example.com")
//!     .subject("Hello")
//!     .body("Hello World")
//!     .build()?;
//!
//! client.mail_from("user@example.com").await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//! client.send_data(&message).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

#[allow(clippy::module_inception)]
mod client;
mod error;
mod message;
mod response;

pub use client::{SmtpClient, tls_config};
pub use tokio_rustls::rustls::ClientConfig;
pub use error::{ClientError, Result};
pub use message::MessageBuilder;
pub use response::{Response, ResponseLine};
