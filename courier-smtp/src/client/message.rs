//! Plain-text message builder.

use std::io::Write;

use base64::{Engine, engine::general_purpose::STANDARD};

use super::error::{ClientError, Result};

/// Builder for a single-part `text/plain` message.
///
/// # Examples
///
/// ```no_run
/// use courier_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .body("This is the message body")
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl MessageBuilder {
    /// Creates a new empty message builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From header.
    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    /// Sets the Subject header. Non-ASCII subjects are encoded per RFC 2047.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a custom header, emitted in insertion order after the standard ones.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the message body content.
    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(content.into());
        self
    }

    /// Builds the final message with CRLF line endings.
    ///
    /// # Errors
    ///
    /// Returns an error if no sender or recipient was given, or a header
    /// value contains a line break.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .ok_or_else(|| ClientError::ParseError("Message has no sender".to_string()))?;

        if self.to.is_empty() {
            return Err(ClientError::ParseError("Message has no recipient".to_string()));
        }

        let mut message = Vec::with_capacity(1024);

        write!(&mut message, "From: {}\r\n", header_value(&from)?)?;
        write!(&mut message, "To: {}\r\n", header_value(&self.to.join(", "))?)?;

        if let Some(subject) = &self.subject {
            write!(&mut message, "Subject: {}\r\n", encode_word(header_value(subject)?))?;
        }

        write!(&mut message, "Date: {}\r\n", chrono::Utc::now().to_rfc2822())?;
        write!(
            &mut message,
            "Message-ID: <{}@{}>\r\n",
            ulid::Ulid::new(),
            domain_of(&from)
        )?;

        for (name, value) in &self.headers {
            write!(&mut message, "{}: {}\r\n", header_value(name)?, header_value(value)?)?;
        }

        write!(&mut message, "MIME-Version: 1.0\r\n")?;
        write!(&mut message, "Content-Type: text/plain; charset=utf-8\r\n")?;
        write!(&mut message, "Content-Transfer-Encoding: 8bit\r\n")?;

        // Blank line between headers and body
        write!(&mut message, "\r\n")?;

        if let Some(body) = &self.body {
            write!(&mut message, "{}", normalize_line_endings(body))?;
        }

        String::from_utf8(message).map_err(|e| ClientError::Utf8Error(e.utf8_error()))
    }
}

/// Header values must stay on one line; anything else would allow header injection.
fn header_value(value: &str) -> Result<&str> {
    if value.contains(['\r', '\n']) {
        return Err(ClientError::ParseError(format!(
            "Header value contains a line break: {value:?}"
        )));
    }
    Ok(value)
}

/// RFC 2047 `B` encoding for non-ASCII header text.
fn encode_word(text: &str) -> String {
    if text.is_ascii() {
        text.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(text))
    }
}

fn domain_of(address: &str) -> &str {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim_end_matches('>'))
        .filter(|domain| !domain.is_empty())
        .unwrap_or("localhost")
}

fn normalize_line_endings(body: &str) -> String {
    let mut normalized = String::with_capacity(body.len() + body.len() / 32);
    for line in body.split_inclusive('\n') {
        let content = line
            .strip_suffix('\n')
            .map_or(line, |l| l.strip_suffix('\r').unwrap_or(l));
        normalized.push_str(content);
        if line.ends_with('\n') {
            normalized.push_str("\r\n");
        }
    }
    normalized
}
