//! Relay replies.

use super::error::{ClientError, Result};

/// A complete reply: its status code and the text of every line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

/// One line of a reply, `250-text` or `250 text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` while more lines follow.
    pub is_last: bool,
    pub message: String,
}

impl ResponseLine {
    /// # Errors
    ///
    /// `ParseError` unless the line is a three-digit code followed by a space,
    /// a dash or nothing at all.
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = || ClientError::ParseError(format!("Malformed response line: '{line}'"));

        let (digits, rest) = line.split_at_checked(3).ok_or_else(malformed)?;
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClientError::ParseError(format!(
                "Invalid status code: '{digits}'"
            )));
        }
        let code = digits.parse::<u16>().map_err(|_| malformed())?;

        let (is_last, message) = match rest.as_bytes().first() {
            None => (true, ""),
            Some(b' ') => (true, &rest[1..]),
            Some(b'-') => (false, &rest[1..]),
            Some(_) => return Err(malformed()),
        };

        Ok(Self {
            code,
            is_last,
            message: message.to_string(),
        })
    }
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Every line of the reply, joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// The extension keywords advertised in an `EHLO` reply, upper-cased.
    ///
    /// The first line of an `EHLO` reply is the server greeting, not an
    /// extension, so it is skipped.
    pub fn capabilities(&self) -> impl Iterator<Item = String> + '_ {
        self.lines.iter().skip(1).map(|line| line.to_ascii_uppercase())
    }

    /// The SASL mechanisms listed on the `AUTH` capability line, if any.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.capabilities()
            .find_map(|line| {
                line.strip_prefix("AUTH")
                    .filter(|rest| rest.is_empty() || rest.starts_with([' ', '=']))
                    .map(|rest| {
                        rest.trim_start_matches('=')
                            .split_whitespace()
                            .map(str::to_string)
                            .collect()
                    })
            })
            .unwrap_or_default()
    }

    /// Take the first complete reply off the front of `buffer`.
    ///
    /// Returns the reply and how many bytes it used, or `None` until the
    /// final line has arrived. Lines may end in CRLF or a bare LF.
    ///
    /// # Errors
    ///
    /// `ParseError` on a malformed line, or when the lines of one reply
    /// disagree on the status code.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = ResponseLine::parse(std::str::from_utf8(raw)?)?;
            match code {
                Some(expected) if expected != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code changed mid-reply: {expected} then {}",
                        line.code
                    )));
                }
                _ => code = Some(line.code),
            }

            lines.push(line.message);
            if line.is_last {
                return Ok(Some((Self::new(line.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_forms() {
        assert_eq!(
            ResponseLine::parse("250-relay.local").unwrap(),
            ResponseLine {
                code: 250,
                is_last: false,
                message: "relay.local".to_string()
            }
        );
        assert!(ResponseLine::parse("354").unwrap().is_last);
        assert!(ResponseLine::parse("25").is_err());
        assert!(ResponseLine::parse("2x0 nope").is_err());
        assert!(ResponseLine::parse("250_OK").is_err());
    }

    #[test]
    fn test_reply_split_across_reads() {
        let partial = b"250-relay.local\r\n250-SIZE";
        assert_eq!(Response::parse_response(partial).unwrap(), None);

        let complete = b"250-relay.local\r\n250-SIZE 1000\r\n250 8BITMIME\r\n";
        let (response, consumed) = Response::parse_response(complete).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(response.lines, vec!["relay.local", "SIZE 1000", "8BITMIME"]);
        assert_eq!(consumed, complete.len());
    }

    #[test]
    fn test_leaves_following_reply_in_buffer() {
        let data = b"250 OK\n354 Go ahead\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response, Response::new(250, vec!["OK".to_string()]));
        assert_eq!(&data[consumed..], b"354 Go ahead\r\n");
    }

    #[test]
    fn test_code_mismatch_is_an_error() {
        let data = b"250-relay.local\r\n550 Oops\r\n";
        assert!(matches!(
            Response::parse_response(data),
            Err(ClientError::ParseError(_))
        ));
    }

    #[test]
    fn test_auth_mechanisms_from_ehlo() {
        let data = b"250-smtp.example.com at your service\r\n250-SIZE 35882577\r\n250-AUTH LOGIN PLAIN XOAUTH2\r\n250 SMTPUTF8\r\n";
        let (response, _) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.auth_mechanisms(), vec!["LOGIN", "PLAIN", "XOAUTH2"]);
    }

    #[test]
    fn test_auth_mechanisms_legacy_equals_form() {
        let response = Response::new(
            250,
            vec!["relay.local".to_string(), "AUTH=LOGIN".to_string()],
        );
        assert_eq!(response.auth_mechanisms(), vec!["LOGIN"]);
    }

    #[test]
    fn test_auth_mechanisms_absent() {
        let response = Response::new(
            250,
            vec!["relay.local".to_string(), "AUTHORITY".to_string()],
        );
        assert!(response.auth_mechanisms().is_empty());
    }
}
