//! SMTP submission client.
//!
//! A small client for talking to an authenticated mail relay over implicit
//! TLS (SMTPS) or plain TCP. It keeps one session open across many
//! transactions, which is what the connection pool needs.

pub mod client;
