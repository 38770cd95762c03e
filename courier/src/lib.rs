//! Process wiring for courier: configuration discovery, logging, metrics,
//! the connection pool and graceful shutdown.

pub mod batch;
pub mod controller;

pub use controller::{Courier, Running};
