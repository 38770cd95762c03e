//! Outbound delivery over a pool of long-lived relay connections.
//!
//! - [`Connection`]: one authenticated session that can probe, heal and send
//! - [`ConnectionPool`]: a fixed set of connections, each held by at most one caller
//! - [`DeliveryService`]: acquire, send with a bounded retry budget, release
//!
//! # Usage
//!
//! ```rust,no_run
//! use courier_common::config::{DeliveryConfig, RelayConfig};
//! use courier_delivery::{ConnectionPool, DeliveryService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = ConnectionPool::builder(RelayConfig::default()).size(5).build().await?;
//! let service = DeliveryService::new(pool.clone(), DeliveryConfig::default());
//!
//! let receipt = service
//!     .deliver("user@example.org", "[status] user-1", "Your report is ready")
//!     .await?;
//! println!("delivered after {} attempt(s)", receipt.attempts);
//!
//! pool.quit().await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod error;
mod pool;
pub mod relay;
mod service;

pub use connection::{Connection, Health};
pub use error::{ConnectionError, DeliveryFailed, FailureCause, PoolError};
pub use pool::{ConnectionPool, ConnectionPoolBuilder, PoolStatus, PooledConnection};
pub use service::{DeliveryReceipt, DeliveryService};
