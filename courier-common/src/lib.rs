pub mod config;
pub mod error;
pub mod logging;

pub use error::ConfigurationError;
pub use tracing;
