use std::path::{Path, PathBuf};

use courier_common::{
    ConfigurationError,
    config::{DeliveryConfig, PoolConfig, RelayConfig},
    internal, logging, tracing,
};
use courier_delivery::{ConnectionPool, DeliveryService};
use courier_metrics::MetricsConfig;
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const ENV_CONFIG: &str = "COURIER_CONFIG";

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./courier.config.ron", "/etc/courier/courier.config.ron"];

/// Process-wide configuration, read once at startup.
#[derive(Debug, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Courier {
    /// Load the configuration file (if any), overlay the environment and
    /// validate the result.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or parsed, or the resulting configuration
    /// is unusable (for instance, no relay credentials).
    pub fn load() -> anyhow::Result<Self> {
        let mut courier = match find_config_file(std::env::var(ENV_CONFIG).ok())? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        courier.apply_env(|name| std::env::var(name).ok())?;
        courier.validate()?;

        Ok(courier)
    }

    /// # Errors
    ///
    /// If the file cannot be read or is not valid RON.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;

        ron::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
    }

    /// Overlay `COURIER_*` variables, as resolved by `lookup`.
    ///
    /// # Errors
    ///
    /// If a numeric variable does not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.relay.apply_env(&lookup)?;
        self.pool.apply_env(&lookup)?;
        self.delivery.apply_env(&lookup)
    }

    /// # Errors
    ///
    /// The first setting that makes the configuration unusable.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.relay.validate()?;
        self.pool.validate()?;
        self.delivery.validate()
    }

    /// Initialise logging and metrics, then build the connection pool.
    ///
    /// Relay outages at this point are logged, not fatal; the pool heals on
    /// first use.
    ///
    /// # Errors
    ///
    /// If metrics cannot be initialised or the pool size is invalid.
    pub async fn start(self) -> anyhow::Result<Running> {
        logging::init();

        let metrics = courier_metrics::init_metrics(&self.metrics)?;

        internal!(
            level = INFO,
            "Starting courier: relay {}, pool size {}, retry budget {}",
            self.relay.address(),
            self.pool.size,
            self.delivery.max_attempts
        );

        let pool = ConnectionPool::builder(self.relay)
            .size(self.pool.size)
            .metrics(metrics.delivery.clone())
            .build()
            .await?;

        Ok(Running {
            service: DeliveryService::new(pool.clone(), self.delivery),
            pool,
        })
    }
}

/// A started courier: the pool and the service that sends through it.
#[derive(Debug)]
pub struct Running {
    service: DeliveryService,
    pool: ConnectionPool,
}

impl Running {
    pub const fn service(&self) -> &DeliveryService {
        &self.service
    }

    /// Close every pooled connection and flush metrics.
    ///
    /// # Errors
    ///
    /// If the metrics exporter fails to flush.
    pub async fn stop(self) -> anyhow::Result<()> {
        internal!(level = INFO, "Shutting down...");
        self.pool.quit().await;
        courier_metrics::shutdown_metrics()?;
        Ok(())
    }
}

/// Resolve after CTRL+C or SIGTERM.
///
/// # Errors
///
/// If the signal handlers cannot be installed.
pub async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    }

    Ok(())
}

/// Find the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable (must exist if set)
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// No file at all is fine: everything can come from the environment.
fn find_config_file(from_env: Option<String>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(env_path) = from_env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!("{ENV_CONFIG} points to non-existent file: {}", path.display());
    }

    let found = DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists());

    if found.is_none() {
        tracing::debug!("No configuration file found, using defaults and environment");
    }

    Ok(found)
}
