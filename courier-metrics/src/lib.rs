//! OpenTelemetry metrics for courier
//!
//! Metrics are pushed via OTLP to an OpenTelemetry Collector, which can expose
//! them in Prometheus format for scraping.
//!
//! ```text
//! courier → OTLP/HTTP → OpenTelemetry Collector → Prometheus (scrape) → Grafana
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use courier_metrics::{init_metrics, MetricsConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MetricsConfig {
//!     enabled: true,
//!     ..MetricsConfig::default()
//! };
//!
//! let metrics = init_metrics(&config)?;
//! // Hand `metrics.delivery.clone()` to the connection pool.
//! # Ok(())
//! # }
//! ```

mod config;
mod delivery;
mod error;
mod exporter;

use std::sync::Arc;

pub use config::MetricsConfig;
pub use delivery::{DeliveryMetrics, ReconnectTrigger, SEND_DURATION_METRIC, SendOutcome};
pub use error::MetricsError;
use once_cell::sync::OnceCell;
use opentelemetry_sdk::metrics::SdkMeterProvider;

/// Global metrics instance
static METRICS_INSTANCE: OnceCell<Metrics> = OnceCell::new();

/// Provider kept around so buffered data can be flushed at shutdown
static PROVIDER: OnceCell<SdkMeterProvider> = OnceCell::new();

/// Root metrics container
#[derive(Debug)]
pub struct Metrics {
    pub delivery: Arc<DeliveryMetrics>,
}

/// Initialize the metrics system
///
/// Must be called at most once, before any instrument is created. When
/// metrics are disabled no exporter is installed and the instruments record
/// into the no-op global provider.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or if called multiple times.
pub fn init_metrics(config: &MetricsConfig) -> Result<&'static Metrics, MetricsError> {
    if config.enabled {
        tracing::info!(
            endpoint = %config.endpoint,
            "Initializing OpenTelemetry metrics with OTLP exporter"
        );

        let provider = exporter::init_otlp_exporter(&config.endpoint, config.export_interval())?;
        opentelemetry::global::set_meter_provider(provider.clone());
        PROVIDER
            .set(provider)
            .map_err(|_| MetricsError::AlreadyInitialized)?;
    } else {
        tracing::info!("Metrics export is disabled");
    }

    let metrics = Metrics {
        delivery: Arc::new(DeliveryMetrics::new()?),
    };

    METRICS_INSTANCE
        .set(metrics)
        .map_err(|_| MetricsError::AlreadyInitialized)?;

    try_metrics().ok_or(MetricsError::AlreadyInitialized)
}

/// Get the global metrics instance, if `init_metrics` has run
#[must_use]
pub fn try_metrics() -> Option<&'static Metrics> {
    METRICS_INSTANCE.get()
}

/// Check if an exporter is installed
#[must_use]
pub fn is_enabled() -> bool {
    PROVIDER.get().is_some()
}

/// Flush and stop the exporter. A no-op when metrics export is disabled.
///
/// # Errors
///
/// Returns an error if the provider fails to flush.
pub fn shutdown_metrics() -> Result<(), MetricsError> {
    if let Some(provider) = PROVIDER.get() {
        provider
            .shutdown()
            .map_err(|e| MetricsError::OpenTelemetry(e.to_string()))?;
    }
    Ok(())
}
