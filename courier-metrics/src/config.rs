//! Metrics configuration

use std::time::Duration;

use serde::Deserialize;

/// Configuration for metrics collection and export
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetricsConfig {
    /// Enable or disable the OTLP export.
    ///
    /// When disabled, instruments still exist but record against the no-op
    /// global meter.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// OTLP/HTTP endpoint URL for metrics export
    ///
    /// Common values:
    /// - `http://localhost:4318/v1/metrics` (local collector)
    /// - `http://otel-collector:4318/v1/metrics` (Docker Compose service name)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// How often metrics are pushed.
    ///
    /// Default: 60 seconds
    #[serde(default = "default_export_interval_secs")]
    pub export_interval_secs: u64,
}

const fn default_enabled() -> bool {
    false
}

fn default_endpoint() -> String {
    "http://localhost:4318/v1/metrics".to_string()
}

const fn default_export_interval_secs() -> u64 {
    60
}

impl MetricsConfig {
    #[must_use]
    pub const fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_secs)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            export_interval_secs: default_export_interval_secs(),
        }
    }
}
