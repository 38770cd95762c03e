//! Outbound delivery metrics
//!
//! Tracks the relay conversation of the connection pool:
//! - Duration of every send attempt (`email_send_duration_seconds`)
//! - Delivery outcomes and attempts per delivery
//! - Reconnects and the number of checked-out connections

use std::{
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
    time::Duration,
};

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter, UpDownCounter},
};

use crate::MetricsError;

/// Histogram name for the per-attempt send duration.
pub const SEND_DURATION_METRIC: &str = "email_send_duration_seconds";

/// Result of a single send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Failed,
}

impl SendOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Why a connection was re-established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectTrigger {
    /// Failed liveness probe while being returned to the pool
    Release,
    /// Interposed between two send attempts of one delivery
    Retry,
    /// Initial connection while the pool is being built
    Startup,
}

impl ReconnectTrigger {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Retry => "retry",
            Self::Startup => "startup",
        }
    }
}

/// Delivery metrics collector
///
/// Instruments are created against the global meter, so a collector built
/// before (or without) an exporter records into the no-op provider. The local
/// atomic counters are always accurate and back the accessor methods.
#[derive(Debug)]
pub struct DeliveryMetrics {
    /// Distribution of send attempt durations, labelled by outcome
    send_duration: Histogram<f64>,

    /// Total number of deliveries by final status
    deliveries_total: Counter<u64>,

    /// Distribution of attempts used per delivery
    attempts: Histogram<u64>,

    /// Total number of connection (re)establishments by trigger and result
    reconnects_total: Counter<u64>,

    /// Number of connections currently checked out of the pool
    checked_out: UpDownCounter<i64>,

    send_observations: AtomicU64,
    send_failures: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    reconnects: AtomicU64,
    checked_out_count: AtomicI64,
}

impl DeliveryMetrics {
    /// Create a new delivery metrics collector
    ///
    /// # Errors
    ///
    /// Returns an error if metric instruments cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        let meter = meter();

        let send_duration = meter
            .f64_histogram(SEND_DURATION_METRIC)
            .with_description("Time spent sending an email")
            .with_unit("s")
            .with_boundaries(vec![
                0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
            ])
            .build();

        let deliveries_total = meter
            .u64_counter("courier.delivery.total")
            .with_description("Total number of deliveries by final status")
            .build();

        let attempts = meter
            .u64_histogram("courier.delivery.attempts")
            .with_description("Distribution of send attempts used per delivery")
            .build();

        let reconnects_total = meter
            .u64_counter("courier.pool.reconnects.total")
            .with_description("Total number of relay connection attempts by trigger")
            .build();

        let checked_out = meter
            .i64_up_down_counter("courier.pool.checked_out")
            .with_description("Number of connections currently checked out of the pool")
            .build();

        Ok(Self {
            send_duration,
            deliveries_total,
            attempts,
            reconnects_total,
            checked_out,
            send_observations: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            checked_out_count: AtomicI64::new(0),
        })
    }

    /// Record the duration of one send attempt, whatever its outcome
    pub fn record_send_duration(&self, duration: Duration, outcome: SendOutcome) {
        self.send_duration.record(
            duration.as_secs_f64(),
            &[KeyValue::new("outcome", outcome.as_str())],
        );
        self.send_observations.fetch_add(1, Ordering::Relaxed);
        if outcome == SendOutcome::Failed {
            self.send_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a delivery that reached the relay
    pub fn record_delivery_success(&self, attempts: u32) {
        self.deliveries_total
            .add(1, &[KeyValue::new("status", "delivered")]);
        self.attempts.record(u64::from(attempts), &[]);
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivery that exhausted its retry budget or was rejected
    pub fn record_delivery_failure(&self, attempts: u32, reason: &'static str) {
        self.deliveries_total.add(
            1,
            &[
                KeyValue::new("status", "failed"),
                KeyValue::new("reason", reason),
            ],
        );
        self.attempts.record(u64::from(attempts), &[]);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection (re)establishment attempt
    pub fn record_reconnect(&self, trigger: ReconnectTrigger, success: bool) {
        self.reconnects_total.add(
            1,
            &[
                KeyValue::new("trigger", trigger.as_str()),
                KeyValue::new("result", if success { "ok" } else { "error" }),
            ],
        );
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection leaving the pool
    pub fn record_checkout(&self) {
        self.checked_out.add(1, &[]);
        self.checked_out_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection returning to the pool
    pub fn record_checkin(&self) {
        self.checked_out.add(-1, &[]);
        self.checked_out_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Number of send durations observed so far
    #[must_use]
    pub fn send_observations(&self) -> u64 {
        self.send_observations.load(Ordering::Relaxed)
    }

    /// Number of observed send attempts that failed
    #[must_use]
    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Current number of checked-out connections
    #[must_use]
    pub fn checked_out(&self) -> i64 {
        self.checked_out_count.load(Ordering::Relaxed)
    }
}

/// Get the OpenTelemetry meter for delivery metrics
fn meter() -> Meter {
    opentelemetry::global::meter("courier.delivery")
}
