//! Line-oriented batch submission.
//!
//! Each input line is one RON request:
//!
//! ```text
//! (to: "user@example.org", subject: "[status] user-1", body: "Report ready")
//! ```
//!
//! Requests are delivered concurrently; the pool bounds how many are in
//! flight at once.

use courier_common::tracing;
use courier_delivery::DeliveryService;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    task::JoinSet,
};

/// One message to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeliveryRequest {
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

/// Tally of a finished batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub delivered: usize,
    pub failed: usize,
    /// Lines that were not a valid request.
    pub malformed: usize,
}

/// Deliver every request read from `input`, returning once all have finished.
///
/// # Errors
///
/// If reading `input` fails.
pub async fn deliver_all<R>(service: &DeliveryService, input: R) -> std::io::Result<BatchSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = BatchSummary::default();
    let mut in_flight = JoinSet::new();
    let mut lines = input.lines();
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }

        let request: DeliveryRequest = match ron::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(line = line_number, "Skipping malformed request: {e}");
                summary.malformed += 1;
                continue;
            }
        };

        let service = service.clone();
        in_flight.spawn(async move {
            service
                .deliver(&request.to, &request.subject, &request.body)
                .await
        });
    }

    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok(Ok(_receipt)) => summary.delivered += 1,
            Ok(Err(_)) => summary.failed += 1,
            Err(e) => {
                tracing::error!("Delivery task failed: {e}");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use courier_common::config::{DeliveryConfig, RelayConfig};
    use courier_delivery::{ConnectionPool, relay::MockRelay};
    use pretty_assertions::assert_eq;

    use super::*;

    async fn service(relay: &MockRelay) -> DeliveryService {
        let pool = ConnectionPool::builder(RelayConfig::default())
            .size(2)
            .relay(Arc::new(relay.clone()))
            .build()
            .await
            .unwrap();
        DeliveryService::new(pool, DeliveryConfig::default())
    }

    #[tokio::test]
    async fn test_batch_delivers_every_request() {
        let relay = MockRelay::new();
        let service = service(&relay).await;
        let input = b"(to: \"a@example.org\", subject: \"one\", body: \"1\")\n\
            \n\
            // comment\n\
            (to: \"b@example.org\", subject: \"two\")\n\
            (to: \"c@example.org\", subject: \"three\", body: \"3\")\n";

        let summary = deliver_all(&service, &input[..]).await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                delivered: 3,
                failed: 0,
                malformed: 0
            }
        );
        assert_eq!(relay.delivered().len(), 3);
        assert_eq!(service.pool().status().idle, 2);
    }

    #[tokio::test]
    async fn test_batch_counts_failures_and_malformed_lines() {
        let relay = MockRelay::new();
        let service = service(&relay).await;
        relay.fail_all_sends();
        let input = b"(to: \"a@example.org\", subject: \"one\")\nnot ron at all\n";

        let summary = deliver_all(&service, &input[..]).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.delivered, 0);
    }
}
