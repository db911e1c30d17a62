//! # Prometheus Metrics
//!
//! Governance counters for the node, scraped by Prometheus at `/metrics` on
//! the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] with
//! the `tontine` namespace so they do not collide with any default global
//! registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

use tontine_protocol::outbox::DispatchReport;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (prometheus handles are reference counted) so it can be
/// shared across request handlers and the dispatcher task.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Withdrawal requests accepted by the engine.
    pub withdrawals_submitted_total: IntCounter,
    /// Votes recorded.
    pub votes_cast_total: IntCounter,
    /// Requests that reached `approved`.
    pub requests_approved_total: IntCounter,
    /// Requests that reached `rejected`, by vote or by settlement failure.
    pub requests_rejected_total: IntCounter,
    /// Settlements that moved funds.
    pub settlements_total: IntCounter,
    /// Approvals that could not be settled.
    pub settlement_failures_total: IntCounter,
    /// Vaults closed by a full withdrawal.
    pub vaults_closed_total: IntCounter,
    /// Notifications handed to the notifier successfully.
    pub notifications_delivered_total: IntCounter,
    /// Notification attempts that failed or were abandoned.
    pub notifications_failed_total: IntCounter,
    /// Latency of governed operations (submit, vote) in seconds.
    pub operation_latency_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric creation");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric registration");
    counter
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("tontine".into()), None)
            .expect("failed to create prometheus registry");

        let withdrawals_submitted_total = counter(
            &registry,
            "withdrawals_submitted_total",
            "Total number of withdrawal requests accepted",
        );
        let votes_cast_total = counter(
            &registry,
            "votes_cast_total",
            "Total number of votes recorded",
        );
        let requests_approved_total = counter(
            &registry,
            "requests_approved_total",
            "Total number of withdrawal requests approved",
        );
        let requests_rejected_total = counter(
            &registry,
            "requests_rejected_total",
            "Total number of withdrawal requests rejected",
        );
        let settlements_total = counter(
            &registry,
            "settlements_total",
            "Total number of settlements that moved funds",
        );
        let settlement_failures_total = counter(
            &registry,
            "settlement_failures_total",
            "Total number of approvals rejected for insufficient funds at settlement",
        );
        let vaults_closed_total = counter(
            &registry,
            "vaults_closed_total",
            "Total number of vaults closed by a full withdrawal",
        );
        let notifications_delivered_total = counter(
            &registry,
            "notifications_delivered_total",
            "Total number of notifications delivered",
        );
        let notifications_failed_total = counter(
            &registry,
            "notifications_failed_total",
            "Total number of failed or abandoned notification attempts",
        );

        let operation_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Latency of governed operations in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            withdrawals_submitted_total,
            votes_cast_total,
            requests_approved_total,
            requests_rejected_total,
            settlements_total,
            settlement_failures_total,
            vaults_closed_total,
            notifications_delivered_total,
            notifications_failed_total,
            operation_latency_seconds,
        }
    }

    /// Folds one dispatcher pass into the notification counters.
    pub fn record_dispatch(&self, report: &DispatchReport) {
        self.notifications_delivered_total
            .inc_by(report.delivered as u64);
        self.notifications_failed_total
            .inc_by((report.failed + report.dropped) as u64);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_are_namespaced() {
        let metrics = NodeMetrics::new();
        metrics.votes_cast_total.inc();
        let body = metrics.encode().unwrap();
        assert!(body.contains("tontine_votes_cast_total 1"));
        assert!(body.contains("tontine_operation_latency_seconds"));
    }

    #[test]
    fn dispatch_reports_feed_notification_counters() {
        let metrics = NodeMetrics::new();
        metrics.record_dispatch(&DispatchReport {
            delivered: 3,
            failed: 1,
            dropped: 1,
        });
        assert_eq!(metrics.notifications_delivered_total.get(), 3);
        assert_eq!(metrics.notifications_failed_total.get(), 2);
    }
}
