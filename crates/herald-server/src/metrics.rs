//! Metrics collection and export for Herald.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "herald_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "herald_connections_active";
    pub const MESSAGES_TOTAL: &str = "herald_messages_total";
    pub const MESSAGES_BYTES: &str = "herald_messages_bytes";
    pub const EVENTS_INGESTED_TOTAL: &str = "herald_events_ingested_total";
    pub const CHANNELS_ACTIVE: &str = "herald_channels_active";
    pub const SUBSCRIPTIONS_TOTAL: &str = "herald_subscriptions_total";
    pub const PRESENCE_JOINS_TOTAL: &str = "herald_presence_joins_total";
    pub const PRESENCE_LEAVES_TOTAL: &str = "herald_presence_leaves_total";
    pub const AUTH_FAILURES_TOTAL: &str = "herald_auth_failures_total";
    pub const LATENCY_SECONDS: &str = "herald_latency_seconds";
    pub const ERRORS_TOTAL: &str = "herald_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of socket messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of socket messages");
    metrics::describe_counter!(
        names::EVENTS_INGESTED_TOTAL,
        "Events received from producers, by source"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of occupied channels");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of channel subscriptions"
    );
    metrics::describe_counter!(
        names::PRESENCE_JOINS_TOTAL,
        "Users announced as joining a presence channel"
    );
    metrics::describe_counter!(
        names::PRESENCE_LEAVES_TOTAL,
        "Users announced as leaving a presence channel"
    );
    metrics::describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Subscriptions refused by the authorization endpoint"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Socket message processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a socket message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record an event accepted from a producer.
pub fn record_ingested(source: &'static str) {
    counter!(names::EVENTS_INGESTED_TOTAL, "source" => source).increment(1);
}

/// Record message latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record a subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Record a user announced as joining a presence channel.
pub fn record_presence_join() {
    counter!(names::PRESENCE_JOINS_TOTAL).increment(1);
}

/// Record users announced as leaving presence channels.
pub fn record_presence_leaves(count: usize) {
    if count > 0 {
        counter!(names::PRESENCE_LEAVES_TOTAL).increment(count as u64);
    }
}

/// Record a refused subscription.
pub fn record_auth_failure(status: u16) {
    counter!(names::AUTH_FAILURES_TOTAL, "status" => status.to_string()).increment(1);
}

/// Update active channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
