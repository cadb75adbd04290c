// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_histogram, histogram};

/// Registers descriptions for every router metric. Call once at startup.
pub fn describe_metrics() {
    describe_counter!("router_swaps_total", "Top-level swaps by venue and outcome.");
    describe_counter!("router_quotes_total", "Quotes served by venue.");
    describe_counter!(
        "router_liquidity_ops_total",
        "Liquidity additions and removals by venue and outcome."
    );
    describe_counter!(
        "router_errors_total",
        "Router failures grouped by error category."
    );
    describe_histogram!(
        "router_route_hops",
        "Number of leaf hops executed per routed swap."
    );
}

/// Installs the Prometheus exporter on the given socket address.
#[cfg(feature = "observability")]
pub fn install_prometheus_exporter(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

pub fn increment_swaps(venue: &'static str, outcome: &'static str) {
    counter!("router_swaps_total", 1, "venue" => venue, "outcome" => outcome);
}

pub fn increment_quotes(venue: &'static str) {
    counter!("router_quotes_total", 1, "venue" => venue);
}

pub fn increment_liquidity_ops(op: &'static str, venue: &'static str, outcome: &'static str) {
    counter!("router_liquidity_ops_total", 1, "op" => op, "venue" => venue, "outcome" => outcome);
}

pub fn increment_errors(category: &'static str) {
    counter!("router_errors_total", 1, "category" => category);
}

pub fn record_route_hops(hops: usize) {
    histogram!("router_route_hops", hops as f64);
}

/// Outcome label for a result.
pub fn outcome<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() {
        "ok"
    } else {
        "error"
    }
}
