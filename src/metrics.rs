//! Metrics helpers for HexGate.
//!
//! Thin wrappers over the `metrics` crate macros plus the Prometheus
//! exporter that backs the `/metrics` scrape endpoint. The scrape endpoint
//! lives on the main listener but outside the dispatch router, so it is
//! never subject to auth or quota.
//!
//! Provided metrics:
//! * `hexgate_http_requests_total{service,method,code}` (counter)
//! * `hexgate_http_request_duration_seconds{service,method}` (histogram)
use std::time::Instant;

use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const HTTP_REQUESTS_TOTAL: &str = "hexgate_http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "hexgate_http_request_duration_seconds";

/// Install the Prometheus recorder and register metric descriptions.
/// Returns the handle the `/metrics` endpoint renders from.
pub fn init_metrics() -> eyre::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| eyre::eyre!("Failed to install Prometheus recorder: {e}"))?;

    describe_counter!(
        HTTP_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests processed by HexGate."
    );
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Histogram of HTTP request latencies."
    );

    tracing::info!("HexGate metrics recorder installed");
    Ok(handle)
}

/// Increment the request counter for a completed request.
pub fn increment_request_total(service: &str, method: &str, code: u16) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "service" => service.to_string(),
        "method" => method.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}

/// Record a completed request's duration.
pub fn record_request_duration(service: &str, method: &str, duration: std::time::Duration) {
    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "service" => service.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// RAII helper measuring request duration; records on drop so early
/// returns are still observed.
pub struct RequestTimer {
    start: Instant,
    service: String,
    method: String,
}

impl RequestTimer {
    pub fn new(service: &str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            service: service.to_string(),
            method: method.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.service, &self.method, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_recorder_is_noop() {
        // No recorder installed in unit tests; the macros must not panic.
        increment_request_total("user-service", "GET", 200);
        record_request_duration("user-service", "GET", std::time::Duration::from_millis(5));
    }

    #[test]
    fn test_request_timer_records_on_drop() {
        let timer = RequestTimer::new("user-service", "GET");
        drop(timer);
    }
}
