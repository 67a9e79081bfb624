//! Per-process request counters (spec §5: "no shared in-memory mutable
//! core-state across requests besides metric counters (monotonic)").
//! Deliberately not a metrics framework the teacher stack doesn't already
//! depend on — plain atomics, read back by the `/metrics` handler.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

#[derive(Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    responses_4xx: AtomicU64,
    responses_5xx: AtomicU64,
    proxy_unavailable_total: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status(&self, status: http::StatusCode) {
        if status.is_client_error() {
            self.responses_4xx.fetch_add(1, Ordering::Relaxed);
        } else if status.is_server_error() {
            self.responses_5xx.fetch_add(1, Ordering::Relaxed);
        }
        if status == http::StatusCode::SERVICE_UNAVAILABLE {
            self.proxy_unavailable_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn render_prometheus(&self) -> String {
        format!(
            "# TYPE nivo_gateway_requests_total counter\n\
             nivo_gateway_requests_total {}\n\
             # TYPE nivo_gateway_responses_4xx_total counter\n\
             nivo_gateway_responses_4xx_total {}\n\
             # TYPE nivo_gateway_responses_5xx_total counter\n\
             nivo_gateway_responses_5xx_total {}\n\
             # TYPE nivo_gateway_proxy_unavailable_total counter\n\
             nivo_gateway_proxy_unavailable_total {}\n",
            self.requests_total.load(Ordering::Relaxed),
            self.responses_4xx.load(Ordering::Relaxed),
            self.responses_5xx.load(Ordering::Relaxed),
            self.proxy_unavailable_total.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counts_requests_and_classifies_status() {
        let metrics = Metrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_status(http::StatusCode::NOT_FOUND);
        metrics.record_status(http::StatusCode::SERVICE_UNAVAILABLE);

        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("nivo_gateway_requests_total 2"));
        assert!(rendered.contains("nivo_gateway_responses_4xx_total 1"));
        assert!(rendered.contains("nivo_gateway_responses_5xx_total 1"));
        assert!(rendered.contains("nivo_gateway_proxy_unavailable_total 1"));
    }
}
