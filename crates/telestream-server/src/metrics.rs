use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Prometheus content type for the text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Outcome label for `range_requests_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    Valid,
    Invalid,
    Unsatisfiable,
}

impl RangeOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Unsatisfiable => "unsatisfiable",
        }
    }
}

/// Prometheus metrics exported by the relay.
pub struct Metrics {
    registry: Registry,

    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    stream_bytes_served_total: IntCounter,
    range_requests_total: IntCounterVec,
    upstream_errors_total: IntCounterVec,
    connection_load: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let build_info = IntGaugeVec::new(
            Opts::new(
                "telestream_build_info",
                "Build information for telestream-server.",
            ),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests."),
            &["route", "method", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Time until response headers were produced, in seconds.",
            )
            .buckets(vec![
                0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["route", "method"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let stream_bytes_served_total = IntCounter::new(
            "stream_bytes_served_total",
            "Total media bytes written to response bodies.",
        )?;
        registry.register(Box::new(stream_bytes_served_total.clone()))?;

        let range_requests_total = IntCounterVec::new(
            Opts::new(
                "range_requests_total",
                "Total number of requests carrying a Range header.",
            ),
            &["result"],
        )?;
        registry.register(Box::new(range_requests_total.clone()))?;

        let upstream_errors_total = IntCounterVec::new(
            Opts::new(
                "upstream_errors_total",
                "Total number of upstream connection failures.",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(upstream_errors_total.clone()))?;

        let connection_load = IntGaugeVec::new(
            Opts::new(
                "connection_load",
                "In-flight streaming requests per upstream connection.",
            ),
            &["connection"],
        )?;
        registry.register(Box::new(connection_load.clone()))?;

        let this = Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            stream_bytes_served_total,
            range_requests_total,
            upstream_errors_total,
            connection_load,
        };

        for outcome in [
            RangeOutcome::Valid,
            RangeOutcome::Invalid,
            RangeOutcome::Unsatisfiable,
        ] {
            this.range_requests_total.with_label_values(&[outcome.label()]);
        }
        for kind in ["manifest", "ambiguous", "unavailable", "io"] {
            this.upstream_errors_total.with_label_values(&[kind]);
        }

        Ok(this)
    }

    pub fn observe_http_request(&self, route: &str, method: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[route, method, &status])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[route, method])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_bytes_served(&self, bytes: u64) {
        self.stream_bytes_served_total.inc_by(bytes);
    }

    pub fn inc_range_request(&self, outcome: RangeOutcome) {
        self.range_requests_total
            .with_label_values(&[outcome.label()])
            .inc();
    }

    pub fn inc_upstream_error(&self, kind: &str) {
        self.upstream_errors_total.with_label_values(&[kind]).inc();
    }

    /// Mirror the pool's current per-connection loads into the `connection_load` gauge.
    pub fn set_connection_loads(&self, loads: &[usize]) {
        for (connection, load) in loads.iter().enumerate() {
            self.connection_load
                .with_label_values(&[&connection.to_string()])
                .set(i64::try_from(*load).unwrap_or(i64::MAX));
        }
    }

    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposition(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode().unwrap()).unwrap()
    }

    #[test]
    fn fixed_labels_are_present_before_any_traffic() {
        let text = exposition(&Metrics::new().unwrap());
        assert!(text.contains("range_requests_total{result=\"unsatisfiable\"} 0"));
        assert!(text.contains("upstream_errors_total{kind=\"io\"} 0"));
        assert!(text.contains("telestream_build_info"));
    }

    #[test]
    fn counters_and_gauges_accumulate() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_bytes_served(10);
        metrics.observe_bytes_served(5);
        metrics.inc_range_request(RangeOutcome::Valid);
        metrics.inc_upstream_error("unavailable");
        metrics.set_connection_loads(&[2, 0]);
        metrics.observe_http_request("/*path", "GET", 206, Duration::from_millis(3));

        let text = exposition(&metrics);
        assert!(text.contains("stream_bytes_served_total 15"));
        assert!(text.contains("range_requests_total{result=\"valid\"} 1"));
        assert!(text.contains("upstream_errors_total{kind=\"unavailable\"} 1"));
        assert!(text.contains("connection_load{connection=\"0\"} 2"));
        assert!(text.contains("connection_load{connection=\"1\"} 0"));
        assert!(text.contains(
            "http_requests_total{method=\"GET\",route=\"/*path\",status=\"206\"} 1"
        ));
    }
}
