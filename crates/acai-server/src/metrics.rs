//! HTTP server instruments.
//!
//! The names below are what existing dashboards query; do not rename them.

use core::time::Duration;
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

pub const REQUESTS: &str = "http.server.requests";
pub const ERRORS: &str = "http.server.errors";
pub const DURATION_MS: &str = "http.server.duration.ms";

pub const METHOD_KEY: &str = "http.method";
pub const ROUTE_KEY: &str = "http.route";
pub const STATUS_CODE_KEY: &str = "http.status_code";

/// Request counters and latency histogram, created once per process.
///
/// Cloning is cheap: clones share the same underlying instruments. Build one
/// from the service meter at startup and hand it to
/// [`MetricsLayer`](crate::middleware::MetricsLayer).
///
/// Instrument construction cannot fail at the call site. If the SDK rejects
/// an instrument it logs the problem and hands back a no-op, so recording is
/// always safe and never interrupts request handling.
#[derive(Clone)]
pub struct HttpMetrics {
    requests: Counter<u64>,
    errors: Counter<u64>,
    duration_ms: Histogram<f64>,
}

impl HttpMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            requests: meter
                .u64_counter(REQUESTS)
                .with_unit("{request}")
                .with_description("Total number of HTTP requests")
                .build(),
            errors: meter
                .u64_counter(ERRORS)
                .with_unit("{request}")
                .with_description("Total number of HTTP error responses (status >= 400)")
                .build(),
            duration_ms: meter
                .f64_histogram(DURATION_MS)
                .with_unit("ms")
                .with_description("Request duration in milliseconds")
                .build(),
        }
    }

    /// Records one finished request.
    ///
    /// All three instruments receive the same attribute set so they can be
    /// sliced by the same dimensions.
    pub fn record(&self, method: &str, route: &str, status: u16, elapsed: Duration) {
        let attrs = [
            KeyValue::new(METHOD_KEY, method.to_owned()),
            KeyValue::new(ROUTE_KEY, route.to_owned()),
            KeyValue::new(STATUS_CODE_KEY, i64::from(status)),
        ];

        self.requests.add(1, &attrs);
        self.duration_ms.record(elapsed.as_secs_f64() * 1_000.0, &attrs);
        if status >= 400 {
            self.errors.add(1, &attrs);
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! In-memory collection of exported measurements for assertions.
    //!
    //! Available to unit tests and, with the `testing` feature, to the
    //! integration tests under `tests/`.

    use opentelemetry::{Value, metrics::MeterProvider as _};
    use opentelemetry_sdk::metrics::{
        InMemoryMetricExporter, PeriodicReader, SdkMeterProvider,
        data::{AggregatedMetrics, MetricData},
    };
    use std::collections::HashMap;

    use super::{HttpMetrics, STATUS_CODE_KEY};

    /// A meter provider wired to an in-memory exporter.
    pub struct Harness {
        provider: SdkMeterProvider,
        exporter: InMemoryMetricExporter,
    }

    /// Flattened view of one collection cycle, keyed by status code.
    #[derive(Debug, Default)]
    pub struct Snapshot {
        pub requests: HashMap<i64, u64>,
        pub errors: HashMap<i64, u64>,
        /// `(count, sum, min)` per status code.
        pub durations: HashMap<i64, (u64, f64, Option<f64>)>,
        pub attributes: Vec<Vec<(String, String)>>,
    }

    impl Snapshot {
        pub fn total_requests(&self) -> u64 {
            self.requests.values().sum()
        }

        pub fn total_errors(&self) -> u64 {
            self.errors.values().sum()
        }

        pub fn total_durations(&self) -> u64 {
            self.durations.values().map(|(count, ..)| count).sum()
        }
    }

    impl Default for Harness {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Harness {
        pub fn new() -> Self {
            let exporter = InMemoryMetricExporter::default();
            let reader = PeriodicReader::builder(exporter.clone()).build();
            let provider = SdkMeterProvider::builder().with_reader(reader).build();
            Self { provider, exporter }
        }

        pub fn metrics(&self) -> HttpMetrics {
            HttpMetrics::new(&self.provider.meter("acai-server-test"))
        }

        pub fn snapshot(&self) -> Snapshot {
            self.provider.force_flush().unwrap();
            let exported = self.exporter.get_finished_metrics().unwrap();
            let mut snapshot = Snapshot::default();
            let Some(latest) = exported.last() else {
                return snapshot;
            };

            for scope in latest.scope_metrics() {
                for metric in scope.metrics() {
                    match (metric.name(), metric.data()) {
                        (super::REQUESTS, AggregatedMetrics::U64(MetricData::Sum(sum))) => {
                            for point in sum.data_points() {
                                let status = status_of(point.attributes());
                                *snapshot.requests.entry(status).or_default() += point.value();
                                let attrs = point
                                    .attributes()
                                    .map(|kv| (kv.key.as_str().to_owned(), kv.value.to_string()))
                                    .collect();
                                snapshot.attributes.push(attrs);
                            }
                        }
                        (super::ERRORS, AggregatedMetrics::U64(MetricData::Sum(sum))) => {
                            for point in sum.data_points() {
                                let status = status_of(point.attributes());
                                *snapshot.errors.entry(status).or_default() += point.value();
                            }
                        }
                        (
                            super::DURATION_MS,
                            AggregatedMetrics::F64(MetricData::Histogram(histogram)),
                        ) => {
                            for point in histogram.data_points() {
                                let status = status_of(point.attributes());
                                let entry = snapshot
                                    .durations
                                    .entry(status)
                                    .or_insert((0, 0.0, None));
                                entry.0 += point.count();
                                entry.1 += point.sum();
                                entry.2 = match (entry.2, point.min()) {
                                    (Some(a), Some(b)) => Some(a.min(b)),
                                    (a, b) => a.or(b),
                                };
                            }
                        }
                        _ => {}
                    }
                }
            }
            snapshot
        }
    }

    fn status_of<'a>(attrs: impl Iterator<Item = &'a opentelemetry::KeyValue>) -> i64 {
        attrs
            .filter(|kv| kv.key.as_str() == STATUS_CODE_KEY)
            .find_map(|kv| match kv.value {
                Value::I64(v) => Some(v),
                _ => None,
            })
            .unwrap_or(-1)
    }
}
