/// Prometheus metrics for production observability
///
/// Collects request, fetch, and cache metrics for the aggregation engine.
/// The embedding service exposes the encoded registry on its own scrape
/// endpoint.
use crate::error::FetchSource;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Instant;

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

/// Labels for find-request metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// Request status ("success", "error")
    pub status: String,
    /// Error category when status is "error", "none" otherwise
    pub category: String,
}

/// Labels for per-source fetch metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FetchLabels {
    /// Sub-fetch name (e.g. "base_entities", "enrollments")
    pub source: String,
    /// Fetch status ("success", "error")
    pub status: String,
}

pub struct MetricsCollector {
    registry: RwLock<Registry>,

    /// Total find calls by status and error category
    pub agg_find_total: Family<RequestLabels, Counter>,

    /// Find call latency in seconds
    pub agg_find_duration_seconds: Histogram,

    /// Find calls currently in flight
    pub agg_active_finds: Gauge,

    /// Total sub-fetches by source and status
    pub agg_fetch_total: Family<FetchLabels, Counter>,

    /// Sub-fetch latency in seconds by source
    pub agg_fetch_duration_seconds: Histogram,

    /// Access-scope cache hits
    pub agg_context_cache_hits_total: Counter,

    /// Access-scope cache misses
    pub agg_context_cache_misses_total: Counter,

    /// Attribute metadata cache hits
    pub agg_attribute_cache_hits_total: Counter,

    /// Attribute metadata cache misses
    pub agg_attribute_cache_misses_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Counter names are registered without the `_total` suffix; the
        // encoder appends it.
        let agg_find_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "agg_find",
            "Total number of aggregation find calls",
            agg_find_total.clone(),
        );

        // Buckets: 10ms, 25ms, 63ms, 156ms, 391ms, ~1s, ~2.4s, ~6s, ~15s, ~38s
        let agg_find_duration_seconds = Histogram::new(exponential_buckets(0.01, 2.5, 10));
        registry.register(
            "agg_find_duration_seconds",
            "Find call latency histogram in seconds",
            agg_find_duration_seconds.clone(),
        );

        let agg_active_finds = Gauge::default();
        registry.register(
            "agg_active_finds",
            "Number of find calls currently being processed",
            agg_active_finds.clone(),
        );

        let agg_fetch_total = Family::<FetchLabels, Counter>::default();
        registry.register(
            "agg_fetch",
            "Total number of sub-fetches by source and status",
            agg_fetch_total.clone(),
        );

        let agg_fetch_duration_seconds = Histogram::new(exponential_buckets(0.005, 2.5, 10));
        registry.register(
            "agg_fetch_duration_seconds",
            "Sub-fetch latency histogram in seconds",
            agg_fetch_duration_seconds.clone(),
        );

        let agg_context_cache_hits_total = Counter::default();
        registry.register(
            "agg_context_cache_hits",
            "Total number of access-scope cache hits",
            agg_context_cache_hits_total.clone(),
        );

        let agg_context_cache_misses_total = Counter::default();
        registry.register(
            "agg_context_cache_misses",
            "Total number of access-scope cache misses",
            agg_context_cache_misses_total.clone(),
        );

        let agg_attribute_cache_hits_total = Counter::default();
        registry.register(
            "agg_attribute_cache_hits",
            "Total number of attribute metadata cache hits",
            agg_attribute_cache_hits_total.clone(),
        );

        let agg_attribute_cache_misses_total = Counter::default();
        registry.register(
            "agg_attribute_cache_misses",
            "Total number of attribute metadata cache misses",
            agg_attribute_cache_misses_total.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            agg_find_total,
            agg_find_duration_seconds,
            agg_active_finds,
            agg_fetch_total,
            agg_fetch_duration_seconds,
            agg_context_cache_hits_total,
            agg_context_cache_misses_total,
            agg_attribute_cache_hits_total,
            agg_attribute_cache_misses_total,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        encode(&mut buffer, &registry).expect("encoding metrics should succeed");
        buffer
    }

    pub fn record_find_success(&self, duration: std::time::Duration) {
        self.agg_find_total
            .get_or_create(&RequestLabels {
                status: "success".to_string(),
                category: "none".to_string(),
            })
            .inc();
        self.agg_find_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_find_error(&self, duration: std::time::Duration, category: &str) {
        self.agg_find_total
            .get_or_create(&RequestLabels {
                status: "error".to_string(),
                category: category.to_string(),
            })
            .inc();
        self.agg_find_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_fetch(&self, source: FetchSource, duration: std::time::Duration, ok: bool) {
        self.agg_fetch_total
            .get_or_create(&FetchLabels {
                source: source.as_str().to_string(),
                status: if ok { "success" } else { "error" }.to_string(),
            })
            .inc();
        self.agg_fetch_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_context_cache_hit(&self) {
        self.agg_context_cache_hits_total.inc();
    }

    pub fn record_context_cache_miss(&self) {
        self.agg_context_cache_misses_total.inc();
    }

    pub fn record_attribute_cache_hit(&self) {
        self.agg_attribute_cache_hits_total.inc();
    }

    pub fn record_attribute_cache_miss(&self) {
        self.agg_attribute_cache_misses_total.inc();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for timing a find call.
///
/// Increments the in-flight gauge on creation; records duration and outcome
/// when marked. An unmarked drop counts as an error.
pub struct FindMetrics {
    start: Instant,
    completed: bool,
}

impl FindMetrics {
    pub fn new() -> Self {
        METRICS.agg_active_finds.inc();
        Self {
            start: Instant::now(),
            completed: false,
        }
    }

    pub fn success(mut self) {
        METRICS.record_find_success(self.start.elapsed());
        self.completed = true;
        METRICS.agg_active_finds.dec();
    }

    pub fn error(mut self, category: &str) {
        METRICS.record_find_error(self.start.elapsed(), category);
        self.completed = true;
        METRICS.agg_active_finds.dec();
    }
}

impl Default for FindMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FindMetrics {
    fn drop(&mut self) {
        if !self.completed {
            METRICS.record_find_error(self.start.elapsed(), "unknown");
            METRICS.agg_active_finds.dec();
        }
    }
}
