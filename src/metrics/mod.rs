use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

/// Prometheus metrics for the fingerprint index service
#[derive(Clone)]
pub struct IndexMetrics {
    // Counters
    pub searches_total: Counter,
    pub search_errors: Counter,
    pub documents_inserted: Counter,
    pub flushes_total: Counter,

    // Gauges
    pub segments: Gauge,
    pub buffer_postings: Gauge,

    // Histograms
    pub search_latency: Histogram,

    registry: Arc<Registry>,
}

impl IndexMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let searches_total = Counter::with_opts(Opts::new(
            "fpindex_searches_total",
            "Total number of searches",
        ))?;
        registry.register(Box::new(searches_total.clone()))?;

        let search_errors = Counter::with_opts(Opts::new(
            "fpindex_search_errors_total",
            "Total number of failed searches",
        ))?;
        registry.register(Box::new(search_errors.clone()))?;

        let documents_inserted = Counter::with_opts(Opts::new(
            "fpindex_documents_inserted_total",
            "Total number of documents inserted",
        ))?;
        registry.register(Box::new(documents_inserted.clone()))?;

        let flushes_total = Counter::with_opts(Opts::new(
            "fpindex_flushes_total",
            "Total number of explicit buffer flushes",
        ))?;
        registry.register(Box::new(flushes_total.clone()))?;

        let segments = Gauge::with_opts(Opts::new(
            "fpindex_segments",
            "Current number of persisted segments",
        ))?;
        registry.register(Box::new(segments.clone()))?;

        let buffer_postings = Gauge::with_opts(Opts::new(
            "fpindex_buffer_postings",
            "Postings waiting in the in-memory buffer",
        ))?;
        registry.register(Box::new(buffer_postings.clone()))?;

        let search_latency = Histogram::with_opts(
            HistogramOpts::new("fpindex_search_latency_seconds", "Search latency")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;
        registry.register(Box::new(search_latency.clone()))?;

        Ok(Self {
            searches_total,
            search_errors,
            documents_inserted,
            flushes_total,
            segments,
            buffer_postings,
            search_latency,
            registry: Arc::new(registry),
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn record_search(&self, duration_secs: f64) {
        self.searches_total.inc();
        self.search_latency.observe(duration_secs);
    }

    pub fn record_search_error(&self) {
        self.search_errors.inc();
    }

    pub fn record_inserts(&self, count: usize) {
        self.documents_inserted.inc_by(count as f64);
    }

    pub fn record_flush(&self) {
        self.flushes_total.inc();
    }

    /// Update the gauges from the current index state
    pub fn set_index_state(&self, segments: usize, buffer_postings: usize) {
        self.segments.set(segments as f64);
        self.buffer_postings.set(buffer_postings as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_metrics_are_exported() {
        let metrics = IndexMetrics::new().unwrap();
        metrics.record_search(0.002);
        metrics.record_search(0.004);
        metrics.record_inserts(3);
        metrics.set_index_state(2, 10);

        assert_eq!(metrics.searches_total.get(), 2.0);
        assert_eq!(metrics.documents_inserted.get(), 3.0);

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metrics.registry().gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("fpindex_searches_total 2"));
        assert!(text.contains("fpindex_segments 2"));
        assert!(text.contains("fpindex_search_latency_seconds_count 2"));
    }

    #[test]
    fn test_separate_registries() {
        let first = IndexMetrics::new().unwrap();
        let second = IndexMetrics::new().unwrap();
        first.record_search_error();
        assert_eq!(first.search_errors.get(), 1.0);
        assert_eq!(second.search_errors.get(), 0.0);
    }
}
