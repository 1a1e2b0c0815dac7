use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder and expose a static gauge for the
    /// configured cache TTL.
    pub fn init(cache_ttl_secs: u64) -> Self {
        // Use default buckets to avoid API differences across crate versions.
        let builder = PrometheusBuilder::new();

        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");

        describe_series();
        gauge!("cache_soft_ttl_secs").set(cache_ttl_secs as f64);

        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn describe_series() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("source_fetch_total", "Adapter fetch attempts.");
        describe_counter!(
            "source_fetch_errors_total",
            "Adapter transport/parse errors (per term or feed)."
        );
        describe_counter!("source_items_total", "Items parsed out of source payloads.");
        describe_counter!(
            "source_empty_total",
            "Sources that resolved EMPTY (failed with no stale fallback)."
        );
        describe_histogram!(
            "source_parse_ms",
            "Source payload parse time in milliseconds."
        );
        describe_counter!(
            "cache_fresh_hits_total",
            "Cache reads served within the soft TTL."
        );
        describe_counter!(
            "cache_stale_hits_total",
            "Error-path cache reads served past the soft TTL."
        );
        describe_counter!("cache_misses_total", "Cache reads with no fresh entry.");
        describe_counter!("aggregate_runs_total", "Aggregation calls handled.");
        describe_counter!(
            "aggregate_dedup_removed_total",
            "Mentions removed by cross-source deduplication."
        );
        describe_histogram!(
            "aggregate_duration_ms",
            "Aggregation wall time in milliseconds."
        );
        describe_gauge!("aggregate_last_run_ts", "Unix ts of the last aggregation run.");
        describe_counter!(
            "sentiment_fallback_total",
            "Sentiment calls that resolved to the neutral fallback."
        );
        describe_gauge!("cache_soft_ttl_secs", "Configured cache soft TTL in seconds.");
    });
}
