// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod mention;
pub mod metrics;
pub mod sentiment;
pub mod sources;

// ---- Re-exports for stable public API ----
pub use crate::aggregator::{AggregateParams, AggregateResult, Aggregator};
pub use crate::api::{create_router, AppState};
pub use crate::cache::MentionCache;
pub use crate::mention::{Mention, SourceType};

use std::sync::Arc;

use anyhow::Result;

/// Build the production router from config + environment. Used by the
/// Shuttle entrypoint and by integration tests that want the real wiring.
///
/// The `/metrics` route is not part of this router: the Prometheus recorder
/// is process-global and can be installed only once, so the binary
/// entrypoint installs it and merges `metrics::Metrics::router()` on top.
/// Tests can call this freely without touching global recorder state.
pub async fn app() -> Result<axum::Router> {
    app_with_config(config::load_default())
}

pub fn app_with_config(cfg: config::AppConfig) -> Result<axum::Router> {
    let adapters = sources::build_enabled_adapters(&cfg);
    if adapters.is_empty() {
        anyhow::bail!("no source adapters enabled; check enabled_sources in the config");
    }

    let cache = Arc::new(MentionCache::new(cfg.cache.ttl(), cfg.cache.max_stale()));
    let client = sentiment::build_client_from_env();
    let enricher = sentiment::Enricher::new(client, &cfg.sentiment);
    let aggregator = Arc::new(Aggregator::new(adapters, cache, enricher, &cfg));

    Ok(api::create_router(AppState { aggregator }))
}
