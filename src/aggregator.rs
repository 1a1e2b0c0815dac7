// src/aggregator.rs
//! # Aggregation Orchestrator
//!
//! Single entry point fanning one request out to every active source.
//! Each source resolves independently through the cache:
//!
//! ```text
//! PENDING -> CACHE_HIT  -> CACHED_FRESH
//!         -> CACHE_MISS -> FETCH_OK   -> LIVE
//!                       -> FETCH_FAIL -> STALE_HIT  -> CACHED_STALE
//!                                     -> STALE_MISS -> EMPTY
//! ```
//!
//! Sources run in small concurrent groups with a delay in between; one
//! slow, quota-exhausted, or broken source never aborts its siblings. Only
//! when every active source lands on EMPTY does the whole call count as a
//! failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};

use crate::cache::MentionCache;
use crate::config::{AppConfig, FetchConfig};
use crate::dedup;
use crate::mention::{Mention, SourceType};
use crate::sentiment::Enricher;
use crate::sources::{DynSourceAdapter, SourceFetch};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregateParams {
    /// Restrict to these source names; `None` means every enabled source.
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    pub terms: Vec<String>,
    pub brand: String,
    #[serde(default)]
    pub max_per_source: Option<usize>,
    #[serde(default)]
    pub days_back: Option<u32>,
    #[serde(default = "default_true")]
    pub include_sentiment: bool,
}

/// Terminal state of one source within one aggregation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServeMode {
    Live,
    CacheFresh,
    CacheStale,
    Empty,
}

impl ServeMode {
    /// Did this source end up contributing cached rather than live data?
    pub fn is_cached(&self) -> bool {
        matches!(self, ServeMode::CacheFresh | ServeMode::CacheStale)
    }
}

/// Bookkeeping for one source: how it resolved and what it contributed.
/// `error` carries partial-progress trouble even when data was served.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub mode: ServeMode,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceError {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AggregateResult {
    pub mentions: Vec<Mention>,
    /// Post-dedup counts per source.
    pub by_source: HashMap<String, usize>,
    /// Counts per sentiment label; empty when enrichment was off.
    pub by_sentiment: HashMap<String, usize>,
    pub sources: Vec<SourceReport>,
    /// One entry per source that resolved to EMPTY.
    pub errors: Vec<SourceError>,
    pub duration_ms: u64,
    pub success: bool,
}

/// Result of a targeted single-source refresh.
#[derive(Debug, Serialize)]
pub struct SingleSourceResult {
    pub source: String,
    pub mode: ServeMode,
    pub mentions: Vec<Mention>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

pub struct Aggregator {
    adapters: Vec<DynSourceAdapter>,
    cache: Arc<MentionCache>,
    enricher: Enricher,
    fetch_cfg: FetchConfig,
    sentiment_enabled: bool,
}

impl Aggregator {
    /// Panics when `adapters` is empty: that is a wiring bug, not a runtime
    /// condition.
    pub fn new(
        adapters: Vec<DynSourceAdapter>,
        cache: Arc<MentionCache>,
        enricher: Enricher,
        cfg: &AppConfig,
    ) -> Self {
        assert!(
            !adapters.is_empty(),
            "aggregator requires at least one source adapter"
        );
        Self {
            adapters,
            cache,
            enricher,
            fetch_cfg: cfg.fetch,
            sentiment_enabled: cfg.sentiment.enabled,
        }
    }

    /// The cache is owned here but shared with tests and warmup jobs.
    pub fn cache(&self) -> Arc<MentionCache> {
        Arc::clone(&self.cache)
    }

    /// Enabled source names with their types, for the listing endpoint.
    pub fn source_names(&self) -> Vec<(&'static str, SourceType)> {
        self.adapters
            .iter()
            .map(|a| (a.name(), a.source_type()))
            .collect()
    }

    pub async fn aggregate(&self, params: &AggregateParams) -> AggregateResult {
        let started = Instant::now();
        self.cache.sweep();

        let active = self.active_set(params.sources.as_deref());
        if active.is_empty() {
            return AggregateResult {
                mentions: Vec::new(),
                by_source: HashMap::new(),
                by_sentiment: HashMap::new(),
                sources: Vec::new(),
                errors: vec![SourceError {
                    source: "*".to_string(),
                    message: "no enabled source matches the requested filter".to_string(),
                }],
                duration_ms: started.elapsed().as_millis() as u64,
                success: false,
            };
        }

        let max_per_source = params.max_per_source.unwrap_or(self.fetch_cfg.max_results);
        let days_back = params.days_back.unwrap_or(self.fetch_cfg.days_back);

        // Fetch in small groups: politeness to third parties over raw speed.
        let mut reports: Vec<SourceReport> = Vec::with_capacity(active.len());
        let mut gathered: Vec<Mention> = Vec::new();
        let group_size = self.fetch_cfg.batch_size.max(1);
        let mut first_group = true;

        for group in active.chunks(group_size) {
            if !first_group && !self.fetch_cfg.batch_delay().is_zero() {
                tokio::time::sleep(self.fetch_cfg.batch_delay()).await;
            }
            first_group = false;

            let outcomes = join_all(group.iter().map(|adapter| {
                self.resolve_source(
                    Arc::clone(adapter),
                    &params.terms,
                    &params.brand,
                    max_per_source,
                    days_back,
                    false,
                )
            }))
            .await;

            for (report, mentions) in outcomes {
                reports.push(report);
                gathered.extend(mentions);
            }
        }

        let merged = dedup::merge(gathered);
        let mentions = if params.include_sentiment && self.sentiment_enabled {
            self.enricher.enrich(merged, &params.brand).await
        } else {
            merged
        };
        let mentions = sort_for_output(mentions);

        let mut by_source: HashMap<String, usize> = HashMap::new();
        let mut by_sentiment: HashMap<String, usize> = HashMap::new();
        for m in &mentions {
            *by_source.entry(m.source.clone()).or_insert(0) += 1;
            if let Some(s) = &m.sentiment {
                *by_sentiment.entry(s.label.as_str().to_string()).or_insert(0) += 1;
            }
        }

        let errors: Vec<SourceError> = reports
            .iter()
            .filter(|r| r.mode == ServeMode::Empty)
            .map(|r| SourceError {
                source: r.source.clone(),
                message: r
                    .error
                    .clone()
                    .unwrap_or_else(|| "fetch failed".to_string()),
            })
            .collect();

        // Only all-sources-down is a hard failure.
        let success = errors.len() < active.len();
        let duration_ms = started.elapsed().as_millis() as u64;

        counter!("aggregate_runs_total").increment(1);
        histogram!("aggregate_duration_ms").record(duration_ms as f64);
        gauge!("aggregate_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        tracing::info!(
            brand = %params.brand,
            mentions = mentions.len(),
            sources = active.len(),
            failed = errors.len(),
            duration_ms,
            "aggregation complete"
        );

        AggregateResult {
            mentions,
            by_source,
            by_sentiment,
            sources: reports,
            errors,
            duration_ms,
            success,
        }
    }

    /// Targeted refresh of one source. Skips the fresh-cache check (this is
    /// a refresh), but keeps the stale fallback on failure.
    pub async fn fetch_single_source(
        &self,
        source: &str,
        terms: &[String],
        brand: &str,
        max_results: Option<usize>,
        days_back: Option<u32>,
    ) -> SingleSourceResult {
        let adapter = self
            .adapters
            .iter()
            .find(|a| a.name().eq_ignore_ascii_case(source));
        let adapter = match adapter {
            Some(a) => Arc::clone(a),
            None => {
                return SingleSourceResult {
                    source: source.to_string(),
                    mode: ServeMode::Empty,
                    mentions: Vec::new(),
                    error: Some(format!("unknown source {:?}", source)),
                    success: false,
                }
            }
        };

        let max = max_results.unwrap_or(self.fetch_cfg.max_results);
        let days = days_back.unwrap_or(self.fetch_cfg.days_back);
        let (report, mentions) = self
            .resolve_source(adapter, terms, brand, max, days, true)
            .await;

        SingleSourceResult {
            source: report.source,
            mode: report.mode,
            mentions,
            error: report.error,
            success: report.mode != ServeMode::Empty,
        }
    }

    /// Intersection of enabled adapters and the caller's filter.
    fn active_set(&self, filter: Option<&[String]>) -> Vec<DynSourceAdapter> {
        match filter {
            None => self.adapters.clone(),
            Some(wanted) => self
                .adapters
                .iter()
                .filter(|a| wanted.iter().any(|w| w.eq_ignore_ascii_case(a.name())))
                .cloned()
                .collect(),
        }
    }

    /// One source's whole resolution. Never returns an error: every outcome
    /// is a terminal serve mode.
    async fn resolve_source(
        &self,
        adapter: DynSourceAdapter,
        terms: &[String],
        brand: &str,
        max_results: usize,
        days_back: u32,
        skip_fresh_cache: bool,
    ) -> (SourceReport, Vec<Mention>) {
        let name = adapter.name();

        if !skip_fresh_cache {
            if let Some(data) = self.cache.get(name, brand) {
                tracing::debug!(source = name, brand, count = data.len(), "cache hit");
                let report = SourceReport {
                    source: name.to_string(),
                    mode: ServeMode::CacheFresh,
                    count: data.len(),
                    error: None,
                };
                return (report, data);
            }
        }

        counter!("source_fetch_total").increment(1);
        let fetch = match tokio::time::timeout(
            self.fetch_cfg.timeout(),
            adapter.fetch(terms, max_results, days_back),
        )
        .await
        {
            Ok(fetch) => fetch,
            Err(_) => SourceFetch::failed(format!(
                "fetch timed out after {}s",
                self.fetch_cfg.timeout_secs
            )),
        };

        if fetch.success() || fetch.error.is_none() {
            // Live data, possibly partial, possibly legitimately empty.
            // Failures are never cached; successful results always are.
            self.cache.put(name, brand, fetch.mentions.clone());
            if let Some(err) = &fetch.error {
                tracing::warn!(source = name, error = %err, "partial fetch trouble");
            }
            let report = SourceReport {
                source: name.to_string(),
                mode: ServeMode::Live,
                count: fetch.mentions.len(),
                error: fetch.error,
            };
            return (report, fetch.mentions);
        }

        let err = fetch
            .error
            .unwrap_or_else(|| "fetch failed".to_string());
        tracing::warn!(source = name, error = %err, "fetch failed, trying stale cache");

        match self.cache.get_stale(name, brand) {
            Some(data) => {
                let report = SourceReport {
                    source: name.to_string(),
                    mode: ServeMode::CacheStale,
                    count: data.len(),
                    error: Some(err),
                };
                (report, data)
            }
            None => {
                counter!("source_empty_total").increment(1);
                let report = SourceReport {
                    source: name.to_string(),
                    mode: ServeMode::Empty,
                    count: 0,
                    error: Some(err),
                };
                (report, Vec::new())
            }
        }
    }
}

/// High-engagement mentions first; newest first within each group. Stable,
/// so equal keys keep the deterministic merge order.
fn sort_for_output(mut mentions: Vec<Mention>) -> Vec<Mention> {
    mentions.sort_by(|a, b| {
        b.is_high_engagement
            .cmp(&a.is_high_engagement)
            .then(b.published_at.cmp(&a.published_at))
    });
    mentions
}
