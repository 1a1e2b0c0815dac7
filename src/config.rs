// src/config.rs
//! Layered configuration: `AGGREGATOR_CONFIG_PATH` env override, then
//! `config/aggregator.toml`, then built-in defaults. A missing or unparsable
//! file never fails startup; the defaults are complete.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mention::ThresholdTable;

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/aggregator.toml";

pub const ALL_SOURCES: [&str; 6] = [
    "reddit",
    "lemmy",
    "trustpilot",
    "temptalia",
    "youtube",
    "news",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Adapter names to run. Defaults to all known sources.
    pub enabled_sources: Vec<String>,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub sentiment: SentimentConfig,
    /// Engagement-threshold policy, overridable per source type.
    pub thresholds: ThresholdTable,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled_sources: ALL_SOURCES.iter().map(|s| s.to_string()).collect(),
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            sentiment: SentimentConfig::default(),
            thresholds: ThresholdTable::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve-fresh window. Two hours balances daily/monthly source quotas
    /// against freshness.
    pub ttl_secs: u64,
    /// Hard cutoff for the error-path stale fallback. Past this, old data is
    /// worse than none.
    pub max_stale_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 2 * 3600,
            max_stale_secs: 24 * 3600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn max_stale(&self) -> Duration {
        Duration::from_secs(self.max_stale_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Sources fetched concurrently per group. Small on purpose: third-party
    /// politeness over raw throughput.
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Outer per-adapter deadline; a timed-out fetch is an ordinary failure.
    pub timeout_secs: u64,
    pub max_results: usize,
    pub days_back: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            batch_delay_ms: 500,
            timeout_secs: 20,
            max_results: 25,
            days_back: 7,
        }
    }
}

impl FetchConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub enabled: bool,
    /// Clamped into 5..=10 by the enricher.
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 8,
            batch_delay_ms: 250,
            timeout_secs: 8,
        }
    }
}

impl SentimentConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Parse a config file.
pub fn load_from(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading aggregator config from {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("parsing aggregator config at {}", path.display()))
}

/// Load using env var + fallback path. Any failure logs a warning and
/// returns the defaults.
pub fn load_default() -> AppConfig {
    let path = std::env::var(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    if !path.exists() {
        return AppConfig::default();
    }
    match load_from(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = ?e, path = %path.display(), "config unusable, using defaults");
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mention::SourceType;

    #[test]
    fn empty_toml_yields_full_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("empty config parses");
        assert_eq!(cfg.enabled_sources.len(), 6);
        assert_eq!(cfg.cache.ttl_secs, 7200);
        assert_eq!(cfg.cache.max_stale_secs, 86400);
        assert_eq!(cfg.fetch.batch_size, 2);
        assert!(cfg.sentiment.enabled);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let raw = r#"
            enabled_sources = ["reddit", "news"]

            [cache]
            ttl_secs = 60

            [thresholds.review]
            min_upvotes = 5
            min_comments = 2
        "#;
        let cfg: AppConfig = toml::from_str(raw).expect("partial config parses");
        assert_eq!(cfg.enabled_sources, vec!["reddit", "news"]);
        assert_eq!(cfg.cache.ttl_secs, 60);
        assert_eq!(cfg.cache.max_stale_secs, 86400);
        assert_eq!(
            cfg.thresholds.for_type(SourceType::Review).min_upvotes,
            Some(5)
        );
        // untouched rows keep the design constants
        assert_eq!(
            cfg.thresholds.for_type(SourceType::Social).min_upvotes,
            Some(100)
        );
    }
}
