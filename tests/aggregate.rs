// tests/aggregate.rs
//! Orchestrator behavior under partial failure, cache interplay, dedup
//! through the pipeline, and result bookkeeping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use brand_mention_aggregator::aggregator::{
    AggregateParams, Aggregator, ServeMode,
};
use brand_mention_aggregator::cache::MentionCache;
use brand_mention_aggregator::config::AppConfig;
use brand_mention_aggregator::mention::{
    Engagement, Mention, MentionSeed, Sentiment, SourceType, ThresholdTable,
};
use brand_mention_aggregator::sentiment::{Enricher, MockSentiment};
use brand_mention_aggregator::sources::{DynSourceAdapter, SourceAdapter, SourceFetch};
use chrono::{Duration, Utc};

const BRAND: &str = "velvet luxe";
const HOUR_MS: u64 = 3_600_000;

fn mention(source: &str, title: &str, upvotes: Option<u64>, age_hours: i64) -> Mention {
    MentionSeed {
        source: source.to_string(),
        source_type: SourceType::Social,
        url: format!("https://example.com/{}/{}", source, title),
        title: title.to_string(),
        snippet: title.to_string(),
        full_text: None,
        matched_keyword: BRAND.to_string(),
        published_at: Utc::now() - Duration::hours(age_hours),
        engagement: Engagement {
            upvotes,
            ..Default::default()
        },
    }
    .into_mention(&ThresholdTable::default())
}

/// Scripted adapter: fixed fetch outcome plus a call counter.
struct StubAdapter {
    name: &'static str,
    mentions: Vec<Mention>,
    error: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl StubAdapter {
    fn ok(name: &'static str, mentions: Vec<Mention>) -> (DynSourceAdapter, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = Arc::new(Self {
            name,
            mentions,
            error: None,
            calls: Arc::clone(&calls),
        });
        (adapter, calls)
    }

    fn failing(name: &'static str, error: &str) -> (DynSourceAdapter, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = Arc::new(Self {
            name,
            mentions: Vec::new(),
            error: Some(error.to_string()),
            calls: Arc::clone(&calls),
        });
        (adapter, calls)
    }
}

#[async_trait::async_trait]
impl SourceAdapter for StubAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Social
    }

    async fn fetch(&self, _terms: &[String], _max: usize, _days: u32) -> SourceFetch {
        self.calls.fetch_add(1, Ordering::SeqCst);
        SourceFetch {
            mentions: self.mentions.clone(),
            error: self.error.clone(),
        }
    }
}

fn build(adapters: Vec<DynSourceAdapter>) -> Aggregator {
    let mut cfg = AppConfig::default();
    cfg.fetch.batch_delay_ms = 0;
    cfg.fetch.timeout_secs = 5;
    cfg.sentiment.batch_delay_ms = 0;

    let cache = Arc::new(MentionCache::new(cfg.cache.ttl(), cfg.cache.max_stale()));
    let enricher = Enricher::new(
        Arc::new(MockSentiment {
            fixed: Sentiment::from_score(0.6),
        }),
        &cfg.sentiment,
    );
    Aggregator::new(adapters, cache, enricher, &cfg)
}

fn params() -> AggregateParams {
    AggregateParams {
        sources: None,
        terms: vec![BRAND.to_string()],
        brand: BRAND.to_string(),
        max_per_source: None,
        days_back: Some(0),
        include_sentiment: false,
    }
}

fn wall_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_millis() as u64
}

#[tokio::test]
async fn one_failing_source_does_not_abort_its_siblings() {
    let (a, _) = StubAdapter::ok(
        "Alpha",
        vec![
            mention("Alpha", "post one", Some(3), 1),
            mention("Alpha", "post two", Some(4), 2),
        ],
    );
    let (b, _) = StubAdapter::failing("Beta", "rate limited (429)");
    let (c, _) = StubAdapter::ok("Gamma", vec![mention("Gamma", "post three", Some(5), 3)]);

    let agg = build(vec![a, b, c]);
    let result = agg.aggregate(&params()).await;

    assert!(result.success, "partial failure is still a success");
    assert_eq!(result.mentions.len(), 3);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].source, "Beta");
    assert!(result.errors[0].message.contains("429"));

    let beta = result
        .sources
        .iter()
        .find(|r| r.source == "Beta")
        .expect("report for Beta");
    assert_eq!(beta.mode, ServeMode::Empty);
    assert_eq!(beta.count, 0);
    assert!(result
        .sources
        .iter()
        .filter(|r| r.source != "Beta")
        .all(|r| r.mode == ServeMode::Live));
}

#[tokio::test]
async fn all_sources_down_with_no_cache_is_the_only_hard_failure() {
    let (a, _) = StubAdapter::failing("Alpha", "dns failure");
    let (b, _) = StubAdapter::failing("Beta", "quota exhausted");
    let (c, _) = StubAdapter::failing("Gamma", "500 from upstream");

    let agg = build(vec![a, b, c]);
    let result = agg.aggregate(&params()).await;

    assert!(!result.success);
    assert!(result.mentions.is_empty());
    assert_eq!(result.errors.len(), 3);
    assert!(result.by_source.is_empty());
}

#[tokio::test]
async fn failed_fetch_falls_back_to_stale_cache_and_never_evicts() {
    let (a, _) = StubAdapter::failing("Alpha", "connection reset");
    let agg = build(vec![a]);

    // entry stored 3h ago: past the 2h soft TTL, within the 24h max-age
    let stale_data = vec![mention("Alpha", "yesterday's post", Some(9), 20)];
    agg.cache()
        .put_at("Alpha", BRAND, stale_data, wall_now_ms() - 3 * HOUR_MS);

    let result = agg.aggregate(&params()).await;

    assert!(result.success, "stale-served source is not a failure");
    assert_eq!(result.mentions.len(), 1);
    assert!(result.errors.is_empty());

    let report = &result.sources[0];
    assert_eq!(report.mode, ServeMode::CacheStale);
    assert!(
        report.error.as_deref().is_some_and(|e| e.contains("reset")),
        "masked error still surfaces in the report"
    );

    // a second failing run still finds the entry
    let again = agg.aggregate(&params()).await;
    assert_eq!(again.mentions.len(), 1);
    assert_eq!(again.sources[0].mode, ServeMode::CacheStale);
}

#[tokio::test]
async fn fresh_cache_short_circuits_the_adapter() {
    let (a, calls) = StubAdapter::ok("Alpha", vec![mention("Alpha", "live post", Some(1), 1)]);
    let agg = build(vec![a]);

    agg.cache()
        .put("Alpha", BRAND, vec![mention("Alpha", "cached post", Some(2), 2)]);

    let result = agg.aggregate(&params()).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0, "no fetch on a fresh hit");
    assert_eq!(result.sources[0].mode, ServeMode::CacheFresh);
    assert_eq!(result.mentions.len(), 1);
    assert_eq!(result.mentions[0].title, "cached post");
}

#[tokio::test]
async fn live_results_are_written_back_to_the_cache() {
    let (a, calls) = StubAdapter::ok("Alpha", vec![mention("Alpha", "first", Some(1), 1)]);
    let agg = build(vec![a]);

    let first = agg.aggregate(&params()).await;
    assert_eq!(first.sources[0].mode, ServeMode::Live);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // second run is served from cache
    let second = agg.aggregate(&params()).await;
    assert_eq!(second.sources[0].mode, ServeMode::CacheFresh);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.mentions.len(), 1);
}

#[tokio::test]
async fn duplicate_mentions_across_cache_and_fetch_deduplicate_end_to_end() {
    // A returns two copies of the same content, 5 and 40 upvotes
    let (a, _) = StubAdapter::ok(
        "Alpha",
        vec![
            mention("Alpha", "same launch post", Some(5), 2),
            mention("Alpha", "same launch post", Some(40), 1),
        ],
    );
    let (b, calls_b) = StubAdapter::ok("Beta", vec![mention("Beta", "unrelated take", None, 1)]);

    let agg = build(vec![a, b]);
    // B's cache already holds one fresh mention
    agg.cache()
        .put("Beta", BRAND, vec![mention("Beta", "cached take", Some(2), 3)]);

    let result = agg.aggregate(&params()).await;

    assert_eq!(calls_b.load(Ordering::SeqCst), 0);
    assert_eq!(result.mentions.len(), 2, "one deduped from A, one cached from B");
    assert_eq!(result.by_source.get("Alpha"), Some(&1));
    assert_eq!(result.by_source.get("Beta"), Some(&1));

    let alpha = result
        .mentions
        .iter()
        .find(|m| m.source == "Alpha")
        .expect("Alpha survivor");
    assert_eq!(alpha.engagement.upvotes, Some(40));
}

#[tokio::test]
async fn enrichment_populates_sentiment_and_counts() {
    let (a, _) = StubAdapter::ok(
        "Alpha",
        vec![
            mention("Alpha", "one", Some(1), 1),
            mention("Alpha", "two", Some(2), 2),
        ],
    );
    let agg = build(vec![a]);

    let mut p = params();
    p.include_sentiment = true;
    let result = agg.aggregate(&p).await;

    assert!(result.mentions.iter().all(|m| m.sentiment.is_some()));
    assert_eq!(result.by_sentiment.get("positive"), Some(&2));
}

#[tokio::test]
async fn sentiment_is_skipped_when_not_requested() {
    let (a, _) = StubAdapter::ok("Alpha", vec![mention("Alpha", "one", Some(1), 1)]);
    let agg = build(vec![a]);

    let result = agg.aggregate(&params()).await;
    assert!(result.mentions.iter().all(|m| m.sentiment.is_none()));
    assert!(result.by_sentiment.is_empty());
}

#[tokio::test]
async fn source_filter_narrows_the_active_set() {
    let (a, calls_a) = StubAdapter::ok("Alpha", vec![mention("Alpha", "one", Some(1), 1)]);
    let (b, calls_b) = StubAdapter::ok("Beta", vec![mention("Beta", "two", Some(2), 2)]);
    let agg = build(vec![a, b]);

    let mut p = params();
    p.sources = Some(vec!["alpha".to_string()]);
    let result = agg.aggregate(&p).await;

    assert_eq!(calls_a.load(Ordering::SeqCst), 1);
    assert_eq!(calls_b.load(Ordering::SeqCst), 0);
    assert_eq!(result.mentions.len(), 1);
    assert_eq!(result.sources.len(), 1);
}

#[tokio::test]
async fn filter_matching_nothing_fails_without_panicking() {
    let (a, _) = StubAdapter::ok("Alpha", vec![]);
    let agg = build(vec![a]);

    let mut p = params();
    p.sources = Some(vec!["Nonexistent".to_string()]);
    let result = agg.aggregate(&p).await;

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.mentions.is_empty());
}

#[tokio::test]
async fn successful_empty_fetch_is_live_not_a_failure() {
    let (a, _) = StubAdapter::ok("Alpha", vec![]);
    let agg = build(vec![a]);

    let result = agg.aggregate(&params()).await;
    assert!(result.success);
    assert!(result.errors.is_empty());
    assert_eq!(result.sources[0].mode, ServeMode::Live);
    assert_eq!(result.sources[0].count, 0);
}

#[tokio::test]
async fn high_engagement_sorts_before_recency() {
    let (a, _) = StubAdapter::ok(
        "Alpha",
        vec![
            mention("Alpha", "quiet but new", Some(1), 1),
            mention("Alpha", "hot but old", Some(500), 48),
        ],
    );
    let agg = build(vec![a]);

    let result = agg.aggregate(&params()).await;
    assert_eq!(result.mentions[0].title, "hot but old");
    assert_eq!(result.mentions[1].title, "quiet but new");
}

#[tokio::test]
async fn single_source_refresh_bypasses_fresh_cache() {
    let (a, calls) = StubAdapter::ok("Alpha", vec![mention("Alpha", "fresh fetch", Some(1), 1)]);
    let agg = build(vec![a]);

    agg.cache()
        .put("Alpha", BRAND, vec![mention("Alpha", "cached", Some(2), 2)]);

    let result = agg
        .fetch_single_source("alpha", &[BRAND.to_string()], BRAND, None, None)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1, "refresh always fetches");
    assert!(result.success);
    assert_eq!(result.mode, ServeMode::Live);
    assert_eq!(result.mentions[0].title, "fresh fetch");
}

#[tokio::test]
async fn single_source_refresh_rejects_unknown_names() {
    let (a, _) = StubAdapter::ok("Alpha", vec![]);
    let agg = build(vec![a]);

    let result = agg
        .fetch_single_source("Nope", &[BRAND.to_string()], BRAND, None, None)
        .await;
    assert!(!result.success);
    assert!(result.error.is_some_and(|e| e.contains("unknown source")));
}
