// tests/api_http.rs
//! In-process router tests: the HTTP boundary the (out-of-scope) UI
//! consumes. Partial failure must look like success at this layer.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt; // for oneshot

use brand_mention_aggregator::aggregator::Aggregator;
use brand_mention_aggregator::api::{create_router, AppState};
use brand_mention_aggregator::cache::MentionCache;
use brand_mention_aggregator::config::AppConfig;
use brand_mention_aggregator::mention::{
    Engagement, Mention, MentionSeed, Sentiment, SourceType, ThresholdTable,
};
use brand_mention_aggregator::sentiment::{Enricher, MockSentiment};
use brand_mention_aggregator::sources::{DynSourceAdapter, SourceAdapter, SourceFetch};
use chrono::Utc;

const BRAND: &str = "velvet luxe";

fn mention(source: &str, title: &str) -> Mention {
    MentionSeed {
        source: source.to_string(),
        source_type: SourceType::Social,
        url: format!("https://example.com/{}/{}", source, title),
        title: title.to_string(),
        snippet: title.to_string(),
        full_text: None,
        matched_keyword: BRAND.to_string(),
        published_at: Utc::now(),
        engagement: Engagement {
            upvotes: Some(12),
            ..Default::default()
        },
    }
    .into_mention(&ThresholdTable::default())
}

struct ScriptedAdapter {
    name: &'static str,
    outcome: Result<Vec<Mention>, String>,
}

#[async_trait::async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Social
    }

    async fn fetch(&self, _terms: &[String], _max: usize, _days: u32) -> SourceFetch {
        match &self.outcome {
            Ok(mentions) => SourceFetch::ok(mentions.clone()),
            Err(e) => SourceFetch::failed(e.clone()),
        }
    }
}

fn test_app() -> Router {
    let adapters: Vec<DynSourceAdapter> = vec![
        Arc::new(ScriptedAdapter {
            name: "Alpha",
            outcome: Ok(vec![
                mention("Alpha", "good post"),
                mention("Alpha", "other post"),
            ]),
        }),
        Arc::new(ScriptedAdapter {
            name: "Beta",
            outcome: Err("upstream 503".to_string()),
        }),
    ];

    let mut cfg = AppConfig::default();
    cfg.fetch.batch_delay_ms = 0;
    cfg.sentiment.batch_delay_ms = 0;

    let cache = Arc::new(MentionCache::new(cfg.cache.ttl(), cfg.cache.max_stale()));
    let enricher = Enricher::new(
        Arc::new(MockSentiment {
            fixed: Sentiment::from_score(0.5),
        }),
        &cfg.sentiment,
    );
    let aggregator = Arc::new(Aggregator::new(adapters, cache, enricher, &cfg));
    create_router(AppState { aggregator })
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("collect body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_answers_ok() {
    let app = test_app();
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn sources_lists_enabled_adapters_with_types() {
    let app = test_app();
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/sources")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    let names: Vec<&str> = body
        .as_array()
        .expect("array")
        .iter()
        .map(|s| s["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["Alpha", "Beta"]);
    assert_eq!(body[0]["source_type"], "social");
}

#[tokio::test]
async fn aggregate_with_partial_failure_is_http_success() {
    let app = test_app();
    let payload = json!({
        "terms": [BRAND],
        "brand": BRAND,
        "days_back": 0,
        "include_sentiment": false
    });

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/aggregate")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;

    assert_eq!(body["success"], true);
    assert_eq!(body["mentions"].as_array().expect("mentions").len(), 2);
    let errors = body["errors"].as_array().expect("errors");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["source"], "Beta");
    assert_eq!(body["by_source"]["Alpha"], 2);
}

#[tokio::test]
async fn aggregate_with_sentiment_reports_label_counts() {
    let app = test_app();
    let payload = json!({
        "terms": [BRAND],
        "brand": BRAND,
        "days_back": 0,
        "include_sentiment": true
    });

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/aggregate")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");

    let body = json_body(resp).await;
    assert_eq!(body["by_sentiment"]["positive"], 2);
    assert!(body["mentions"][0]["sentiment"]["score"].is_number());
}

#[tokio::test]
async fn single_source_refresh_roundtrips() {
    let app = test_app();
    let payload = json!({ "terms": [BRAND], "brand": BRAND });

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/source/Alpha")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["mode"], "live");
    assert_eq!(body["mentions"].as_array().expect("mentions").len(), 2);
}

#[tokio::test]
async fn unknown_source_refresh_is_a_clean_error_payload() {
    let app = test_app();
    let payload = json!({ "terms": [BRAND], "brand": BRAND });

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/source/Nonexistent")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["mode"], "empty");
}

#[tokio::test]
async fn malformed_aggregate_body_is_rejected() {
    let app = test_app();
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/aggregate")
                .header("content-type", "application/json")
                .body(Body::from("{\"terms\": 42}"))
                .expect("request"),
        )
        .await
        .expect("response");

    assert!(resp.status().is_client_error());
}
