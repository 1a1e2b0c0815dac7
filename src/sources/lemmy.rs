// src/sources/lemmy.rs
//! Lemmy adapter (forum). Searches posts through the public v3 API of a
//! single instance.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use metrics::counter;
use serde::Deserialize;

use crate::mention::{Engagement, Mention, MentionSeed, SourceType, ThresholdTable};
use crate::sources::{
    dedup_local, excerpt_around, first_matched_term, http_client, join_errors, normalize_text,
    within_window, SourceAdapter, SourceFetch, SNIPPET_MAX_CHARS,
};

const DEFAULT_BASE_URL: &str = "https://lemmy.world";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    posts: Vec<PostView>,
}

#[derive(Debug, Deserialize)]
struct PostView {
    post: Post,
    counts: Counts,
}

#[derive(Debug, Deserialize)]
struct Post {
    name: Option<String>,
    body: Option<String>,
    /// Canonical federation URL of the post.
    ap_id: Option<String>,
    published: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Counts {
    score: Option<i64>,
    comments: Option<i64>,
}

/// Lemmy emits RFC 3339, with or without an explicit offset depending on the
/// instance version.
fn parse_published(ts: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub struct LemmyAdapter {
    mode: Mode,
    thresholds: ThresholdTable,
    term_delay: Duration,
}

enum Mode {
    Fixture(String),
    Http {
        base_url: String,
        client: reqwest::Client,
    },
}

impl LemmyAdapter {
    pub fn from_default_url(thresholds: ThresholdTable) -> Self {
        Self::from_url(DEFAULT_BASE_URL, thresholds)
    }

    pub fn from_url(base_url: &str, thresholds: ThresholdTable) -> Self {
        Self {
            mode: Mode::Http {
                base_url: base_url.trim_end_matches('/').to_string(),
                client: http_client(Duration::from_secs(10)),
            },
            thresholds,
            term_delay: Duration::from_millis(500),
        }
    }

    pub fn from_fixture(body: &str, thresholds: ThresholdTable) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
            thresholds,
            term_delay: Duration::ZERO,
        }
    }

    fn parse_search(
        &self,
        body: &str,
        terms: &[String],
        max_results: usize,
        days_back: u32,
    ) -> Result<Vec<Mention>> {
        let resp: SearchResponse = serde_json::from_str(body).context("parsing lemmy search")?;
        let now = Utc::now();

        let mut out = Vec::new();
        for view in resp.posts {
            if out.len() >= max_results {
                break;
            }

            let url = match view.post.ap_id {
                Some(u) if !u.is_empty() => u,
                _ => continue,
            };

            let title = normalize_text(view.post.name.as_deref().unwrap_or_default());
            let body_text = normalize_text(view.post.body.as_deref().unwrap_or_default());
            let text = format!("{} {}", title, body_text);
            let keyword = match first_matched_term(&text, terms) {
                Some(k) => k,
                None => continue,
            };

            let published_at = view
                .post
                .published
                .as_deref()
                .and_then(parse_published)
                .unwrap_or(now);
            if !within_window(published_at, days_back, now) {
                continue;
            }

            let engagement = Engagement {
                upvotes: view.counts.score.and_then(|v| u64::try_from(v).ok()),
                comments: view.counts.comments.and_then(|v| u64::try_from(v).ok()),
                ..Default::default()
            };

            let snippet = excerpt_around(&text, &keyword, SNIPPET_MAX_CHARS);
            out.push(
                MentionSeed {
                    source: self.name().to_string(),
                    source_type: self.source_type(),
                    url,
                    title,
                    snippet,
                    full_text: (!body_text.is_empty()).then_some(body_text),
                    matched_keyword: keyword,
                    published_at,
                    engagement,
                }
                .into_mention(&self.thresholds),
            );
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for LemmyAdapter {
    fn name(&self) -> &'static str {
        "Lemmy"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Forum
    }

    async fn fetch(&self, terms: &[String], max_results: usize, days_back: u32) -> SourceFetch {
        match &self.mode {
            Mode::Fixture(body) => match self.parse_search(body, terms, max_results, days_back) {
                Ok(mentions) => SourceFetch::ok(dedup_local(mentions)),
                Err(e) => SourceFetch::failed(format!("{:#}", e)),
            },
            Mode::Http { base_url, client } => {
                let mut all = Vec::new();
                let mut failures = Vec::new();
                let mut first = true;

                for term in terms.iter().filter(|t| !t.trim().is_empty()) {
                    if !first && !self.term_delay.is_zero() {
                        tokio::time::sleep(self.term_delay).await;
                    }
                    first = false;

                    let limit = max_results.to_string();
                    let result = client
                        .get(format!("{}/api/v3/search", base_url))
                        .query(&[
                            ("q", term.as_str()),
                            ("type_", "Posts"),
                            ("sort", "New"),
                            ("limit", limit.as_str()),
                        ])
                        .send()
                        .await;

                    let body = match result {
                        Ok(resp) if resp.status().is_success() => match resp.text().await {
                            Ok(b) => b,
                            Err(e) => {
                                counter!("source_fetch_errors_total").increment(1);
                                failures.push(format!("term {:?}: {:#}", term, e));
                                continue;
                            }
                        },
                        Ok(resp) => {
                            counter!("source_fetch_errors_total").increment(1);
                            failures.push(format!("term {:?}: lemmy returned {}", term, resp.status()));
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!(error = ?e, source = self.name(), term = %term, "fetch failed");
                            counter!("source_fetch_errors_total").increment(1);
                            failures.push(format!("term {:?}: {:#}", term, e));
                            continue;
                        }
                    };

                    match self.parse_search(&body, std::slice::from_ref(term), max_results, days_back)
                    {
                        Ok(mut mentions) => all.append(&mut mentions),
                        Err(e) => {
                            counter!("source_fetch_errors_total").increment(1);
                            failures.push(format!("term {:?}: {:#}", term, e));
                        }
                    }
                }

                SourceFetch {
                    mentions: dedup_local(all),
                    error: join_errors(failures),
                }
            }
        }
    }
}
