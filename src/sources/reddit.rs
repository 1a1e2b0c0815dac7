// src/sources/reddit.rs
//! Reddit adapter (social). Uses the public JSON search endpoint, one
//! request per search term, newest first.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use serde::Deserialize;

use crate::mention::{Engagement, Mention, MentionSeed, SourceType, ThresholdTable};
use crate::sources::{
    dedup_local, epoch_secs, excerpt_around, first_matched_term, http_client, join_errors,
    normalize_text, within_window, SourceAdapter, SourceFetch, SNIPPET_MAX_CHARS,
};

const DEFAULT_BASE_URL: &str = "https://www.reddit.com";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: Option<String>,
    selftext: Option<String>,
    permalink: Option<String>,
    ups: Option<i64>,
    num_comments: Option<i64>,
    created_utc: Option<f64>,
}

pub struct RedditAdapter {
    mode: Mode,
    thresholds: ThresholdTable,
    term_delay: Duration,
}

enum Mode {
    /// Captured listing body, parsed once against the full term list.
    Fixture(String),
    Http {
        base_url: String,
        client: reqwest::Client,
    },
}

impl RedditAdapter {
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
            term_delay: Duration::from_secs(1),
        }
    }

    pub fn from_fixture(body: &str, thresholds: ThresholdTable) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
            thresholds,
            term_delay: Duration::ZERO,
        }
    }

    fn parse_listing(
        &self,
        body: &str,
        terms: &[String],
        max_results: usize,
        days_back: u32,
    ) -> Result<Vec<Mention>> {
        let listing: Listing = serde_json::from_str(body).context("parsing reddit listing")?;
        let now = Utc::now();

        let mut out = Vec::new();
        for child in listing.data.children {
            if out.len() >= max_results {
                break;
            }
            let post = child.data;

            let permalink = match post.permalink {
                Some(p) if !p.is_empty() => p,
                _ => continue, // malformed item, skip
            };
            let url = format!("{}{}", DEFAULT_BASE_URL, permalink);

            let title = normalize_text(post.title.as_deref().unwrap_or_default());
            let body_text = normalize_text(post.selftext.as_deref().unwrap_or_default());
            let text = format!("{} {}", title, body_text);
            let keyword = match first_matched_term(&text, terms) {
                Some(k) => k,
                None => continue,
            };

            let published_at = post
                .created_utc
                .and_then(epoch_secs)
                .unwrap_or(now);
            if !within_window(published_at, days_back, now) {
                continue;
            }

            let engagement = Engagement {
                upvotes: post.ups.and_then(|v| u64::try_from(v).ok()),
                comments: post.num_comments.and_then(|v| u64::try_from(v).ok()),
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

    async fn search(
        &self,
        base_url: &str,
        client: &reqwest::Client,
        term: &str,
        max_results: usize,
        days_back: u32,
    ) -> Result<String> {
        let limit = max_results.to_string();
        let resp = client
            .get(format!("{}/search.json", base_url))
            .query(&[
                ("q", term),
                ("sort", "new"),
                ("limit", limit.as_str()),
                ("t", time_range(days_back)),
            ])
            .send()
            .await
            .context("reddit search request")?;
        if !resp.status().is_success() {
            anyhow::bail!("reddit search returned {}", resp.status());
        }
        resp.text().await.context("reddit search body")
    }
}

fn time_range(days_back: u32) -> &'static str {
    match days_back {
        0 => "all",
        1 => "day",
        2..=7 => "week",
        8..=31 => "month",
        32..=365 => "year",
        _ => "all",
    }
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    fn name(&self) -> &'static str {
        "Reddit"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Social
    }

    async fn fetch(&self, terms: &[String], max_results: usize, days_back: u32) -> SourceFetch {
        match &self.mode {
            Mode::Fixture(body) => match self.parse_listing(body, terms, max_results, days_back) {
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

                    let body = match self
                        .search(base_url, client, term, max_results, days_back)
                        .await
                    {
                        Ok(b) => b,
                        Err(e) => {
                            tracing::warn!(error = ?e, source = self.name(), term = %term, "fetch failed");
                            counter!("source_fetch_errors_total").increment(1);
                            failures.push(format!("term {:?}: {:#}", term, e));
                            continue;
                        }
                    };
                    match self.parse_listing(
                        &body,
                        std::slice::from_ref(term),
                        max_results,
                        days_back,
                    ) {
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
