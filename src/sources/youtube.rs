// src/sources/youtube.rs
//! YouTube adapter (video). Data API v3: a search call per term, then one
//! statistics call for the whole batch of video ids. Statistics are
//! best-effort; a failed stats call keeps the mentions with unknown
//! engagement rather than dropping them.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;

use crate::mention::{Engagement, Mention, MentionSeed, SourceType, ThresholdTable};
use crate::sources::{
    dedup_local, excerpt_around, first_matched_term, http_client, join_errors, normalize_text,
    within_window, SourceAdapter, SourceFetch, SNIPPET_MAX_CHARS,
};

pub const ENV_API_KEY: &str = "YOUTUBE_API_KEY";

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: VideoRef,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct VideoRef {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    statistics: Option<Statistics>,
}

/// The API reports counters as decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

impl Statistics {
    fn into_engagement(self) -> Engagement {
        let parse = |v: Option<String>| v.and_then(|s| s.parse::<u64>().ok());
        Engagement {
            upvotes: parse(self.like_count),
            comments: parse(self.comment_count),
            views: parse(self.view_count),
            ..Default::default()
        }
    }
}

pub struct YouTubeAdapter {
    mode: Mode,
    api_key: String,
    thresholds: ThresholdTable,
    term_delay: Duration,
}

enum Mode {
    /// Captured search body; the statistics step is skipped, engagement
    /// stays unknown.
    Fixture(String),
    Http {
        base_url: String,
        client: reqwest::Client,
    },
}

impl YouTubeAdapter {
    pub fn from_env(thresholds: ThresholdTable) -> Self {
        let api_key = std::env::var(ENV_API_KEY).unwrap_or_default();
        Self::from_url(DEFAULT_BASE_URL, api_key, thresholds)
    }

    pub fn from_url(base_url: &str, api_key: String, thresholds: ThresholdTable) -> Self {
        Self {
            mode: Mode::Http {
                base_url: base_url.trim_end_matches('/').to_string(),
                client: http_client(Duration::from_secs(10)),
            },
            api_key,
            thresholds,
            term_delay: Duration::from_millis(500),
        }
    }

    pub fn from_fixture(body: &str, thresholds: ThresholdTable) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
            api_key: "fixture".to_string(),
            thresholds,
            term_delay: Duration::ZERO,
        }
    }

    /// Parse a search body into `(video_id, seed)` pairs. Engagement is
    /// attached afterwards so the high-engagement flag is computed once,
    /// with the final counters.
    fn parse_search(
        &self,
        body: &str,
        terms: &[String],
        max_results: usize,
        days_back: u32,
    ) -> Result<Vec<(String, MentionSeed)>> {
        let resp: SearchResponse = serde_json::from_str(body).context("parsing youtube search")?;
        let now = Utc::now();

        let mut out = Vec::new();
        for item in resp.items {
            if out.len() >= max_results {
                break;
            }

            let video_id = match item.id.video_id {
                Some(id) if !id.is_empty() => id,
                _ => continue,
            };
            let url = format!("https://www.youtube.com/watch?v={}", video_id);

            let title = normalize_text(item.snippet.title.as_deref().unwrap_or_default());
            let description =
                normalize_text(item.snippet.description.as_deref().unwrap_or_default());
            let text = format!("{} {}", title, description);
            let keyword = match first_matched_term(&text, terms) {
                Some(k) => k,
                None => continue,
            };

            let published_at = item
                .snippet
                .published_at
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now);
            if !within_window(published_at, days_back, now) {
                continue;
            }

            let snippet = excerpt_around(&text, &keyword, SNIPPET_MAX_CHARS);
            out.push((
                video_id,
                MentionSeed {
                    source: self.name().to_string(),
                    source_type: self.source_type(),
                    url,
                    title,
                    snippet,
                    full_text: (!description.is_empty()).then_some(description),
                    matched_keyword: keyword,
                    published_at,
                    engagement: Engagement::default(),
                },
            ));
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
        let mut query = vec![
            ("part", "snippet".to_string()),
            ("type", "video".to_string()),
            ("order", "date".to_string()),
            ("q", term.to_string()),
            ("maxResults", max_results.min(50).to_string()),
            ("key", self.api_key.clone()),
        ];
        if days_back > 0 {
            let after = Utc::now() - chrono::Duration::days(i64::from(days_back));
            query.push(("publishedAfter", after.to_rfc3339()));
        }

        let resp = client
            .get(format!("{}/search", base_url))
            .query(&query)
            .send()
            .await
            .context("youtube search request")?;
        if !resp.status().is_success() {
            anyhow::bail!("youtube search returned {}", resp.status());
        }
        resp.text().await.context("youtube search body")
    }

    /// Best-effort statistics for a batch of ids.
    async fn statistics(
        &self,
        base_url: &str,
        client: &reqwest::Client,
        ids: &[String],
    ) -> Result<HashMap<String, Engagement>> {
        let id_list = ids.join(",");
        let resp: VideosResponse = client
            .get(format!("{}/videos", base_url))
            .query(&[
                ("part", "statistics"),
                ("id", id_list.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("youtube videos request")?
            .error_for_status()
            .context("youtube videos status")?
            .json()
            .await
            .context("youtube videos body")?;

        Ok(resp
            .items
            .into_iter()
            .filter_map(|v| v.statistics.map(|s| (v.id, s.into_engagement())))
            .collect())
    }
}

#[async_trait]
impl SourceAdapter for YouTubeAdapter {
    fn name(&self) -> &'static str {
        "YouTube"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Video
    }

    async fn fetch(&self, terms: &[String], max_results: usize, days_back: u32) -> SourceFetch {
        if self.api_key.is_empty() {
            return SourceFetch::failed(format!(
                "YouTube adapter not configured: {} is missing",
                ENV_API_KEY
            ));
        }

        match &self.mode {
            Mode::Fixture(body) => match self.parse_search(body, terms, max_results, days_back) {
                Ok(seeds) => SourceFetch::ok(dedup_local(
                    seeds
                        .into_iter()
                        .map(|(_, seed)| seed.into_mention(&self.thresholds))
                        .collect(),
                )),
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

                    let mut seeds = match self.parse_search(
                        &body,
                        std::slice::from_ref(term),
                        max_results,
                        days_back,
                    ) {
                        Ok(s) => s,
                        Err(e) => {
                            counter!("source_fetch_errors_total").increment(1);
                            failures.push(format!("term {:?}: {:#}", term, e));
                            continue;
                        }
                    };

                    if !seeds.is_empty() {
                        let ids: Vec<String> = seeds.iter().map(|(id, _)| id.clone()).collect();
                        match self.statistics(base_url, client, &ids).await {
                            Ok(mut stats) => {
                                for (id, seed) in seeds.iter_mut() {
                                    if let Some(engagement) = stats.remove(id) {
                                        seed.engagement = engagement;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = ?e, source = self.name(), "statistics unavailable");
                            }
                        }
                    }

                    all.extend(
                        seeds
                            .into_iter()
                            .map(|(_, seed)| seed.into_mention(&self.thresholds)),
                    );
                }

                SourceFetch {
                    mentions: dedup_local(all),
                    error: join_errors(failures),
                }
            }
        }
    }
}
