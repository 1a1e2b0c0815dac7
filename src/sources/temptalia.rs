// src/sources/temptalia.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::mention::{Engagement, Mention, MentionSeed, SourceType, ThresholdTable};
use crate::sources::{
    dedup_local, excerpt_around, first_matched_term, http_client, normalize_text, parse_rfc2822,
    scrub_html_entities_for_xml, within_window, SourceAdapter, SourceFetch, SNIPPET_MAX_CHARS,
};

const DEFAULT_FEED_URL: &str = "https://www.temptalia.com/feed/";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    /// `<slash:comments>` extension carried by WordPress feeds.
    #[serde(rename = "slash:comments")]
    comments: Option<u64>,
}

/// Temptalia adapter (blog). One feed request serves every term: an RSS feed
/// is not searchable, so items are filtered against the term list locally.
pub struct TemptaliaAdapter {
    mode: Mode,
    thresholds: ThresholdTable,
}

enum Mode {
    Fixture(String),
    Http {
        feed_url: String,
        client: reqwest::Client,
    },
}

impl TemptaliaAdapter {
    pub fn from_default_url(thresholds: ThresholdTable) -> Self {
        Self::from_url(DEFAULT_FEED_URL, thresholds)
    }

    pub fn from_url(feed_url: &str, thresholds: ThresholdTable) -> Self {
        Self {
            mode: Mode::Http {
                feed_url: feed_url.to_string(),
                client: http_client(Duration::from_secs(10)),
            },
            thresholds,
        }
    }

    pub fn from_fixture(body: &str, thresholds: ThresholdTable) -> Self {
        Self {
            mode: Mode::Fixture(body.to_string()),
            thresholds,
        }
    }

    fn parse_feed(
        &self,
        body: &str,
        terms: &[String],
        max_results: usize,
        days_back: u32,
    ) -> Result<Vec<Mention>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(body);
        let rss: Rss = from_str(&xml_clean).context("parsing temptalia rss xml")?;
        let now = Utc::now();

        let mut out = Vec::with_capacity(rss.channel.item.len().min(max_results));
        for it in rss.channel.item {
            if out.len() >= max_results {
                break;
            }

            let url = match it.link {
                Some(l) if !l.is_empty() => l,
                _ => continue,
            };

            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            let description = normalize_text(it.description.as_deref().unwrap_or_default());
            let text = format!("{} {}", title, description);
            let keyword = match first_matched_term(&text, terms) {
                Some(k) => k,
                None => continue,
            };

            let published_at = it
                .pub_date
                .as_deref()
                .and_then(parse_rfc2822)
                .unwrap_or(now);
            if !within_window(published_at, days_back, now) {
                continue;
            }

            let snippet = excerpt_around(&text, &keyword, SNIPPET_MAX_CHARS);
            out.push(
                MentionSeed {
                    source: self.name().to_string(),
                    source_type: self.source_type(),
                    url,
                    title,
                    snippet,
                    full_text: (!description.is_empty()).then_some(description),
                    matched_keyword: keyword,
                    published_at,
                    engagement: Engagement {
                        comments: it.comments,
                        ..Default::default()
                    },
                }
                .into_mention(&self.thresholds),
            );
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("source_parse_ms").record(ms);
        counter!("source_items_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for TemptaliaAdapter {
    fn name(&self) -> &'static str {
        "Temptalia"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Blog
    }

    async fn fetch(&self, terms: &[String], max_results: usize, days_back: u32) -> SourceFetch {
        let body = match &self.mode {
            Mode::Fixture(s) => s.clone(),
            Mode::Http { feed_url, client } => {
                match client.get(feed_url).send().await {
                    Ok(resp) if resp.status().is_success() => match resp.text().await {
                        Ok(b) => b,
                        Err(e) => {
                            counter!("source_fetch_errors_total").increment(1);
                            return SourceFetch::failed(format!("feed body: {:#}", e));
                        }
                    },
                    Ok(resp) => {
                        counter!("source_fetch_errors_total").increment(1);
                        return SourceFetch::failed(format!("feed returned {}", resp.status()));
                    }
                    Err(e) => {
                        tracing::warn!(error = ?e, source = self.name(), "feed fetch failed");
                        counter!("source_fetch_errors_total").increment(1);
                        return SourceFetch::failed(format!("feed fetch: {:#}", e));
                    }
                }
            }
        };

        match self.parse_feed(&body, terms, max_results, days_back) {
            Ok(mentions) => SourceFetch::ok(dedup_local(mentions)),
            Err(e) => {
                counter!("source_fetch_errors_total").increment(1);
                SourceFetch::failed(format!("{:#}", e))
            }
        }
    }
}
