// src/sources/news.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::mention::{Engagement, Mention, MentionSeed, SourceType, ThresholdTable};
use crate::sources::{
    dedup_local, excerpt_around, first_matched_term, http_client, join_errors, normalize_text,
    parse_rfc2822, scrub_html_entities_for_xml, within_window, SourceAdapter, SourceFetch,
    SNIPPET_MAX_CHARS,
};

const DEFAULT_BASE_URL: &str = "https://news.google.com/rss/search";

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
}

/// Google News adapter (news). The search feed is queried once per term;
/// news items carry no engagement counters, so the high-engagement flag
/// stays false under the editorial threshold rule.
pub struct GoogleNewsAdapter {
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

impl GoogleNewsAdapter {
    pub fn from_default_url(thresholds: ThresholdTable) -> Self {
        Self::from_url(DEFAULT_BASE_URL, thresholds)
    }

    pub fn from_url(base_url: &str, thresholds: ThresholdTable) -> Self {
        Self {
            mode: Mode::Http {
                base_url: base_url.to_string(),
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

    fn parse_feed(
        &self,
        body: &str,
        terms: &[String],
        max_results: usize,
        days_back: u32,
    ) -> Result<Vec<Mention>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(body);
        let rss: Rss = from_str(&xml_clean).context("parsing google news rss xml")?;
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
                    full_text: None,
                    matched_keyword: keyword,
                    published_at,
                    engagement: Engagement::default(),
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
impl SourceAdapter for GoogleNewsAdapter {
    // Case-variant of the `news` config key; source filters and the
    // targeted-refresh route resolve adapters by this name.
    fn name(&self) -> &'static str {
        "News"
    }

    fn source_type(&self) -> SourceType {
        SourceType::News
    }

    async fn fetch(&self, terms: &[String], max_results: usize, days_back: u32) -> SourceFetch {
        match &self.mode {
            Mode::Fixture(body) => match self.parse_feed(body, terms, max_results, days_back) {
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

                    let result = client
                        .get(base_url)
                        .query(&[("q", term.as_str()), ("hl", "en-US")])
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
                            failures
                                .push(format!("term {:?}: feed returned {}", term, resp.status()));
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!(error = ?e, source = self.name(), term = %term, "fetch failed");
                            counter!("source_fetch_errors_total").increment(1);
                            failures.push(format!("term {:?}: {:#}", term, e));
                            continue;
                        }
                    };

                    match self.parse_feed(&body, std::slice::from_ref(term), max_results, days_back)
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
