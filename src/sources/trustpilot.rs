// src/sources/trustpilot.rs
//! Trustpilot adapter (review). Keyed API: resolves a business unit per
//! search term, then pulls its latest reviews. A missing key is a clean
//! "not configured" failure so the orchestrator's partial-failure path
//! handles it like any other fetch error.

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

pub const ENV_API_KEY: &str = "TRUSTPILOT_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.trustpilot.com/v1";

#[derive(Debug, Deserialize)]
struct BusinessUnit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ReviewsResponse {
    #[serde(default)]
    reviews: Vec<Review>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Review {
    id: Option<String>,
    title: Option<String>,
    text: Option<String>,
    created_at: Option<String>,
    #[serde(default)]
    likes: Option<u64>,
}

pub struct TrustpilotAdapter {
    mode: Mode,
    api_key: String,
    thresholds: ThresholdTable,
    term_delay: Duration,
}

enum Mode {
    /// Captured reviews body; the find step is skipped.
    Fixture(String),
    Http {
        base_url: String,
        client: reqwest::Client,
    },
}

impl TrustpilotAdapter {
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

    fn parse_reviews(
        &self,
        body: &str,
        terms: &[String],
        max_results: usize,
        days_back: u32,
    ) -> Result<Vec<Mention>> {
        let resp: ReviewsResponse =
            serde_json::from_str(body).context("parsing trustpilot reviews")?;
        let now = Utc::now();

        let mut out = Vec::new();
        for review in resp.reviews {
            if out.len() >= max_results {
                break;
            }

            let id = match review.id {
                Some(id) if !id.is_empty() => id,
                _ => continue,
            };
            let url = format!("https://www.trustpilot.com/reviews/{}", id);

            let title = normalize_text(review.title.as_deref().unwrap_or_default());
            let body_text = normalize_text(review.text.as_deref().unwrap_or_default());
            let text = format!("{} {}", title, body_text);
            let keyword = match first_matched_term(&text, terms) {
                Some(k) => k,
                None => continue,
            };

            let published_at = review
                .created_at
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now);
            if !within_window(published_at, days_back, now) {
                continue;
            }

            let engagement = Engagement {
                upvotes: review.likes,
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

    async fn reviews_for_term(
        &self,
        base_url: &str,
        client: &reqwest::Client,
        term: &str,
        max_results: usize,
    ) -> Result<String> {
        let unit: BusinessUnit = client
            .get(format!("{}/business-units/find", base_url))
            .query(&[("name", term)])
            .header("apikey", &self.api_key)
            .send()
            .await
            .context("trustpilot find request")?
            .error_for_status()
            .context("trustpilot find status")?
            .json()
            .await
            .context("trustpilot find body")?;

        client
            .get(format!("{}/business-units/{}/reviews", base_url, unit.id))
            .query(&[("perPage", max_results.to_string())])
            .header("apikey", &self.api_key)
            .send()
            .await
            .context("trustpilot reviews request")?
            .error_for_status()
            .context("trustpilot reviews status")?
            .text()
            .await
            .context("trustpilot reviews body")
    }
}

#[async_trait]
impl SourceAdapter for TrustpilotAdapter {
    fn name(&self) -> &'static str {
        "Trustpilot"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Review
    }

    async fn fetch(&self, terms: &[String], max_results: usize, days_back: u32) -> SourceFetch {
        if self.api_key.is_empty() {
            return SourceFetch::failed(format!(
                "Trustpilot adapter not configured: {} is missing",
                ENV_API_KEY
            ));
        }

        match &self.mode {
            Mode::Fixture(body) => match self.parse_reviews(body, terms, max_results, days_back) {
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
                        .reviews_for_term(base_url, client, term, max_results)
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
                    match self.parse_reviews(&body, std::slice::from_ref(term), max_results, days_back)
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
