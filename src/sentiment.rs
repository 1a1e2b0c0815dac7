// src/sentiment.rs
//! Sentiment scoring: provider abstraction + best-effort batch enricher.
//!
//! Enrichment never fails the surrounding aggregation. Every failure mode
//! (missing key, transport error, malformed reply, timeout) resolves to the
//! neutral fallback, and every mention that enters `enrich` leaves with
//! exactly one sentiment attached.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::config::SentimentConfig;
use crate::mention::{Mention, Sentiment};

pub const ENV_API_KEY: &str = "SENTIMENT_API_KEY";
pub const ENV_TEST_MODE: &str = "SENTIMENT_TEST_MODE";

/// Scoring client used by the enricher (and exposed directly for the
/// "score this text for this brand" inbound contract).
#[async_trait::async_trait]
pub trait SentimentClient: Send + Sync {
    /// How positively does `text` speak about `subject`? Raw score in
    /// `[-1, 1]`, mapped to a label by `Sentiment::from_score`.
    async fn score(&self, text: &str, subject: &str) -> Result<Sentiment>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynSentimentClient = Arc<dyn SentimentClient>;

/// Factory honoring the test-mode env var, then key presence:
///
/// * `SENTIMENT_TEST_MODE=mock` returns a deterministic mock client.
/// * A missing `SENTIMENT_API_KEY` returns the disabled client, which yields
///   the neutral default without attempting any call.
/// * Otherwise the OpenAI scorer.
pub fn build_client_from_env() -> DynSentimentClient {
    if std::env::var(ENV_TEST_MODE)
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockSentiment {
            fixed: Sentiment::from_score(0.4),
        });
    }

    let api_key = std::env::var(ENV_API_KEY).unwrap_or_default();
    if api_key.is_empty() {
        return Arc::new(DisabledSentiment);
    }
    Arc::new(OpenAiSentiment::new(api_key, None))
}

/// No credentials configured: neutral for everything, no network.
pub struct DisabledSentiment;

#[async_trait::async_trait]
impl SentimentClient for DisabledSentiment {
    async fn score(&self, _text: &str, _subject: &str) -> Result<Sentiment> {
        Ok(Sentiment::neutral())
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Fixed-answer client for tests and local runs.
#[derive(Clone)]
pub struct MockSentiment {
    pub fixed: Sentiment,
}

#[async_trait::async_trait]
impl SentimentClient for MockSentiment {
    async fn score(&self, _text: &str, _subject: &str) -> Result<Sentiment> {
        Ok(self.fixed.clone())
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// OpenAI scorer (Chat Completions). The prompt asks for a single decimal in
/// `[-1, 1]`; anything unparsable is an error and falls back upstream.
pub struct OpenAiSentiment {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiSentiment {
    pub fn new(api_key: String, model_override: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(
                "brand-mention-aggregator/0.1 (+github.com/fableworks/brand-mention-aggregator)",
            )
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        let model = model_override.unwrap_or("gpt-4o-mini").to_string();
        Self {
            http,
            api_key,
            model,
        }
    }
}

#[async_trait::async_trait]
impl SentimentClient for OpenAiSentiment {
    async fn score(&self, text: &str, subject: &str) -> Result<Sentiment> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = "You rate how positively a text speaks about a subject. \
                   Reply with ONE decimal number between -1.0 (very negative) \
                   and 1.0 (very positive). Output only the number.";
        let user = format!("Subject: {}\nText: {}", subject, text);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: sys,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.0,
            max_tokens: 8,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("sentiment request failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("sentiment scoring returned {}", resp.status()));
        }

        let body: Resp = resp.json().await.context("sentiment response body")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.trim())
            .unwrap_or("");
        let raw: f32 = content
            .parse()
            .with_context(|| format!("unparsable sentiment reply: {:?}", content))?;
        Ok(Sentiment::from_score(raw))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Batch enricher: fixed-size batches run concurrently, with a short delay
/// between batches to respect provider rate limits.
pub struct Enricher {
    client: DynSentimentClient,
    batch_size: usize,
    batch_delay: Duration,
    timeout: Duration,
}

impl Enricher {
    pub fn new(client: DynSentimentClient, cfg: &SentimentConfig) -> Self {
        Self {
            client,
            batch_size: cfg.batch_size.clamp(5, 10),
            batch_delay: cfg.batch_delay(),
            timeout: cfg.timeout(),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    /// Attach one sentiment to every mention. Batch completion order does not
    /// matter; results are zipped back positionally, so nothing is dropped.
    pub async fn enrich(&self, mut mentions: Vec<Mention>, subject: &str) -> Vec<Mention> {
        if mentions.is_empty() {
            return mentions;
        }

        let mut first = true;
        for batch in mentions.chunks_mut(self.batch_size) {
            if !first && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            first = false;

            let scores = join_all(batch.iter().map(|m| self.score_one(m, subject))).await;
            for (mention, sentiment) in batch.iter_mut().zip(scores) {
                mention.sentiment = Some(sentiment);
            }
        }
        mentions
    }

    /// The named fallback path: timeout, transport, or parse trouble all
    /// resolve to neutral.
    async fn score_one(&self, mention: &Mention, subject: &str) -> Sentiment {
        let text = match &mention.full_text {
            Some(full) if !full.is_empty() => full.clone(),
            _ => format!("{}. {}", mention.title, mention.snippet),
        };

        match tokio::time::timeout(self.timeout, self.client.score(&text, subject)).await {
            Ok(Ok(sentiment)) => sentiment,
            Ok(Err(e)) => {
                tracing::warn!(error = ?e, id = %mention.id, "sentiment scoring failed, using neutral");
                counter!("sentiment_fallback_total").increment(1);
                Sentiment::neutral()
            }
            Err(_) => {
                tracing::warn!(id = %mention.id, "sentiment scoring timed out, using neutral");
                counter!("sentiment_fallback_total").increment(1);
                Sentiment::neutral()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mention::{Engagement, MentionSeed, SentimentLabel, SourceType, ThresholdTable};
    use chrono::Utc;

    fn mentions(n: usize) -> Vec<Mention> {
        (0..n)
            .map(|i| {
                MentionSeed {
                    source: "Reddit".into(),
                    source_type: SourceType::Social,
                    url: format!("https://example.com/{}", i),
                    title: format!("post {}", i),
                    snippet: "really liked the new acme shade".into(),
                    full_text: None,
                    matched_keyword: "acme".into(),
                    published_at: Utc::now(),
                    engagement: Engagement::default(),
                }
                .into_mention(&ThresholdTable::default())
            })
            .collect()
    }

    fn cfg() -> SentimentConfig {
        SentimentConfig {
            enabled: true,
            batch_size: 8,
            batch_delay_ms: 0,
            timeout_secs: 2,
        }
    }

    #[test]
    fn batch_size_is_clamped_into_contract_range() {
        let client: DynSentimentClient = Arc::new(DisabledSentiment);
        let tiny = Enricher::new(
            client.clone(),
            &SentimentConfig {
                batch_size: 1,
                ..cfg()
            },
        );
        let huge = Enricher::new(
            client,
            &SentimentConfig {
                batch_size: 64,
                ..cfg()
            },
        );
        assert_eq!(tiny.batch_size, 5);
        assert_eq!(huge.batch_size, 10);
    }

    #[tokio::test]
    async fn every_mention_gets_exactly_one_sentiment() {
        let client: DynSentimentClient = Arc::new(MockSentiment {
            fixed: Sentiment::from_score(0.8),
        });
        let enricher = Enricher::new(client, &cfg());

        // spans three batches of 8
        let out = enricher.enrich(mentions(23), "acme").await;
        assert_eq!(out.len(), 23);
        assert!(out
            .iter()
            .all(|m| m.sentiment.as_ref().map(|s| s.label) == Some(SentimentLabel::Positive)));
    }

    #[tokio::test]
    async fn disabled_client_yields_neutral_without_failing() {
        let enricher = Enricher::new(Arc::new(DisabledSentiment), &cfg());
        let out = enricher.enrich(mentions(3), "acme").await;
        assert!(out.iter().all(|m| m.sentiment == Some(Sentiment::neutral())));
    }
}
