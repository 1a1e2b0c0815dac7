//! # Mention Model
//!
//! The canonical normalized record every source adapter must produce.
//!
//! - `id` is deterministic over `(url, matched_keyword)` and stable across
//!   repeated fetches of the same item, even if its content is edited later.
//! - `content_hash` fingerprints the normalized `title + snippet` text and
//!   intentionally collides across near-duplicate postings so the
//!   deduplicator can merge them. It is not the same thing as `id`.
//! - `is_high_engagement` is computed once at creation against the
//!   per-source-type threshold table and never recomputed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of the originating source. Drives the engagement-threshold policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Forum,
    Blog,
    Review,
    Social,
    Video,
    News,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Forum => "forum",
            SourceType::Blog => "blog",
            SourceType::Review => "review",
            SourceType::Social => "social",
            SourceType::Video => "video",
            SourceType::News => "news",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sparse engagement counters. An absent field means "unknown", not zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
}

impl Engagement {
    /// Combined score used by the deduplicator: missing counters read as 0.
    pub fn dedup_score(&self) -> u64 {
        self.upvotes.unwrap_or(0) + self.comments.unwrap_or(0)
    }

    pub fn is_unknown(&self) -> bool {
        self.upvotes.is_none()
            && self.comments.is_none()
            && self.shares.is_none()
            && self.views.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

/// Sentiment of one mention, populated only after enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub score: f32,
}

/// Raw scores above this magnitude leave the neutral band.
const SENTIMENT_NEUTRAL_BAND: f32 = 0.15;

impl Sentiment {
    /// The fallback value used whenever scoring fails or is not configured.
    pub fn neutral() -> Self {
        Self {
            label: SentimentLabel::Neutral,
            score: 0.0,
        }
    }

    /// Map a raw score to a labeled sentiment, clamping into `[-1, 1]`.
    pub fn from_score(raw: f32) -> Self {
        let score = if raw.is_finite() {
            raw.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let label = if score > SENTIMENT_NEUTRAL_BAND {
            SentimentLabel::Positive
        } else if score < -SENTIMENT_NEUTRAL_BAND {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        };
        Self { label, score }
    }
}

/// High-engagement rule for one source type. A `None` field means the rule
/// does not apply to that counter (e.g. blogs have no upvote concept).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(default)]
    pub min_upvotes: Option<u64>,
    #[serde(default)]
    pub min_comments: Option<u64>,
}

impl Threshold {
    /// OR semantics: meeting any applicable counter flags the mention.
    pub fn met_by(&self, engagement: &Engagement) -> bool {
        let upvotes_hit = match (self.min_upvotes, engagement.upvotes) {
            (Some(min), Some(v)) => v >= min,
            _ => false,
        };
        let comments_hit = match (self.min_comments, engagement.comments) {
            (Some(min), Some(v)) => v >= min,
            _ => false,
        };
        upvotes_hit || comments_hit
    }
}

/// Engagement-threshold policy table, keyed by source type.
///
/// The defaults are design constants, not tuning artifacts; deployments can
/// override individual rows from `config/aggregator.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdTable {
    #[serde(default = "ThresholdTable::social_default")]
    pub social: Threshold,
    #[serde(default = "ThresholdTable::social_default")]
    pub forum: Threshold,
    #[serde(default = "ThresholdTable::review_default")]
    pub review: Threshold,
    #[serde(default = "ThresholdTable::editorial_default")]
    pub blog: Threshold,
    #[serde(default = "ThresholdTable::social_default")]
    pub video: Threshold,
    #[serde(default = "ThresholdTable::editorial_default")]
    pub news: Threshold,
}

impl ThresholdTable {
    fn social_default() -> Threshold {
        Threshold {
            min_upvotes: Some(100),
            min_comments: Some(25),
        }
    }

    fn review_default() -> Threshold {
        Threshold {
            min_upvotes: Some(50),
            min_comments: Some(10),
        }
    }

    fn editorial_default() -> Threshold {
        Threshold {
            min_upvotes: None,
            min_comments: Some(10),
        }
    }

    pub fn for_type(&self, source_type: SourceType) -> &Threshold {
        match source_type {
            SourceType::Social => &self.social,
            SourceType::Forum => &self.forum,
            SourceType::Review => &self.review,
            SourceType::Blog => &self.blog,
            SourceType::Video => &self.video,
            SourceType::News => &self.news,
        }
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            social: Self::social_default(),
            forum: Self::social_default(),
            review: Self::review_default(),
            blog: Self::editorial_default(),
            video: Self::social_default(),
            news: Self::editorial_default(),
        }
    }
}

/// One normalized observation of brand-related content from a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub id: String,
    pub source: String,
    pub source_type: SourceType,
    pub url: String,
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    pub matched_keyword: String,
    pub published_at: DateTime<Utc>,
    pub scraped_at: DateTime<Utc>,
    #[serde(default)]
    pub engagement: Engagement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    pub is_high_engagement: bool,
    pub content_hash: String,
}

/// The fields an adapter supplies; the derived fields (`id`, `content_hash`,
/// `is_high_engagement`, `scraped_at`) are computed in `into_mention`.
#[derive(Debug, Clone)]
pub struct MentionSeed {
    pub source: String,
    pub source_type: SourceType,
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub full_text: Option<String>,
    pub matched_keyword: String,
    pub published_at: DateTime<Utc>,
    pub engagement: Engagement,
}

impl MentionSeed {
    pub fn into_mention(self, thresholds: &ThresholdTable) -> Mention {
        let id = mention_id(&self.url, &self.matched_keyword);
        let content_hash = content_hash(&self.title, &self.snippet);
        let is_high_engagement = thresholds.for_type(self.source_type).met_by(&self.engagement);
        Mention {
            id,
            source: self.source,
            source_type: self.source_type,
            url: self.url,
            title: self.title,
            snippet: self.snippet,
            full_text: self.full_text,
            matched_keyword: self.matched_keyword,
            published_at: self.published_at,
            scraped_at: Utc::now(),
            engagement: self.engagement,
            sentiment: None,
            is_high_engagement,
            content_hash,
        }
    }
}

/// Deterministic mention id over `(url, keyword)`. Stable across re-fetches
/// of the same item regardless of later content edits.
pub fn mention_id(url: &str, keyword: &str) -> String {
    short_hash(&format!("{}\n{}", url.trim(), keyword.trim().to_lowercase()))
}

/// Fingerprint of the normalized `title + snippet` text. Case, punctuation
/// and whitespace variants of the same posting hash identically.
pub fn content_hash(title: &str, snippet: &str) -> String {
    let canonical = canonicalize(&format!("{} {}", title, snippet));
    short_hash(&canonical)
}

/// Lowercase, fold every non-alphanumeric run into a single space.
fn canonicalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = true;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            for c in ch.to_lowercase() {
                out.push(c);
            }
            prev_space = false;
        } else if !prev_space {
            out.push(' ');
            prev_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Truncated SHA-256 hex. 16 chars is plenty for per-run dedup keys.
fn short_hash(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_id_is_stable_and_keyword_scoped() {
        let a = mention_id("https://example.com/post/1", "acme lipstick");
        let b = mention_id("https://example.com/post/1", "acme lipstick");
        let c = mention_id("https://example.com/post/1", "acme mascara");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn content_hash_collides_across_formatting_variants() {
        let a = content_hash("ACME Lipstick Review!", "loved the new   shade.");
        let b = content_hash("acme lipstick review", "Loved the new shade");
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_differs_for_different_text() {
        let a = content_hash("ACME Lipstick Review", "loved it");
        let b = content_hash("ACME Lipstick Review", "hated it");
        assert_ne!(a, b);
    }

    #[test]
    fn sentiment_label_mapping_and_clamping() {
        assert_eq!(Sentiment::from_score(0.6).label, SentimentLabel::Positive);
        assert_eq!(Sentiment::from_score(-0.6).label, SentimentLabel::Negative);
        assert_eq!(Sentiment::from_score(0.05).label, SentimentLabel::Neutral);
        assert_eq!(Sentiment::from_score(3.0).score, 1.0);
        assert_eq!(Sentiment::from_score(f32::NAN).score, 0.0);
    }

    #[test]
    fn social_threshold_flags_on_upvotes_or_comments() {
        let table = ThresholdTable::default();
        let hot = Engagement {
            upvotes: Some(150),
            ..Default::default()
        };
        let busy = Engagement {
            comments: Some(30),
            ..Default::default()
        };
        let quiet = Engagement {
            upvotes: Some(12),
            comments: Some(3),
            ..Default::default()
        };
        assert!(table.for_type(SourceType::Social).met_by(&hot));
        assert!(table.for_type(SourceType::Social).met_by(&busy));
        assert!(!table.for_type(SourceType::Social).met_by(&quiet));
    }

    #[test]
    fn blog_threshold_ignores_upvotes() {
        let table = ThresholdTable::default();
        let upvoted = Engagement {
            upvotes: Some(150),
            ..Default::default()
        };
        let discussed = Engagement {
            upvotes: Some(150),
            comments: Some(10),
            ..Default::default()
        };
        assert!(!table.for_type(SourceType::Blog).met_by(&upvoted));
        assert!(table.for_type(SourceType::Blog).met_by(&discussed));
    }

    #[test]
    fn unknown_engagement_scores_zero() {
        let e = Engagement::default();
        assert!(e.is_unknown());
        assert_eq!(e.dedup_score(), 0);
    }
}
