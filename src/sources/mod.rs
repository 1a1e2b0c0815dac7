// src/sources/mod.rs
pub mod lemmy;
pub mod news;
pub mod reddit;
pub mod temptalia;
pub mod trustpilot;
pub mod youtube;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::config::AppConfig;
use crate::mention::Mention;

/// Result of one adapter fetch. Adapters never abort on partial trouble:
/// whatever was gathered before a term or page failed is still returned,
/// with `error` describing what went wrong.
#[derive(Debug, Default)]
pub struct SourceFetch {
    pub mentions: Vec<Mention>,
    pub error: Option<String>,
}

impl SourceFetch {
    pub fn ok(mentions: Vec<Mention>) -> Self {
        Self {
            mentions,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            mentions: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Per the adapter contract, success means "produced at least one result".
    pub fn success(&self) -> bool {
        !self.mentions.is_empty()
    }
}

/// Uniform contract every concrete source implements. Each adapter owns its
/// transport and its own politeness delay between term requests.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn source_type(&self) -> crate::mention::SourceType;
    async fn fetch(&self, terms: &[String], max_results: usize, days_back: u32) -> SourceFetch;
}

pub type DynSourceAdapter = Arc<dyn SourceAdapter>;

/// Build the production adapter set from config. Unknown names are skipped
/// with a warning; keyed adapters are still constructed without a key so the
/// orchestrator sees their "not configured" error through the normal path.
pub fn build_enabled_adapters(cfg: &AppConfig) -> Vec<DynSourceAdapter> {
    let mut out: Vec<DynSourceAdapter> = Vec::new();
    for name in &cfg.enabled_sources {
        match name.to_ascii_lowercase().as_str() {
            "reddit" => out.push(Arc::new(reddit::RedditAdapter::from_default_url(
                cfg.thresholds.clone(),
            ))),
            "lemmy" => out.push(Arc::new(lemmy::LemmyAdapter::from_default_url(
                cfg.thresholds.clone(),
            ))),
            "trustpilot" => out.push(Arc::new(trustpilot::TrustpilotAdapter::from_env(
                cfg.thresholds.clone(),
            ))),
            "temptalia" => out.push(Arc::new(temptalia::TemptaliaAdapter::from_default_url(
                cfg.thresholds.clone(),
            ))),
            "youtube" => out.push(Arc::new(youtube::YouTubeAdapter::from_env(
                cfg.thresholds.clone(),
            ))),
            "news" => out.push(Arc::new(news::GoogleNewsAdapter::from_default_url(
                cfg.thresholds.clone(),
            ))),
            other => {
                tracing::warn!(source = other, "unknown source in enabled_sources, skipping");
            }
        }
    }
    out
}

/// Normalize raw item text: decode entities, strip tags, unify quotes,
/// collapse whitespace, cap the length.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize curly quotes and guillemets to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

/// First search term contained in `text`, case-insensitively. Items matching
/// none of the terms are not mentions and get skipped by the adapters.
pub fn first_matched_term(text: &str, terms: &[String]) -> Option<String> {
    let haystack = text.to_lowercase();
    terms
        .iter()
        .find(|t| !t.trim().is_empty() && haystack.contains(&t.trim().to_lowercase()))
        .map(|t| t.trim().to_string())
}

/// Default snippet length used by the adapters.
pub const SNIPPET_MAX_CHARS: usize = 240;

/// Bounded excerpt centered on the first occurrence of `keyword`. Falls back
/// to a plain prefix when the keyword is not found (already-normalized text
/// can drift from the match site).
pub fn excerpt_around(text: &str, keyword: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let lower = text.to_lowercase();
    let kw = keyword.to_lowercase();
    let match_pos = lower
        .find(&kw)
        .map(|byte| lower[..byte].chars().count())
        .unwrap_or(0);

    let half = max_chars / 2;
    let end = (match_pos.saturating_sub(half) + max_chars).min(chars.len());
    let start = end.saturating_sub(max_chars);

    let mut out: String = chars[start..end].iter().collect();
    if start > 0 {
        out = format!("…{}", out.trim_start());
    }
    if end < chars.len() {
        out = format!("{}…", out.trim_end());
    }
    out
}

/// Local per-adapter dedup: at most one mention per content hash, keeping
/// the one with more upvotes. Ties keep whichever was parsed first.
/// Cross-adapter dedup is the orchestrator's job.
pub fn dedup_local(mentions: Vec<Mention>) -> Vec<Mention> {
    let mut order: Vec<String> = Vec::with_capacity(mentions.len());
    let mut best: HashMap<String, Mention> = HashMap::with_capacity(mentions.len());
    for m in mentions {
        match best.entry(m.content_hash.clone()) {
            Entry::Vacant(slot) => {
                order.push(m.content_hash.clone());
                slot.insert(m);
            }
            Entry::Occupied(mut slot) => {
                if m.engagement.upvotes.unwrap_or(0) > slot.get().engagement.upvotes.unwrap_or(0) {
                    slot.insert(m);
                }
            }
        }
    }
    order.into_iter().filter_map(|h| best.remove(&h)).collect()
}

/// Is `published_at` inside the look-back window? `days_back == 0` disables
/// the filter.
pub fn within_window(published_at: DateTime<Utc>, days_back: u32, now: DateTime<Utc>) -> bool {
    if days_back == 0 {
        return true;
    }
    let cutoff = now - chrono::Duration::days(i64::from(days_back));
    published_at >= cutoff
}

/// Shared HTTP client construction for adapter transports.
pub(crate) fn http_client(total_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("brand-mention-aggregator/0.1 (+github.com/fableworks/brand-mention-aggregator)")
        .connect_timeout(Duration::from_secs(4))
        .timeout(total_timeout)
        .build()
        .expect("reqwest client")
}

/// RFC 2822 feed dates ("Tue, 04 Aug 2026 07:15:00 +0000") to UTC. Google
/// feeds emit the obsolete `GMT` zone name, which the strict parser rejects.
pub(crate) fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let normalized;
    let ts = if let Some(stripped) = ts.strip_suffix(" GMT").or_else(|| ts.strip_suffix(" UT")) {
        normalized = format!("{} +0000", stripped);
        normalized.as_str()
    } else {
        ts
    };
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

/// Feed bodies in the wild carry HTML entities that break strict XML
/// deserialization; replace the common offenders before parsing.
pub(crate) fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

pub(crate) fn epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(secs as i64, 0)
}

/// Joined per-term error fragments, or `None` when every term succeeded.
pub(crate) fn join_errors(fragments: Vec<String>) -> Option<String> {
    if fragments.is_empty() {
        None
    } else {
        Some(fragments.join("; "))
    }
}
