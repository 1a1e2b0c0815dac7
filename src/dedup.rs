// src/dedup.rs
//! Cross-source content deduplication.
//!
//! A streaming `hash -> best mention` reduction over the combined per-source
//! lists. Replacement policy, in order:
//!
//! - a strictly higher `upvotes + comments` score wins;
//! - at equal zero scores the more recent `published_at` wins;
//! - at equal nonzero scores the first-seen mention wins.
//!
//! The zero/nonzero tie split is a deliberate policy: engagement-free items
//! carry no better signal than recency, while equally-engaged items keep the
//! copy that arrived first.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use metrics::counter;

use crate::mention::Mention;

/// Collapse `mentions` to at most one entry per `content_hash`.
pub fn merge(mentions: Vec<Mention>) -> Vec<Mention> {
    let incoming = mentions.len();
    let mut order: Vec<String> = Vec::with_capacity(incoming);
    let mut best: HashMap<String, Mention> = HashMap::with_capacity(incoming);

    for m in mentions {
        match best.entry(m.content_hash.clone()) {
            Entry::Vacant(slot) => {
                order.push(m.content_hash.clone());
                slot.insert(m);
            }
            Entry::Occupied(mut slot) => {
                if replaces(&m, slot.get()) {
                    slot.insert(m);
                }
            }
        }
    }

    let removed = incoming - best.len();
    if removed > 0 {
        counter!("aggregate_dedup_removed_total").increment(removed as u64);
    }

    order.into_iter().filter_map(|h| best.remove(&h)).collect()
}

fn replaces(candidate: &Mention, held: &Mention) -> bool {
    let new_score = candidate.engagement.dedup_score();
    let held_score = held.engagement.dedup_score();
    if new_score > held_score {
        return true;
    }
    if new_score == 0 && held_score == 0 {
        return candidate.published_at > held.published_at;
    }
    false
}
