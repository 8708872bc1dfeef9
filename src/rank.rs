//! Deduplication and ranking of fan-out results.
//!
//! Collapses the combined hit list from all backends into a single ranked
//! sequence: hits sharing an identity key keep only the higher-scored one,
//! the survivors are sorted by score descending (stable, so equal scores
//! keep their arrival order), and the list is truncated to the configured
//! cap so the evidence handed to generation never grows unbounded.

use std::collections::HashMap;

use crate::models::{HitKey, SearchHit};

/// Merge, rank, and cap the combined hit list.
pub fn dedup_and_rank(hits: Vec<SearchHit>, cap: usize) -> Vec<SearchHit> {
    let mut by_key: HashMap<HitKey, usize> = HashMap::new();
    let mut merged: Vec<SearchHit> = Vec::new();

    for hit in hits {
        match by_key.get(&hit.key()) {
            Some(&idx) => {
                // Same identity seen before: keep the higher-scored hit in
                // its first-arrival position.
                if hit.score() > merged[idx].score() {
                    merged[idx] = hit;
                }
            }
            None => {
                by_key.insert(hit.key(), merged.len());
                merged.push(hit);
            }
        }
    }

    // Stable sort: equal scores preserve arrival order.
    merged.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(cap);

    merged
}
