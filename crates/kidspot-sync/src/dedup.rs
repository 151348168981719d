//! Name-based duplicate detection.
//!
//! Deliberately crude and not geo-aware: two different venues that share a
//! normalized name are merged, and spelling variants beyond the suffix list are
//! not. Quality scoring depends on the exact suffix list and the 0.7
//! similarity threshold, so changes here shift ingestion outcomes.

use std::collections::HashSet;

use kidspot_core::CandidateSpot;
use strsim::levenshtein;

/// Stripped at most once, only when something remains.
pub const NAME_SUFFIXES: [&str; 3] = ["レストラン", "カフェ", "店"];

/// Similarity above which a nearby record counts as the same venue.
pub const DUPLICATE_THRESHOLD: f64 = 0.7;

/// Lowercased, alphanumerics only (any script), one common suffix removed.
pub fn normalize_name(name: &str) -> String {
    let folded: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    for suffix in NAME_SUFFIXES {
        if let Some(stem) = folded.strip_suffix(suffix) {
            if !stem.is_empty() {
                return stem.to_string();
            }
        }
    }
    folded
}

/// 1.0 for equal normalized names, 0.8 when one contains the other, otherwise
/// `1 - levenshtein / max_len` over characters. Empty names match nothing.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return 0.8;
    }
    let longest = a.chars().count().max(b.chars().count());
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

/// Keeps the first candidate seen for each normalized name, preserving order.
pub fn dedup_by_name(spots: Vec<CandidateSpot>) -> Vec<CandidateSpot> {
    let mut seen = HashSet::new();
    spots
        .into_iter()
        .filter(|spot| {
            let key = normalize_name(&spot.name);
            let key = if key.is_empty() { spot.name.trim().to_string() } else { key };
            seen.insert(key)
        })
        .collect()
}
