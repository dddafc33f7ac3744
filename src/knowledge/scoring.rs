//! Pure scoring functions: cosine similarity, keyword overlap, re-ranking.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::types::KnowledgeNode;

pub const TITLE_WEIGHT: f64 = 3.0;
pub const TAG_WEIGHT: f64 = 2.0;
pub const CONTENT_WEIGHT: f64 = 1.0;
/// Per-day decay rate of the recency score.
pub const RECENCY_DECAY: f64 = 0.1;

/// Cosine similarity; zero when either vector has no magnitude or the
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Lower-cased query terms.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Weighted term counts: title ×3, tags ×2, content ×1.
pub fn keyword_score(node: &KnowledgeNode, terms: &[String]) -> f64 {
    let title = node.title.to_lowercase();
    let content = node.content.to_lowercase();
    let tags: Vec<String> = node.tags.iter().map(|t| t.to_lowercase()).collect();

    terms
        .iter()
        .map(|term| {
            let in_title = title.matches(term.as_str()).count() as f64;
            let in_tags = tags.iter().filter(|t| t.contains(term.as_str())).count() as f64;
            let in_content = content.matches(term.as_str()).count() as f64;
            in_title * TITLE_WEIGHT + in_tags * TAG_WEIGHT + in_content * CONTENT_WEIGHT
        })
        .sum()
}

/// `exp(-0.1 * days)` since the node's latest activity; 1.0 for future dates.
pub fn recency_score(latest: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days = (now - latest).num_seconds().max(0) as f64 / 86_400.0;
    (-RECENCY_DECAY * days).exp()
}

/// Edge count of each candidate as a fraction of the busiest candidate.
pub fn connectivity_scores(
    candidates: &[&str],
    edge_counts: &HashMap<String, usize>,
) -> HashMap<String, f64> {
    let max = candidates
        .iter()
        .map(|id| edge_counts.get(*id).copied().unwrap_or(0))
        .max()
        .unwrap_or(0);

    candidates
        .iter()
        .map(|id| {
            let edges = edge_counts.get(*id).copied().unwrap_or(0);
            let score = if max == 0 {
                0.0
            } else {
                edges as f64 / max as f64
            };
            (id.to_string(), score)
        })
        .collect()
}

/// Blend base, recency and connectivity scores.
pub fn blend(
    base: f64,
    recency: f64,
    connectivity: f64,
    recency_weight: f64,
    connectivity_weight: f64,
) -> f64 {
    let base_weight = (1.0 - recency_weight - connectivity_weight).max(0.0);
    base * base_weight + recency * recency_weight + connectivity * connectivity_weight
}
