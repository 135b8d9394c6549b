// crates/apprentice-server/src/search/hybrid.rs
// Reciprocal Rank Fusion with exact-term boost and score normalisation

use super::query::term_match_ratio;
use crate::config::HybridWeights;
use std::collections::HashMap;

/// RRF rank constant.
const RRF_K: f64 = 60.0;

/// Maximum boost for a full exact-term match.
const TERM_BOOST: f64 = 3.0;

/// Which channel(s) produced a fused row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Fts,
    Vector,
    Both,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Fts => "fts",
            MatchType::Vector => "vector",
            MatchType::Both => "both",
        }
    }
}

/// One retrieval-channel row entering fusion.
#[derive(Debug, Clone)]
pub struct ChannelHit<T> {
    pub id: String,
    pub item: T,
    /// Raw channel score: negated bm25 for FTS, cosine distance for vector.
    pub raw: f64,
}

/// One fused, scored row.
#[derive(Debug, Clone)]
pub struct FusedHit<T> {
    pub id: String,
    pub item: T,
    pub score: f64,
    pub match_type: MatchType,
    pub fts_score: Option<f64>,
    pub vector_distance: Option<f64>,
}

/// Normalise a pure-FTS result list: min-max onto [0, 1].
pub fn normalize_fts<T>(hits: Vec<ChannelHit<T>>) -> Vec<FusedHit<T>> {
    let (min, max) = hits
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), h| {
            (lo.min(h.raw), hi.max(h.raw))
        });
    let range = max - min;
    hits.into_iter()
        .map(|h| {
            let score = if range > 0.0 { (h.raw - min) / range } else { 1.0 };
            FusedHit {
                id: h.id,
                score,
                match_type: MatchType::Fts,
                fts_score: Some(h.raw),
                vector_distance: None,
                item: h.item,
            }
        })
        .collect()
}

/// Normalise a pure-vector result list: `1 - distance / 2` (cosine
/// distance spans [0, 2]).
pub fn normalize_vector<T>(hits: Vec<ChannelHit<T>>) -> Vec<FusedHit<T>> {
    hits.into_iter()
        .map(|h| FusedHit {
            id: h.id,
            score: 1.0 - h.raw / 2.0,
            match_type: MatchType::Vector,
            fts_score: None,
            vector_distance: Some(h.raw),
            item: h.item,
        })
        .collect()
}

/// Fuse FTS and vector channels with weighted RRF and the exact-term
/// boost, descending by fused score.
///
/// Channel lists arrive best-first; ranks are 1-based. The boost applies
/// only to multi-term queries: `1 + (B - 1) * term_match_ratio`.
pub fn rrf_fuse<T>(
    fts: Vec<ChannelHit<T>>,
    vector: Vec<ChannelHit<T>>,
    weights: HybridWeights,
    query_terms: &[String],
    match_text: impl Fn(&T) -> String,
) -> Vec<FusedHit<T>> {
    struct Entry<T> {
        item: T,
        fts: Option<(usize, f64)>,
        vector: Option<(usize, f64)>,
    }

    let mut entries: HashMap<String, Entry<T>> = HashMap::new();

    for (rank0, hit) in fts.into_iter().enumerate() {
        entries
            .entry(hit.id)
            .or_insert_with(|| Entry {
                item: hit.item,
                fts: None,
                vector: None,
            })
            .fts = Some((rank0 + 1, hit.raw));
    }
    for (rank0, hit) in vector.into_iter().enumerate() {
        entries
            .entry(hit.id)
            .or_insert_with(|| Entry {
                item: hit.item,
                fts: None,
                vector: None,
            })
            .vector = Some((rank0 + 1, hit.raw));
    }

    let boosting = query_terms.len() >= 2;
    let mut fused: Vec<FusedHit<T>> = entries
        .into_iter()
        .map(|(id, entry)| {
            let mut rrf = 0.0;
            if let Some((rank, _)) = entry.fts {
                rrf += weights.fts / (RRF_K + rank as f64);
            }
            if let Some((rank, _)) = entry.vector {
                rrf += weights.vector / (RRF_K + rank as f64);
            }

            let boost = if boosting {
                1.0 + (TERM_BOOST - 1.0) * term_match_ratio(query_terms, &match_text(&entry.item))
            } else {
                1.0
            };

            let match_type = match (entry.fts.is_some(), entry.vector.is_some()) {
                (true, true) => MatchType::Both,
                (true, false) => MatchType::Fts,
                _ => MatchType::Vector,
            };

            FusedHit {
                id,
                score: rrf * boost,
                match_type,
                fts_score: entry.fts.map(|(_, s)| s),
                vector_distance: entry.vector.map(|(_, d)| d),
                item: entry.item,
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}

/// Apply offset/limit pagination.
pub fn paginate<T>(hits: Vec<FusedHit<T>>, offset: usize, limit: usize) -> Vec<FusedHit<T>> {
    hits.into_iter().skip(offset).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, raw: f64) -> ChannelHit<String> {
        ChannelHit {
            id: id.to_string(),
            item: id.to_string(),
            raw,
        }
    }

    fn weights() -> HybridWeights {
        HybridWeights::default()
    }

    #[test]
    fn test_normalize_fts_min_max() {
        let fused = normalize_fts(vec![hit("a", -1.0), hit("b", -3.0), hit("c", -2.0)]);
        let by_id: HashMap<&str, f64> = fused.iter().map(|h| (h.id.as_str(), h.score)).collect();
        assert_eq!(by_id["a"], 1.0);
        assert_eq!(by_id["b"], 0.0);
        assert_eq!(by_id["c"], 0.5);
    }

    #[test]
    fn test_normalize_fts_degenerate_range() {
        let fused = normalize_fts(vec![hit("a", -2.0), hit("b", -2.0)]);
        assert!(fused.iter().all(|h| h.score == 1.0));
    }

    #[test]
    fn test_normalize_vector() {
        let fused = normalize_vector(vec![hit("a", 0.0), hit("b", 1.0), hit("c", 2.0)]);
        let by_id: HashMap<&str, f64> = fused.iter().map(|h| (h.id.as_str(), h.score)).collect();
        assert_eq!(by_id["a"], 1.0);
        assert_eq!(by_id["b"], 0.5);
        assert_eq!(by_id["c"], 0.0);
    }

    #[test]
    fn test_rrf_both_channels_beat_one() {
        let fused = rrf_fuse(
            vec![hit("both", -1.0), hit("fts-only", -2.0)],
            vec![hit("both", 0.1), hit("vec-only", 0.2)],
            weights(),
            &[],
            |item| item.clone(),
        );
        assert_eq!(fused[0].id, "both");
        assert_eq!(fused[0].match_type, MatchType::Both);
        let expected = 0.4 / 61.0 + 0.6 / 61.0;
        assert!((fused[0].score - expected).abs() < 1e-12);

        let fts_only = fused.iter().find(|h| h.id == "fts-only").unwrap();
        assert_eq!(fts_only.match_type, MatchType::Fts);
        assert!((fts_only.score - 0.4 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn test_term_boost_prefers_exact_match() {
        // same vector rank for both; FTS matched only "deploy production"
        let terms = vec!["deploy".to_string(), "production".to_string()];
        let fused = rrf_fuse(
            vec![hit("deploy production", -1.0)],
            vec![hit("deploy production", 0.0), hit("deploy staging", 0.0)],
            weights(),
            &terms,
            |item| item.clone(),
        );
        assert_eq!(fused[0].id, "deploy production");
        // full match: boost 3.0 on both channels
        let exact = (0.4 / 61.0 + 0.6 / 61.0) * 3.0;
        assert!((fused[0].score - exact).abs() < 1e-12);
        // half match: boost 2.0 on the vector channel alone
        let partial = (0.6 / 62.0) * 2.0;
        let staging = fused.iter().find(|h| h.id == "deploy staging").unwrap();
        assert!((staging.score - partial).abs() < 1e-12);
    }

    #[test]
    fn test_single_term_query_gets_no_boost() {
        let terms = vec!["deploy".to_string()];
        let fused = rrf_fuse(
            vec![hit("deploy", -1.0)],
            vec![],
            weights(),
            &terms,
            |item| item.clone(),
        );
        assert!((fused[0].score - 0.4 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_paginate() {
        let fused = normalize_vector(vec![hit("a", 0.0), hit("b", 0.5), hit("c", 1.0)]);
        let page = paginate(fused, 1, 1);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "b");
    }
}
