use crate::source::CandidatePaper;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opt-in recency rerank applied within the passing set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TemporalRerank {
    pub w_sim: f32,
    pub w_year: f32,
    pub current_year: i32,
    pub window_years: u32,
}

#[derive(Debug, Clone)]
pub struct GatingConfig {
    /// Similarity threshold tau.
    pub threshold: f32,
    /// Cap on the final selection, seed included.
    pub max_selected: usize,
    pub rerank: Option<TemporalRerank>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: CandidatePaper,
    pub similarity: f32,
    pub is_seed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalStats {
    /// Per sub-query retrieval counts (e.g. "ss_citations", "arxiv").
    pub per_source: BTreeMap<String, usize>,
    pub pooled: usize,
    pub embedded: usize,
    pub sim_min: Option<f32>,
    pub sim_max: Option<f32>,
    pub sim_median: Option<f32>,
    pub passing: usize,
    pub selected: usize,
}

/// Linear decay: 1.0 at the current year, 0.5 at the window edge, 0 outside.
pub fn year_weight(year: Option<i32>, current_year: i32, window_years: u32) -> f32 {
    let Some(year) = year else { return 0.0 };
    if year > current_year {
        return 1.0;
    }
    let age = (current_year - year) as f32;
    let window = window_years.max(1) as f32;
    if age > window {
        return 0.0;
    }
    1.0 - 0.5 * (age / window)
}

/// Deterministic semantic gate over scored candidates. The seed always
/// passes; every other selected candidate has similarity >= tau. Ordering
/// is similarity descending with lexicographic stable-id tie-break, or the
/// blended temporal score when rerank is enabled.
pub fn gate(
    seed: CandidatePaper,
    mut scored: Vec<ScoredCandidate>,
    config: &GatingConfig,
    stats: &mut RetrievalStats,
) -> Vec<ScoredCandidate> {
    // Seed may have been pooled back in from retrieval; it is re-added
    // explicitly below.
    scored.retain(|s| s.candidate.stable_id != seed.stable_id);

    let mut sims: Vec<f32> = scored.iter().map(|s| s.similarity).collect();
    sims.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    stats.sim_min = sims.first().copied();
    stats.sim_max = sims.last().copied();
    stats.sim_median = if sims.is_empty() {
        None
    } else {
        Some(sims[sims.len() / 2])
    };

    let mut passing: Vec<ScoredCandidate> = scored
        .into_iter()
        .filter(|s| s.similarity >= config.threshold)
        .collect();
    stats.passing = passing.len();

    match config.rerank {
        None => {
            passing.sort_by(|a, b| {
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.candidate.stable_id.cmp(&b.candidate.stable_id))
            });
        }
        Some(rerank) => {
            let score = |s: &ScoredCandidate| {
                rerank.w_sim * s.similarity
                    + rerank.w_year
                        * year_weight(s.candidate.year, rerank.current_year, rerank.window_years)
            };
            passing.sort_by(|a, b| {
                score(b)
                    .partial_cmp(&score(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        b.similarity
                            .partial_cmp(&a.similarity)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .then_with(|| a.candidate.stable_id.cmp(&b.candidate.stable_id))
            });
        }
    }

    let mut selected = Vec::with_capacity(config.max_selected.min(passing.len() + 1));
    selected.push(ScoredCandidate {
        candidate: seed,
        similarity: 1.0,
        is_seed: true,
    });
    for candidate in passing {
        if selected.len() >= config.max_selected.max(1) {
            break;
        }
        selected.push(candidate);
    }
    stats.selected = selected.len();
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, year: Option<i32>) -> CandidatePaper {
        CandidatePaper {
            stable_id: id.to_string(),
            title: id.to_string(),
            abstract_text: String::new(),
            year,
            source: "test".to_string(),
            external_ids: Default::default(),
        }
    }

    fn scored(id: &str, sim: f32) -> ScoredCandidate {
        ScoredCandidate {
            candidate: candidate(id, None),
            similarity: sim,
            is_seed: false,
        }
    }

    fn config(threshold: f32, max_selected: usize) -> GatingConfig {
        GatingConfig {
            threshold,
            max_selected,
            rerank: None,
        }
    }

    #[test]
    fn seed_always_passes_and_leads() {
        let mut stats = RetrievalStats::default();
        let out = gate(
            candidate("seed", None),
            vec![scored("a", 0.9), scored("b", 0.2)],
            &config(0.7, 10),
            &mut stats,
        );
        assert_eq!(out[0].candidate.stable_id, "seed");
        assert!(out[0].is_seed);
        assert_eq!(out.len(), 2);
        assert_eq!(stats.passing, 1);
    }

    #[test]
    fn threshold_is_monotonic() {
        let pool = vec![scored("a", 0.95), scored("b", 0.8), scored("c", 0.72)];

        let select = |tau: f32| {
            let mut stats = RetrievalStats::default();
            gate(candidate("seed", None), pool.clone(), &config(tau, usize::MAX), &mut stats)
                .into_iter()
                .filter(|s| !s.is_seed)
                .map(|s| s.candidate.stable_id)
                .collect::<Vec<_>>()
        };

        let loose = select(0.7);
        let tight = select(0.9);
        // Raising tau never admits a candidate the looser gate rejected.
        assert!(tight.iter().all(|id| loose.contains(id)));
        assert_eq!(tight, vec!["a"]);
    }

    #[test]
    fn ties_break_on_stable_id() {
        let mut stats = RetrievalStats::default();
        let out = gate(
            candidate("seed", None),
            vec![scored("zeta", 0.8), scored("alpha", 0.8)],
            &config(0.7, 10),
            &mut stats,
        );
        assert_eq!(out[1].candidate.stable_id, "alpha");
        assert_eq!(out[2].candidate.stable_id, "zeta");
    }

    #[test]
    fn cap_includes_the_seed() {
        let mut stats = RetrievalStats::default();
        let out = gate(
            candidate("seed", None),
            vec![scored("a", 0.9), scored("b", 0.85), scored("c", 0.8)],
            &config(0.7, 2),
            &mut stats,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].candidate.stable_id, "a");
    }

    #[test]
    fn year_weight_decays_linearly() {
        assert_eq!(year_weight(Some(2026), 2026, 10), 1.0);
        assert!((year_weight(Some(2021), 2026, 10) - 0.75).abs() < 1e-6);
        assert!((year_weight(Some(2016), 2026, 10) - 0.5).abs() < 1e-6);
        assert_eq!(year_weight(Some(2000), 2026, 10), 0.0);
        assert_eq!(year_weight(None, 2026, 10), 0.0);
    }

    #[test]
    fn temporal_rerank_prefers_recent_within_passing_set() {
        let mut old = scored("old", 0.9);
        old.candidate = candidate("old", Some(2016));
        let mut new = scored("new", 0.85);
        new.candidate = candidate("new", Some(2026));

        let cfg = GatingConfig {
            threshold: 0.7,
            max_selected: 10,
            rerank: Some(TemporalRerank {
                w_sim: 0.5,
                w_year: 0.5,
                current_year: 2026,
                window_years: 10,
            }),
        };
        let mut stats = RetrievalStats::default();
        let out = gate(candidate("seed", None), vec![old, new], &cfg, &mut stats);
        assert_eq!(out[1].candidate.stable_id, "new");
    }

    #[test]
    fn stats_capture_similarity_distribution() {
        let mut stats = RetrievalStats::default();
        gate(
            candidate("seed", None),
            vec![scored("a", 0.9), scored("b", 0.5), scored("c", 0.7)],
            &config(0.7, 10),
            &mut stats,
        );
        assert_eq!(stats.sim_min, Some(0.5));
        assert_eq!(stats.sim_max, Some(0.9));
        assert_eq!(stats.sim_median, Some(0.7));
        assert_eq!(stats.passing, 2);
        assert_eq!(stats.selected, 3);
    }
}
