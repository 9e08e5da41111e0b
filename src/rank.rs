//! Neurosymbolic ranking of repurposing candidates for a disease.
//!
//! Candidates come from the graph source, are scored in one batch by a
//! [`CandidateScorer`], and those with a positive score are explained by an
//! [`Explainer`]. A candidate with at least one explanation gets a fixed
//! additive bonus, capped at 1.0. Results are sorted by fused score (stable,
//! so ties keep candidate order), truncated and cached per `(disease, top_k)`.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, MemoCache, normalize_id};
use crate::error::RemedyResult;
use crate::graph::{CandidateCompound, GraphSource, fetch_candidates};
use crate::predict::ModelManager;
use crate::reason::{Explanation, ReasonResult, SymbolicReasoner};

/// Batch treatment scores for `(compound, disease)` pairs, in input order.
pub trait CandidateScorer: Send + Sync {
    fn score_batch(&self, pairs: &[(String, String)]) -> Vec<f32>;
}

impl CandidateScorer for ModelManager {
    fn score_batch(&self, pairs: &[(String, String)]) -> Vec<f32> {
        self.predict_batch(pairs)
    }
}

/// Symbolic evidence for a pair.
pub trait Explainer: Send + Sync {
    fn explain(&self, compound_id: &str, disease_id: &str) -> ReasonResult<Vec<Explanation>>;
}

impl Explainer for SymbolicReasoner {
    fn explain(&self, compound_id: &str, disease_id: &str) -> ReasonResult<Vec<Explanation>> {
        SymbolicReasoner::explain(self, compound_id, disease_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankConfig {
    /// Most candidates pulled from the graph per query.
    pub candidate_pool: usize,
    /// Added to the score of any explained candidate.
    pub symbolic_bonus: f32,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            candidate_pool: 50,
            symbolic_bonus: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub compound_id: String,
    pub compound_name: String,
    /// Fused score in `[0, 1]`.
    pub score: f32,
    /// Score before the symbolic bonus.
    pub neural_score: f32,
    pub explanations: Vec<Explanation>,
}

/// `min(score + bonus, 1)` when explained, the neural score otherwise.
pub fn fuse(neural_score: f32, explained: bool, bonus: f32) -> f32 {
    if explained {
        (neural_score + bonus).min(1.0)
    } else {
        neural_score
    }
}

pub struct Orchestrator {
    source: Arc<dyn GraphSource>,
    scorer: Arc<dyn CandidateScorer>,
    explainer: Arc<dyn Explainer>,
    config: RankConfig,
    results: MemoCache<(String, usize), Vec<RankedCandidate>>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn GraphSource>,
        scorer: Arc<dyn CandidateScorer>,
        explainer: Arc<dyn Explainer>,
        config: RankConfig,
    ) -> Self {
        Self {
            source,
            scorer,
            explainer,
            config,
            results: MemoCache::new(),
        }
    }

    pub fn config(&self) -> &RankConfig {
        &self.config
    }

    /// Top `top_k` repurposing candidates for `disease_id`.
    pub fn rank(&self, disease_id: &str, top_k: usize) -> RemedyResult<Vec<RankedCandidate>> {
        self.rank_with(disease_id, top_k, true)
    }

    /// Like [`Orchestrator::rank`]; `use_cache = false` bypasses the lookup
    /// but still stores the fresh result.
    pub fn rank_with(
        &self,
        disease_id: &str,
        top_k: usize,
        use_cache: bool,
    ) -> RemedyResult<Vec<RankedCandidate>> {
        let key = (normalize_id(disease_id), top_k);
        if use_cache {
            if let Some(hit) = self.results.get(&key) {
                return Ok(hit);
            }
        }

        let candidates =
            fetch_candidates(self.source.as_ref(), disease_id, self.config.candidate_pool)?;
        if candidates.is_empty() {
            tracing::info!(disease_id, "no repurposing candidates");
            return Ok(Vec::new());
        }

        let pairs: Vec<(String, String)> = candidates
            .iter()
            .map(|c| (c.id.clone(), disease_id.to_string()))
            .collect();
        let scores = self.scorer.score_batch(&pairs);

        let mut ranked: Vec<RankedCandidate> = candidates
            .into_par_iter()
            .zip(scores.into_par_iter())
            .map(|(candidate, score)| self.assess(candidate, disease_id, score))
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k);
        tracing::debug!(disease_id, top_k, returned = ranked.len(), "ranking computed");

        self.results.insert(key, ranked.clone());
        Ok(ranked)
    }

    fn assess(&self, candidate: CandidateCompound, disease_id: &str, score: f32) -> RankedCandidate {
        let explanations = if score > 0.0 {
            self.explainer
                .explain(&candidate.id, disease_id)
                .unwrap_or_else(|e| {
                    tracing::warn!(
                        compound_id = %candidate.id,
                        disease_id,
                        error = %e,
                        "symbolic evaluation failed, ranking on the neural score"
                    );
                    Vec::new()
                })
        } else {
            Vec::new()
        };
        RankedCandidate {
            score: fuse(score, !explanations.is_empty(), self.config.symbolic_bonus),
            neural_score: score,
            compound_id: candidate.id,
            compound_name: candidate.name,
            explanations,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.results.stats()
    }

    pub fn clear_cache(&self) {
        self.results.clear();
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("source", &self.source.name())
            .field("config", &self.config)
            .field("results", &self.results)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, KnowledgeGraph, MatchedPath, NodeKind};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedScores(HashMap<&'static str, f32>);

    impl CandidateScorer for FixedScores {
        fn score_batch(&self, pairs: &[(String, String)]) -> Vec<f32> {
            pairs
                .iter()
                .map(|(c, _)| self.0.get(c.as_str()).copied().unwrap_or(0.0))
                .collect()
        }
    }

    #[derive(Default)]
    struct CountingExplainer {
        explained: HashMap<&'static str, usize>,
        calls: AtomicUsize,
    }

    impl Explainer for CountingExplainer {
        fn explain(&self, compound_id: &str, _: &str) -> ReasonResult<Vec<Explanation>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = self.explained.get(compound_id).copied().unwrap_or(0);
            Ok((0..n)
                .map(|i| Explanation {
                    rule: format!("rule {i}"),
                    confidence: 1.0,
                    path: MatchedPath::default(),
                })
                .collect())
        }
    }

    fn graph() -> KnowledgeGraph {
        let kg = KnowledgeGraph::new();
        kg.insert_node(GraphNode::new("A", NodeKind::Compound).with_name("Alpha"));
        kg.insert_node(GraphNode::new("B", NodeKind::Compound).with_name("Beta"));
        kg.insert_node(GraphNode::new("C", NodeKind::Compound));
        kg.insert_node(GraphNode::new("T", NodeKind::Compound));
        kg.insert_node(GraphNode::new("D", NodeKind::Disease));
        kg.insert_edge("T", "TREATS", "D").unwrap();
        kg
    }

    fn orchestrator(explainer: Arc<CountingExplainer>) -> Orchestrator {
        let scores = FixedScores(HashMap::from([("A", 0.1), ("B", 0.6), ("C", 0.0), ("T", 0.9)]));
        Orchestrator::new(
            Arc::new(graph()),
            Arc::new(scores),
            explainer,
            RankConfig::default(),
        )
    }

    fn explainer() -> Arc<CountingExplainer> {
        Arc::new(CountingExplainer {
            explained: HashMap::from([("B", 2), ("C", 3)]),
            ..Default::default()
        })
    }

    #[test]
    fn fusion_is_bounded() {
        assert_eq!(fuse(0.3, false, 0.2), 0.3);
        assert!((fuse(0.3, true, 0.2) - 0.5).abs() < 1e-6);
        assert_eq!(fuse(0.95, true, 0.2), 1.0);
    }

    #[test]
    fn boosted_candidate_outranks_and_zero_scores_are_not_explained() {
        let ex = explainer();
        let orch = orchestrator(Arc::clone(&ex));
        let ranked = orch.rank("D", 2).unwrap();

        let ids: Vec<_> = ranked.iter().map(|r| r.compound_id.as_str()).collect();
        assert_eq!(ids, ["B", "A"]);
        assert!((ranked[0].score - 0.8).abs() < 1e-6);
        assert_eq!(ranked[0].explanations.len(), 2);
        assert_eq!(ranked[0].compound_name, "Beta");
        assert!((ranked[1].score - 0.1).abs() < 1e-6);
        assert!(ranked[1].explanations.is_empty());
        // A and B only; C scored zero and T already treats D.
        assert_eq!(ex.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn results_are_cached_per_disease_and_k() {
        let ex = explainer();
        let orch = orchestrator(Arc::clone(&ex));
        let first = orch.rank("D", 2).unwrap();
        let second = orch.rank(" d ", 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(ex.calls.load(Ordering::SeqCst), 2);
        let stats = orch.cache_stats();
        assert_eq!((stats.size, stats.hits, stats.misses), (1, 1, 1));

        orch.rank("D", 3).unwrap();
        assert_eq!(orch.cache_stats().size, 2);

        orch.clear_cache();
        assert!(orch.cache_stats().is_empty());
    }

    #[test]
    fn ties_keep_candidate_order() {
        let scores = FixedScores(HashMap::from([("A", 0.5), ("B", 0.5), ("C", 0.5)]));
        let orch = Orchestrator::new(
            Arc::new(graph()),
            Arc::new(scores),
            Arc::new(CountingExplainer::default()),
            RankConfig::default(),
        );
        let ids: Vec<_> = orch
            .rank("D", 10)
            .unwrap()
            .into_iter()
            .map(|r| r.compound_id)
            .collect();
        assert_eq!(ids, ["A", "B", "C"]);
    }

    #[test]
    fn no_candidates_is_empty() {
        let kg = KnowledgeGraph::new();
        kg.insert_node(GraphNode::new("D", NodeKind::Disease));
        let orch = Orchestrator::new(
            Arc::new(kg),
            Arc::new(FixedScores(HashMap::new())),
            Arc::new(CountingExplainer::default()),
            RankConfig::default(),
        );
        assert!(orch.rank("D", 5).unwrap().is_empty());
    }
}
