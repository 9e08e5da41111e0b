//! Symbolic rule engine: fixed metapath rules as certain evidence.
//!
//! Each rule is a named [`Step`] sequence walked from the compound. A rule
//! that finds a path contributes one [`Explanation`] with confidence 1.0 and
//! the first matching path. Output order is the order of [`RULES`].

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, MemoCache, PairKey, pair_key};
use crate::error::ReasonError;
use crate::graph::{GraphQuery, GraphSource, MatchedPath, NodeKind, Step};

/// Result type for symbolic reasoning.
pub type ReasonResult<T> = std::result::Result<T, ReasonError>;

/// Confidence of every symbolic match.
pub const RULE_CONFIDENCE: f32 = 1.0;

/// A named metapath template.
#[derive(Debug, PartialEq, Eq)]
pub struct MetapathRule {
    pub name: &'static str,
    pub description: &'static str,
    pub steps: &'static [Step],
}

/// The rule library, in output order.
pub static RULES: &[MetapathRule] = &[
    MetapathRule {
        name: "Mechanism of Action",
        description: "compound binds a gene connected to the disease",
        steps: &[
            Step::out(&["BINDS"], NodeKind::Gene),
            Step::either(&[], NodeKind::Disease).to_target(),
        ],
    },
    MetapathRule {
        name: "Gene Regulation",
        description: "compound regulates a gene associated with the disease",
        steps: &[
            Step::out(&["UPREGULATES", "DOWNREGULATES"], NodeKind::Gene),
            Step::out(&["ASSOCIATES"], NodeKind::Disease).to_target(),
        ],
    },
    MetapathRule {
        name: "Anatomical Context",
        description: "compound treats the disease, which localizes to an anatomy",
        steps: &[
            Step::out(&["TREATS"], NodeKind::Disease).to_target(),
            Step::out(&["LOCALIZES"], NodeKind::Anatomy),
        ],
    },
    MetapathRule {
        name: "Known Treatment",
        description: "compound treats at least one disease",
        steps: &[Step::out(&["TREATS"], NodeKind::Disease)],
    },
    MetapathRule {
        name: "Pharmacologic Class",
        description: "compound belongs to a pharmacologic class",
        steps: &[Step::either(&["INCLUDES"], NodeKind::PharmacologicClass)],
    },
    MetapathRule {
        name: "Similar Compound Strategy",
        description: "a resembling compound treats the disease",
        steps: &[
            Step::out(&["RESEMBLES"], NodeKind::Compound),
            Step::out(&["TREATS"], NodeKind::Disease).to_target(),
        ],
    },
    MetapathRule {
        name: "Similar Disease Strategy",
        description: "compound treats a disease resembling the target",
        steps: &[
            Step::out(&["TREATS"], NodeKind::Disease),
            Step::out(&["RESEMBLES"], NodeKind::Disease).to_target(),
        ],
    },
];

/// One matched rule for a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub rule: String,
    pub confidence: f32,
    pub path: MatchedPath,
}

impl std::fmt::Display for Explanation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.rule, self.path.describe())
    }
}

/// Evaluates [`RULES`] against a graph source, caching per normalized pair.
pub struct SymbolicReasoner {
    source: Arc<dyn GraphSource>,
    rules: &'static [MetapathRule],
    cache: MemoCache<PairKey, Vec<Explanation>>,
}

impl SymbolicReasoner {
    pub fn new(source: Arc<dyn GraphSource>) -> Self {
        Self::with_rules(source, RULES)
    }

    pub fn with_rules(source: Arc<dyn GraphSource>, rules: &'static [MetapathRule]) -> Self {
        Self {
            source,
            rules,
            cache: MemoCache::new(),
        }
    }

    pub fn rules(&self) -> &'static [MetapathRule] {
        self.rules
    }

    /// Matched rules for a pair. A failed graph query fails the call and
    /// leaves the cache untouched.
    pub fn explain(&self, compound_id: &str, disease_id: &str) -> ReasonResult<Vec<Explanation>> {
        self.cache
            .get_or_try_insert_with(pair_key(compound_id, disease_id), || {
                self.evaluate(compound_id, disease_id)
            })
    }

    /// [`SymbolicReasoner::explain`] for many pairs, evaluated in parallel.
    pub fn explain_batch(&self, pairs: &[(String, String)]) -> Vec<ReasonResult<Vec<Explanation>>> {
        pairs
            .par_iter()
            .map(|(compound, disease)| self.explain(compound, disease))
            .collect()
    }

    fn evaluate(&self, compound_id: &str, disease_id: &str) -> ReasonResult<Vec<Explanation>> {
        let mut explanations = Vec::new();
        for rule in self.rules {
            let query = GraphQuery::Metapath {
                steps: rule.steps,
                compound_id,
                disease_id,
            };
            let rows = self
                .source
                .query(&query)
                .map_err(|e| ReasonError::RuleEval {
                    rule: rule.name.to_string(),
                    message: e.to_string(),
                })?;
            if let Some(row) = rows.first() {
                explanations.push(Explanation {
                    rule: rule.name.to_string(),
                    confidence: RULE_CONFIDENCE,
                    path: MatchedPath::from_row(row)?,
                });
            }
        }
        tracing::debug!(
            compound_id,
            disease_id,
            matched = explanations.len(),
            "rules evaluated"
        );
        Ok(explanations)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl std::fmt::Debug for SymbolicReasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolicReasoner")
            .field("source", &self.source.name())
            .field("rules", &self.rules.len())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::graph::{GraphNode, GraphResult, KnowledgeGraph, Row};

    fn graph() -> KnowledgeGraph {
        let kg = KnowledgeGraph::new();
        kg.insert_node(GraphNode::new("DB01", NodeKind::Compound).with_name("Aspirin"));
        kg.insert_node(GraphNode::new("DB02", NodeKind::Compound));
        kg.insert_node(GraphNode::new("DB03", NodeKind::Compound));
        kg.insert_node(GraphNode::new("DOID:1", NodeKind::Disease).with_name("Headache"));
        kg.insert_node(GraphNode::new("DOID:2", NodeKind::Disease));
        kg.insert_node(GraphNode::new("G1", NodeKind::Gene));
        kg.insert_node(GraphNode::new("UBERON:1", NodeKind::Anatomy));
        kg.insert_node(GraphNode::new("PC1", NodeKind::PharmacologicClass));
        for (s, r, t) in [
            ("DB01", "BINDS", "G1"),
            ("DOID:1", "ASSOCIATES", "G1"),
            ("DB01", "UPREGULATES", "G1"),
            ("G1", "ASSOCIATES", "DOID:1"),
            ("DB02", "TREATS", "DOID:2"),
            ("DOID:2", "RESEMBLES", "DOID:1"),
            ("DB01", "RESEMBLES", "DB03"),
            ("DB03", "TREATS", "DOID:1"),
            ("PC1", "INCLUDES", "DB01"),
            ("DOID:1", "LOCALIZES", "UBERON:1"),
        ] {
            kg.insert_edge(s, r, t).unwrap();
        }
        kg
    }

    fn rule_names(explanations: &[Explanation]) -> Vec<&str> {
        explanations.iter().map(|e| e.rule.as_str()).collect()
    }

    #[test]
    fn rules_have_a_fixed_order() {
        let names: Vec<_> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            [
                "Mechanism of Action",
                "Gene Regulation",
                "Anatomical Context",
                "Known Treatment",
                "Pharmacologic Class",
                "Similar Compound Strategy",
                "Similar Disease Strategy",
            ]
        );
    }

    #[test]
    fn matching_rules_in_library_order() {
        let reasoner = SymbolicReasoner::new(Arc::new(graph()));
        let ex = reasoner.explain("DB01", "DOID:1").unwrap();
        assert_eq!(
            rule_names(&ex),
            [
                "Mechanism of Action",
                "Gene Regulation",
                "Pharmacologic Class",
                "Similar Compound Strategy",
            ]
        );
        assert!(ex.iter().all(|e| e.confidence == 1.0));

        let moa = &ex[0];
        assert_eq!(moa.path.nodes.first().unwrap().id, "DB01");
        assert_eq!(moa.path.nodes.last().unwrap().id, "DOID:1");
        assert_eq!(moa.path.relations.len(), 2);
    }

    #[test]
    fn similar_disease_and_known_treatment() {
        let reasoner = SymbolicReasoner::new(Arc::new(graph()));
        let ex = reasoner.explain("DB02", "DOID:1").unwrap();
        assert_eq!(
            rule_names(&ex),
            ["Known Treatment", "Similar Disease Strategy"]
        );
    }

    #[test]
    fn no_match_is_empty_not_error() {
        let reasoner = SymbolicReasoner::new(Arc::new(graph()));
        assert!(reasoner.explain("DB404", "DOID:1").unwrap().is_empty());
    }

    #[test]
    fn explanations_are_cached_per_normalized_pair() {
        let reasoner = SymbolicReasoner::new(Arc::new(graph()));
        let a = reasoner.explain("DB01", "DOID:1").unwrap();
        let b = reasoner.explain(" db01 ", "doid:1").unwrap();
        assert_eq!(a, b);
        let stats = reasoner.cache_stats();
        assert_eq!((stats.size, stats.hits, stats.misses), (1, 1, 1));

        reasoner.clear_cache();
        assert!(reasoner.cache_stats().is_empty());
    }

    #[test]
    fn batch_preserves_input_order() {
        let reasoner = SymbolicReasoner::new(Arc::new(graph()));
        let pairs = vec![
            ("DB02".to_string(), "DOID:1".to_string()),
            ("DB01".to_string(), "DOID:1".to_string()),
        ];
        let out = reasoner.explain_batch(&pairs);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap()[0].rule, "Known Treatment");
        assert_eq!(out[1].as_ref().unwrap()[0].rule, "Mechanism of Action");
    }

    struct Failing;

    impl GraphSource for Failing {
        fn query(&self, _: &GraphQuery<'_>) -> GraphResult<Vec<Row>> {
            Err(GraphError::Unavailable {
                message: "connection refused".into(),
            })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn source_failure_is_a_rule_error_and_not_cached() {
        let reasoner = SymbolicReasoner::new(Arc::new(Failing));
        let err = reasoner.explain("DB01", "DOID:1").unwrap_err();
        assert!(matches!(err, ReasonError::RuleEval { ref rule, .. } if rule == "Mechanism of Action"));
        assert_eq!(reasoner.cache_stats().size, 0);
    }
}
