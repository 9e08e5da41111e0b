//! In-memory knowledge graph with dual-indexing.
//!
//! Uses `petgraph` for the graph structure and `DashMap` for fast lookups
//! by node identifier or relation label.

use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;

use super::explore::{
    DISEASE_ANATOMY, DISEASE_GENES, DISEASE_TREATMENTS, GENE_DISEASES, RELATED_DISEASE_NAMES,
    RESEMBLING_DISEASES, SHARED_NAMES, affinities,
};
use super::metapath::{Hop, MatchedPath, PathNode, Step};
use super::{
    GraphEdge, GraphNode, GraphQuery, GraphResult, GraphSource, NodeKind, PathCategory, Row,
};

/// Serialized form of a graph: `{"nodes": [...], "edges": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// In-memory knowledge graph backed by petgraph with dual-indexing.
///
/// Node order is insertion order and is what every query reports, so
/// candidate lists and identifier mappings built from it are stable.
pub struct KnowledgeGraph {
    /// The directed graph: nodes carry their record, edges their relation label.
    graph: RwLock<DiGraph<GraphNode, String>>,
    /// External id → NodeIndex mapping for O(1) node lookups.
    node_index: DashMap<String, NodeIndex>,
    /// Relation index: relation label → list of (source, target) pairs.
    relation_index: DashMap<String, Vec<(NodeIndex, NodeIndex)>>,
    edge_count: AtomicUsize,
}

impl KnowledgeGraph {
    /// Create a new empty knowledge graph.
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(DiGraph::new()),
            node_index: DashMap::new(),
            relation_index: DashMap::new(),
            edge_count: AtomicUsize::new(0),
        }
    }

    /// Build a graph from a parsed document.
    pub fn from_document(doc: GraphDocument) -> GraphResult<Self> {
        let kg = Self::new();
        for node in doc.nodes {
            kg.insert_node(node);
        }
        for edge in &doc.edges {
            kg.insert_edge(&edge.source, &edge.relation, &edge.target)?;
        }
        Ok(kg)
    }

    /// Load a graph document from a JSON file.
    pub fn load_json(path: &Path) -> GraphResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| GraphError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let doc: GraphDocument =
            serde_json::from_str(&content).map_err(|e| GraphError::Parse {
                message: format!("{}: {e}", path.display()),
            })?;
        let kg = Self::from_document(doc)?;
        tracing::info!(
            path = %path.display(),
            nodes = kg.node_count(),
            edges = kg.edge_count(),
            "loaded knowledge graph"
        );
        Ok(kg)
    }

    /// Insert a node. Re-inserting an existing id updates its name and kind.
    pub fn insert_node(&self, node: GraphNode) {
        let mut graph = self.graph.write().expect("graph lock poisoned");
        if let Some(idx) = self.node_index.get(&node.id) {
            if let Some(existing) = graph.node_weight_mut(*idx.value()) {
                *existing = node;
            }
            return;
        }
        let id = node.id.clone();
        let idx = graph.add_node(node);
        self.node_index.insert(id, idx);
    }

    /// Insert a directed edge between two existing nodes.
    pub fn insert_edge(&self, source: &str, relation: &str, target: &str) -> GraphResult<()> {
        let src = self.lookup(source)?;
        let dst = self.lookup(target)?;

        {
            let mut graph = self.graph.write().expect("graph lock poisoned");
            graph.add_edge(src, dst, relation.to_string());
        }

        self.relation_index
            .entry(relation.to_string())
            .or_default()
            .push((src, dst));
        self.edge_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn lookup(&self, id: &str) -> GraphResult<NodeIndex> {
        self.node_index
            .get(id)
            .map(|idx| *idx.value())
            .ok_or_else(|| GraphError::UnknownNode { id: id.to_string() })
    }

    /// Get a node record by id.
    pub fn node(&self, id: &str) -> Option<GraphNode> {
        let idx = *self.node_index.get(id)?.value();
        let graph = self.graph.read().expect("graph lock poisoned");
        graph.node_weight(idx).cloned()
    }

    /// Check whether a `(source)-[relation]->(target)` edge exists.
    pub fn has_edge(&self, source: &str, relation: &str, target: &str) -> bool {
        let (Ok(src), Ok(dst)) = (self.lookup(source), self.lookup(target)) else {
            return false;
        };
        self.relation_index
            .get(relation)
            .is_some_and(|pairs| pairs.contains(&(src, dst)))
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.node_index.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count.load(Ordering::Relaxed)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> Vec<GraphNode> {
        let graph = self.graph.read().expect("graph lock poisoned");
        graph.node_weights().cloned().collect()
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> Vec<GraphEdge> {
        let graph = self.graph.read().expect("graph lock poisoned");
        graph
            .edge_indices()
            .filter_map(|ei| {
                let (src, dst) = graph.edge_endpoints(ei)?;
                Some(GraphEdge {
                    source: graph.node_weight(src)?.id.clone(),
                    target: graph.node_weight(dst)?.id.clone(),
                    relation: graph.edge_weight(ei)?.clone(),
                })
            })
            .collect()
    }

    /// Snapshot as a serializable document.
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            nodes: self.nodes(),
            edges: self.edges(),
        }
    }

    /// Find the first path from `compound_id` that satisfies `steps`.
    ///
    /// Depth-first, visiting edges in insertion order; an edge is used at most
    /// once per path.
    pub fn find_path(
        &self,
        steps: &[Step],
        compound_id: &str,
        disease_id: &str,
    ) -> Option<MatchedPath> {
        self.find_paths(steps, compound_id, disease_id, 1).pop()
    }

    /// Find up to `limit` paths from `compound_id` that satisfy `steps`, in
    /// the order [`KnowledgeGraph::find_path`] would visit them.
    pub fn find_paths(
        &self,
        steps: &[Step],
        compound_id: &str,
        disease_id: &str,
        limit: usize,
    ) -> Vec<MatchedPath> {
        if limit == 0 {
            return Vec::new();
        }
        let Some(start) = self.node_index.get(compound_id).map(|idx| *idx.value()) else {
            return Vec::new();
        };
        let target = self.node_index.get(disease_id).map(|idx| *idx.value());
        let graph = self.graph.read().expect("graph lock poisoned");
        if !graph
            .node_weight(start)
            .is_some_and(|n| n.kind == NodeKind::Compound)
        {
            return Vec::new();
        }

        let mut walk = Walk {
            graph: &*graph,
            steps,
            target,
            limit,
            nodes: vec![start],
            edges: Vec::new(),
            found: Vec::new(),
        };
        walk.extend();
        walk.found
            .iter()
            .map(|(nodes, edges)| matched_path(&graph, nodes, edges))
            .collect()
    }

    /// Index of `id` when it names a node of `kind`.
    fn typed_index(
        &self,
        graph: &DiGraph<GraphNode, String>,
        id: &str,
        kind: NodeKind,
    ) -> Option<NodeIndex> {
        let idx = *self.node_index.get(id)?.value();
        graph
            .node_weight(idx)
            .is_some_and(|n| n.kind == kind)
            .then_some(idx)
    }

    fn listing_rows(&self, kind: NodeKind, limit: usize) -> Vec<Row> {
        let mut nodes: Vec<GraphNode> = self
            .nodes()
            .into_iter()
            .filter(|n| n.kind == kind)
            .collect();
        nodes.sort_by(|a, b| match (&a.name, &b.name) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        nodes
            .into_iter()
            .take(limit)
            .map(|n| Row::new().with("id", n.id).with("name", n.name))
            .collect()
    }

    fn disease_summary_rows(&self, disease_id: &str) -> Vec<Row> {
        let graph = self.graph.read().expect("graph lock poisoned");
        let Some(disease) = self.typed_index(&graph, disease_id, NodeKind::Disease) else {
            return Vec::new();
        };
        let genes = step_targets(&graph, disease, &DISEASE_GENES).len();
        let treatments = step_targets(&graph, disease, &DISEASE_TREATMENTS).len();
        let anatomy: Vec<String> = step_targets(&graph, disease, &DISEASE_ANATOMY)
            .into_iter()
            .filter_map(|idx| graph.node_weight(idx)?.name.clone())
            .collect();
        let Some(node) = graph.node_weight(disease) else {
            return Vec::new();
        };
        vec![
            Row::new()
                .with("id", node.id.clone())
                .with("name", node.name.clone())
                .with("gene_count", genes as u64)
                .with("treatment_count", treatments as u64)
                .with("anatomy", anatomy),
        ]
    }

    fn similar_disease_rows(&self, disease_id: &str, limit: usize) -> Vec<Row> {
        let graph = self.graph.read().expect("graph lock poisoned");
        let Some(disease) = self.typed_index(&graph, disease_id, NodeKind::Disease) else {
            return Vec::new();
        };
        let genes = step_targets(&graph, disease, &DISEASE_GENES);
        let mut similar: Vec<(NodeIndex, usize, usize)> =
            step_targets(&graph, disease, &RESEMBLING_DISEASES)
                .into_iter()
                .filter(|&idx| idx != disease)
                .map(|idx| {
                    let shared = step_targets(&graph, idx, &DISEASE_GENES)
                        .iter()
                        .filter(|g| genes.contains(g))
                        .count();
                    let treatments = step_targets(&graph, idx, &DISEASE_TREATMENTS).len();
                    (idx, shared, treatments)
                })
                .collect();
        similar.sort_by(|a, b| b.1.cmp(&a.1));
        similar
            .into_iter()
            .take(limit)
            .filter_map(|(idx, shared, treatments)| {
                let node = graph.node_weight(idx)?;
                Some(
                    Row::new()
                        .with("id", node.id.clone())
                        .with("name", node.name.clone())
                        .with("shared_genes", shared as u64)
                        .with("treatment_count", treatments as u64),
                )
            })
            .collect()
    }

    fn shared_gene_rows(&self, disease_id: &str, limit: usize) -> Vec<Row> {
        let graph = self.graph.read().expect("graph lock poisoned");
        let Some(disease) = self.typed_index(&graph, disease_id, NodeKind::Disease) else {
            return Vec::new();
        };
        step_targets(&graph, disease, &DISEASE_GENES)
            .into_iter()
            .filter_map(|gene| {
                let others: Vec<String> = step_targets(&graph, gene, &GENE_DISEASES)
                    .into_iter()
                    .filter(|&idx| idx != disease)
                    .take(RELATED_DISEASE_NAMES)
                    .filter_map(|idx| display_name(&graph, idx))
                    .collect();
                if others.is_empty() {
                    return None;
                }
                let node = graph.node_weight(gene)?;
                Some(
                    Row::new()
                        .with("id", node.id.clone())
                        .with("name", node.name.clone())
                        .with("related_diseases", others),
                )
            })
            .take(limit)
            .collect()
    }

    fn related_rows(&self, kind: NodeKind, id: &str, limit: usize) -> Vec<Row> {
        let graph = self.graph.read().expect("graph lock poisoned");
        let Some(start) = self.typed_index(&graph, id, kind) else {
            return Vec::new();
        };
        let mut rows = Vec::new();
        for affinity in affinities(kind) {
            // (related node, shared nodes), ordered by shared count.
            let groups: Vec<(NodeIndex, Vec<NodeIndex>)> = match affinity.hops {
                [direct] => step_targets(&graph, start, direct)
                    .into_iter()
                    .filter(|&idx| idx != start)
                    .map(|idx| (idx, Vec::new()))
                    .collect(),
                [via, back] => {
                    let mut groups: Vec<(NodeIndex, Vec<NodeIndex>)> = Vec::new();
                    for shared in step_targets(&graph, start, via) {
                        for related in step_targets(&graph, shared, back) {
                            if related == start {
                                continue;
                            }
                            match groups.iter_mut().find(|(idx, _)| *idx == related) {
                                Some((_, through)) => through.push(shared),
                                None => groups.push((related, vec![shared])),
                            }
                        }
                    }
                    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
                    groups
                }
                _ => continue,
            };
            rows.extend(groups.into_iter().take(limit).filter_map(|(idx, through)| {
                let node = graph.node_weight(idx)?;
                let shared: Vec<String> = through
                    .iter()
                    .take(SHARED_NAMES)
                    .filter_map(|&s| display_name(&graph, s))
                    .collect();
                Some(
                    Row::new()
                        .with("id", node.id.clone())
                        .with("name", node.name.clone())
                        .with("relation", affinity.relation)
                        .with("score", through.len().max(1) as u64)
                        .with("shared", shared),
                )
            }));
        }
        rows
    }
}

/// A depth-first metapath search collecting up to `limit` matches.
struct Walk<'g> {
    graph: &'g DiGraph<GraphNode, String>,
    steps: &'g [Step],
    target: Option<NodeIndex>,
    limit: usize,
    nodes: Vec<NodeIndex>,
    edges: Vec<EdgeIndex>,
    found: Vec<(Vec<NodeIndex>, Vec<EdgeIndex>)>,
}

impl Walk<'_> {
    /// Extend the partial path through the remaining steps. Returns true once
    /// `limit` paths are found.
    fn extend(&mut self) -> bool {
        let steps = self.steps;
        let Some(step) = steps.get(self.edges.len()) else {
            self.found.push((self.nodes.clone(), self.edges.clone()));
            return self.found.len() >= self.limit;
        };
        let Some(&here) = self.nodes.last() else {
            return false;
        };
        if step.anchored && self.target.is_none() {
            return false;
        }

        for (ei, next) in step_edges(self.graph, here, step.hop) {
            if self.edges.contains(&ei)
                || !self.graph.edge_weight(ei).is_some_and(|r| step.allows(r))
            {
                continue;
            }
            if !self.graph.node_weight(next).is_some_and(|n| n.kind == step.kind) {
                continue;
            }
            if step.anchored && Some(next) != self.target {
                continue;
            }
            self.nodes.push(next);
            self.edges.push(ei);
            let done = self.extend();
            self.nodes.pop();
            self.edges.pop();
            if done {
                return true;
            }
        }
        false
    }
}

fn matched_path(
    graph: &DiGraph<GraphNode, String>,
    nodes: &[NodeIndex],
    edges: &[EdgeIndex],
) -> MatchedPath {
    MatchedPath {
        nodes: nodes
            .iter()
            .filter_map(|&idx| graph.node_weight(idx))
            .map(|n| PathNode {
                id: n.id.clone(),
                name: n.name.clone(),
                kind: n.kind,
            })
            .collect(),
        relations: edges
            .iter()
            .filter_map(|&ei| graph.edge_weight(ei).cloned())
            .collect(),
    }
}

/// Distinct nodes one step away from `node`, in edge insertion order.
fn step_targets(graph: &DiGraph<GraphNode, String>, node: NodeIndex, step: &Step) -> Vec<NodeIndex> {
    let mut out: Vec<NodeIndex> = Vec::new();
    for (ei, next) in step_edges(graph, node, step.hop) {
        if !graph.edge_weight(ei).is_some_and(|r| step.allows(r)) {
            continue;
        }
        if graph.node_weight(next).is_some_and(|n| n.kind == step.kind) && !out.contains(&next) {
            out.push(next);
        }
    }
    out
}

/// A node's name, or its id when unnamed.
fn display_name(graph: &DiGraph<GraphNode, String>, idx: NodeIndex) -> Option<String> {
    let node = graph.node_weight(idx)?;
    Some(node.name.clone().unwrap_or_else(|| node.id.clone()))
}

/// Edges leaving `node` for a hop direction, sorted by insertion order.
fn step_edges(
    graph: &DiGraph<GraphNode, String>,
    node: NodeIndex,
    hop: Hop,
) -> Vec<(EdgeIndex, NodeIndex)> {
    let mut out: Vec<(EdgeIndex, NodeIndex)> = Vec::new();
    if matches!(hop, Hop::Out | Hop::Either) {
        out.extend(
            graph
                .edges_directed(node, Direction::Outgoing)
                .map(|e| (e.id(), e.target())),
        );
    }
    if matches!(hop, Hop::In | Hop::Either) {
        out.extend(
            graph
                .edges_directed(node, Direction::Incoming)
                .map(|e| (e.id(), e.source())),
        );
    }
    out.sort_by_key(|(ei, _)| ei.index());
    out
}

impl Default for KnowledgeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KnowledgeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeGraph")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

impl GraphSource for KnowledgeGraph {
    fn query(&self, query: &GraphQuery<'_>) -> GraphResult<Vec<Row>> {
        let rows = match query {
            GraphQuery::Nodes => self
                .nodes()
                .into_iter()
                .map(|n| {
                    Row::new()
                        .with("id", n.id)
                        .with("name", n.name)
                        .with("kind", n.kind.label())
                })
                .collect(),
            GraphQuery::Edges => self
                .edges()
                .into_iter()
                .map(|e| {
                    Row::new()
                        .with("source", e.source)
                        .with("target", e.target)
                        .with("relation", e.relation)
                })
                .collect(),
            GraphQuery::TreatmentPairs => {
                let graph = self.graph.read().expect("graph lock poisoned");
                graph
                    .edge_indices()
                    .filter_map(|ei| {
                        let rel = graph.edge_weight(ei)?;
                        if rel != "TREATS" && rel != "PALLIATES" {
                            return None;
                        }
                        let (src, dst) = graph.edge_endpoints(ei)?;
                        let (c, d) = (graph.node_weight(src)?, graph.node_weight(dst)?);
                        (c.kind == NodeKind::Compound && d.kind == NodeKind::Disease).then(|| {
                            Row::new()
                                .with("compound_id", c.id.clone())
                                .with("disease_id", d.id.clone())
                        })
                    })
                    .collect()
            }
            GraphQuery::Candidates { disease_id, limit } => {
                let graph = self.graph.read().expect("graph lock poisoned");
                let target = self.node_index.get(*disease_id).map(|idx| *idx.value());
                graph
                    .node_indices()
                    .filter(|&idx| {
                        graph
                            .node_weight(idx)
                            .is_some_and(|n| n.kind == NodeKind::Compound)
                    })
                    .filter(|&idx| {
                        let Some(target) = target else {
                            return true;
                        };
                        !graph
                            .edges_connecting(idx, target)
                            .any(|e| e.weight() == "TREATS")
                    })
                    .take(*limit)
                    .filter_map(|idx| graph.node_weight(idx))
                    .map(|n| {
                        Row::new()
                            .with("id", n.id.clone())
                            .with("name", n.name.clone())
                    })
                    .collect()
            }
            GraphQuery::Metapath {
                steps,
                compound_id,
                disease_id,
            } => self
                .find_path(steps, compound_id, disease_id)
                .map(|p| vec![p.to_row()])
                .unwrap_or_default(),
            GraphQuery::Stats => {
                let graph = self.graph.read().expect("graph lock poisoned");
                let mut rows: Vec<Row> = NodeKind::ALL
                    .iter()
                    .map(|&kind| {
                        let count = graph.node_weights().filter(|n| n.kind == kind).count();
                        Row::new()
                            .with("kind", kind.label())
                            .with("count", count as u64)
                    })
                    .collect();
                rows.push(Row::new().with("relationships", self.edge_count() as u64));
                rows
            }
            GraphQuery::Listing { kind, limit } => self.listing_rows(*kind, *limit),
            GraphQuery::Node { id } => self
                .node(id)
                .map(|n| {
                    vec![
                        Row::new()
                            .with("id", n.id)
                            .with("name", n.name)
                            .with("kind", n.kind.label()),
                    ]
                })
                .unwrap_or_default(),
            GraphQuery::DiseaseSummary { disease_id } => self.disease_summary_rows(disease_id),
            GraphQuery::SimilarDiseases { disease_id, limit } => {
                self.similar_disease_rows(disease_id, *limit)
            }
            GraphQuery::SharedGenes { disease_id, limit } => {
                self.shared_gene_rows(disease_id, *limit)
            }
            GraphQuery::Related { kind, id, limit } => self.related_rows(*kind, id, *limit),
            GraphQuery::ConnectingPaths {
                compound_id,
                disease_id,
                limit,
            } => PathCategory::ALL
                .iter()
                .flat_map(|&category| {
                    self.find_paths(category.steps(), compound_id, disease_id, *limit)
                        .into_iter()
                        .map(move |p| p.to_row().with("category", category.label()))
                })
                .collect(),
        };
        Ok(rows)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        PathCategory, fetch_candidates, fetch_connecting_paths, fetch_disease_summary,
        fetch_listing, fetch_node, fetch_related, fetch_shared_genes, fetch_similar_diseases,
        fetch_stats, fetch_treatment_pairs,
    };

    fn sample() -> KnowledgeGraph {
        let kg = KnowledgeGraph::new();
        kg.insert_node(GraphNode::new("C1", NodeKind::Compound).with_name("Aspirin"));
        kg.insert_node(GraphNode::new("C2", NodeKind::Compound).with_name("Ibuprofen"));
        kg.insert_node(GraphNode::new("C3", NodeKind::Compound));
        kg.insert_node(GraphNode::new("D1", NodeKind::Disease).with_name("Migraine"));
        kg.insert_node(GraphNode::new("D2", NodeKind::Disease));
        kg.insert_node(GraphNode::new("G1", NodeKind::Gene));
        kg.insert_edge("C1", "TREATS", "D1").unwrap();
        kg.insert_edge("C2", "BINDS", "G1").unwrap();
        kg.insert_edge("D1", "ASSOCIATES", "G1").unwrap();
        kg.insert_edge("C3", "PALLIATES", "D2").unwrap();
        kg
    }

    /// `sample()` plus a resembling disease, a named gene and anatomy.
    fn explored() -> KnowledgeGraph {
        let kg = sample();
        kg.insert_node(GraphNode::new("D3", NodeKind::Disease).with_name("Cluster headache"));
        kg.insert_node(GraphNode::new("G2", NodeKind::Gene).with_name("PTGS2"));
        kg.insert_node(GraphNode::new("A1", NodeKind::Anatomy).with_name("brain"));
        for (s, r, t) in [
            ("D3", "RESEMBLES", "D1"),
            ("D3", "ASSOCIATES", "G1"),
            ("D3", "ASSOCIATES", "G2"),
            ("D1", "ASSOCIATES", "G2"),
            ("D1", "LOCALIZES", "A1"),
            ("C2", "TREATS", "D3"),
            ("C1", "BINDS", "G1"),
            ("C1", "RESEMBLES", "C2"),
        ] {
            kg.insert_edge(s, r, t).unwrap();
        }
        kg
    }

    #[test]
    fn insert_and_lookup() {
        let kg = sample();
        assert_eq!(kg.node_count(), 6);
        assert_eq!(kg.edge_count(), 4);
        assert!(kg.has_edge("C1", "TREATS", "D1"));
        assert!(!kg.has_edge("D1", "TREATS", "C1"));
        assert_eq!(kg.node("C1").unwrap().name.as_deref(), Some("Aspirin"));
    }

    #[test]
    fn edge_to_unknown_node_fails() {
        let kg = sample();
        let err = kg.insert_edge("C1", "TREATS", "missing").unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode { .. }));
    }

    #[test]
    fn reinserting_node_updates_in_place() {
        let kg = sample();
        kg.insert_node(GraphNode::new("C3", NodeKind::Compound).with_name("Named"));
        assert_eq!(kg.node_count(), 6);
        assert_eq!(kg.node("C3").unwrap().name.as_deref(), Some("Named"));
    }

    #[test]
    fn candidates_exclude_known_treatments() {
        let kg = sample();
        let ids: Vec<String> = fetch_candidates(&kg, "D1", 50)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["C2", "C3"]);

        let limited = fetch_candidates(&kg, "D1", 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].name, "Ibuprofen");

        // A candidate without a name falls back to its id.
        let c3 = fetch_candidates(&kg, "D1", 50).unwrap().pop().unwrap();
        assert_eq!(c3.name, "C3");
    }

    #[test]
    fn treatment_pairs_cover_treats_and_palliates() {
        let kg = sample();
        let pairs = fetch_treatment_pairs(&kg).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("C1".to_string(), "D1".to_string()),
                ("C3".to_string(), "D2".to_string())
            ]
        );
    }

    #[test]
    fn find_path_follows_steps_and_anchor() {
        let kg = sample();
        const BINDS_THEN_ANY: &[Step] = &[
            Step::out(&["BINDS"], NodeKind::Gene),
            Step::either(&[], NodeKind::Disease).to_target(),
        ];
        let path = kg.find_path(BINDS_THEN_ANY, "C2", "D1").unwrap();
        let ids: Vec<&str> = path.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["C2", "G1", "D1"]);
        assert_eq!(path.relations, vec!["BINDS", "ASSOCIATES"]);

        assert!(kg.find_path(BINDS_THEN_ANY, "C2", "D2").is_none());
        assert!(kg.find_path(BINDS_THEN_ANY, "C1", "D1").is_none());
        // Paths must start at a compound.
        assert!(kg.find_path(BINDS_THEN_ANY, "G1", "D1").is_none());
    }

    #[test]
    fn stats_count_kinds_and_relationships() {
        let kg = sample();
        let stats = fetch_stats(&kg).unwrap();
        assert_eq!(stats.total_nodes, 6);
        assert_eq!(stats.nodes_by_kind["Compound"], 3);
        assert_eq!(stats.relationships, 4);
    }

    #[test]
    fn listing_sorts_by_name_with_unnamed_last() {
        let kg = explored();
        let ids = |kind, limit| -> Vec<String> {
            fetch_listing(&kg, kind, limit)
                .unwrap()
                .into_iter()
                .map(|n| n.id)
                .collect()
        };
        assert_eq!(ids(NodeKind::Disease, 10), vec!["D3", "D1", "D2"]);
        assert_eq!(ids(NodeKind::Disease, 2), vec!["D3", "D1"]);
        assert_eq!(ids(NodeKind::Compound, 10), vec!["C1", "C2", "C3"]);
    }

    #[test]
    fn node_lookup() {
        let kg = explored();
        let node = fetch_node(&kg, "G2").unwrap().unwrap();
        assert_eq!(node.kind, NodeKind::Gene);
        assert_eq!(node.name.as_deref(), Some("PTGS2"));
        assert!(fetch_node(&kg, "missing").unwrap().is_none());
    }

    #[test]
    fn disease_summary_counts_genes_treatments_and_anatomy() {
        let kg = explored();
        let summary = fetch_disease_summary(&kg, "D1").unwrap().unwrap();
        assert_eq!(summary.name.as_deref(), Some("Migraine"));
        assert_eq!(summary.gene_count, 2);
        assert_eq!(summary.treatment_count, 1);
        assert_eq!(summary.anatomy, vec!["brain"]);

        // Only diseases have summaries.
        assert!(fetch_disease_summary(&kg, "C1").unwrap().is_none());
        assert!(fetch_disease_summary(&kg, "missing").unwrap().is_none());
    }

    #[test]
    fn similar_diseases_count_shared_genes() {
        let kg = explored();
        let similar = fetch_similar_diseases(&kg, "D1", 10).unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].id, "D3");
        assert_eq!(similar[0].shared_genes, 2);
        assert_eq!(similar[0].treatment_count, 1);
        assert!(fetch_similar_diseases(&kg, "D1", 0).unwrap().is_empty());
    }

    #[test]
    fn shared_genes_name_the_other_diseases() {
        let kg = explored();
        let genes = fetch_shared_genes(&kg, "D1", 10).unwrap();
        let ids: Vec<&str> = genes.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["G1", "G2"]);
        for gene in &genes {
            assert_eq!(gene.related_diseases, vec!["Cluster headache"]);
        }
        // D2 has no genes at all.
        assert!(fetch_shared_genes(&kg, "D2", 10).unwrap().is_empty());
    }

    #[test]
    fn related_diseases_group_by_affinity() {
        let kg = explored();
        let related = fetch_related(&kg, NodeKind::Disease, "D1", 20).unwrap();
        let summary: Vec<(&str, &str, usize)> = related
            .iter()
            .map(|r| (r.relation.as_str(), r.id.as_str(), r.score))
            .collect();
        assert_eq!(
            summary,
            vec![("resembles", "D3", 1), ("shared_genes", "D3", 2)]
        );
        // Unnamed shared genes are reported by id.
        assert_eq!(related[1].shared, vec!["G1", "PTGS2"]);
    }

    #[test]
    fn related_compounds_share_targets() {
        let kg = explored();
        let related = fetch_related(&kg, NodeKind::Compound, "C1", 20).unwrap();
        let summary: Vec<(&str, &str)> = related
            .iter()
            .map(|r| (r.relation.as_str(), r.id.as_str()))
            .collect();
        assert_eq!(summary, vec![("resembles", "C2"), ("shared_targets", "C2")]);
        assert_eq!(related[1].shared, vec!["G1"]);

        // Wrong kind for the id, or a kind without affinities.
        assert!(fetch_related(&kg, NodeKind::Disease, "C1", 20).unwrap().is_empty());
        assert!(fetch_related(&kg, NodeKind::Gene, "G1", 20).unwrap().is_empty());
    }

    #[test]
    fn connecting_paths_cover_each_category() {
        let kg = explored();
        let paths = fetch_connecting_paths(&kg, "C1", "D3", 5).unwrap();
        let categories: Vec<PathCategory> = paths.iter().map(|p| p.category).collect();
        assert_eq!(
            categories,
            vec![
                PathCategory::GeneMediated,
                PathCategory::SimilarCompound,
                PathCategory::SimilarDisease
            ]
        );
        assert_eq!(paths[0].path.relations, vec!["BINDS", "ASSOCIATES"]);
        assert_eq!(paths[2].path.describe(), "Aspirin -[TREATS]- Migraine -[RESEMBLES]- Cluster headache");

        let direct = fetch_connecting_paths(&kg, "C1", "D1", 5).unwrap();
        assert_eq!(direct[0].category, PathCategory::Direct);
        assert_eq!(direct.len(), 2);
    }

    #[test]
    fn find_paths_respects_limit() {
        let kg = explored();
        const GENE_THEN_DISEASE: &[Step] = &[
            Step::either(&[], NodeKind::Gene),
            Step::either(&["ASSOCIATES"], NodeKind::Disease),
        ];
        // C1 -> G1 -> {D1, D3}
        assert_eq!(kg.find_paths(GENE_THEN_DISEASE, "C1", "D1", 10).len(), 2);
        assert_eq!(kg.find_paths(GENE_THEN_DISEASE, "C1", "D1", 1).len(), 1);
        assert!(kg.find_paths(GENE_THEN_DISEASE, "C1", "D1", 0).is_empty());
    }

    #[test]
    fn document_roundtrip_preserves_order() {
        let kg = sample();
        let json = serde_json::to_string(&kg.to_document()).unwrap();
        let doc: GraphDocument = serde_json::from_str(&json).unwrap();
        let reloaded = KnowledgeGraph::from_document(doc).unwrap();
        assert_eq!(reloaded.nodes(), kg.nodes());
        assert_eq!(reloaded.edges(), kg.edges());
    }
}
