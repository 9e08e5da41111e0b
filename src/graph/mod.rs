//! Knowledge graph source: typed biomedical nodes and relations.
//!
//! The core never talks to a store directly. It issues the closed set of
//! [`GraphQuery`] values through the [`GraphSource`] trait and reads back
//! rows of named columns. Two sources ship with the crate:
//!
//! - **In-memory** ([`KnowledgeGraph`]): `petgraph` + `DashMap` indices, loaded from JSON
//! - **Neo4j** ([`Neo4jSource`]): the HTTP transactional endpoint, queried with Cypher

pub mod explore;
pub mod index;
pub mod metapath;
pub mod neo4j;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GraphError;

pub use explore::{
    ConnectingPath, DiseaseSummary, PathCategory, RelatedEntity, SharedGene, SimilarDisease,
    fetch_connecting_paths, fetch_disease_summary, fetch_listing, fetch_node, fetch_related,
    fetch_shared_genes, fetch_similar_diseases,
};
pub use index::{GraphDocument, KnowledgeGraph};
pub use metapath::{Hop, MatchedPath, PathNode, Step};
pub use neo4j::{Neo4jConfig, Neo4jSource};

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

// ---------------------------------------------------------------------------
// Node kinds
// ---------------------------------------------------------------------------

/// Node type label in the biomedical knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Compound,
    Disease,
    Gene,
    Anatomy,
    Pathway,
    PharmacologicClass,
    SideEffect,
    Symptom,
}

impl NodeKind {
    /// All kinds in type-index order.
    pub const ALL: [NodeKind; 8] = [
        NodeKind::Compound,
        NodeKind::Disease,
        NodeKind::Gene,
        NodeKind::Anatomy,
        NodeKind::Pathway,
        NodeKind::PharmacologicClass,
        NodeKind::SideEffect,
        NodeKind::Symptom,
    ];

    /// Dense type index used by the encoder's type embedding table.
    pub fn type_index(self) -> u32 {
        match self {
            Self::Compound => 0,
            Self::Disease => 1,
            Self::Gene => 2,
            Self::Anatomy => 3,
            Self::Pathway => 4,
            Self::PharmacologicClass => 5,
            Self::SideEffect => 6,
            Self::Symptom => 7,
        }
    }

    /// Parse a store label. `Drug` is accepted as an alias of `Compound`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Compound" | "Drug" => Some(Self::Compound),
            "Disease" => Some(Self::Disease),
            "Gene" => Some(Self::Gene),
            "Anatomy" => Some(Self::Anatomy),
            "Pathway" => Some(Self::Pathway),
            "PharmacologicClass" => Some(Self::PharmacologicClass),
            "SideEffect" => Some(Self::SideEffect),
            "Symptom" => Some(Self::Symptom),
            _ => None,
        }
    }

    /// The store label for this kind.
    pub fn label(self) -> &'static str {
        match self {
            Self::Compound => "Compound",
            Self::Disease => "Disease",
            Self::Gene => "Gene",
            Self::Anatomy => "Anatomy",
            Self::Pathway => "Pathway",
            Self::PharmacologicClass => "PharmacologicClass",
            Self::SideEffect => "SideEffect",
            Self::Symptom => "Symptom",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

/// The relation kinds the encoder learns separate transforms for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relation {
    Treats,
    Palliates,
    Binds,
    Targets,
    Upregulates,
    Downregulates,
    Associates,
    Resembles,
    Interacts,
    Localizes,
}

impl Relation {
    /// Number of relation kinds.
    pub const COUNT: usize = 10;

    pub const ALL: [Relation; Self::COUNT] = [
        Relation::Treats,
        Relation::Palliates,
        Relation::Binds,
        Relation::Targets,
        Relation::Upregulates,
        Relation::Downregulates,
        Relation::Associates,
        Relation::Resembles,
        Relation::Interacts,
        Relation::Localizes,
    ];

    /// Map a store relation label onto a known kind; unknown labels become `Interacts`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "TREATS" => Self::Treats,
            "PALLIATES" => Self::Palliates,
            "BINDS" => Self::Binds,
            "TARGETS" => Self::Targets,
            "UPREGULATES" => Self::Upregulates,
            "DOWNREGULATES" => Self::Downregulates,
            "ASSOCIATES" => Self::Associates,
            "RESEMBLES" => Self::Resembles,
            "LOCALIZES" => Self::Localizes,
            _ => Self::Interacts,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Treats => "TREATS",
            Self::Palliates => "PALLIATES",
            Self::Binds => "BINDS",
            Self::Targets => "TARGETS",
            Self::Upregulates => "UPREGULATES",
            Self::Downregulates => "DOWNREGULATES",
            Self::Associates => "ASSOCIATES",
            Self::Resembles => "RESEMBLES",
            Self::Interacts => "INTERACTS",
            Self::Localizes => "LOCALIZES",
        }
    }

    /// Dense index selecting the relation-specific weight slice.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether an edge of this kind marks a known treatment (a positive pair).
    pub fn is_treatment(self) -> bool {
        matches!(self, Self::Treats | Self::Palliates)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A node as returned by the graph source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: NodeKind,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A directed edge as returned by the graph source, with its raw relation label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
}

/// A compound eligible for repurposing against a disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCompound {
    pub id: String,
    pub name: String,
}

/// Aggregate counts for the loaded graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
    pub relationships: usize,
}

impl fmt::Display for GraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "knowledge graph")?;
        writeln!(f, "  nodes:          {}", self.total_nodes)?;
        for (kind, count) in &self.nodes_by_kind {
            writeln!(f, "    {kind:<18}{count}")?;
        }
        writeln!(f, "  relationships:  {}", self.relationships)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Rows and queries
// ---------------------------------------------------------------------------

/// One result row: column name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// A required string column.
    pub fn str(&self, column: &str) -> GraphResult<&str> {
        self.opt_str(column).ok_or_else(|| GraphError::MissingColumn {
            column: column.to_string(),
        })
    }

    /// An optional string column; `null` reads as absent.
    pub fn opt_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }

    /// A required unsigned integer column.
    pub fn u64(&self, column: &str) -> GraphResult<u64> {
        self.0
            .get(column)
            .and_then(Value::as_u64)
            .ok_or_else(|| GraphError::MissingColumn {
                column: column.to_string(),
            })
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The queries the core issues against a graph source.
///
/// Column contracts:
///
/// | query             | columns                              |
/// |-------------------|--------------------------------------|
/// | `Nodes`           | `id`, `name`, `kind`                 |
/// | `Edges`           | `source`, `target`, `relation`       |
/// | `TreatmentPairs`  | `compound_id`, `disease_id`          |
/// | `Candidates`      | `id`, `name`                         |
/// | `Metapath`        | `nodes`, `relations` (at most 1 row) |
/// | `Stats`           | `kind`, `count` per kind + `relationships` row |
/// | `Listing`         | `id`, `name`                         |
/// | `Node`            | `id`, `name`, `kind` (at most 1 row) |
/// | `DiseaseSummary`  | `id`, `name`, `gene_count`, `treatment_count`, `anatomy` (at most 1 row) |
/// | `SimilarDiseases` | `id`, `name`, `shared_genes`, `treatment_count` |
/// | `SharedGenes`     | `id`, `name`, `related_diseases`     |
/// | `Related`         | `id`, `name`, `relation`, `score`, `shared` |
/// | `ConnectingPaths` | `category`, `nodes`, `relations`     |
#[derive(Debug, Clone, PartialEq)]
pub enum GraphQuery<'a> {
    /// Every node of a known kind.
    Nodes,
    /// Every edge between nodes of known kinds.
    Edges,
    /// Compound→Disease edges labelled TREATS or PALLIATES.
    TreatmentPairs,
    /// Compounds with no TREATS edge into `disease_id`, in source order.
    Candidates { disease_id: &'a str, limit: usize },
    /// First path from `compound_id` following `steps`.
    Metapath {
        steps: &'a [Step],
        compound_id: &'a str,
        disease_id: &'a str,
    },
    /// Node counts per kind and total relationship count.
    Stats,
    /// Nodes of one kind ordered by name, unnamed nodes last.
    Listing { kind: NodeKind, limit: usize },
    /// A single node by id.
    Node { id: &'a str },
    /// Gene count, treating-compound count and anatomy of a disease.
    DiseaseSummary { disease_id: &'a str },
    /// Diseases resembling `disease_id`, most shared genes first.
    SimilarDiseases { disease_id: &'a str, limit: usize },
    /// Genes of `disease_id` that other diseases are associated with too.
    SharedGenes { disease_id: &'a str, limit: usize },
    /// Entities of `kind` related to `id`, up to `limit` per affinity.
    Related {
        kind: NodeKind,
        id: &'a str,
        limit: usize,
    },
    /// Paths from `compound_id` to `disease_id`, up to `limit` per category.
    ConnectingPaths {
        compound_id: &'a str,
        disease_id: &'a str,
        limit: usize,
    },
}

impl GraphQuery<'_> {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nodes => "nodes",
            Self::Edges => "edges",
            Self::TreatmentPairs => "treatment_pairs",
            Self::Candidates { .. } => "candidates",
            Self::Metapath { .. } => "metapath",
            Self::Stats => "stats",
            Self::Listing { .. } => "listing",
            Self::Node { .. } => "node",
            Self::DiseaseSummary { .. } => "disease_summary",
            Self::SimilarDiseases { .. } => "similar_diseases",
            Self::SharedGenes { .. } => "shared_genes",
            Self::Related { .. } => "related",
            Self::ConnectingPaths { .. } => "connecting_paths",
        }
    }
}

/// A typed graph data source.
pub trait GraphSource: Send + Sync {
    /// Run a query and return its rows in source order.
    fn query(&self, query: &GraphQuery<'_>) -> GraphResult<Vec<Row>>;

    /// Display name for this source.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Typed fetch helpers
// ---------------------------------------------------------------------------

/// Fetch all nodes. Rows with unknown kind labels are skipped.
pub fn fetch_nodes(source: &dyn GraphSource) -> GraphResult<Vec<GraphNode>> {
    let rows = source.query(&GraphQuery::Nodes)?;
    let mut nodes = Vec::with_capacity(rows.len());
    for row in &rows {
        let id = row.str("id")?;
        let label = row.str("kind")?;
        match NodeKind::from_label(label) {
            Some(kind) => nodes.push(GraphNode {
                id: id.to_string(),
                name: row.opt_str("name").map(str::to_string),
                kind,
            }),
            None => tracing::debug!(id, label, "skipping node with unknown kind"),
        }
    }
    Ok(nodes)
}

/// Fetch all edges with their raw relation labels.
pub fn fetch_edges(source: &dyn GraphSource) -> GraphResult<Vec<GraphEdge>> {
    source
        .query(&GraphQuery::Edges)?
        .iter()
        .map(|row| {
            Ok(GraphEdge {
                source: row.str("source")?.to_string(),
                target: row.str("target")?.to_string(),
                relation: row.str("relation")?.to_string(),
            })
        })
        .collect()
}

/// Fetch known (compound, disease) treatment pairs.
pub fn fetch_treatment_pairs(source: &dyn GraphSource) -> GraphResult<Vec<(String, String)>> {
    source
        .query(&GraphQuery::TreatmentPairs)?
        .iter()
        .map(|row| {
            Ok((
                row.str("compound_id")?.to_string(),
                row.str("disease_id")?.to_string(),
            ))
        })
        .collect()
}

/// Fetch repurposing candidates for a disease. A missing name falls back to the id.
pub fn fetch_candidates(
    source: &dyn GraphSource,
    disease_id: &str,
    limit: usize,
) -> GraphResult<Vec<CandidateCompound>> {
    source
        .query(&GraphQuery::Candidates { disease_id, limit })?
        .iter()
        .map(|row| {
            let id = row.str("id")?.to_string();
            let name = row.opt_str("name").map(str::to_string).unwrap_or_else(|| id.clone());
            Ok(CandidateCompound { id, name })
        })
        .collect()
}

/// Fetch aggregate graph statistics.
pub fn fetch_stats(source: &dyn GraphSource) -> GraphResult<GraphStats> {
    let mut stats = GraphStats::default();
    for row in source.query(&GraphQuery::Stats)? {
        if let Some(kind) = row.opt_str("kind") {
            let count = row.u64("count")? as usize;
            stats.total_nodes += count;
            stats.nodes_by_kind.insert(kind.to_string(), count);
        } else if row.get("relationships").is_some() {
            stats.relationships = row.u64("relationships")? as usize;
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_relation_defaults_to_interacts() {
        assert_eq!(Relation::from_label("TREATS"), Relation::Treats);
        assert_eq!(Relation::from_label("INCLUDES"), Relation::Interacts);
        assert_eq!(Relation::from_label("treats"), Relation::Interacts);
    }

    #[test]
    fn relation_indices_are_dense() {
        for (i, rel) in Relation::ALL.iter().enumerate() {
            assert_eq!(rel.index(), i);
            assert_eq!(Relation::from_label(rel.label()), *rel);
        }
    }

    #[test]
    fn node_kind_labels_roundtrip() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(NodeKind::from_label("Drug"), Some(NodeKind::Compound));
        assert_eq!(NodeKind::from_label("Protein"), None);
    }

    #[test]
    fn row_accessors() {
        let row = Row::new()
            .with("id", "DB00945")
            .with("name", Value::Null)
            .with("count", 3u64);
        assert_eq!(row.str("id").unwrap(), "DB00945");
        assert_eq!(row.opt_str("name"), None);
        assert_eq!(row.u64("count").unwrap(), 3);
        assert!(matches!(
            row.str("kind"),
            Err(GraphError::MissingColumn { .. })
        ));
    }
}
