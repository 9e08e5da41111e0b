//! Exploration queries: entity listings, disease summaries, related
//! entities and the paths connecting a compound to a disease.
//!
//! The relation tables here are shared by both graph sources. The in-memory
//! graph walks them directly; the Neo4j source renders them to Cypher.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::metapath::{MatchedPath, Step};
use super::{GraphNode, GraphQuery, GraphResult, GraphSource, NodeKind, Row};

/// Listing size used when the caller gives none.
pub const DEFAULT_LISTING_LIMIT: usize = 100;

/// Related entities reported per affinity when the caller gives no limit.
pub const DEFAULT_RELATED_LIMIT: usize = 20;

/// Shared-entity names reported per related entity.
pub const SHARED_NAMES: usize = 5;

/// Other-disease names reported per shared gene.
pub const RELATED_DISEASE_NAMES: usize = 3;

pub(crate) const DISEASE_GENES: Step = Step::either(&["ASSOCIATES"], NodeKind::Gene);
pub(crate) const GENE_DISEASES: Step = Step::either(&["ASSOCIATES"], NodeKind::Disease);
pub(crate) const DISEASE_TREATMENTS: Step = Step::incoming(&["TREATS"], NodeKind::Compound);
pub(crate) const DISEASE_ANATOMY: Step = Step::out(&["LOCALIZES"], NodeKind::Anatomy);
pub(crate) const RESEMBLING_DISEASES: Step = Step::either(&["RESEMBLES"], NodeKind::Disease);

// ---------------------------------------------------------------------------
// Affinities
// ---------------------------------------------------------------------------

/// One way two entities of the same kind are related.
///
/// A single hop is a direct link and scores 1. Two hops go through shared
/// entities; the score is how many are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Affinity {
    /// Reported in the `relation` column.
    pub relation: &'static str,
    pub hops: &'static [Step],
}

const DISEASE_AFFINITIES: &[Affinity] = &[
    Affinity {
        relation: "resembles",
        hops: &[RESEMBLING_DISEASES],
    },
    Affinity {
        relation: "shared_genes",
        hops: &[DISEASE_GENES, GENE_DISEASES],
    },
    Affinity {
        relation: "shared_treatments",
        hops: &[
            DISEASE_TREATMENTS,
            Step::out(&["TREATS"], NodeKind::Disease),
        ],
    },
];

const COMPOUND_AFFINITIES: &[Affinity] = &[
    Affinity {
        relation: "resembles",
        hops: &[Step::either(&["RESEMBLES"], NodeKind::Compound)],
    },
    Affinity {
        relation: "shared_targets",
        hops: &[
            Step::either(&["BINDS", "TARGETS"], NodeKind::Gene),
            Step::either(&["BINDS", "TARGETS"], NodeKind::Compound),
        ],
    },
    Affinity {
        relation: "shared_indications",
        hops: &[
            Step::out(&["TREATS"], NodeKind::Disease),
            Step::incoming(&["TREATS"], NodeKind::Compound),
        ],
    },
];

/// The affinities defined for a kind, in report order. Only compounds and
/// diseases have any.
pub fn affinities(kind: NodeKind) -> &'static [Affinity] {
    match kind {
        NodeKind::Compound => COMPOUND_AFFINITIES,
        NodeKind::Disease => DISEASE_AFFINITIES,
        _ => &[],
    }
}

// ---------------------------------------------------------------------------
// Connecting path categories
// ---------------------------------------------------------------------------

/// How a compound reaches a disease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathCategory {
    /// `compound -TREATS|PALLIATES-> disease`
    Direct,
    /// Through a gene the compound binds or regulates.
    GeneMediated,
    /// Through a resembling compound that treats the disease.
    SimilarCompound,
    /// Through a disease the compound treats that resembles the target.
    SimilarDisease,
}

const DIRECT: &[Step] = &[Step::out(&["TREATS", "PALLIATES"], NodeKind::Disease).to_target()];
const GENE_MEDIATED: &[Step] = &[
    Step::out(&["BINDS", "UPREGULATES", "DOWNREGULATES"], NodeKind::Gene),
    Step::either(&["ASSOCIATES", "UPREGULATES", "DOWNREGULATES"], NodeKind::Disease).to_target(),
];
const SIMILAR_COMPOUND: &[Step] = &[
    Step::either(&["RESEMBLES"], NodeKind::Compound),
    Step::out(&["TREATS"], NodeKind::Disease).to_target(),
];
const SIMILAR_DISEASE: &[Step] = &[
    Step::out(&["TREATS"], NodeKind::Disease),
    Step::either(&["RESEMBLES"], NodeKind::Disease).to_target(),
];

impl PathCategory {
    pub const ALL: [PathCategory; 4] = [
        PathCategory::Direct,
        PathCategory::GeneMediated,
        PathCategory::SimilarCompound,
        PathCategory::SimilarDisease,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::GeneMediated => "gene_mediated",
            Self::SimilarCompound => "similar_compound",
            Self::SimilarDisease => "similar_disease",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }

    /// The metapath walked for this category. The last step lands on the
    /// query disease.
    pub fn steps(self) -> &'static [Step] {
        match self {
            Self::Direct => DIRECT,
            Self::GeneMediated => GENE_MEDIATED,
            Self::SimilarCompound => SIMILAR_COMPOUND,
            Self::SimilarDisease => SIMILAR_DISEASE,
        }
    }
}

impl fmt::Display for PathCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Counts and anatomy for one disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub gene_count: usize,
    pub treatment_count: usize,
    /// Names of the anatomy the disease localizes to.
    pub anatomy: Vec<String>,
}

/// A disease resembling the query disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarDisease {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Genes associated with both diseases.
    pub shared_genes: usize,
    pub treatment_count: usize,
}

/// A gene of the query disease that other diseases are associated with too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedGene {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub related_diseases: Vec<String>,
}

/// An entity of the same kind as the query entity, with how it relates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// The [`Affinity::relation`] that matched.
    pub relation: String,
    pub score: usize,
    /// Names of the shared entities, at most [`SHARED_NAMES`].
    pub shared: Vec<String>,
}

/// One path from a compound to a disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectingPath {
    pub category: PathCategory,
    pub path: MatchedPath,
}

fn str_list(row: &Row, column: &str) -> Vec<String> {
    row.get(column)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn count(row: &Row, column: &str) -> GraphResult<usize> {
    Ok(row.u64(column)? as usize)
}

// ---------------------------------------------------------------------------
// Typed fetch helpers
// ---------------------------------------------------------------------------

/// Nodes of one kind ordered by name.
pub fn fetch_listing(
    source: &dyn GraphSource,
    kind: NodeKind,
    limit: usize,
) -> GraphResult<Vec<GraphNode>> {
    source
        .query(&GraphQuery::Listing { kind, limit })?
        .iter()
        .map(|row| {
            Ok(GraphNode {
                id: row.str("id")?.to_string(),
                name: row.opt_str("name").map(str::to_string),
                kind,
            })
        })
        .collect()
}

/// Look up a single node. Nodes with unknown kind labels read as absent.
pub fn fetch_node(source: &dyn GraphSource, id: &str) -> GraphResult<Option<GraphNode>> {
    let rows = source.query(&GraphQuery::Node { id })?;
    let Some(row) = rows.first() else {
        return Ok(None);
    };
    let label = row.str("kind")?;
    let Some(kind) = NodeKind::from_label(label) else {
        tracing::debug!(id, label, "node has unknown kind");
        return Ok(None);
    };
    Ok(Some(GraphNode {
        id: row.str("id")?.to_string(),
        name: row.opt_str("name").map(str::to_string),
        kind,
    }))
}

pub fn fetch_disease_summary(
    source: &dyn GraphSource,
    disease_id: &str,
) -> GraphResult<Option<DiseaseSummary>> {
    let rows = source.query(&GraphQuery::DiseaseSummary { disease_id })?;
    let Some(row) = rows.first() else {
        return Ok(None);
    };
    Ok(Some(DiseaseSummary {
        id: row.str("id")?.to_string(),
        name: row.opt_str("name").map(str::to_string),
        gene_count: count(row, "gene_count")?,
        treatment_count: count(row, "treatment_count")?,
        anatomy: str_list(row, "anatomy"),
    }))
}

pub fn fetch_similar_diseases(
    source: &dyn GraphSource,
    disease_id: &str,
    limit: usize,
) -> GraphResult<Vec<SimilarDisease>> {
    source
        .query(&GraphQuery::SimilarDiseases { disease_id, limit })?
        .iter()
        .map(|row| {
            Ok(SimilarDisease {
                id: row.str("id")?.to_string(),
                name: row.opt_str("name").map(str::to_string),
                shared_genes: count(row, "shared_genes")?,
                treatment_count: count(row, "treatment_count")?,
            })
        })
        .collect()
}

pub fn fetch_shared_genes(
    source: &dyn GraphSource,
    disease_id: &str,
    limit: usize,
) -> GraphResult<Vec<SharedGene>> {
    source
        .query(&GraphQuery::SharedGenes { disease_id, limit })?
        .iter()
        .map(|row| {
            Ok(SharedGene {
                id: row.str("id")?.to_string(),
                name: row.opt_str("name").map(str::to_string),
                related_diseases: str_list(row, "related_diseases"),
            })
        })
        .collect()
}

/// Entities related to `id`, grouped by affinity in report order.
pub fn fetch_related(
    source: &dyn GraphSource,
    kind: NodeKind,
    id: &str,
    limit: usize,
) -> GraphResult<Vec<RelatedEntity>> {
    source
        .query(&GraphQuery::Related { kind, id, limit })?
        .iter()
        .map(|row| {
            Ok(RelatedEntity {
                id: row.str("id")?.to_string(),
                name: row.opt_str("name").map(str::to_string),
                relation: row.str("relation")?.to_string(),
                score: count(row, "score")?,
                shared: str_list(row, "shared"),
            })
        })
        .collect()
}

/// Paths from a compound to a disease, up to `limit` per category.
pub fn fetch_connecting_paths(
    source: &dyn GraphSource,
    compound_id: &str,
    disease_id: &str,
    limit: usize,
) -> GraphResult<Vec<ConnectingPath>> {
    let query = GraphQuery::ConnectingPaths {
        compound_id,
        disease_id,
        limit,
    };
    let mut paths = Vec::new();
    for row in source.query(&query)? {
        let label = row.str("category")?;
        let Some(category) = PathCategory::from_label(label) else {
            tracing::debug!(label, "skipping path with unknown category");
            continue;
        };
        paths.push(ConnectingPath {
            category,
            path: MatchedPath::from_row(&row)?,
        });
    }
    Ok(paths)
}
