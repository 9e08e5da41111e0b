//! Identifier mapping and the graph tensors fed to the encoder.
//!
//! [`IdMapping`] assigns every loaded node a dense, zero-based embedding
//! index. It is persisted with each checkpoint so a served model always
//! addresses the same rows it was trained with. [`GraphTensors`] groups the
//! edge list by relation so each relation's transform runs once per layer.

use std::collections::HashMap;

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::graph::{GraphEdge, GraphNode, NodeKind, Relation};

use super::ModelResult;

// ---------------------------------------------------------------------------
// Identifier mapping
// ---------------------------------------------------------------------------

/// Bijection between external node ids and embedding indices `[0, len)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MappingRecord", into = "MappingRecord")]
pub struct IdMapping {
    ids: Vec<String>,
    kinds: Vec<NodeKind>,
    index: HashMap<String, usize>,
}

/// On-disk form: index order is implicit in the vector order.
#[derive(Serialize, Deserialize)]
struct MappingRecord {
    ids: Vec<String>,
    kinds: Vec<NodeKind>,
}

impl TryFrom<MappingRecord> for IdMapping {
    type Error = String;

    fn try_from(record: MappingRecord) -> Result<Self, Self::Error> {
        if record.ids.len() != record.kinds.len() {
            return Err(format!(
                "mapping has {} ids but {} node kinds",
                record.ids.len(),
                record.kinds.len()
            ));
        }
        let mut mapping = IdMapping::default();
        for (id, kind) in record.ids.into_iter().zip(record.kinds) {
            if mapping.index.contains_key(&id) {
                return Err(format!("duplicate node id '{id}' in mapping"));
            }
            mapping.insert(id, kind);
        }
        Ok(mapping)
    }
}

impl From<IdMapping> for MappingRecord {
    fn from(mapping: IdMapping) -> Self {
        Self {
            ids: mapping.ids,
            kinds: mapping.kinds,
        }
    }
}

impl IdMapping {
    /// Build from a node list; repeated ids keep their first index.
    pub fn from_nodes(nodes: &[GraphNode]) -> Self {
        let mut mapping = Self::default();
        for node in nodes {
            mapping.insert(node.id.clone(), node.kind);
        }
        mapping
    }

    /// Assign the next index to `id`, or return the index it already has.
    pub fn insert(&mut self, id: String, kind: NodeKind) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.ids.len();
        self.index.insert(id.clone(), idx);
        self.ids.push(id);
        self.kinds.push(kind);
        idx
    }

    pub fn get(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn id(&self, index: usize) -> Option<&str> {
        self.ids.get(index).map(String::as_str)
    }

    pub fn kind(&self, index: usize) -> Option<NodeKind> {
        self.kinds.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Type index per embedding index, for the encoder's type embedding.
    pub fn type_indices(&self) -> Vec<u32> {
        self.kinds.iter().map(|k| k.type_index()).collect()
    }

    /// Indices of all nodes of one kind, ascending.
    pub fn indices_of(&self, kind: NodeKind) -> Vec<usize> {
        self.kinds
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == kind)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str, NodeKind)> {
        self.ids
            .iter()
            .zip(&self.kinds)
            .enumerate()
            .map(|(i, (id, kind))| (i, id.as_str(), *kind))
    }
}

// ---------------------------------------------------------------------------
// Graph tensors
// ---------------------------------------------------------------------------

/// Source and destination indices of every edge of one relation.
#[derive(Debug, Clone)]
pub struct RelationEdges {
    pub src: Tensor,
    pub dst: Tensor,
    pub count: usize,
}

/// Node and edge tensors for a full-graph forward pass.
#[derive(Debug, Clone)]
pub struct GraphTensors {
    /// `[N]` u32 embedding indices, `0..N`.
    pub node_ids: Tensor,
    /// `[N]` u32 type indices.
    pub node_types: Tensor,
    /// One slot per relation index; `None` when the relation has no edges.
    pub relations: Vec<Option<RelationEdges>>,
    pub num_nodes: usize,
    pub num_edges: usize,
    /// Edges dropped because an endpoint is not in the mapping.
    pub skipped_edges: usize,
}

impl GraphTensors {
    /// Build tensors for `edges` over the nodes of `mapping`.
    ///
    /// Unknown relation labels map to `INTERACTS`. Edges whose relation index
    /// is outside `num_relations`, or whose endpoints are unmapped, are skipped.
    pub fn build(
        mapping: &IdMapping,
        edges: &[GraphEdge],
        num_relations: usize,
        device: &Device,
    ) -> ModelResult<Self> {
        let num_nodes = mapping.len();
        if num_nodes == 0 {
            return Err(ModelError::EmptyGraph);
        }

        let mut groups: Vec<(Vec<u32>, Vec<u32>)> = vec![(Vec::new(), Vec::new()); num_relations];
        let mut skipped = 0usize;
        for edge in edges {
            let rel = Relation::from_label(&edge.relation).index();
            match (mapping.get(&edge.source), mapping.get(&edge.target)) {
                (Some(src), Some(dst)) if rel < num_relations => {
                    groups[rel].0.push(src as u32);
                    groups[rel].1.push(dst as u32);
                }
                _ => skipped += 1,
            }
        }

        let mut num_edges = 0;
        let relations = groups
            .into_iter()
            .map(|(src, dst)| {
                if src.is_empty() {
                    return Ok(None);
                }
                let count = src.len();
                num_edges += count;
                Ok(Some(RelationEdges {
                    src: Tensor::from_vec(src, count, device)?,
                    dst: Tensor::from_vec(dst, count, device)?,
                    count,
                }))
            })
            .collect::<ModelResult<Vec<_>>>()?;

        if skipped > 0 {
            tracing::debug!(skipped, "edges skipped while building graph tensors");
        }

        let node_ids = Tensor::arange(0u32, num_nodes as u32, device)?;
        let node_types = Tensor::from_vec(mapping.type_indices(), num_nodes, device)?;

        Ok(Self {
            node_ids,
            node_types,
            relations,
            num_nodes,
            num_edges,
            skipped_edges: skipped,
        })
    }
}
