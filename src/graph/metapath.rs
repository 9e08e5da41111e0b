//! Metapath patterns: typed relation sequences anchored at a compound.
//!
//! A pattern is a list of [`Step`]s walked from the query compound. Each step
//! follows one edge (any of the allowed relation labels, in the given
//! direction) into a node of the required kind. A step marked `anchored`
//! must land on the query disease.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GraphError;

use super::{GraphResult, NodeKind, Row};

/// Edge direction for a step, relative to the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hop {
    /// `(prev)-[r]->(next)`
    Out,
    /// `(prev)<-[r]-(next)`
    In,
    /// `(prev)-[r]-(next)`
    Either,
}

/// One hop of a metapath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Allowed relation labels; empty means any relation.
    pub relations: &'static [&'static str],
    pub hop: Hop,
    /// Required kind of the node reached by this hop.
    pub kind: NodeKind,
    /// The reached node must be the query disease.
    pub anchored: bool,
}

impl Step {
    pub const fn out(relations: &'static [&'static str], kind: NodeKind) -> Self {
        Self {
            relations,
            hop: Hop::Out,
            kind,
            anchored: false,
        }
    }

    pub const fn incoming(relations: &'static [&'static str], kind: NodeKind) -> Self {
        Self {
            relations,
            hop: Hop::In,
            kind,
            anchored: false,
        }
    }

    pub const fn either(relations: &'static [&'static str], kind: NodeKind) -> Self {
        Self {
            relations,
            hop: Hop::Either,
            kind,
            anchored: false,
        }
    }

    /// Require the reached node to be the query disease.
    pub const fn to_target(mut self) -> Self {
        self.anchored = true;
        self
    }

    /// Whether an edge label satisfies this step.
    pub fn allows(&self, relation: &str) -> bool {
        self.relations.is_empty() || self.relations.iter().any(|r| *r == relation)
    }
}

/// A node on a matched path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathNode {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: NodeKind,
}

/// The first path found for a metapath: `nodes.len() == relations.len() + 1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchedPath {
    pub nodes: Vec<PathNode>,
    pub relations: Vec<String>,
}

impl MatchedPath {
    /// Encode as a `Metapath` result row.
    pub fn to_row(&self) -> Row {
        let nodes = self
            .nodes
            .iter()
            .map(|n| {
                serde_json::json!({
                    "id": n.id,
                    "name": n.name,
                    "kind": n.kind.label(),
                })
            })
            .collect::<Vec<_>>();
        Row::new()
            .with("nodes", Value::Array(nodes))
            .with("relations", Value::from(self.relations.clone()))
    }

    /// Decode a `Metapath` result row.
    pub fn from_row(row: &Row) -> GraphResult<Self> {
        let nodes = row
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| GraphError::MissingColumn {
                column: "nodes".into(),
            })?
            .iter()
            .map(|v| {
                let id = v.get("id").and_then(Value::as_str).unwrap_or_default();
                let label = v.get("kind").and_then(Value::as_str).unwrap_or_default();
                let kind = NodeKind::from_label(label).ok_or_else(|| GraphError::Parse {
                    message: format!("path node '{id}' has unknown kind '{label}'"),
                })?;
                Ok(PathNode {
                    id: id.to_string(),
                    name: v.get("name").and_then(Value::as_str).map(str::to_string),
                    kind,
                })
            })
            .collect::<GraphResult<Vec<_>>>()?;
        let relations = row
            .get("relations")
            .and_then(Value::as_array)
            .ok_or_else(|| GraphError::MissingColumn {
                column: "relations".into(),
            })?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        Ok(Self { nodes, relations })
    }

    /// Render as `A -[REL]-> B -[REL]-> C` for display.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                let rel = self.relations.get(i - 1).map(String::as_str).unwrap_or("?");
                out.push_str(&format!(" -[{rel}]- "));
            }
            out.push_str(node.name.as_deref().unwrap_or(&node.id));
        }
        out
    }
}
