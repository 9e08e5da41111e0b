//! Architecture configuration.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::graph::Relation;

use super::ModelResult;
use super::encoder::TYPE_SLOTS;

/// Dimensions of the encoder and scorer. Stored in every checkpoint so a
/// model can be rebuilt with exactly the shapes it was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub embed_dim: usize,
    pub hidden_dim: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub dropout: f32,
    pub num_nodes: usize,
    pub num_relations: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embed_dim: 128,
            hidden_dim: 256,
            num_layers: 3,
            num_heads: 4,
            dropout: 0.2,
            num_nodes: 0,
            num_relations: Relation::COUNT,
        }
    }
}

impl ModelConfig {
    /// Default architecture sized for `num_nodes` nodes.
    pub fn for_nodes(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            ..Self::default()
        }
    }

    /// Width of the scorer's combined feature vector.
    pub fn scorer_input_dim(&self) -> usize {
        2 * self.embed_dim + self.hidden_dim + self.embed_dim + 1
    }

    /// Reject shapes the model cannot be built with.
    pub fn validate(&self) -> ModelResult<()> {
        let invalid = |message: String| Err(ModelError::InvalidConfig { message });
        if self.num_nodes == 0 {
            return Err(ModelError::EmptyGraph);
        }
        if self.embed_dim == 0 || self.hidden_dim == 0 {
            return invalid("embed_dim and hidden_dim must be non-zero".into());
        }
        if self.hidden_dim < 2 {
            return invalid(format!(
                "hidden_dim {} leaves no room for the scorer's second layer",
                self.hidden_dim
            ));
        }
        if self.num_layers == 0 {
            return invalid("num_layers must be at least 1".into());
        }
        if self.num_heads == 0 || self.hidden_dim % self.num_heads != 0 {
            return invalid(format!(
                "hidden_dim {} must be divisible by num_heads {}",
                self.hidden_dim, self.num_heads
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return invalid(format!("dropout {} must be in [0, 1)", self.dropout));
        }
        if self.num_relations == 0 {
            return invalid("num_relations must be at least 1".into());
        }
        if crate::graph::NodeKind::ALL.len() > TYPE_SLOTS {
            return invalid("more node kinds than type embedding slots".into());
        }
        Ok(())
    }
}
