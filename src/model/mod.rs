//! Neural model: relational graph encoder plus pairwise scorer.
//!
//! The model is built from a [`VarBuilder`]. Training builds it over a
//! [`VarMap`] so every parameter is a tracked variable; serving builds it from
//! plain tensors restored from a checkpoint, so nothing records gradients.

pub mod checkpoint;
pub mod config;
pub mod encoder;
pub mod layers;
pub mod scorer;
pub mod tensors;

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::error::ModelError;

pub use checkpoint::{Checkpoint, TensorRecord};
pub use config::ModelConfig;
pub use encoder::GraphEncoder;
pub use scorer::PairScorer;
pub use tensors::{GraphTensors, IdMapping};

/// Result type for model operations.
pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// Graph encoder and pair scorer sharing one configuration.
#[derive(Debug, Clone)]
pub struct DrugRepurposingModel {
    config: ModelConfig,
    encoder: GraphEncoder,
    scorer: PairScorer,
    device: Device,
}

impl DrugRepurposingModel {
    /// Build with parameters drawn from `vb`. Fails fast on invalid dimensions.
    pub fn new(config: ModelConfig, vb: VarBuilder) -> ModelResult<Self> {
        config.validate()?;
        let device = vb.device().clone();
        let encoder = GraphEncoder::new(&config, vb.pp("encoder"))?;
        let scorer = PairScorer::new(&config, vb.pp("scorer"))?;
        Ok(Self {
            config,
            encoder,
            scorer,
            device,
        })
    }

    /// Freshly initialized, trainable model and the variables backing it.
    pub fn trainable(config: ModelConfig, device: &Device) -> ModelResult<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        Ok((model, varmap))
    }

    /// Inference-only model over fixed weights.
    pub fn from_weights(
        config: ModelConfig,
        weights: HashMap<String, Tensor>,
        device: &Device,
    ) -> ModelResult<Self> {
        let vb = VarBuilder::from_tensors(weights, DType::F32, device);
        Self::new(config, vb)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Full-graph forward pass: one embedding row per node.
    pub fn encode(&self, graph: &GraphTensors, train: bool) -> ModelResult<Tensor> {
        if graph.num_nodes != self.config.num_nodes {
            return Err(ModelError::InvalidConfig {
                message: format!(
                    "graph has {} nodes but the model was built for {}",
                    graph.num_nodes, self.config.num_nodes
                ),
            });
        }
        self.encoder.forward(graph, train)
    }

    /// Score aligned rows of compound and disease embeddings.
    pub fn score(&self, compound: &Tensor, disease: &Tensor, train: bool) -> ModelResult<Tensor> {
        self.scorer.forward(compound, disease, train)
    }

    /// Encode the graph, then score `(compounds[i], diseases[i])` for every `i`.
    pub fn forward(
        &self,
        graph: &GraphTensors,
        compounds: &[u32],
        diseases: &[u32],
        train: bool,
    ) -> ModelResult<Tensor> {
        let embeddings = self.encode(graph, train)?;
        self.score_rows(&embeddings, compounds, diseases, train)
    }

    /// Slice rows out of precomputed embeddings and score them.
    pub fn score_rows(
        &self,
        embeddings: &Tensor,
        compounds: &[u32],
        diseases: &[u32],
        train: bool,
    ) -> ModelResult<Tensor> {
        let n = self.config.num_nodes;
        if let Some(&bad) = compounds.iter().chain(diseases).find(|&&i| i as usize >= n) {
            return Err(ModelError::IndexOutOfRange {
                index: bad as usize,
                num_nodes: n,
            });
        }
        let c = Tensor::from_slice(compounds, compounds.len(), &self.device)?;
        let d = Tensor::from_slice(diseases, diseases.len(), &self.device)?;
        let c = embeddings.index_select(&c, 0)?;
        let d = embeddings.index_select(&d, 0)?;
        self.score(&c, &d, train)
    }

    /// Inference scores for index pairs against precomputed embeddings.
    pub fn score_pairs(
        &self,
        embeddings: &Tensor,
        pairs: &[(usize, usize)],
    ) -> ModelResult<Vec<f32>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let (compounds, diseases): (Vec<u32>, Vec<u32>) = pairs
            .iter()
            .map(|&(c, d)| (c as u32, d as u32))
            .unzip();
        Ok(self
            .score_rows(embeddings, &compounds, &diseases, false)?
            .to_vec1::<f32>()?)
    }
}
