//! Pairwise compound/disease scorer.
//!
//! Four views of the pair are concatenated: the raw embeddings, their
//! elementwise product, a learned bilinear interaction and their cosine
//! similarity. A two-hidden-layer MLP maps the result to one logit.

use candle_core::{D, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

use super::ModelResult;
use super::config::ModelConfig;
use super::layers::{LayerNorm, dropout, sigmoid, xavier_uniform};

/// Added to the cosine denominator so all-zero embeddings stay finite.
pub const COSINE_EPS: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct PairScorer {
    /// `[E, H, E]`: `out[k] = a^T W[:, k, :] b`.
    bilinear_weight: Tensor,
    bilinear_bias: Tensor,
    fc1: Linear,
    norm1: LayerNorm,
    fc2: Linear,
    norm2: LayerNorm,
    head: Linear,
    embed_dim: usize,
    hidden_dim: usize,
    dropout: f32,
}

impl PairScorer {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> ModelResult<Self> {
        let e = config.embed_dim;
        let h = config.hidden_dim;
        let bound = 1.0 / (e as f64).sqrt();
        let uniform = Init::Uniform {
            lo: -bound,
            up: bound,
        };
        Ok(Self {
            bilinear_weight: vb.get_with_hints((e, h, e), "bilinear.weight", uniform)?,
            bilinear_bias: vb.get_with_hints(h, "bilinear.bias", uniform)?,
            fc1: candle_nn::linear(config.scorer_input_dim(), h, vb.pp("mlp.0"))?,
            norm1: LayerNorm::new(h, vb.pp("mlp.1"))?,
            fc2: candle_nn::linear(h, h / 2, vb.pp("mlp.4"))?,
            norm2: LayerNorm::new(h / 2, vb.pp("mlp.5"))?,
            head: candle_nn::linear(h / 2, 1, vb.pp("mlp.8"))?,
            embed_dim: e,
            hidden_dim: h,
            dropout: config.dropout,
        })
    }

    fn bilinear(&self, a: &Tensor, b: &Tensor) -> ModelResult<Tensor> {
        let batch = a.dim(0)?;
        let projected = a
            .matmul(
                &self
                    .bilinear_weight
                    .reshape((self.embed_dim, self.hidden_dim * self.embed_dim))?,
            )?
            .reshape((batch, self.hidden_dim, self.embed_dim))?;
        Ok(projected
            .broadcast_mul(&b.unsqueeze(1)?)?
            .sum(D::Minus1)?
            .broadcast_add(&self.bilinear_bias)?)
    }

    fn cosine(a: &Tensor, b: &Tensor) -> ModelResult<Tensor> {
        let dot = (a * b)?.sum_keepdim(D::Minus1)?;
        let norm_a = a.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?;
        let norm_b = b.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?;
        let denom = (norm_a * norm_b)?.affine(1.0, COSINE_EPS)?;
        Ok(dot.broadcast_div(&denom)?)
    }

    /// Score `[B, E]` compound rows against `[B, E]` disease rows: `[B]` in `[0, 1]`.
    pub fn forward(&self, compound: &Tensor, disease: &Tensor, train: bool) -> ModelResult<Tensor> {
        let features = Tensor::cat(
            &[
                compound.clone(),
                disease.clone(),
                (compound * disease)?,
                self.bilinear(compound, disease)?,
                Self::cosine(compound, disease)?,
            ],
            D::Minus1,
        )?;

        let h = self.norm1.forward(&self.fc1.forward(&features)?)?.relu()?;
        let h = dropout(&h, self.dropout, train)?;
        let h = self.norm2.forward(&self.fc2.forward(&h)?)?.relu()?;
        let h = dropout(&h, self.dropout, train)?;
        let logits = self.head.forward(&h)?.squeeze(D::Minus1)?;
        sigmoid(&logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Relation;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn scorer() -> PairScorer {
        let config = ModelConfig {
            embed_dim: 6,
            hidden_dim: 8,
            num_layers: 1,
            num_heads: 2,
            dropout: 0.2,
            num_nodes: 4,
            num_relations: Relation::COUNT,
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        PairScorer::new(&config, vb).unwrap()
    }

    #[test]
    fn scores_are_probabilities() {
        let scorer = scorer();
        let a = Tensor::randn(0f32, 1f32, (5, 6), &Device::Cpu).unwrap();
        let b = Tensor::randn(0f32, 1f32, (5, 6), &Device::Cpu).unwrap();
        let scores = scorer.forward(&a, &b, false).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(scores.len(), 5);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn zero_embeddings_stay_finite() {
        let scorer = scorer();
        let z = Tensor::zeros((2, 6), DType::F32, &Device::Cpu).unwrap();
        let scores = scorer.forward(&z, &z, false).unwrap().to_vec1::<f32>().unwrap();
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn cosine_of_parallel_vectors_is_one() {
        let a = Tensor::new(&[[1.0f32, 2.0, 2.0]], &Device::Cpu).unwrap();
        let b = Tensor::new(&[[2.0f32, 4.0, 4.0]], &Device::Cpu).unwrap();
        let cos = PairScorer::cosine(&a, &b).unwrap().to_vec2::<f32>().unwrap();
        assert!((cos[0][0] - 1.0).abs() < 1e-5);
    }
}
