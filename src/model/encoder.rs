//! Multi-relational graph encoder.
//!
//! Node vectors start as `node_embedding[i] + type_embedding[type(i)]` and pass
//! through `num_layers` relational convolutions. Each convolution sums a
//! self-loop transform with one linear message per incoming edge, using the
//! weight slice of the edge's relation. The per-layer outputs are then mixed
//! by self-attention over the layer axis, averaged, and projected to the
//! output embedding space.

use candle_core::{D, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

use super::ModelResult;
use super::config::ModelConfig;
use super::layers::{LayerNorm, dropout, xavier_uniform};
use super::tensors::GraphTensors;

/// Slots in the type embedding table; must cover every node kind.
pub const TYPE_SLOTS: usize = 10;

// ---------------------------------------------------------------------------
// Relational convolution
// ---------------------------------------------------------------------------

/// One message-passing layer with a weight slice per relation.
#[derive(Debug, Clone)]
pub struct RelationalConv {
    /// `[R, in, out]`
    relation_weights: Tensor,
    /// `[R, out]`
    relation_bias: Tensor,
    self_loop: Linear,
    norm: LayerNorm,
    out_dim: usize,
}

impl RelationalConv {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        num_relations: usize,
        vb: VarBuilder,
    ) -> ModelResult<Self> {
        let relation_weights = vb.get_with_hints(
            (num_relations, in_dim, out_dim),
            "relation_weights",
            xavier_uniform(in_dim, out_dim),
        )?;
        let relation_bias =
            vb.get_with_hints((num_relations, out_dim), "relation_bias", Init::Const(0.0))?;
        let self_loop = candle_nn::linear(in_dim, out_dim, vb.pp("self_loop"))?;
        let norm = LayerNorm::new(out_dim, vb.pp("norm"))?;
        Ok(Self {
            relation_weights,
            relation_bias,
            self_loop,
            norm,
            out_dim,
        })
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// `x: [N, in]` to `[N, out]`.
    pub fn forward(&self, x: &Tensor, graph: &GraphTensors) -> ModelResult<Tensor> {
        let mut out = self.self_loop.forward(x)?;
        for (rel, edges) in graph.relations.iter().enumerate() {
            let Some(edges) = edges else { continue };
            let weight = self.relation_weights.get(rel)?;
            let bias = self.relation_bias.get(rel)?;
            let messages = x
                .index_select(&edges.src, 0)?
                .matmul(&weight)?
                .broadcast_add(&bias)?;
            out = out.index_add(&edges.dst, &messages, 0)?;
        }
        self.norm.forward(&out)
    }
}

// ---------------------------------------------------------------------------
// Layer attention
// ---------------------------------------------------------------------------

/// Multi-head self-attention over the stacked layer outputs of each node.
#[derive(Debug, Clone)]
pub struct LayerAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
    dropout: f32,
}

impl LayerAttention {
    pub fn new(dim: usize, num_heads: usize, dropout: f32, vb: VarBuilder) -> ModelResult<Self> {
        let head_dim = dim / num_heads;
        Ok(Self {
            q_proj: candle_nn::linear(dim, dim, vb.pp("q_proj"))?,
            k_proj: candle_nn::linear(dim, dim, vb.pp("k_proj"))?,
            v_proj: candle_nn::linear(dim, dim, vb.pp("v_proj"))?,
            out_proj: candle_nn::linear(dim, dim, vb.pp("out_proj"))?,
            num_heads,
            head_dim,
            scale: (head_dim as f64).sqrt(),
            dropout,
        })
    }

    fn split_heads(&self, x: &Tensor) -> ModelResult<Tensor> {
        let (n, layers, _) = x.dims3()?;
        Ok(x
            .reshape((n, layers, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    /// `stack: [N, L, H]` to `[N, L, H]`.
    pub fn forward(&self, stack: &Tensor, train: bool) -> ModelResult<Tensor> {
        let (n, layers, dim) = stack.dims3()?;
        let q = self.split_heads(&self.q_proj.forward(stack)?)?;
        let k = self.split_heads(&self.k_proj.forward(stack)?)?;
        let v = self.split_heads(&self.v_proj.forward(stack)?)?;

        let scores = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? / self.scale)?;
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let weights = dropout(&weights, self.dropout, train)?;

        let attended = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((n, layers, dim))?;
        Ok(self.out_proj.forward(&attended)?)
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GraphEncoder {
    node_embeddings: Tensor,
    type_embeddings: Tensor,
    convs: Vec<RelationalConv>,
    conv_norms: Vec<LayerNorm>,
    attention: LayerAttention,
    proj_in: Linear,
    proj_norm: LayerNorm,
    proj_out: Linear,
    dropout: f32,
}

impl GraphEncoder {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> ModelResult<Self> {
        let embed = config.embed_dim;
        let hidden = config.hidden_dim;
        let node_embeddings = vb.get_with_hints(
            (config.num_nodes, embed),
            "node_embeddings",
            xavier_uniform(embed, config.num_nodes),
        )?;
        let type_embeddings = vb.get_with_hints(
            (TYPE_SLOTS, embed),
            "type_embeddings",
            xavier_uniform(embed, TYPE_SLOTS),
        )?;

        let mut convs = Vec::with_capacity(config.num_layers);
        let mut conv_norms = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let in_dim = if i == 0 { embed } else { hidden };
            convs.push(RelationalConv::new(
                in_dim,
                hidden,
                config.num_relations,
                vb.pp(format!("conv{i}")),
            )?);
            conv_norms.push(LayerNorm::new(hidden, vb.pp(format!("conv_norm{i}")))?);
        }

        Ok(Self {
            node_embeddings,
            type_embeddings,
            convs,
            conv_norms,
            attention: LayerAttention::new(
                hidden,
                config.num_heads,
                config.dropout,
                vb.pp("layer_attention"),
            )?,
            proj_in: candle_nn::linear(hidden, hidden, vb.pp("output_proj.0"))?,
            proj_norm: LayerNorm::new(hidden, vb.pp("output_proj.1"))?,
            proj_out: candle_nn::linear(hidden, embed, vb.pp("output_proj.4"))?,
            dropout: config.dropout,
        })
    }

    /// Embed every node of the graph: `[N, embed_dim]`.
    pub fn forward(&self, graph: &GraphTensors, train: bool) -> ModelResult<Tensor> {
        let node = self.node_embeddings.index_select(&graph.node_ids, 0)?;
        let kind = self.type_embeddings.index_select(&graph.node_types, 0)?;
        let mut x = dropout(&(node + kind)?, self.dropout, train)?;

        let mut layer_outputs = Vec::with_capacity(self.convs.len());
        for (i, (conv, norm)) in self.convs.iter().zip(&self.conv_norms).enumerate() {
            let residual = (i > 0 && x.dim(1)? == conv.out_dim()).then(|| x.clone());
            let mut h = conv.forward(&x, graph)?.relu()?;
            h = dropout(&h, self.dropout, train)?;
            if let Some(residual) = residual {
                h = (h + residual)?;
            }
            x = norm.forward(&h)?;
            layer_outputs.push(x.clone());
        }

        let stacked = Tensor::stack(&layer_outputs, 1)?;
        let attended = self.attention.forward(&stacked, train)?.mean(1)?;

        let h = self.proj_norm.forward(&self.proj_in.forward(&attended)?)?.relu()?;
        let h = dropout(&h, self.dropout, train)?;
        Ok(self.proj_out.forward(&h)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphEdge, GraphNode, NodeKind, Relation};
    use crate::model::tensors::IdMapping;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn tiny_config(num_nodes: usize) -> ModelConfig {
        ModelConfig {
            embed_dim: 8,
            hidden_dim: 12,
            num_layers: 2,
            num_heads: 3,
            dropout: 0.1,
            num_nodes,
            num_relations: Relation::COUNT,
        }
    }

    fn tiny_graph() -> GraphTensors {
        let nodes = vec![
            GraphNode::new("C1", NodeKind::Compound),
            GraphNode::new("D1", NodeKind::Disease),
            GraphNode::new("G1", NodeKind::Gene),
            GraphNode::new("LONELY", NodeKind::Anatomy),
        ];
        let edges = vec![
            GraphEdge {
                source: "C1".into(),
                target: "G1".into(),
                relation: "BINDS".into(),
            },
            GraphEdge {
                source: "G1".into(),
                target: "D1".into(),
                relation: "ASSOCIATES".into(),
            },
            GraphEdge {
                source: "G1".into(),
                target: "G1".into(),
                relation: "INTERACTS".into(),
            },
        ];
        let mapping = IdMapping::from_nodes(&nodes);
        GraphTensors::build(&mapping, &edges, Relation::COUNT, &Device::Cpu).unwrap()
    }

    #[test]
    fn encoder_output_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = GraphEncoder::new(&tiny_config(4), vb).unwrap();
        let out = encoder.forward(&tiny_graph(), false).unwrap();
        assert_eq!(out.dims(), &[4, 8]);
        // The isolated node still gets a finite embedding from its self-loop.
        let values = out.to_vec2::<f32>().unwrap();
        assert!(values[3].iter().all(|v| v.is_finite()));
    }

    #[test]
    fn inference_forward_is_deterministic() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = GraphEncoder::new(&tiny_config(4), vb).unwrap();
        let graph = tiny_graph();
        let a = encoder.forward(&graph, false).unwrap().to_vec2::<f32>().unwrap();
        let b = encoder.forward(&graph, false).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn layer_attention_preserves_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let attn = LayerAttention::new(12, 3, 0.0, vb).unwrap();
        let x = Tensor::randn(0f32, 1f32, (5, 2, 12), &Device::Cpu).unwrap();
        assert_eq!(attn.forward(&x, true).unwrap().dims(), &[5, 2, 12]);
    }
}
