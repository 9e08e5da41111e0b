//! Small building blocks shared by the encoder and the scorer.
//!
//! Everything here is composed from primitive tensor ops so gradients flow
//! through the whole stack during training.

use candle_core::{D, Tensor};
use candle_nn::{Init, VarBuilder};

use super::ModelResult;

/// Epsilon used by every layer norm in the model.
pub const LAYER_NORM_EPS: f64 = 1e-5;

/// Xavier/Glorot uniform initializer for a `fan_in x fan_out` parameter.
pub fn xavier_uniform(fan_in: usize, fan_out: usize) -> Init {
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Learnable layer normalization over the last dimension.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
}

impl LayerNorm {
    pub fn new(dim: usize, vb: VarBuilder) -> ModelResult<Self> {
        let weight = vb.get_with_hints(dim, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(dim, "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias })
    }

    /// `(x - mean) / sqrt(var + eps) * weight + bias`
    pub fn forward(&self, x: &Tensor) -> ModelResult<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let std = (var + LAYER_NORM_EPS)?.sqrt()?;
        Ok(centered
            .broadcast_div(&std)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)?)
    }
}

/// Inverted dropout, active only while training.
pub fn dropout(x: &Tensor, p: f32, train: bool) -> ModelResult<Tensor> {
    if train && p > 0.0 {
        Ok(candle_nn::ops::dropout(x, p)?)
    } else {
        Ok(x.clone())
    }
}

/// Logistic sigmoid.
pub fn sigmoid(x: &Tensor) -> ModelResult<Tensor> {
    Ok(x.neg()?.exp()?.affine(1.0, 1.0)?.recip()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn layer_norm_centers_and_scales() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let ln = LayerNorm::new(4, vb).unwrap();
        let x = Tensor::new(&[[1.0f32, 2.0, 3.0, 4.0], [10.0, 10.0, 10.0, 10.0]], &Device::Cpu)
            .unwrap();
        let y = ln.forward(&x).unwrap().to_vec2::<f32>().unwrap();

        let mean: f32 = y[0].iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        let var: f32 = y[0].iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
        assert!((var - 1.0).abs() < 1e-3);
        // Constant rows collapse to the bias.
        assert!(y[1].iter().all(|v| v.abs() < 1e-3));
    }

    #[test]
    fn sigmoid_matches_closed_form() {
        let x = Tensor::new(&[0.0f32, 2.0, -2.0], &Device::Cpu).unwrap();
        let y = sigmoid(&x).unwrap().to_vec1::<f32>().unwrap();
        assert!((y[0] - 0.5).abs() < 1e-6);
        assert!((y[1] - 0.880_797).abs() < 1e-5);
        assert!((y[1] + y[2] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn dropout_is_identity_at_inference() {
        let x = Tensor::ones((3, 5), DType::F32, &Device::Cpu).unwrap();
        let y = dropout(&x, 0.9, false).unwrap();
        assert_eq!(y.to_vec2::<f32>().unwrap(), x.to_vec2::<f32>().unwrap());
    }
}
