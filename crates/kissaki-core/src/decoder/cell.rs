//! Step cell and score head of the tag decoder.

use candle_core::{Module, Result, Tensor};
use candle_nn::rnn::{GRU, GRUState};
use candle_nn::{Linear, RNN, VarBuilder};

use crate::layers;

/// A single recurrent update `(input, h) -> h'`.
pub trait StepCell {
    /// Width of the hidden state.
    fn hidden_dim(&self) -> usize;

    /// All-zero hidden state for `batch` sentences.
    fn zero_state(&self, batch: usize) -> Result<Tensor>;

    /// Advance the hidden state by one position.
    fn step(&self, input: &Tensor, h: &Tensor) -> Result<Tensor>;
}

/// GRU step cell. Parameters live under `weight_ih_l0`, `weight_hh_l0`,
/// `bias_ih_l0` and `bias_hh_l0`.
#[derive(Debug, Clone)]
pub struct GruCell {
    gru: GRU,
    hidden_dim: usize,
}

impl GruCell {
    pub fn new(in_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let gru = layers::gru(in_dim, hidden_dim, vb)?;
        Ok(Self { gru, hidden_dim })
    }
}

impl StepCell for GruCell {
    fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    fn zero_state(&self, batch: usize) -> Result<Tensor> {
        Ok(self.gru.zero_state(batch)?.h)
    }

    fn step(&self, input: &Tensor, h: &Tensor) -> Result<Tensor> {
        let state = GRUState { h: h.clone() };
        Ok(self.gru.step(input, &state)?.h)
    }
}

/// Affine projection from `[hidden; context]` to tag logits.
#[derive(Debug, Clone)]
pub struct ScoreHead {
    affine: Linear,
}

impl ScoreHead {
    pub fn new(hidden_dim: usize, context_dim: usize, tag_size: usize, vb: VarBuilder) -> Result<Self> {
        let affine = layers::linear(hidden_dim + context_dim, tag_size, vb)?;
        Ok(Self { affine })
    }

    /// Logits for every tag, `batch × tag_size`.
    pub fn forward(&self, hidden: &Tensor, context: &Tensor) -> Result<Tensor> {
        let input = Tensor::cat(&[hidden, context], 1)?;
        self.affine.forward(&input)
    }

    pub fn weight(&self) -> &Tensor {
        self.affine.weight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_gru_cell_shapes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let cell = GruCell::new(5, 4, vb.pp("cell")).unwrap();
        let h0 = cell.zero_state(3).unwrap();
        assert_eq!(h0.dims(), &[3, 4]);

        let input = Tensor::ones((3, 5), DType::F32, &Device::Cpu).unwrap();
        let h1 = cell.step(&input, &h0).unwrap();
        assert_eq!(h1.dims(), &[3, 4]);
        // GRU outputs stay inside (-1, 1).
        let values: Vec<Vec<f32>> = h1.to_vec2().unwrap();
        assert!(values.iter().flatten().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn test_score_head_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let head = ScoreHead::new(4, 6, 3, vb.pp("head")).unwrap();
        let hidden = Tensor::zeros((2, 4), DType::F32, &Device::Cpu).unwrap();
        let context = Tensor::ones((2, 6), DType::F32, &Device::Cpu).unwrap();
        let logits = head.forward(&hidden, &context).unwrap();
        assert_eq!(logits.dims(), &[2, 3]);
        assert_eq!(head.weight().dims(), &[3, 10]);
    }
}
