//! Parameter constructors shared by the encoder and the decoder.
//!
//! Weights are Xavier-uniform, biases start at zero.

use candle_core::{Result, Tensor};
use candle_nn::rnn::{GRU, GRUConfig};
use candle_nn::{Init, Linear, VarBuilder};

use crate::error::KissakiError;

/// Xavier/Glorot uniform initialiser for a `fan_out × fan_in` weight.
pub fn xavier_uniform(fan_in: usize, fan_out: usize) -> Init {
    let a = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform { lo: -a, up: a }
}

/// Affine layer `in_dim -> out_dim` with bias.
pub fn linear(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", xavier_uniform(in_dim, out_dim))?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Single-layer GRU cell.
pub fn gru(in_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<GRU> {
    let mut config = GRUConfig::default();
    config.w_ih_init = xavier_uniform(in_dim, 3 * hidden_dim);
    config.w_hh_init = xavier_uniform(hidden_dim, 3 * hidden_dim);
    config.b_ih_init = Some(Init::Const(0.0));
    config.b_hh_init = Some(Init::Const(0.0));
    candle_nn::rnn::gru(in_dim, hidden_dim, config, vb)
}

/// Dropout that is only active in training mode and for a positive rate.
pub fn dropout(xs: &Tensor, rate: f32, train: bool) -> Result<Tensor> {
    if train && rate > 0.0 {
        candle_nn::ops::dropout(xs, rate)
    } else {
        Ok(xs.clone())
    }
}

/// Embedding table whose `pad_id` row is held at zero.
///
/// The row is zeroed at construction. After an optimiser step call
/// [`PaddedEmbedding::clamp_pad_row`] to undo any update it received.
#[derive(Debug, Clone)]
pub struct PaddedEmbedding {
    weight: Tensor,
    pad_id: u32,
    dim: usize,
}

impl PaddedEmbedding {
    pub fn new(
        size: usize,
        dim: usize,
        pad_id: u32,
        init: Init,
        vb: VarBuilder,
    ) -> crate::Result<Self> {
        if pad_id as usize >= size {
            return Err(KissakiError::InvalidConfig(format!(
                "pad id {pad_id} outside embedding table of {size} rows"
            )));
        }
        let weight = vb.get_with_hints((size, dim), "weight", init)?;
        Self::from_weight(weight, pad_id)
    }

    /// Wrap an existing `size × dim` table, zeroing its pad row.
    pub fn from_weight(weight: Tensor, pad_id: u32) -> crate::Result<Self> {
        let (size, dim) = weight.dims2()?;
        if pad_id as usize >= size {
            return Err(KissakiError::InvalidConfig(format!(
                "pad id {pad_id} outside embedding table of {size} rows"
            )));
        }
        let mut table = Self {
            weight,
            pad_id,
            dim,
        };
        if table.weight.is_variable() {
            table.clamp_pad_row()?;
        } else {
            table.weight = table.zeroed()?;
        }
        Ok(table)
    }

    fn zeroed(&self) -> Result<Tensor> {
        let size = self.weight.dim(0)?;
        let keep: Vec<f32> = (0..size)
            .map(|row| if row == self.pad_id as usize { 0.0 } else { 1.0 })
            .collect();
        let keep = Tensor::from_vec(keep, (size, 1), self.weight.device())?
            .to_dtype(self.weight.dtype())?;
        Ok(self.weight.broadcast_mul(&keep)?.detach())
    }

    /// Reset the pad row of a trainable table to zero in place.
    pub fn clamp_pad_row(&self) -> crate::Result<()> {
        if self.weight.is_variable() {
            let zeroed = self.zeroed()?;
            candle_core::Var::from_tensor(&self.weight)?.set(&zeroed)?;
        }
        Ok(())
    }

    /// Overwrite a trainable table with `values`, e.g. pretrained vectors.
    /// The pad row is zeroed afterwards.
    pub fn assign(&self, values: &Tensor) -> crate::Result<()> {
        let expected = self.weight.dims2()?;
        let actual = values.dims2()?;
        if expected.0 != actual.0 {
            return Err(KissakiError::ShapeMismatch {
                what: "embedding rows",
                expected: expected.0,
                actual: actual.0,
            });
        }
        if expected.1 != actual.1 {
            return Err(KissakiError::ShapeMismatch {
                what: "embedding width",
                expected: expected.1,
                actual: actual.1,
            });
        }
        if !self.weight.is_variable() {
            return Err(KissakiError::InvalidConfig(
                "cannot assign to a frozen embedding table".into(),
            ));
        }
        let values = values.to_dtype(self.weight.dtype())?.to_device(self.weight.device())?;
        candle_core::Var::from_tensor(&self.weight)?.set(&values)?;
        self.clamp_pad_row()
    }

    /// Look up rows for an id tensor of any shape; a trailing `dim` axis is added.
    pub fn lookup(&self, ids: &Tensor) -> Result<Tensor> {
        let mut dims = ids.dims().to_vec();
        dims.push(self.dim);
        let flat = ids.flatten_all()?;
        self.weight.index_select(&flat, 0)?.reshape(dims)
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}
