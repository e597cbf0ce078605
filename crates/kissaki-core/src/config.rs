//! Model hyper-parameters for the encoder and the tag decoder.

use serde::{Deserialize, Serialize};

use crate::decoder::policy::DEFAULT_BEAM_SIZE;
use crate::decoder::LossNormalization;
use crate::error::{KissakiError, Result};

/// Configuration for the autoregressive tag decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Width of each context vector in H.
    pub context_dim: usize,
    /// Hidden units of the step cell.
    pub hidden_dim: usize,
    /// Width of a tag embedding.
    pub tag_emb_dim: usize,
    /// Number of tags, pad included.
    pub tag_size: usize,
    /// Id of the pad tag; its embedding is held at zero.
    pub tag_pad_id: u32,
    /// Dropout rate applied in training mode.
    pub dropout: f32,
    /// Sharpening factor for differentiable sampling.
    pub sampling_bias: f64,
    /// Beam width used by beam-search inference.
    pub beam_size: usize,
    pub loss_normalization: LossNormalization,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            context_dim: 512,
            hidden_dim: 256,
            tag_emb_dim: 32,
            tag_size: 2,
            tag_pad_id: 1,
            dropout: 0.5,
            sampling_bias: 100.0,
            beam_size: DEFAULT_BEAM_SIZE,
            loss_normalization: LossNormalization::default(),
        }
    }
}

impl DecoderConfig {
    /// Create a decoder configuration for a vocabulary of `tag_size` tags
    /// whose pad id is `tag_pad_id`.
    pub fn new(context_dim: usize, tag_size: usize, tag_pad_id: u32) -> Self {
        Self {
            context_dim,
            tag_size,
            tag_pad_id,
            ..Self::default()
        }
    }

    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    pub fn with_tag_emb_dim(mut self, tag_emb_dim: usize) -> Self {
        self.tag_emb_dim = tag_emb_dim;
        self
    }

    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_sampling_bias(mut self, bias: f64) -> Self {
        self.sampling_bias = bias;
        self
    }

    pub fn with_beam_size(mut self, beam_size: usize) -> Self {
        self.beam_size = beam_size;
        self
    }

    pub fn with_loss_normalization(mut self, normalization: LossNormalization) -> Self {
        self.loss_normalization = normalization;
        self
    }

    /// Check that dimensions are non-zero and rates are in range.
    pub fn validate(&self) -> Result<()> {
        if self.context_dim == 0 || self.hidden_dim == 0 || self.tag_emb_dim == 0 {
            return Err(KissakiError::InvalidConfig(
                "decoder dimensions must be non-zero".into(),
            ));
        }
        if self.tag_size < 2 {
            return Err(KissakiError::InvalidConfig(format!(
                "tag vocabulary needs at least one real tag and the pad tag, got {}",
                self.tag_size
            )));
        }
        if self.tag_pad_id as usize >= self.tag_size {
            return Err(KissakiError::InvalidConfig(format!(
                "pad id {} outside vocabulary of {} tags",
                self.tag_pad_id, self.tag_size
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(KissakiError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.sampling_bias <= 0.0 {
            return Err(KissakiError::InvalidConfig(format!(
                "sampling bias must be positive, got {}",
                self.sampling_bias
            )));
        }
        Ok(())
    }
}

/// Configuration for the word-level sentence encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Number of words, pad and unknown included.
    pub word_vocab_size: usize,
    pub word_emb_dim: usize,
    pub cap_emb_dim: usize,
    /// Hidden units per direction; H has twice this width.
    pub units: usize,
    pub word_pad_id: u32,
    pub dropout: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            word_vocab_size: 2,
            word_emb_dim: 100,
            cap_emb_dim: 16,
            units: 256,
            word_pad_id: 0,
            dropout: 0.5,
        }
    }
}

impl EncoderConfig {
    /// Width of the context vectors this encoder produces.
    pub fn context_dim(&self) -> usize {
        2 * self.units
    }

    pub fn validate(&self) -> Result<()> {
        if self.word_vocab_size == 0
            || self.word_emb_dim == 0
            || self.cap_emb_dim == 0
            || self.units == 0
        {
            return Err(KissakiError::InvalidConfig(
                "encoder dimensions must be non-zero".into(),
            ));
        }
        if self.word_pad_id as usize >= self.word_vocab_size {
            return Err(KissakiError::InvalidConfig(format!(
                "word pad id {} outside vocabulary of {} words",
                self.word_pad_id, self.word_vocab_size
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(KissakiError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}
