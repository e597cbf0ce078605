//! # Autoregressive Tag Decoder
//!
//! Turns the context matrix `H` (`batch × len × context_dim`) into tag
//! predictions one position at a time. Each step feeds
//! `[previous tag embedding; H[:, i]]` to the step cell, then scores
//! `[hidden; H[:, i]]` with an affine head.
//!
//! Training runs under a [`TrainingPolicy`] and returns log-probabilities for
//! [`Decoder::loss`]. Inference runs greedy or beam search.

pub mod beam;
pub mod cell;
pub mod greedy;
pub mod loss;
pub mod policy;

use candle_core::{D, Device, Tensor};
use candle_nn::{Init, VarBuilder};
use oorandom::Rand32;
use tracing::debug;

use crate::batch::Batch;
use crate::config::DecoderConfig;
use crate::error::{KissakiError, Result};
use crate::layers::{self, PaddedEmbedding};

pub use beam::{BeamSearch, BeamSearchOutput};
pub use cell::{GruCell, ScoreHead, StepCell};
pub use loss::{masked_nll, LossNormalization};
pub use policy::{
    sampling_probability, InferencePolicy, Mode, TrainingPolicy, TrainingPolicyKind,
};

/// Step cell, score head and tag embedding table.
#[derive(Debug, Clone)]
pub struct Decoder<C: StepCell = GruCell> {
    config: DecoderConfig,
    cell: C,
    head: ScoreHead,
    tag_em: PaddedEmbedding,
    device: Device,
}

impl Decoder<GruCell> {
    /// Build a GRU decoder. Parameters are created under `dec_rnn`, `affine`
    /// and `tag_em`.
    pub fn new(config: DecoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let cell = GruCell::new(
            config.tag_emb_dim + config.context_dim,
            config.hidden_dim,
            vb.pp("dec_rnn"),
        )?;
        Self::with_cell(config, cell, vb)
    }
}

impl<C: StepCell> Decoder<C> {
    /// Build a decoder around an existing step cell whose input is
    /// `tag_emb_dim + context_dim` wide.
    pub fn with_cell(config: DecoderConfig, cell: C, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        if cell.hidden_dim() != config.hidden_dim {
            return Err(KissakiError::InvalidConfig(format!(
                "step cell has {} hidden units, config says {}",
                cell.hidden_dim(),
                config.hidden_dim
            )));
        }
        let device = vb.device().clone();
        let head = ScoreHead::new(
            config.hidden_dim,
            config.context_dim,
            config.tag_size,
            vb.pp("affine"),
        )?;
        let tag_em = PaddedEmbedding::new(
            config.tag_size,
            config.tag_emb_dim,
            config.tag_pad_id,
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
            vb.pp("tag_em"),
        )?;
        Ok(Self {
            config,
            cell,
            head,
            tag_em,
            device,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn tag_embedding(&self) -> &PaddedEmbedding {
        &self.tag_em
    }

    pub fn score_head(&self) -> &ScoreHead {
        &self.head
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Re-zero the pad tag's embedding. Call after every optimiser step.
    pub fn clamp_pad_row(&self) -> Result<()> {
        self.tag_em.clamp_pad_row()
    }

    /// Training forward pass. Returns `batch × len × tag_size`
    /// log-probabilities.
    pub fn forward(
        &self,
        h: &Tensor,
        batch: &Batch,
        policy: &TrainingPolicy,
        mode: Mode,
        rng: &mut Rand32,
    ) -> Result<Tensor> {
        self.check_context(h, batch)?;
        let gold = batch.tags().ok_or(KissakiError::MissingGoldTags)?;
        let (size, len, _) = h.dims3()?;
        debug!(?policy, ?mode, size, len, "decoder forward");

        let gold_ems = self.tag_em.lookup(gold)?;
        let feed = policy.feed(size, len, rng, &self.device)?;
        let contexts = columns(h)?;

        let mut prev = self.start_symbol(size)?;
        let mut state = self.cell.zero_state(size)?;
        let mut scores = Vec::with_capacity(len);
        for (i, context) in contexts.iter().enumerate() {
            let (next, score) = self.step(&prev, context, &state, mode)?;
            let gold_prev = gold_ems.narrow(1, i, 1)?.squeeze(1)?;
            prev = feed.next(i, &score, &gold_prev, &self.tag_em)?;
            state = next;
            scores.push(score);
        }

        Ok(candle_nn::ops::log_softmax(&Tensor::stack(&scores, 1)?, D::Minus1)?)
    }

    /// Masked negative log-likelihood of the gold tags.
    pub fn loss(&self, log_probs: &Tensor, batch: &Batch) -> Result<Tensor> {
        let gold = batch.tags().ok_or(KissakiError::MissingGoldTags)?;
        masked_nll(log_probs, gold, batch.mask(), self.config.loss_normalization)
    }

    /// Predict tags for every sentence, truncated to its true length.
    pub fn decode(
        &self,
        h: &Tensor,
        batch: &Batch,
        policy: InferencePolicy,
    ) -> Result<Vec<Vec<u32>>> {
        self.check_context(h, batch)?;
        let mut paths = match policy {
            InferencePolicy::Greedy => greedy::greedy(self, h)?,
            InferencePolicy::Beam { width } => BeamSearch::new(width).search(self, h)?.paths,
        };
        for (path, &len) in paths.iter_mut().zip(batch.lengths()) {
            path.truncate(len);
        }
        Ok(paths)
    }

    /// One recurrence step: returns the new hidden state and the tag logits.
    pub(crate) fn step(
        &self,
        prev: &Tensor,
        context: &Tensor,
        state: &Tensor,
        mode: Mode,
    ) -> Result<(Tensor, Tensor)> {
        let train = mode.is_train();
        let input = Tensor::cat(&[prev, context], 1)?;
        let input = layers::dropout(&input, self.config.dropout, train)?;
        let next = self.cell.step(&input, state)?;
        let out = layers::dropout(&next, self.config.dropout, train)?;
        let score = self.head.forward(&out, context)?;
        Ok((next, score))
    }

    /// The start symbol: a zero tag embedding.
    pub(crate) fn start_symbol(&self, size: usize) -> Result<Tensor> {
        Ok(Tensor::zeros(
            (size, self.config.tag_emb_dim),
            self.tag_em.weight().dtype(),
            &self.device,
        )?)
    }

    pub(crate) fn cell(&self) -> &C {
        &self.cell
    }

    fn check_context(&self, h: &Tensor, batch: &Batch) -> Result<()> {
        batch.validate(h)?;
        let width = h.dim(2)?;
        if width != self.config.context_dim {
            return Err(KissakiError::ShapeMismatch {
                what: "context width",
                expected: self.config.context_dim,
                actual: width,
            });
        }
        Ok(())
    }
}

/// Split `H` into one contiguous `batch × context_dim` tensor per position.
pub(crate) fn columns(h: &Tensor) -> Result<Vec<Tensor>> {
    let len = h.dim(1)?;
    (0..len)
        .map(|i| Ok(h.narrow(1, i, 1)?.squeeze(1)?.contiguous()?))
        .collect()
}
