//! # Sentence Encoder
//!
//! Produces the context matrix `H` consumed by the tag decoder. Each word is
//! represented by its word embedding concatenated with an embedding of its
//! capitalisation pattern; a bidirectional GRU runs over the sentence and the
//! two directions are concatenated, giving `2 * units` features per position.
//!
//! Padding never leaks into real positions: the recurrent state is carried
//! unchanged across padded steps and padded outputs are zero.

use candle_core::{Tensor, D};
use candle_nn::{Init, VarBuilder};

use crate::batch::Batch;
use crate::config::EncoderConfig;
use crate::decoder::{GruCell, Mode, StepCell};
use crate::error::Result;
use crate::layers::{self, PaddedEmbedding};

/// Number of capitalisation ids, pad included.
pub const CAP_SIZE: usize = 5;
/// Capitalisation id used for padded positions.
pub const CAP_PAD_ID: u32 = 4;

/// Surface capitalisation of a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapPattern {
    /// No uppercase letters (`house`, `42`).
    Lower = 0,
    /// Every letter uppercase (`NASA`).
    Upper = 1,
    /// Only the first letter uppercase (`Paris`).
    Initial = 2,
    /// Any other mix (`iPhone`, `McDonald`).
    Mixed = 3,
}

impl CapPattern {
    pub fn of(word: &str) -> Self {
        let letters: Vec<char> = word.chars().filter(|c| c.is_alphabetic()).collect();
        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        if upper == 0 {
            return CapPattern::Lower;
        }
        if upper == letters.len() {
            return CapPattern::Upper;
        }
        let first_upper = word.chars().next().is_some_and(char::is_uppercase);
        if first_upper && upper == 1 {
            CapPattern::Initial
        } else {
            CapPattern::Mixed
        }
    }

    pub fn id(self) -> u32 {
        self as u32
    }
}

/// Capitalisation id of `word`.
pub fn capitalization(word: &str) -> u32 {
    CapPattern::of(word).id()
}

/// Word and capitalisation embeddings followed by a bidirectional GRU.
#[derive(Debug, Clone)]
pub struct SentenceEncoder {
    config: EncoderConfig,
    word_em: PaddedEmbedding,
    cap_em: PaddedEmbedding,
    fw_rnn: GruCell,
    bw_rnn: GruCell,
}

impl SentenceEncoder {
    pub fn new(config: EncoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let word_em = PaddedEmbedding::new(
            config.word_vocab_size,
            config.word_emb_dim,
            config.word_pad_id,
            layers::xavier_uniform(config.word_emb_dim, config.word_vocab_size),
            vb.pp("word_em"),
        )?;
        let cap_em = PaddedEmbedding::new(
            CAP_SIZE,
            config.cap_emb_dim,
            CAP_PAD_ID,
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
            vb.pp("cap_em"),
        )?;
        let in_dim = config.word_emb_dim + config.cap_emb_dim;
        let fw_rnn = GruCell::new(in_dim, config.units, vb.pp("fw_rnn"))?;
        let bw_rnn = GruCell::new(in_dim, config.units, vb.pp("bw_rnn"))?;
        Ok(Self {
            config,
            word_em,
            cap_em,
            fw_rnn,
            bw_rnn,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn context_dim(&self) -> usize {
        self.config.context_dim()
    }

    pub fn word_embedding(&self) -> &PaddedEmbedding {
        &self.word_em
    }

    /// Replace the word embeddings with pretrained vectors.
    pub fn load_word_vectors(&self, vectors: &Tensor) -> Result<()> {
        self.word_em.assign(vectors)
    }

    /// Re-zero the word and capitalisation pad rows.
    pub fn clamp_pad_rows(&self) -> Result<()> {
        self.word_em.clamp_pad_row()?;
        self.cap_em.clamp_pad_row()
    }

    /// Encode a batch into `H`, `batch × max_len × 2 * units`.
    pub fn forward(&self, batch: &Batch, mode: Mode) -> Result<Tensor> {
        let train = mode.is_train();
        let words = self.word_em.lookup(batch.words())?;
        let caps = self.cap_em.lookup(batch.caps())?;
        let features = Tensor::cat(&[words, caps], D::Minus1)?;
        let features = layers::dropout(&features, self.config.dropout, train)?;

        let len = features.dim(1)?;
        let dtype = features.dtype();
        let inputs: Vec<Tensor> = (0..len)
            .map(|i| Ok(features.narrow(1, i, 1)?.squeeze(1)?.contiguous()?))
            .collect::<Result<_>>()?;
        let masks: Vec<Tensor> = (0..len)
            .map(|i| Ok(batch.mask_column(i)?.to_dtype(dtype)?))
            .collect::<Result<_>>()?;

        let forward = run_direction(&self.fw_rnn, &inputs, &masks, 0..len)?;
        let mut backward = run_direction(&self.bw_rnn, &inputs, &masks, (0..len).rev())?;
        backward.reverse();

        let outputs: Vec<Tensor> = forward
            .iter()
            .zip(&backward)
            .map(|(f, b)| Tensor::cat(&[f, b], 1))
            .collect::<candle_core::Result<_>>()?;
        let h = Tensor::stack(&outputs, 1)?;
        Ok(layers::dropout(&h, self.config.dropout, train)?)
    }
}

/// Run one direction, visiting positions in `order`. Outputs are returned in
/// visiting order.
fn run_direction(
    cell: &GruCell,
    inputs: &[Tensor],
    masks: &[Tensor],
    order: impl Iterator<Item = usize>,
) -> Result<Vec<Tensor>> {
    let size = inputs.first().map(|x| x.dim(0)).transpose()?.unwrap_or(0);
    let mut state = cell.zero_state(size)?;
    let mut outputs = Vec::with_capacity(inputs.len());
    for i in order {
        let mask = &masks[i];
        let next = cell.step(&inputs[i], &state)?;
        let keep = mask.affine(-1.0, 1.0)?;
        state = (next.broadcast_mul(mask)? + state.broadcast_mul(&keep)?)?;
        outputs.push(state.broadcast_mul(mask)?);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{EncodedSentence, PadIds};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    const PADS: PadIds = PadIds {
        word: 0,
        cap: CAP_PAD_ID,
        tag: 2,
    };

    fn config() -> EncoderConfig {
        EncoderConfig {
            word_vocab_size: 10,
            word_emb_dim: 4,
            cap_emb_dim: 2,
            units: 3,
            word_pad_id: 0,
            dropout: 0.5,
        }
    }

    fn sentence(words: &[u32]) -> EncodedSentence {
        EncodedSentence {
            words: words.to_vec(),
            caps: vec![0; words.len()],
            tags: None,
        }
    }

    #[test]
    fn test_capitalization_patterns() {
        assert_eq!(capitalization("house"), 0);
        assert_eq!(capitalization("1999"), 0);
        assert_eq!(capitalization("NASA"), 1);
        assert_eq!(capitalization("U.S."), 1);
        assert_eq!(capitalization("Paris"), 2);
        assert_eq!(capitalization("iPhone"), 3);
        assert_eq!(capitalization("McDonald"), 3);
        assert_eq!(CapPattern::of(""), CapPattern::Lower);
    }

    #[test]
    fn test_output_shape_and_padding() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = SentenceEncoder::new(config(), vb).unwrap();
        let batch =
            Batch::from_sentences(&[sentence(&[1, 2, 3]), sentence(&[4])], PADS, &Device::Cpu)
                .unwrap();
        let h = encoder.forward(&batch, Mode::Eval).unwrap();
        assert_eq!(h.dims(), &[2, 3, 6]);
        assert_eq!(encoder.context_dim(), 6);

        let values: Vec<Vec<Vec<f32>>> = h.to_vec3().unwrap();
        assert!(values[1][1].iter().all(|&v| v == 0.0));
        assert!(values[1][2].iter().all(|&v| v == 0.0));
        assert!(values[1][0].iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_padding_does_not_change_real_positions() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = SentenceEncoder::new(config(), vb).unwrap();

        let alone = Batch::from_sentences(&[sentence(&[5, 6])], PADS, &Device::Cpu).unwrap();
        let padded = Batch::from_sentences(
            &[sentence(&[5, 6]), sentence(&[1, 2, 3, 4])],
            PADS,
            &Device::Cpu,
        )
        .unwrap();
        let a: Vec<Vec<Vec<f32>>> = encoder.forward(&alone, Mode::Eval).unwrap().to_vec3().unwrap();
        let b: Vec<Vec<Vec<f32>>> = encoder
            .forward(&padded, Mode::Eval)
            .unwrap()
            .to_vec3()
            .unwrap();
        for i in 0..2 {
            for (x, y) in a[0][i].iter().zip(&b[0][i]) {
                assert!((x - y).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_pretrained_vectors_keep_pad_row_zero() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder = SentenceEncoder::new(config(), vb).unwrap();
        let vectors = Tensor::ones((10, 4), DType::F32, &Device::Cpu).unwrap();
        encoder.load_word_vectors(&vectors).unwrap();
        let rows: Vec<Vec<f32>> = encoder.word_embedding().weight().to_vec2().unwrap();
        assert_eq!(rows[0], vec![0.0; 4]);
        assert_eq!(rows[3], vec![1.0; 4]);
    }
}
