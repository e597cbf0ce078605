//! Padded tensor batches shared by the encoder and the decoder.

use candle_core::{DType, Device, Tensor};

use crate::error::{KissakiError, Result};

/// One sentence mapped to ids, before padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSentence {
    pub words: Vec<u32>,
    pub caps: Vec<u32>,
    /// Gold tag ids; `None` for unlabelled input.
    pub tags: Option<Vec<u32>>,
}

impl EncodedSentence {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Pad ids used to fill positions beyond a sentence's length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadIds {
    pub word: u32,
    pub cap: u32,
    pub tag: u32,
}

/// A batch of sentences padded to the longest one.
///
/// Every tensor is `batch × max_len`; `mask` is `1.0` on real words.
#[derive(Debug, Clone)]
pub struct Batch {
    words: Tensor,
    caps: Tensor,
    tags: Option<Tensor>,
    mask: Tensor,
    lengths: Vec<usize>,
}

impl Batch {
    /// Pad `sentences` into a batch. Gold tags are kept only when every
    /// sentence carries them.
    pub fn from_sentences(
        sentences: &[EncodedSentence],
        pads: PadIds,
        device: &Device,
    ) -> Result<Self> {
        if sentences.is_empty() {
            return Err(KissakiError::InvalidConfig("empty batch".into()));
        }
        let batch = sentences.len();
        let max_len = sentences.iter().map(EncodedSentence::len).max().unwrap_or(0);
        if max_len == 0 {
            return Err(KissakiError::InvalidConfig(
                "batch contains only empty sentences".into(),
            ));
        }
        let labelled = sentences.iter().all(|s| s.tags.is_some());

        let mut words = vec![pads.word; batch * max_len];
        let mut caps = vec![pads.cap; batch * max_len];
        let mut tags = vec![pads.tag; batch * max_len];
        let mut mask = vec![0f32; batch * max_len];
        let mut lengths = Vec::with_capacity(batch);

        for (n, sentence) in sentences.iter().enumerate() {
            if sentence.caps.len() != sentence.len() {
                return Err(KissakiError::ShapeMismatch {
                    what: "capitalisation ids per sentence",
                    expected: sentence.len(),
                    actual: sentence.caps.len(),
                });
            }
            let row = n * max_len;
            words[row..row + sentence.len()].copy_from_slice(&sentence.words);
            caps[row..row + sentence.len()].copy_from_slice(&sentence.caps);
            mask[row..row + sentence.len()].fill(1.0);
            if let (true, Some(gold)) = (labelled, &sentence.tags) {
                if gold.len() != sentence.len() {
                    return Err(KissakiError::ShapeMismatch {
                        what: "gold tags per sentence",
                        expected: sentence.len(),
                        actual: gold.len(),
                    });
                }
                tags[row..row + gold.len()].copy_from_slice(gold);
            }
            lengths.push(sentence.len());
        }

        let shape = (batch, max_len);
        Ok(Self {
            words: Tensor::from_vec(words, shape, device)?,
            caps: Tensor::from_vec(caps, shape, device)?,
            tags: if labelled {
                Some(Tensor::from_vec(tags, shape, device)?)
            } else {
                None
            },
            mask: Tensor::from_vec(mask, shape, device)?,
            lengths,
        })
    }

    /// Build a batch directly from tensors. Shapes are checked by [`Batch::validate`].
    pub fn from_tensors(
        words: Tensor,
        caps: Tensor,
        tags: Option<Tensor>,
        mask: Tensor,
        lengths: Vec<usize>,
    ) -> Self {
        Self {
            words,
            caps,
            tags,
            mask,
            lengths,
        }
    }

    pub fn words(&self) -> &Tensor {
        &self.words
    }

    pub fn caps(&self) -> &Tensor {
        &self.caps
    }

    /// Gold tag ids, `batch × max_len`.
    pub fn tags(&self) -> Option<&Tensor> {
        self.tags.as_ref()
    }

    /// Float word mask, `batch × max_len`.
    pub fn mask(&self) -> &Tensor {
        &self.mask
    }

    /// True sentence lengths.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    pub fn max_len(&self) -> Result<usize> {
        Ok(self.mask.dim(1)?)
    }

    /// Check that the context matrix `h` and every batch tensor agree on
    /// batch size and length. Runs before any decoding step.
    pub fn validate(&self, h: &Tensor) -> Result<()> {
        let (batch, len, _) = h.dims3()?;
        check_2d(&self.mask, ("word mask batch", "word mask length"), batch, len)?;
        check_2d(&self.words, ("word ids batch", "word ids length"), batch, len)?;
        check_2d(
            &self.caps,
            ("capitalisation ids batch", "capitalisation ids length"),
            batch,
            len,
        )?;
        if let Some(tags) = &self.tags {
            check_2d(tags, ("gold tags batch", "gold tags length"), batch, len)?;
        }
        if self.lengths.len() != batch {
            return Err(KissakiError::ShapeMismatch {
                what: "sentence lengths",
                expected: batch,
                actual: self.lengths.len(),
            });
        }
        if let Some(&too_long) = self.lengths.iter().find(|&&l| l > len) {
            return Err(KissakiError::ShapeMismatch {
                what: "sentence length",
                expected: len,
                actual: too_long,
            });
        }
        Ok(())
    }

    /// Mask as a column for step `i`, shape `batch × 1`.
    pub(crate) fn mask_column(&self, i: usize) -> Result<Tensor> {
        Ok(self.mask.narrow(1, i, 1)?.to_dtype(DType::F32)?)
    }
}

fn check_2d(
    t: &Tensor,
    (batch_what, len_what): (&'static str, &'static str),
    batch: usize,
    len: usize,
) -> Result<()> {
    let (b, l) = t.dims2()?;
    if b != batch {
        return Err(KissakiError::ShapeMismatch {
            what: batch_what,
            expected: batch,
            actual: b,
        });
    }
    if l != len {
        return Err(KissakiError::ShapeMismatch {
            what: len_what,
            expected: len,
            actual: l,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PADS: PadIds = PadIds {
        word: 0,
        cap: 4,
        tag: 2,
    };

    fn sentence(words: &[u32], tags: Option<&[u32]>) -> EncodedSentence {
        EncodedSentence {
            words: words.to_vec(),
            caps: vec![0; words.len()],
            tags: tags.map(<[u32]>::to_vec),
        }
    }

    #[test]
    fn test_padding_and_mask() {
        let batch = Batch::from_sentences(
            &[
                sentence(&[5, 6, 7], Some(&[1, 0, 0])),
                sentence(&[8, 9], Some(&[0, 1])),
            ],
            PADS,
            &Device::Cpu,
        )
        .unwrap();

        assert_eq!(batch.lengths(), &[3, 2]);
        assert_eq!(batch.max_len().unwrap(), 3);
        let mask: Vec<Vec<f32>> = batch.mask().to_vec2().unwrap();
        assert_eq!(mask, vec![vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 0.0]]);
        let tags: Vec<Vec<u32>> = batch.tags().unwrap().to_vec2().unwrap();
        assert_eq!(tags, vec![vec![1, 0, 0], vec![0, 1, 2]]);
        let caps: Vec<Vec<u32>> = batch.caps().to_vec2().unwrap();
        assert_eq!(caps[1][2], 4);
    }

    #[test]
    fn test_unlabelled_batch_has_no_tags() {
        let batch = Batch::from_sentences(
            &[sentence(&[5, 6], Some(&[1, 0])), sentence(&[8], None)],
            PADS,
            &Device::Cpu,
        )
        .unwrap();
        assert!(batch.tags().is_none());
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(Batch::from_sentences(&[], PADS, &Device::Cpu).is_err());
    }

    #[test]
    fn test_validate_rejects_length_mismatch() {
        let batch =
            Batch::from_sentences(&[sentence(&[5, 6, 7], Some(&[1, 0, 0]))], PADS, &Device::Cpu)
                .unwrap();
        let h = Tensor::zeros((1, 4, 8), DType::F32, &Device::Cpu).unwrap();
        match batch.validate(&h) {
            Err(KissakiError::ShapeMismatch {
                what,
                expected,
                actual,
            }) => {
                assert_eq!(what, "word mask length");
                assert_eq!((expected, actual), (4, 3));
            }
            other => panic!("expected shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_batch_mismatch() {
        let batch =
            Batch::from_sentences(&[sentence(&[5, 6, 7], Some(&[1, 0, 0]))], PADS, &Device::Cpu)
                .unwrap();
        let h = Tensor::zeros((2, 3, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            batch.validate(&h),
            Err(KissakiError::ShapeMismatch { what: "word mask batch", .. })
        ));
        let ok = Tensor::zeros((1, 3, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(batch.validate(&ok).is_ok());
    }
}
