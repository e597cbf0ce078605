//! Masked negative log-likelihood over tag sequences.

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{KissakiError, Result};

/// Denominator of the per-sentence average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossNormalization {
    /// Divide by the number of real words in each sentence.
    #[default]
    SentenceLength,
    /// Divide by the padded batch length.
    MaxLength,
}

/// `-mean_batch(sum_t(mask * log p(gold_t)) / denom)`.
///
/// `log_probs` is `batch × len × tags`, `gold` holds tag ids and `mask` is the
/// float word mask, both `batch × len`. Sentences without any real word
/// contribute zero.
pub fn masked_nll(
    log_probs: &Tensor,
    gold: &Tensor,
    mask: &Tensor,
    normalization: LossNormalization,
) -> Result<Tensor> {
    let (batch, len, _) = log_probs.dims3()?;
    for (t, batch_what, len_what) in [
        (gold, "gold tags batch", "gold tags length"),
        (mask, "word mask batch", "word mask length"),
    ] {
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
    }

    let mask = mask.to_dtype(log_probs.dtype())?;
    let gold = gold.to_dtype(DType::U32)?.unsqueeze(2)?.contiguous()?;
    let picked = log_probs.contiguous()?.gather(&gold, 2)?.squeeze(2)?;
    let objective = (picked * &mask)?.sum(1)?;

    let denom = match normalization {
        LossNormalization::SentenceLength => mask.sum(1)?.maximum(1.0)?,
        LossNormalization::MaxLength => Tensor::full(len as f32, batch, mask.device())?
            .to_dtype(mask.dtype())?,
    };
    Ok(objective.div(&denom)?.mean_all()?.neg()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn uniform_log_probs(batch: usize, len: usize, tags: usize) -> Tensor {
        let value = -(tags as f32).ln();
        Tensor::full(value, (batch, len, tags), &Device::Cpu).unwrap()
    }

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_uniform_distribution_loss_is_log_v() {
        let lp = uniform_log_probs(2, 3, 4);
        let gold = Tensor::new(&[[0u32, 1, 2], [3, 0, 0]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1f32, 1.0, 1.0], [1.0, 1.0, 0.0]], &Device::Cpu).unwrap();
        let loss = masked_nll(&lp, &gold, &mask, LossNormalization::SentenceLength).unwrap();
        assert!((scalar(&loss) - 4f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_max_length_normalization_underweights_short_sentences() {
        let lp = uniform_log_probs(2, 4, 2);
        let gold = Tensor::zeros((2, 4), DType::U32, &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1f32, 1.0, 1.0, 1.0], [1.0, 1.0, 0.0, 0.0]], &Device::Cpu).unwrap();
        let by_len = masked_nll(&lp, &gold, &mask, LossNormalization::SentenceLength).unwrap();
        let by_max = masked_nll(&lp, &gold, &mask, LossNormalization::MaxLength).unwrap();
        let ln2 = 2f32.ln();
        assert!((scalar(&by_len) - ln2).abs() < 1e-5);
        assert!((scalar(&by_max) - 0.75 * ln2).abs() < 1e-5);
    }

    #[test]
    fn test_fully_padded_sentence_contributes_zero() {
        let lp = uniform_log_probs(2, 2, 2);
        let gold = Tensor::zeros((2, 2), DType::U32, &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1f32, 1.0], [0.0, 0.0]], &Device::Cpu).unwrap();
        let loss = masked_nll(&lp, &gold, &mask, LossNormalization::SentenceLength).unwrap();
        // Mean over two sentences where the second contributes nothing.
        assert!((scalar(&loss) - 0.5 * 2f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_padding_content_is_ignored() {
        let gold = Tensor::new(&[[1u32, 0, 2]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1f32, 1.0, 0.0]], &Device::Cpu).unwrap();
        let a = Tensor::new(
            &[[[-0.1f32, -2.5, -3.0], [-0.7, -0.9, -2.0], [-0.2, -3.0, -1.9]]],
            &Device::Cpu,
        )
        .unwrap();
        let b = Tensor::new(
            &[[[-0.1f32, -2.5, -3.0], [-0.7, -0.9, -2.0], [-9.0, -0.01, -7.0]]],
            &Device::Cpu,
        )
        .unwrap();
        let la = masked_nll(&a, &gold, &mask, LossNormalization::SentenceLength).unwrap();
        let lb = masked_nll(&b, &gold, &mask, LossNormalization::SentenceLength).unwrap();
        assert_eq!(scalar(&la), scalar(&lb));
        assert!((scalar(&la) - (2.5 + 0.7) / 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_shape_mismatch() {
        let lp = uniform_log_probs(1, 3, 2);
        let gold = Tensor::zeros((1, 2), DType::U32, &Device::Cpu).unwrap();
        let mask = Tensor::ones((1, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            masked_nll(&lp, &gold, &mask, LossNormalization::SentenceLength),
            Err(KissakiError::ShapeMismatch { what: "gold tags length", .. })
        ));
    }
}
