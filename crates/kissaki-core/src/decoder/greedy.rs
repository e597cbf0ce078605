//! Greedy inference: feed back the most likely tag at every step.

use candle_core::{DType, D, Tensor};

use super::{columns, Decoder, Mode, StepCell};
use crate::error::Result;

/// Index of the largest value; ties go to the lower index.
pub fn argmax(row: &[f32]) -> u32 {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate().skip(1) {
        if v > row[best] {
            best = i;
        }
    }
    best as u32
}

/// Greedy tag paths over the full padded length.
pub(crate) fn greedy<C: StepCell>(decoder: &Decoder<C>, h: &Tensor) -> Result<Vec<Vec<u32>>> {
    Ok(run(decoder, h)?.0)
}

/// Per-step log-probabilities along the greedy path, `batch × len × tags`.
#[cfg(test)]
pub(crate) fn greedy_log_probs<C: StepCell>(decoder: &Decoder<C>, h: &Tensor) -> Result<Tensor> {
    Ok(Tensor::stack(&run(decoder, h)?.1, 1)?)
}

fn run<C: StepCell>(decoder: &Decoder<C>, h: &Tensor) -> Result<(Vec<Vec<u32>>, Vec<Tensor>)> {
    let (size, len, _) = h.dims3()?;
    let mut prev = decoder.start_symbol(size)?;
    let mut state = decoder.cell().zero_state(size)?;
    let mut paths = vec![Vec::with_capacity(len); size];
    let mut log_probs = Vec::with_capacity(len);

    for context in columns(h)? {
        let (next, score) = decoder.step(&prev, &context, &state, Mode::Eval)?;
        let lp = candle_nn::ops::log_softmax(&score, D::Minus1)?;
        let rows: Vec<Vec<f32>> = lp.to_dtype(DType::F32)?.to_vec2()?;
        let best: Vec<u32> = rows.iter().map(|row| argmax(row)).collect();
        for (path, &tag) in paths.iter_mut().zip(&best) {
            path.push(tag);
        }
        let ids = Tensor::from_vec(best, size, decoder.device())?;
        prev = decoder.tag_embedding().lookup(&ids)?;
        state = next;
        log_probs.push(lp);
    }
    Ok((paths, log_probs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecoderConfig;
    use candle_core::Device;
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn test_argmax_prefers_lower_index_on_ties() {
        assert_eq!(argmax(&[0.1, 0.5, 0.5, 0.2]), 1);
        assert_eq!(argmax(&[-1.0]), 0);
        assert_eq!(argmax(&[-3.0, -2.0, -1.0]), 2);
    }

    #[test]
    fn test_greedy_is_deterministic() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = DecoderConfig::new(4, 5, 4).with_hidden_dim(6).with_tag_emb_dim(3);
        let decoder = Decoder::new(config, vb).unwrap();
        let h = Tensor::randn(0f32, 1.0, (3, 7, 4), &Device::Cpu).unwrap();

        let first = greedy(&decoder, &h).unwrap();
        let second = greedy(&decoder, &h).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|p| p.len() == 7));
    }
}
