//! Batched beam search over tag sequences.
//!
//! Every sentence keeps `width` hypotheses. Their hidden states and
//! previous-tag embeddings are stacked slot-major into one
//! `(width * batch) × dim` tensor, so a single step call advances all of them.
//! Back-pointers live in a flat arena of [`Hypothesis`] records addressed by
//! index; the final path is recovered by walking parents from the best slot.

use candle_core::{DType, D, Tensor};
use tracing::trace;

use super::{columns, Decoder, Mode, StepCell};
use crate::error::{KissakiError, Result};

/// One node of the search tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hypothesis {
    /// Cumulative log-probability of the path ending here.
    pub score: f32,
    pub tag: u32,
    /// Arena index of the previous node; `None` at the first position.
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    slot: usize,
    tag: u32,
}

/// Surviving hypotheses after one position.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamStep {
    /// `batch × width` cumulative scores, best first.
    pub scores: Vec<Vec<f32>>,
    /// `batch × width` slot each survivor extends in the previous step.
    pub parents: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeamSearchOutput {
    /// Best path per sentence over the full padded length.
    pub paths: Vec<Vec<u32>>,
    /// Cumulative log-probability of each best path.
    pub scores: Vec<f32>,
    /// Survivors at every position.
    pub trace: Vec<BeamStep>,
}

/// Indices of the `k` largest values, best first. Equal values keep index
/// order, so `top_k(row, 1)` agrees with [`super::greedy::argmax`].
pub fn top_k(row: &[f32], k: usize) -> Vec<u32> {
    let mut order: Vec<u32> = (0..row.len() as u32).collect();
    order.sort_by(|&a, &b| {
        row[b as usize]
            .partial_cmp(&row[a as usize])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(k);
    order
}

/// Beam search with reusable buffers.
#[derive(Debug, Clone)]
pub struct BeamSearch {
    width: usize,
    arena: Vec<Hypothesis>,
    candidates: Vec<Candidate>,
}

impl BeamSearch {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            arena: Vec::new(),
            candidates: Vec::with_capacity(width * width),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run the search over every position of `h` (`batch × len × context_dim`).
    pub fn search<C: StepCell>(
        &mut self,
        decoder: &Decoder<C>,
        h: &Tensor,
    ) -> Result<BeamSearchOutput> {
        let tag_size = decoder.config().tag_size;
        let k = self.width;
        if k == 0 || k > tag_size {
            return Err(KissakiError::InvalidBeamSize {
                beam_size: k,
                tag_size,
            });
        }

        let (size, len, _) = h.dims3()?;
        let device = decoder.device();
        self.arena.clear();
        self.arena.reserve(size * len * k);

        // Slot 0 starts alive; the other slots are dead until the first
        // expansion so that the initial candidates are not duplicated.
        let mut cum = vec![f32::NEG_INFINITY; size * k];
        for n in 0..size {
            cum[n * k] = 0.0;
        }
        let mut heads: Vec<Option<usize>> = vec![None; size * k];
        let mut prev = decoder.start_symbol(size * k)?;
        let mut state = decoder.cell().zero_state(size * k)?;
        let mut trace_steps = Vec::with_capacity(len);

        let mut next_cum = vec![0f32; size * k];
        let mut next_heads: Vec<Option<usize>> = vec![None; size * k];
        let mut source = vec![0u32; size * k];
        let mut tags = vec![0u32; size * k];

        for (i, context) in columns(h)?.into_iter().enumerate() {
            let context = Tensor::cat(&vec![context; k], 0)?;
            let (next, score) = decoder.step(&prev, &context, &state, Mode::Eval)?;
            let rows: Vec<Vec<f32>> = candle_nn::ops::log_softmax(&score, D::Minus1)?
                .to_dtype(DType::F32)?
                .to_vec2()?;

            let mut step = BeamStep {
                scores: Vec::with_capacity(size),
                parents: Vec::with_capacity(size),
            };
            for n in 0..size {
                self.candidates.clear();
                for slot in 0..k {
                    let base = cum[n * k + slot];
                    let row = &rows[slot * size + n];
                    for tag in top_k(row, k) {
                        self.candidates.push(Candidate {
                            score: base + row[tag as usize],
                            slot,
                            tag,
                        });
                    }
                }
                self.candidates.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });

                let mut scores = Vec::with_capacity(k);
                let mut parents = Vec::with_capacity(k);
                for (j, cand) in self.candidates.iter().take(k).enumerate() {
                    let id = self.arena.len();
                    self.arena.push(Hypothesis {
                        score: cand.score,
                        tag: cand.tag,
                        parent: heads[n * k + cand.slot],
                    });
                    next_cum[n * k + j] = cand.score;
                    next_heads[n * k + j] = Some(id);
                    source[j * size + n] = (cand.slot * size + n) as u32;
                    tags[j * size + n] = cand.tag;
                    scores.push(cand.score);
                    parents.push(cand.slot);
                }
                step.scores.push(scores);
                step.parents.push(parents);
            }
            trace!(position = i, best = ?step.scores.first().and_then(|s| s.first()), "beam step");

            let source_ids = Tensor::from_slice(&source, size * k, device)?;
            state = next.index_select(&source_ids, 0)?;
            let tag_ids = Tensor::from_slice(&tags, size * k, device)?;
            prev = decoder.tag_embedding().lookup(&tag_ids)?;
            std::mem::swap(&mut cum, &mut next_cum);
            std::mem::swap(&mut heads, &mut next_heads);
            trace_steps.push(step);
        }

        let mut paths = Vec::with_capacity(size);
        let mut scores = Vec::with_capacity(size);
        for n in 0..size {
            paths.push(self.backtrack(heads[n * k], len));
            scores.push(if len == 0 { 0.0 } else { cum[n * k] });
        }
        Ok(BeamSearchOutput {
            paths,
            scores,
            trace: trace_steps,
        })
    }

    fn backtrack(&self, mut node: Option<usize>, len: usize) -> Vec<u32> {
        let mut path = Vec::with_capacity(len);
        while let Some(id) = node {
            let hyp = self.arena[id];
            path.push(hyp.tag);
            node = hyp.parent;
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecoderConfig;
    use crate::decoder::greedy;
    use candle_core::Device;
    use candle_nn::{VarBuilder, VarMap};

    const TAGS: usize = 5;

    fn decoder(varmap: &VarMap) -> Decoder {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        let config = DecoderConfig::new(4, TAGS, 4)
            .with_hidden_dim(6)
            .with_tag_emb_dim(3);
        Decoder::new(config, vb).unwrap()
    }

    fn context() -> Tensor {
        Tensor::randn(0f32, 1.0, (3, 6, 4), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_top_k_orders_and_breaks_ties_by_index() {
        assert_eq!(top_k(&[0.1, 0.9, 0.5, 0.9], 3), vec![1, 3, 2]);
        assert_eq!(top_k(&[0.2, 0.2], 1), vec![0]);
        assert_eq!(top_k(&[0.3, 0.1], 5), vec![0, 1]);
    }

    #[test]
    fn test_width_one_matches_greedy() {
        let varmap = VarMap::new();
        let dec = decoder(&varmap);
        let h = context();
        let beam = BeamSearch::new(1).search(&dec, &h).unwrap();
        let greedy = greedy::greedy(&dec, &h).unwrap();
        assert_eq!(beam.paths, greedy);
    }

    #[test]
    fn test_scores_sorted_and_never_increase() {
        let varmap = VarMap::new();
        let dec = decoder(&varmap);
        let out = BeamSearch::new(3).search(&dec, &context()).unwrap();
        assert_eq!(out.trace.len(), 6);

        for (i, step) in out.trace.iter().enumerate() {
            for (n, scores) in step.scores.iter().enumerate() {
                assert_eq!(scores.len(), 3);
                assert!(scores.windows(2).all(|w| w[0] >= w[1]));
                if i > 0 {
                    let before = &out.trace[i - 1].scores[n];
                    for (score, &parent) in scores.iter().zip(&step.parents[n]) {
                        assert!(*score <= before[parent]);
                    }
                } else {
                    // Only slot 0 is alive before the first expansion.
                    assert!(step.parents[n].iter().all(|&p| p == 0));
                }
            }
        }
        for (n, path) in out.paths.iter().enumerate() {
            assert_eq!(path.len(), 6);
            assert_eq!(out.scores[n], out.trace[5].scores[n][0]);
        }
    }

    #[test]
    fn test_best_path_score_matches_its_tags() {
        let varmap = VarMap::new();
        let dec = decoder(&varmap);
        let h = context();
        let out = BeamSearch::new(TAGS).search(&dec, &h).unwrap();

        // Re-score the returned path by feeding its tags step by step.
        let (size, _, _) = h.dims3().unwrap();
        let mut prev = dec.start_symbol(size).unwrap();
        let mut state = dec.cell().zero_state(size).unwrap();
        let mut totals = vec![0f32; size];
        for (i, ctx) in columns(&h).unwrap().iter().enumerate() {
            let (next, score) = dec.step(&prev, ctx, &state, Mode::Eval).unwrap();
            let rows: Vec<Vec<f32>> = candle_nn::ops::log_softmax(&score, D::Minus1)
                .unwrap()
                .to_vec2()
                .unwrap();
            let chosen: Vec<u32> = out.paths.iter().map(|p| p[i]).collect();
            for n in 0..size {
                totals[n] += rows[n][chosen[n] as usize];
            }
            let ids = Tensor::new(chosen.as_slice(), &Device::Cpu).unwrap();
            prev = dec.tag_embedding().lookup(&ids).unwrap();
            state = next;
        }
        for n in 0..size {
            assert!((totals[n] - out.scores[n]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_invalid_width_rejected_before_search() {
        let varmap = VarMap::new();
        let dec = decoder(&varmap);
        for width in [0, TAGS + 1] {
            assert!(matches!(
                BeamSearch::new(width).search(&dec, &context()),
                Err(KissakiError::InvalidBeamSize { .. })
            ));
        }
    }

    #[test]
    fn test_buffers_are_reused() {
        let varmap = VarMap::new();
        let dec = decoder(&varmap);
        let mut search = BeamSearch::new(2);
        let h = context();
        let first = search.search(&dec, &h).unwrap();
        let second = search.search(&dec, &h).unwrap();
        assert_eq!(first, second);
        assert_eq!(search.arena.len(), 3 * 6 * 2);
    }
}
