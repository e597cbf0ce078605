//! Token accuracy and exact-match chunk F1 in the conlleval style. Scores are
//! percentages.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KissakiError, Result};
use crate::tags::{chunks, Chunk, TagVocab};

/// Evaluation counts and scores for one pass over a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub tokens: usize,
    pub correct_tokens: usize,
    pub gold_chunks: usize,
    pub predicted_chunks: usize,
    pub correct_chunks: usize,
    /// Whether chunk scores were computed (BIO vocabularies only).
    pub chunked: bool,
}

impl EvalReport {
    pub fn accuracy(&self) -> f64 {
        ratio(self.correct_tokens, self.tokens)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.correct_chunks, self.predicted_chunks)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.correct_chunks, self.gold_chunks)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Model-selection score: chunk F1 when available, else token accuracy.
    pub fn primary(&self) -> f64 {
        if self.chunked {
            self.f1()
        } else {
            self.accuracy()
        }
    }
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accuracy: {:.2}%", self.accuracy())?;
        if self.chunked {
            write!(
                f,
                "; precision: {:.2}%; recall: {:.2}%; FB1: {:.2}",
                self.precision(),
                self.recall(),
                self.f1()
            )?;
        }
        Ok(())
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        100.0 * num as f64 / den as f64
    }
}

fn check_lengths<T>(gold: &[Vec<T>], predicted: &[Vec<T>]) -> Result<()> {
    if gold.len() != predicted.len() {
        return Err(KissakiError::Evaluation(format!(
            "{} gold sentences but {} predictions",
            gold.len(),
            predicted.len()
        )));
    }
    for (i, (g, p)) in gold.iter().zip(predicted).enumerate() {
        if g.len() != p.len() {
            return Err(KissakiError::Evaluation(format!(
                "sentence {i}: {} gold tags but {} predicted",
                g.len(),
                p.len()
            )));
        }
    }
    Ok(())
}

/// Percentage of positions where the predicted tag equals the gold tag.
pub fn token_accuracy(gold: &[Vec<u32>], predicted: &[Vec<u32>]) -> Result<f64> {
    check_lengths(gold, predicted)?;
    let (correct, total) = gold
        .iter()
        .zip(predicted)
        .flat_map(|(g, p)| g.iter().zip(p))
        .fold((0usize, 0usize), |(c, t), (g, p)| (c + usize::from(g == p), t + 1));
    Ok(ratio(correct, total))
}

/// Exact-match chunk counts over BIO tag strings.
pub fn chunk_f1(gold: &[Vec<&str>], predicted: &[Vec<&str>]) -> Result<EvalReport> {
    check_lengths(gold, predicted)?;
    let mut report = EvalReport {
        chunked: true,
        ..EvalReport::default()
    };
    for (g, p) in gold.iter().zip(predicted) {
        report.tokens += g.len();
        report.correct_tokens += g.iter().zip(p).filter(|(a, b)| a == b).count();

        let gold_chunks: HashSet<Chunk> = chunks(g).into_iter().collect();
        let predicted_chunks = chunks(p);
        report.gold_chunks += gold_chunks.len();
        report.predicted_chunks += predicted_chunks.len();
        report.correct_chunks += predicted_chunks
            .iter()
            .filter(|c| gold_chunks.contains(*c))
            .count();
    }
    Ok(report)
}

/// Score predicted tag ids against gold ids. Chunk scores are computed when
/// the vocabulary is BIO.
pub fn evaluate(vocab: &TagVocab, gold: &[Vec<u32>], predicted: &[Vec<u32>]) -> Result<EvalReport> {
    check_lengths(gold, predicted)?;
    if vocab.is_bio() {
        let gold: Vec<Vec<&str>> = gold.iter().map(|s| vocab.decode(s)).collect();
        let predicted: Vec<Vec<&str>> = predicted.iter().map(|s| vocab.decode(s)).collect();
        return chunk_f1(&gold, &predicted);
    }
    let tokens = gold.iter().map(Vec::len).sum();
    let correct_tokens = gold
        .iter()
        .zip(predicted)
        .flat_map(|(g, p)| g.iter().zip(p))
        .filter(|(g, p)| g == p)
        .count();
    Ok(EvalReport {
        tokens,
        correct_tokens,
        ..EvalReport::default()
    })
}
