//! # Training and Inference Policies
//!
//! A training policy decides which previous-tag embedding feeds each decoder
//! step: the gold tag (teacher forcing), the model's own argmax (scheduled
//! sampling) or a sharpened soft average of all tag embeddings
//! (differentiable sampling). The choice is made once per forward pass by
//! building a [`PrevTagFeed`].

use std::fmt;
use std::str::FromStr;

use candle_core::{D, Device, Tensor};
use oorandom::Rand32;
use serde::{Deserialize, Serialize};

use crate::error::{KissakiError, Result};
use crate::layers::PaddedEmbedding;

/// Inverse-sigmoid decay of the probability of feeding the gold tag:
/// `k / (k + exp(epoch / k))`.
pub fn sampling_probability(epoch: usize, k: f64) -> f64 {
    k / (k + (epoch as f64 / k).exp())
}

/// Training regime identifier as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TrainingPolicyKind {
    TeacherForced,
    ScheduledSampling,
    DifferentiableSampling,
}

impl TrainingPolicyKind {
    /// Whether this regime mixes in generated tags and so uses a decaying
    /// sampling probability.
    pub fn samples(self) -> bool {
        !matches!(self, TrainingPolicyKind::TeacherForced)
    }

    /// Concrete policy for one epoch.
    pub fn policy(self, sampling_p: f64, sampling_bias: f64) -> TrainingPolicy {
        match self {
            TrainingPolicyKind::TeacherForced => TrainingPolicy::TeacherForced,
            TrainingPolicyKind::ScheduledSampling => {
                TrainingPolicy::ScheduledSampling { sampling_p }
            }
            TrainingPolicyKind::DifferentiableSampling => TrainingPolicy::DifferentiableSampling {
                sampling_p,
                bias: sampling_bias,
            },
        }
    }
}

impl FromStr for TrainingPolicyKind {
    type Err = KissakiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TF" | "TF-RNN" => Ok(TrainingPolicyKind::TeacherForced),
            "SS" | "SS-RNN" => Ok(TrainingPolicyKind::ScheduledSampling),
            "DS" | "DS-RNN" => Ok(TrainingPolicyKind::DifferentiableSampling),
            other => Err(KissakiError::UnknownTrainingPolicy(other.to_string())),
        }
    }
}

impl TryFrom<String> for TrainingPolicyKind {
    type Error = KissakiError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TrainingPolicyKind> for String {
    fn from(kind: TrainingPolicyKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for TrainingPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingPolicyKind::TeacherForced => write!(f, "TF"),
            TrainingPolicyKind::ScheduledSampling => write!(f, "SS"),
            TrainingPolicyKind::DifferentiableSampling => write!(f, "DS"),
        }
    }
}

/// Training policy with its parameters for the current epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainingPolicy {
    TeacherForced,
    /// Feed the gold tag with probability `sampling_p`, else the argmax tag.
    ScheduledSampling { sampling_p: f64 },
    /// Feed the gold tag with probability `sampling_p`, else the embedding
    /// average weighted by `softmax(bias * score)`.
    DifferentiableSampling { sampling_p: f64, bias: f64 },
}

impl TrainingPolicy {
    /// Build the feed for one forward pass over a `batch × len` grid. Coins
    /// are drawn here, once, for the whole grid.
    pub(crate) fn feed(
        &self,
        batch: usize,
        len: usize,
        rng: &mut Rand32,
        device: &Device,
    ) -> Result<Box<dyn PrevTagFeed>> {
        Ok(match *self {
            TrainingPolicy::TeacherForced => Box::new(TeacherForcing),
            TrainingPolicy::ScheduledSampling { sampling_p } => Box::new(HardSampling {
                switch: draw_switch(batch, len, sampling_p, rng, device)?,
            }),
            TrainingPolicy::DifferentiableSampling { sampling_p, bias } => {
                Box::new(SoftSampling {
                    switch: draw_switch(batch, len, sampling_p, rng, device)?,
                    bias,
                })
            }
        })
    }
}

/// Draw one coin per (sentence, position). The switch is `1.0` where the
/// generated tag is used, i.e. where the coin is at or above `sampling_p`.
fn draw_switch(
    batch: usize,
    len: usize,
    sampling_p: f64,
    rng: &mut Rand32,
    device: &Device,
) -> Result<Tensor> {
    let switch: Vec<f32> = (0..batch * len)
        .map(|_| {
            if f64::from(rng.rand_float()) >= sampling_p {
                1.0
            } else {
                0.0
            }
        })
        .collect();
    Ok(Tensor::from_vec(switch, (batch, len), device)?)
}

/// Chooses the previous-tag embedding for the step after `step`.
pub(crate) trait PrevTagFeed {
    /// `score` holds the logits produced at `step`, `gold` the embedding of
    /// the gold tag at `step`.
    fn next(
        &self,
        step: usize,
        score: &Tensor,
        gold: &Tensor,
        table: &PaddedEmbedding,
    ) -> Result<Tensor>;
}

struct TeacherForcing;

impl PrevTagFeed for TeacherForcing {
    fn next(&self, _: usize, _: &Tensor, gold: &Tensor, _: &PaddedEmbedding) -> Result<Tensor> {
        Ok(gold.clone())
    }
}

struct HardSampling {
    switch: Tensor,
}

impl PrevTagFeed for HardSampling {
    fn next(
        &self,
        step: usize,
        score: &Tensor,
        gold: &Tensor,
        table: &PaddedEmbedding,
    ) -> Result<Tensor> {
        let generated = table.lookup(&score.argmax(D::Minus1)?)?;
        mix(&self.switch, step, &generated, gold)
    }
}

struct SoftSampling {
    switch: Tensor,
    bias: f64,
}

impl PrevTagFeed for SoftSampling {
    fn next(
        &self,
        step: usize,
        score: &Tensor,
        gold: &Tensor,
        table: &PaddedEmbedding,
    ) -> Result<Tensor> {
        let weights = candle_nn::ops::softmax(&(score * self.bias)?, D::Minus1)?;
        let generated = weights.matmul(table.weight())?;
        mix(&self.switch, step, &generated, gold)
    }
}

/// `switch * generated + (1 - switch) * gold` for column `step`.
fn mix(switch: &Tensor, step: usize, generated: &Tensor, gold: &Tensor) -> Result<Tensor> {
    let sw = switch.narrow(1, step, 1)?.to_dtype(generated.dtype())?;
    let keep = sw.affine(-1.0, 1.0)?;
    Ok((sw.broadcast_mul(generated)? + keep.broadcast_mul(gold)?)?)
}

/// Beam width used when none is given.
pub const DEFAULT_BEAM_SIZE: usize = 10;

/// How inference chooses tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferencePolicy {
    Greedy,
    Beam { width: usize },
}

impl InferencePolicy {
    /// Parse `greedy`, `beam` or `beam:N`. A bare `beam` takes `beam_size`,
    /// normally the width the model was configured with.
    pub fn parse(s: &str, beam_size: usize) -> Result<Self> {
        match s.split_once(':') {
            Some(("beam", width)) => width
                .parse()
                .map(|width| InferencePolicy::Beam { width })
                .map_err(|_| KissakiError::UnknownInferencePolicy(s.to_string())),
            None if s == "greedy" => Ok(InferencePolicy::Greedy),
            None if s == "beam" => Ok(InferencePolicy::Beam { width: beam_size }),
            _ => Err(KissakiError::UnknownInferencePolicy(s.to_string())),
        }
    }
}

/// Parses like [`InferencePolicy::parse`] with [`DEFAULT_BEAM_SIZE`].
impl FromStr for InferencePolicy {
    type Err = KissakiError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, DEFAULT_BEAM_SIZE)
    }
}

impl fmt::Display for InferencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferencePolicy::Greedy => write!(f, "greedy"),
            InferencePolicy::Beam { width } => write!(f, "beam:{width}"),
        }
    }
}

/// Whether dropout is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Train,
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        self == Mode::Train
    }
}
