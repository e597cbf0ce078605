//! The full tagger: sentence encoder plus tag decoder over one `VarMap`.
//!
//! A trained model is stored as two files keyed by the training variant:
//! `<dir>/<variant>.safetensors` with the weights and `<dir>/<variant>.json`
//! with the configurations and vocabularies needed to rebuild it.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use kissaki_core::{
    Batch, Decoder, DecoderConfig, EncodedSentence, EncoderConfig, InferencePolicy, Mode,
    PadIds, SentenceEncoder, TagVocab, TrainingPolicy, TrainingPolicyKind, CAP_PAD_ID,
};
use oorandom::Rand32;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{encode, Sentence, WordVocab};

/// Everything besides the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggerMeta {
    pub variant: TrainingPolicyKind,
    pub encoder: EncoderConfig,
    pub decoder: DecoderConfig,
    pub tags: TagVocab,
    pub words: WordVocab,
}

impl TaggerMeta {
    pub fn weights_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.safetensors", self.variant))
    }

    pub fn meta_path(dir: &Path, variant: TrainingPolicyKind) -> PathBuf {
        dir.join(format!("{variant}.json"))
    }
}

pub struct Tagger {
    meta: TaggerMeta,
    varmap: VarMap,
    encoder: SentenceEncoder,
    decoder: Decoder,
    device: Device,
}

impl Tagger {
    /// Build a freshly initialised tagger.
    pub fn new(meta: TaggerMeta, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let encoder = SentenceEncoder::new(meta.encoder.clone(), vb.pp("encoder"))?;
        let decoder = Decoder::new(meta.decoder.clone(), vb.pp("decoder"))?;
        Ok(Self {
            meta,
            varmap,
            encoder,
            decoder,
            device: device.clone(),
        })
    }

    /// Rebuild a tagger saved by [`Tagger::save`].
    pub fn load(dir: &Path, variant: TrainingPolicyKind, device: &Device) -> Result<Self> {
        let meta_path = TaggerMeta::meta_path(dir, variant);
        let file = File::open(&meta_path)
            .with_context(|| format!("opening {}", meta_path.display()))?;
        let meta: TaggerMeta = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", meta_path.display()))?;
        let weights = meta.weights_path(dir);
        let mut tagger = Self::new(meta, device)?;
        tagger
            .varmap
            .load(&weights)
            .with_context(|| format!("loading {}", weights.display()))?;
        info!(path = %weights.display(), "loaded model");
        Ok(tagger)
    }

    /// Write weights and metadata into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let weights = self.meta.weights_path(dir);
        self.varmap
            .save(&weights)
            .with_context(|| format!("saving {}", weights.display()))?;
        let meta_path = TaggerMeta::meta_path(dir, self.meta.variant);
        let file = File::create(&meta_path)
            .with_context(|| format!("creating {}", meta_path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.meta)?;
        info!(path = %weights.display(), "saved model");
        Ok(())
    }

    pub fn meta(&self) -> &TaggerMeta {
        &self.meta
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Parse `greedy`, `beam` or `beam:N`. A bare `beam` uses the beam width
    /// stored with the model.
    pub fn inference_policy(&self, s: &str) -> Result<InferencePolicy> {
        Ok(InferencePolicy::parse(s, self.meta.decoder.beam_size)?)
    }

    /// Training policy of this model's variant at `sampling_p`, sharpened by
    /// the stored sampling bias.
    pub fn training_policy(&self, sampling_p: f64) -> TrainingPolicy {
        self.meta
            .variant
            .policy(sampling_p, self.meta.decoder.sampling_bias)
    }

    pub fn load_word_vectors(&self, vectors: &Tensor) -> Result<()> {
        Ok(self.encoder.load_word_vectors(vectors)?)
    }

    fn pads(&self) -> PadIds {
        PadIds {
            word: self.meta.words.pad_id(),
            cap: CAP_PAD_ID,
            tag: self.meta.tags.pad_id(),
        }
    }

    pub fn encode(&self, sentences: &[Sentence]) -> Result<Vec<EncodedSentence>> {
        sentences
            .iter()
            .map(|s| encode(s, &self.meta.words, &self.meta.tags))
            .collect()
    }

    pub fn batch(&self, sentences: &[&EncodedSentence]) -> Result<Batch> {
        let owned: Vec<EncodedSentence> = sentences.iter().map(|&s| s.clone()).collect();
        Ok(Batch::from_sentences(&owned, self.pads(), &self.device)?)
    }

    /// Training loss of one batch.
    pub fn loss(
        &self,
        batch: &Batch,
        policy: &TrainingPolicy,
        mode: Mode,
        rng: &mut Rand32,
    ) -> Result<Tensor> {
        let h = self.encoder.forward(batch, mode)?;
        let log_probs = self.decoder.forward(&h, batch, policy, mode, rng)?;
        Ok(self.decoder.loss(&log_probs, batch)?)
    }

    /// Predicted tag ids for one batch.
    pub fn predict(&self, batch: &Batch, policy: InferencePolicy) -> Result<Vec<Vec<u32>>> {
        let h = self.encoder.forward(batch, Mode::Eval)?;
        Ok(self.decoder.decode(&h, batch, policy)?)
    }

    /// Re-zero every pad row. Call after each optimiser step.
    pub fn clamp_pad_rows(&self) -> Result<()> {
        self.encoder.clamp_pad_rows()?;
        self.decoder.clamp_pad_row()?;
        Ok(())
    }
}
