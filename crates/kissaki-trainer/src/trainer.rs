//! Training loop for the tagger.
//!
//! One [`TrainerConfig`] drives a run: it names the data files, the training
//! policy, every hyper-parameter and the seed. Each epoch recomputes the
//! scheduled-sampling probability, shuffles the training batches, and steps
//! AdamW with global-norm clipping. Validation picks the best checkpoint and
//! triggers early stopping.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use candle_core::{backprop::GradStore, Device, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use kissaki_core::{
    evaluate, sampling_probability, DecoderConfig, EncodedSentence, EncoderConfig, EvalReport,
    InferencePolicy, LossNormalization, Mode, TagVocab, TrainingPolicy, TrainingPolicyKind,
};
use oorandom::Rand32;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::data::{
    batch_indices, load_sentences, load_tagged, load_word_vectors, tag_vocab, Sentence, WordVocab,
};
use crate::model::{Tagger, TaggerMeta};

/// Hyper-parameters and file locations for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub train_path: PathBuf,
    pub dev_path: Option<PathBuf>,
    pub test_path: Option<PathBuf>,
    /// Pretrained `word v1 v2 ...` vectors of width `word_emb_dim`.
    pub word_vectors: Option<PathBuf>,
    /// Tag dictionary, one tag per line. Without it the tags are collected
    /// from the train and dev sets.
    pub tag_vocab: Option<PathBuf>,

    /// `TF`, `SS` or `DS`; also names the checkpoint files.
    pub policy: TrainingPolicyKind,
    /// `greedy`, `beam` or `beam:N`.
    pub inference: String,

    pub word_emb_dim: usize,
    pub cap_emb_dim: usize,
    pub encoder_units: usize,
    pub decoder_units: usize,
    pub tag_emb_dim: usize,
    pub dropout: f32,
    pub min_word_count: usize,
    pub lowercase: bool,

    pub learning_rate: f64,
    pub max_gradient_norm: f64,
    pub max_epochs: usize,
    /// Training stops once this many epochs have passed since the best one.
    pub early_stopping: usize,
    pub batch_size: usize,
    pub seed: u64,
    /// Decay constant of the inverse-sigmoid sampling schedule.
    pub sampling_decay: f64,
    pub sampling_bias: f64,
    pub beam_size: usize,
    pub loss_normalization: LossNormalization,
    /// Log the running loss every this many batches.
    pub log_every: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            train_path: PathBuf::from("data/train.txt"),
            dev_path: None,
            test_path: None,
            word_vectors: None,
            tag_vocab: None,
            policy: TrainingPolicyKind::DifferentiableSampling,
            inference: "greedy".to_string(),
            word_emb_dim: 100,
            cap_emb_dim: 16,
            encoder_units: 256,
            decoder_units: 256,
            tag_emb_dim: 32,
            dropout: 0.5,
            min_word_count: 1,
            lowercase: true,
            learning_rate: 5e-4,
            max_gradient_norm: 5.0,
            max_epochs: 128,
            early_stopping: 10,
            batch_size: 32,
            seed: 125,
            sampling_decay: 35.0,
            sampling_bias: 100.0,
            beam_size: 10,
            loss_normalization: LossNormalization::SentenceLength,
            log_every: 100,
        }
    }
}

impl TrainerConfig {
    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let config: Self = serde_json::from_reader(file)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if self.learning_rate <= 0.0 {
            bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        if self.max_gradient_norm <= 0.0 {
            bail!("max_gradient_norm must be positive, got {}", self.max_gradient_norm);
        }
        if self.sampling_decay <= 0.0 {
            bail!("sampling_decay must be positive, got {}", self.sampling_decay);
        }
        InferencePolicy::parse(&self.inference, self.beam_size)?;
        Ok(())
    }

    /// Probability of feeding the gold tag in `epoch`. Sampling policies
    /// decay towards generated tags.
    pub fn sampling_p(&self, epoch: usize) -> f64 {
        if self.policy.samples() {
            sampling_probability(epoch, self.sampling_decay)
        } else {
            1.0
        }
    }

    fn build_tag_vocab(&self, train: &[Sentence], dev: Option<&[Sentence]>) -> Result<TagVocab> {
        match &self.tag_vocab {
            Some(path) => {
                let tags = TagVocab::load(path)
                    .with_context(|| format!("loading tags from {}", path.display()))?;
                info!(path = %path.display(), tags = tags.len(), "loaded tag vocabulary");
                Ok(tags)
            }
            None => {
                let mut all = train.to_vec();
                all.extend_from_slice(dev.unwrap_or_default());
                Ok(tag_vocab(&all))
            }
        }
    }

    fn encoder_config(&self, words: &WordVocab) -> EncoderConfig {
        EncoderConfig {
            word_vocab_size: words.len(),
            word_emb_dim: self.word_emb_dim,
            cap_emb_dim: self.cap_emb_dim,
            units: self.encoder_units,
            word_pad_id: words.pad_id(),
            dropout: self.dropout,
        }
    }

    fn decoder_config(&self, context_dim: usize, tag_size: usize, pad: u32) -> DecoderConfig {
        DecoderConfig::new(context_dim, tag_size, pad)
            .with_hidden_dim(self.decoder_units)
            .with_tag_emb_dim(self.tag_emb_dim)
            .with_dropout(self.dropout)
            .with_sampling_bias(self.sampling_bias)
            .with_beam_size(self.beam_size)
            .with_loss_normalization(self.loss_normalization)
    }
}

/// Outcome of [`Trainer::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    pub epochs: usize,
    /// Best validation score, if a dev set was given.
    pub best_score: Option<f64>,
    pub best_epoch: usize,
    pub final_loss: f32,
}

pub struct Trainer {
    config: TrainerConfig,
    tagger: Tagger,
    optimizer: AdamW,
    vars: Vec<Var>,
    rng: Rand32,
    train: Vec<EncodedSentence>,
    dev: Option<(Vec<Sentence>, Vec<EncodedSentence>)>,
}

impl Trainer {
    /// Load the data named by `config` and build a fresh model.
    pub fn new(config: TrainerConfig, device: &Device) -> Result<Self> {
        let train_sentences = load_tagged(&config.train_path)?;
        if train_sentences.is_empty() {
            bail!("no sentences in {}", config.train_path.display());
        }
        let dev_sentences = config.dev_path.as_ref().map(load_tagged).transpose()?;
        Self::from_sentences(config, train_sentences, dev_sentences, device)
    }

    /// Build a trainer over already loaded sentences.
    pub fn from_sentences(
        config: TrainerConfig,
        train: Vec<Sentence>,
        dev: Option<Vec<Sentence>>,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        let mut rng = Rand32::new(config.seed);
        let tags = config.build_tag_vocab(&train, dev.as_deref())?;
        let words = WordVocab::build(&train, config.min_word_count, config.lowercase);
        info!(
            tags = tags.len(),
            words = words.len(),
            bio = tags.is_bio(),
            "built vocabularies"
        );

        let encoder = config.encoder_config(&words);
        let decoder = config.decoder_config(encoder.context_dim(), tags.len(), tags.pad_id());
        let meta = TaggerMeta {
            variant: config.policy,
            encoder,
            decoder,
            tags,
            words,
        };
        let tagger = Tagger::new(meta, device)?;
        if let Some(path) = &config.word_vectors {
            let vectors = load_word_vectors(
                path,
                &tagger.meta().words,
                config.word_emb_dim,
                &mut rng,
                device,
            )?;
            tagger.load_word_vectors(&vectors)?;
        }

        let vars = tagger.varmap().all_vars();
        let optimizer = AdamW::new(
            vars.clone(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let train = tagger.encode(&train)?;
        let dev = match dev {
            Some(sentences) => {
                let encoded = tagger.encode(&sentences)?;
                Some((sentences, encoded))
            }
            None => None,
        };
        Ok(Self {
            config,
            tagger,
            optimizer,
            vars,
            rng,
            train,
            dev,
        })
    }

    pub fn tagger(&self) -> &Tagger {
        &self.tagger
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn dev_sentences(&self) -> Option<&[Sentence]> {
        self.dev.as_ref().map(|(sentences, _)| sentences.as_slice())
    }

    /// Policy for `epoch`, using the sampling bias stored with the model.
    pub fn training_policy(&self, epoch: usize) -> TrainingPolicy {
        self.tagger.training_policy(self.config.sampling_p(epoch))
    }

    /// One optimiser step on the sentences at `indices`. Returns the loss.
    pub fn train_step(&mut self, indices: &[usize], policy: &TrainingPolicy) -> Result<f32> {
        let sentences: Vec<&EncodedSentence> = indices.iter().map(|&i| &self.train[i]).collect();
        let batch = self.tagger.batch(&sentences)?;
        let loss = self.tagger.loss(&batch, policy, Mode::Train, &mut self.rng)?;
        let mut grads = loss.backward()?;
        let norm = clip_grad_norm(&mut grads, &self.vars, self.config.max_gradient_norm)?;
        debug!(grad_norm = norm, "gradient");
        self.optimizer.step(&grads)?;
        self.tagger.clamp_pad_rows()?;
        Ok(loss.to_scalar::<f32>()?)
    }

    /// Run one epoch and return its mean loss.
    pub fn train_epoch(&mut self, epoch: usize) -> Result<f32> {
        let policy = self.training_policy(epoch);
        info!(epoch = epoch + 1, ?policy, "epoch start");

        let batches = batch_indices(self.train.len(), self.config.batch_size, Some(&mut self.rng));
        let mut total = 0.0f32;
        for (step, indices) in batches.iter().enumerate() {
            total += self.train_step(indices, &policy)?;
            if (step + 1) % self.config.log_every.max(1) == 0 {
                info!(
                    epoch = epoch + 1,
                    step = step + 1,
                    batches = batches.len(),
                    loss = total / (step + 1) as f32,
                    "running loss"
                );
            }
        }
        let mean = total / batches.len().max(1) as f32;
        info!(epoch = epoch + 1, loss = mean, "epoch done");
        Ok(mean)
    }

    /// Train until `max_epochs` or early stopping, saving the best model into
    /// `out_dir`. Without a dev set the model is saved after every epoch.
    pub fn fit(&mut self, out_dir: &Path) -> Result<TrainSummary> {
        let mut best: Option<f64> = None;
        let mut best_epoch = 0;
        let mut stale = 0;
        let mut epochs = 0;
        let mut final_loss = f32::NAN;

        for epoch in 0..self.config.max_epochs {
            final_loss = self.train_epoch(epoch)?;
            epochs = epoch + 1;

            let Some(report) = self.validate()? else {
                self.tagger.save(out_dir)?;
                continue;
            };
            let score = report.primary();
            info!(epoch = epochs, %report, "validation");
            if best.is_none_or(|b| score > b) {
                best = Some(score);
                best_epoch = epochs;
                stale = 0;
                self.tagger.save(out_dir)?;
            } else {
                stale += 1;
                if stale > self.config.early_stopping {
                    info!(epoch = epochs, best_epoch, "early stopping");
                    break;
                }
            }
        }

        if best.is_none() && self.dev.is_some() {
            warn!("no validation epochs were run");
        }
        Ok(TrainSummary {
            epochs,
            best_score: best,
            best_epoch,
            final_loss,
        })
    }

    /// Score the dev set, if any.
    pub fn validate(&self) -> Result<Option<EvalReport>> {
        let Some((sentences, encoded)) = &self.dev else {
            return Ok(None);
        };
        let policy = self.tagger.inference_policy(&self.config.inference)?;
        let predicted = predict_ids(&self.tagger, encoded, self.config.batch_size, policy)?;
        let gold: Vec<Vec<u32>> = encoded
            .iter()
            .map(|s| s.tags.clone().unwrap_or_default())
            .collect();
        debug!(sentences = sentences.len(), "validated");
        Ok(Some(evaluate(&self.tagger.meta().tags, &gold, &predicted)?))
    }
}

/// Scale every gradient so that their joint L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let mut total_sq = 0.0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total_sq += f64::from(grad.sqr()?.sum_all()?.to_scalar::<f32>()?);
        }
    }
    let total = total_sq.sqrt();
    if total > max_norm {
        let scale = max_norm / total;
        for var in vars {
            if let Some(grad) = grads.get(var.as_tensor()) {
                let clipped = grad.affine(scale, 0.0)?;
                grads.insert(var.as_tensor(), clipped);
            }
        }
    }
    Ok(total)
}

/// Predict tag ids for `sentences`, `batch_size` at a time.
pub fn predict_ids(
    tagger: &Tagger,
    sentences: &[EncodedSentence],
    batch_size: usize,
    policy: InferencePolicy,
) -> Result<Vec<Vec<u32>>> {
    let mut out = Vec::with_capacity(sentences.len());
    for indices in batch_indices(sentences.len(), batch_size, None) {
        let chunk: Vec<&EncodedSentence> = indices.iter().map(|&i| &sentences[i]).collect();
        // Empty sentences cannot be batched on their own.
        if chunk.iter().all(|s| s.is_empty()) {
            out.extend(chunk.iter().map(|_| Vec::new()));
            continue;
        }
        let batch = tagger.batch(&chunk)?;
        out.extend(tagger.predict(&batch, policy)?);
    }
    Ok(out)
}

/// Predict tag strings for raw or tagged sentences.
pub fn predict(
    tagger: &Tagger,
    sentences: &[Sentence],
    batch_size: usize,
    policy: InferencePolicy,
) -> Result<Vec<Vec<String>>> {
    let unlabelled: Vec<Sentence> = sentences
        .iter()
        .map(|s| Sentence {
            words: s.words.clone(),
            tags: None,
        })
        .collect();
    let encoded = tagger.encode(&unlabelled)?;
    let ids = predict_ids(tagger, &encoded, batch_size, policy)?;
    let tags = &tagger.meta().tags;
    Ok(ids
        .iter()
        .map(|path| tags.decode(path).into_iter().map(str::to_string).collect())
        .collect())
}

/// Write `word<TAB>gold<TAB>pred` lines (or `word<TAB>pred` for raw input),
/// with a blank line after each sentence.
pub fn write_predictions<W: Write>(
    mut out: W,
    sentences: &[Sentence],
    predicted: &[Vec<String>],
) -> Result<()> {
    if sentences.len() != predicted.len() {
        bail!(
            "{} sentences but {} predictions",
            sentences.len(),
            predicted.len()
        );
    }
    for (sentence, tags) in sentences.iter().zip(predicted) {
        for (i, (word, pred)) in sentence.words.iter().zip(tags).enumerate() {
            match sentence.tags.as_ref().and_then(|gold| gold.get(i)) {
                Some(gold) => writeln!(out, "{word}\t{gold}\t{pred}")?,
                None => writeln!(out, "{word}\t{pred}")?,
            }
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

/// Predict `sentences` and write them to `path`.
pub fn write_prediction_file(
    tagger: &Tagger,
    sentences: &[Sentence],
    path: &Path,
    batch_size: usize,
    policy: InferencePolicy,
) -> Result<()> {
    let predicted = predict(tagger, sentences, batch_size, policy)?;
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_predictions(BufWriter::new(file), sentences, &predicted)?;
    info!(path = %path.display(), sentences = sentences.len(), "wrote predictions");
    Ok(())
}

/// Train, then write dev and test predictions next to the model.
/// The test file may be tagged or raw; it is read before training starts.
pub fn run_training(config: TrainerConfig, out_dir: &Path) -> Result<TrainSummary> {
    let device = Device::Cpu;
    let test = config.test_path.as_ref().map(load_sentences).transpose()?;
    let mut trainer = Trainer::new(config, &device)?;
    let summary = trainer.fit(out_dir)?;
    info!(?summary, "training finished");

    let config = trainer.config().clone();
    let tagger = Tagger::load(out_dir, config.policy, &device)?;
    let policy = tagger.inference_policy(&config.inference)?;
    let dev = trainer.dev_sentences().map(<[Sentence]>::to_vec);
    for (name, sentences) in [("dev", dev), ("test", test)] {
        if let Some(sentences) = sentences {
            let output = out_dir.join(format!("{}.{name}.pred", config.policy));
            write_prediction_file(&tagger, &sentences, &output, config.batch_size, policy)?;
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_tagged;
    use std::io::Cursor;

    const DATA: &str = "John\tB-PER\nSmith\tI-PER\nlives\tO\nhere\tO\n\n\
                        Mary\tB-PER\nsleeps\tO\n\n\
                        Paris\tB-LOC\nis\tO\nbig\tO\n";

    fn tiny_config() -> TrainerConfig {
        TrainerConfig {
            word_emb_dim: 4,
            cap_emb_dim: 2,
            encoder_units: 4,
            decoder_units: 4,
            tag_emb_dim: 3,
            dropout: 0.0,
            learning_rate: 1e-2,
            max_epochs: 3,
            early_stopping: 2,
            batch_size: 2,
            beam_size: 2,
            ..TrainerConfig::default()
        }
    }

    fn sentences() -> Vec<Sentence> {
        parse_tagged(Cursor::new(DATA)).unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("kissaki-{name}-{}", std::process::id()))
    }

    #[test]
    fn test_default_config_matches_reference_hyperparameters() {
        let config = TrainerConfig::default();
        assert_eq!(config.decoder_units, 256);
        assert_eq!(config.tag_emb_dim, 32);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.seed, 125);
        assert!((config.learning_rate - 5e-4).abs() < 1e-12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: TrainerConfig =
            serde_json::from_str(r#"{"policy": "SS", "inference": "beam", "beam_size": 3}"#)
                .unwrap();
        assert_eq!(config.policy, TrainingPolicyKind::ScheduledSampling);
        assert_eq!(config.inference, "beam");
        assert_eq!(config.beam_size, 3);
        assert!(config.validate().is_ok());
        assert_eq!(config.max_epochs, 128);

        let bad = TrainerConfig {
            inference: "sample".into(),
            ..TrainerConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(serde_json::from_str::<TrainerConfig>(r#"{"policy": "AC"}"#).is_err());
    }

    #[test]
    fn test_policy_schedule() {
        let tf = TrainerConfig {
            policy: TrainingPolicyKind::TeacherForced,
            ..TrainerConfig::default()
        };
        assert_eq!(tf.sampling_p(50), 1.0);

        let ss = TrainerConfig {
            policy: TrainingPolicyKind::ScheduledSampling,
            ..tiny_config()
        };
        assert!((ss.sampling_p(0) - 35.0 / 36.0).abs() < 1e-12);
        let trainer = Trainer::from_sentences(ss, sentences(), None, &Device::Cpu).unwrap();
        match trainer.training_policy(0) {
            TrainingPolicy::ScheduledSampling { sampling_p } => {
                assert!((sampling_p - 35.0 / 36.0).abs() < 1e-12)
            }
            other => panic!("unexpected policy {other:?}"),
        }

        let ds = TrainerConfig {
            sampling_bias: 3.0,
            ..tiny_config()
        };
        let trainer = Trainer::from_sentences(ds, sentences(), None, &Device::Cpu).unwrap();
        assert!(matches!(
            trainer.training_policy(0),
            TrainingPolicy::DifferentiableSampling { bias, .. } if bias == 3.0
        ));
    }

    #[test]
    fn test_dev_only_tags_enter_the_vocabulary() {
        let train = parse_tagged(Cursor::new("John\tB-PER\nruns\tO\n")).unwrap();
        let dev = parse_tagged(Cursor::new("Acme\tB-ORG\nfell\tO\n")).unwrap();
        let trainer =
            Trainer::from_sentences(tiny_config(), train, Some(dev), &Device::Cpu).unwrap();
        let tags = &trainer.tagger().meta().tags;
        assert!(tags.id("B-ORG").is_ok());
        assert_eq!(tags.len(), 4);
        assert!(trainer.validate().unwrap().is_some());
    }

    #[test]
    fn test_tag_dictionary_file() {
        let dir = temp_dir("tags");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tags.txt");
        std::fs::write(&path, "O\nB-PER\nI-PER\nB-LOC\nB-MISC\n").unwrap();
        let config = TrainerConfig {
            tag_vocab: Some(path),
            ..tiny_config()
        };
        let trainer = Trainer::from_sentences(config, sentences(), None, &Device::Cpu).unwrap();
        let tags = &trainer.tagger().meta().tags;
        assert_eq!(tags.id("O").unwrap(), 0);
        assert_eq!(tags.id("B-MISC").unwrap(), 4);
        assert_eq!(tags.pad_id(), 5);

        let missing = TrainerConfig {
            tag_vocab: Some(dir.join("missing.txt")),
            ..tiny_config()
        };
        assert!(Trainer::from_sentences(missing, sentences(), None, &Device::Cpu).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_early_stopping_allows_patience_stale_epochs() {
        // A vanishing learning rate keeps the dev score flat after epoch 1.
        let config = TrainerConfig {
            learning_rate: 1e-12,
            max_epochs: 10,
            early_stopping: 1,
            ..tiny_config()
        };
        let dir = temp_dir("patience");
        let mut trainer =
            Trainer::from_sentences(config, sentences(), Some(sentences()), &Device::Cpu).unwrap();
        let summary = trainer.fit(&dir).unwrap();
        assert_eq!(summary.best_epoch, 1);
        assert_eq!(summary.epochs, 3);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_clip_grad_norm() {
        let varmap = candle_nn::VarMap::new();
        let vb = candle_nn::VarBuilder::from_varmap(&varmap, candle_core::DType::F32, &Device::Cpu);
        let w = vb
            .get_with_hints(2, "w", candle_nn::Init::Const(1.0))
            .unwrap();
        // d/dw sum(3w) = 3 per element, norm 3 * sqrt(2).
        let loss = (w * 3.0).unwrap().sum_all().unwrap();
        let mut grads = loss.backward().unwrap();
        let vars = varmap.all_vars();
        let norm = clip_grad_norm(&mut grads, &vars, 1.0).unwrap();
        assert!((norm - 3.0 * 2f64.sqrt()).abs() < 1e-5);

        let clipped = grads.get(vars[0].as_tensor()).unwrap();
        let sq: f32 = clipped.sqr().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert!((sq.sqrt() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_training_reduces_loss() {
        let config = TrainerConfig {
            policy: TrainingPolicyKind::TeacherForced,
            ..tiny_config()
        };
        let mut trainer =
            Trainer::from_sentences(config, sentences(), None, &Device::Cpu).unwrap();
        let all: Vec<usize> = (0..3).collect();
        let policy = TrainingPolicy::TeacherForced;
        let first = trainer.train_step(&all, &policy).unwrap();
        let mut last = first;
        for _ in 0..20 {
            last = trainer.train_step(&all, &policy).unwrap();
        }
        assert!(last < first, "{last} !< {first}");
    }

    #[test]
    fn test_fit_saves_checkpoint_and_predictions() {
        let dir = temp_dir("fit");
        let mut trainer = Trainer::from_sentences(
            tiny_config(),
            sentences(),
            Some(sentences()),
            &Device::Cpu,
        )
        .unwrap();
        let summary = trainer.fit(&dir).unwrap();
        assert!(summary.epochs >= 1 && summary.epochs <= 3);
        assert!(summary.best_score.is_some());
        assert!(summary.final_loss.is_finite());
        assert!(dir.join("DS.safetensors").exists());

        let tagger = Tagger::load(&dir, TrainingPolicyKind::DifferentiableSampling, &Device::Cpu)
            .unwrap();
        let raw = vec![Sentence {
            words: vec!["Mary".into(), "lives".into(), "in".into(), "Paris".into()],
            tags: None,
        }];
        let predicted = predict(&tagger, &raw, 2, InferencePolicy::Beam { width: 2 }).unwrap();
        assert_eq!(predicted[0].len(), 4);

        let mut out = Vec::new();
        write_predictions(&mut out, &raw, &predicted).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 5);
        assert!(text.starts_with("Mary\t"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_run_training_reads_raw_test_file() {
        let dir = temp_dir("run");
        std::fs::create_dir_all(&dir).unwrap();
        let train = dir.join("train.txt");
        let test = dir.join("test.txt");
        std::fs::write(&train, DATA).unwrap();
        std::fs::write(&test, "Mary\nlives\nhere\n").unwrap();
        let config = TrainerConfig {
            train_path: train,
            test_path: Some(test),
            max_epochs: 1,
            ..tiny_config()
        };
        let out = dir.join("model");
        run_training(config, &out).unwrap();
        let text = std::fs::read_to_string(out.join("DS.test.pred")).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.lines().next().unwrap().starts_with("Mary\t"));
        assert_eq!(text.lines().next().unwrap().split('\t').count(), 2);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_predictions_with_gold() {
        let sentences = vec![Sentence {
            words: vec!["John".into()],
            tags: Some(vec!["B-PER".into()]),
        }];
        let mut out = Vec::new();
        write_predictions(&mut out, &sentences, &[vec!["O".to_string()]]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "John\tB-PER\tO\n\n");
        assert!(write_predictions(Vec::new(), &sentences, &[]).is_err());
    }
}
