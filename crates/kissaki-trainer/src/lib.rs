//! # Kissaki Trainer
//!
//! Data loading, the full encoder-decoder tagger, and the training loop with
//! validation, checkpointing and prediction writing.

pub mod data;
pub mod model;
pub mod trainer;

pub use data::{load_raw, load_sentences, load_tagged, Sentence, WordVocab};
pub use model::{Tagger, TaggerMeta};
pub use trainer::{
    predict, run_training, write_prediction_file, TrainSummary, Trainer, TrainerConfig,
};
