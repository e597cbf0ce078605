//! # Kissaki Core
//!
//! Sequence tagging with an autoregressive tag decoder. A sentence encoder
//! turns words into a context matrix `H`; the decoder predicts one tag per
//! word, conditioning every step on the tag chosen for the previous word.
//!
//! The decoder trains under teacher forcing, scheduled sampling or
//! differentiable scheduled sampling, and infers with greedy or beam search.
//!
//! ## Quick Start
//!
//! ```rust
//! use kissaki_core::tags::{chunks, TagVocab};
//!
//! let vocab = TagVocab::from_tags(["O", "B-PER", "I-PER"]);
//! assert_eq!(vocab.len(), 4);
//! assert_eq!(vocab.pad_id(), 3);
//!
//! let tags = vocab.decode(&[1, 2, 0]);
//! let spans = chunks(&tags);
//! assert_eq!(spans.len(), 1);
//! assert_eq!((spans[0].start, spans[0].end), (0, 2));
//! ```
pub mod batch;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod eval;
pub mod layers;
pub mod tags;

// Re-export primary API
pub use batch::{Batch, EncodedSentence, PadIds};
pub use config::{DecoderConfig, EncoderConfig};
pub use decoder::{
    sampling_probability, BeamSearch, BeamSearchOutput, Decoder, InferencePolicy,
    LossNormalization, Mode, TrainingPolicy, TrainingPolicyKind,
};
pub use encoder::{capitalization, CapPattern, SentenceEncoder, CAP_PAD_ID, CAP_SIZE};
pub use error::{KissakiError, Result};
pub use eval::{chunk_f1, evaluate, token_accuracy, EvalReport};
pub use tags::{Chunk, TagVocab, PAD_TAG};
