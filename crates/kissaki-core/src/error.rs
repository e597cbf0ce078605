use thiserror::Error;

/// Errors that can occur while encoding, decoding or scoring tag sequences.
#[derive(Debug, Error)]
pub enum KissakiError {
    /// A training policy identifier did not match `TF`, `SS` or `DS`.
    #[error("unknown training policy: {0:?}")]
    UnknownTrainingPolicy(String),

    /// An inference policy identifier did not match `greedy` or `beam`.
    #[error("unknown inference policy: {0:?}")]
    UnknownInferencePolicy(String),

    /// Two tensors that must agree on a dimension do not.
    #[error("shape mismatch on {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Which dimension disagreed, e.g. `"gold tags batch"`.
        what: &'static str,
        /// The size implied by the context matrix.
        expected: usize,
        /// The size actually supplied.
        actual: usize,
    },

    /// Beam width is zero or larger than the tag vocabulary.
    #[error("invalid beam size {beam_size} for a vocabulary of {tag_size} tags")]
    InvalidBeamSize {
        /// Requested beam width.
        beam_size: usize,
        /// Number of tags in the vocabulary.
        tag_size: usize,
    },

    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Gold tags are required by the training forward pass.
    #[error("gold tags are required for training")]
    MissingGoldTags,

    /// A tag string is not part of the vocabulary.
    #[error("unknown tag: {0:?}")]
    UnknownTag(String),

    /// Gold and predicted sequences cannot be compared.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Reading or writing a vocabulary or metadata file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Candle ML framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for Kissaki operations.
pub type Result<T> = std::result::Result<T, KissakiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = KissakiError::UnknownTrainingPolicy("RL".into());
        assert_eq!(err.to_string(), "unknown training policy: \"RL\"");

        let err = KissakiError::ShapeMismatch {
            what: "word mask length",
            expected: 3,
            actual: 4,
        };
        assert!(err.to_string().contains("word mask length"));
        assert!(err.to_string().contains("expected 3, got 4"));

        let err = KissakiError::InvalidBeamSize {
            beam_size: 0,
            tag_size: 5,
        };
        assert!(err.to_string().contains("beam size 0"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KissakiError>();
    }
}
