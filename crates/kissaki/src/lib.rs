//! # Kissaki
//!
//! Autoregressive sequence tagging. Re-exports the decoder, encoder and
//! evaluation API from [`kissaki_core`] and the training workflow from
//! [`kissaki_trainer`].

pub use kissaki_core::*;

pub mod trainer {
    pub use kissaki_trainer::*;
}
