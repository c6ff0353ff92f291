//! Speech-to-text backends behind the [`AcousticModel`] trait.

pub mod model;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use model::{AcousticModel, DecodeParams, DecodedToken, Sampling, TokenId};
#[cfg(feature = "whisper")]
pub use whisper::WhisperModel;
