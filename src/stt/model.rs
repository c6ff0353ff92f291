//! The acoustic model contract.
//!
//! The pipeline never talks to an inference engine directly; it goes through
//! [`AcousticModel`] so the decode scheduler, dictionary tokenization and
//! bias callback can all be exercised against deterministic stubs.

use crate::error::Result;

/// Vocabulary token id.
pub type TokenId = i32;

/// Sampling strategy for a single decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    Greedy,
    /// Beam search with an explicit beam size (already clamped by the
    /// orchestrator).
    BeamSearch { beam_size: i32 },
}

/// Per-decode configuration handed to the backend.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    pub sampling: Sampling,
    /// Language code, or "auto" for detection.
    pub language: String,
    pub n_threads: i32,
    /// Dictionary text attached as the initial prompt, if any.
    pub initial_prompt: Option<String>,
}

/// One output token with timestamps in 10 ms units (or -1 when the model
/// produced none).
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    pub id: TokenId,
    pub text: String,
    pub t0: i64,
    pub t1: i64,
}

/// Callback invoked at every decode step of every beam with the current
/// token prefix and the mutable logits row.
pub type LogitsFilter<'a> = dyn FnMut(&[TokenId], &mut [f32]) + 'a;

/// Opaque speech recognizer.
///
/// Implementations load once and are reused across decodes; a decode call
/// blocks until a hypothesis is produced.
pub trait AcousticModel {
    /// Tokenize text with the model's tokenizer.
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Piece string for a token id, if the id is valid.
    fn token_text(&self, id: TokenId) -> Option<String>;

    /// Vocabulary size.
    fn n_vocab(&self) -> usize;

    /// First timestamp/control token id; logits at or above this id must
    /// never be biased.
    fn token_beg(&self) -> TokenId;

    /// Whether the backend knows the given language code.
    fn is_known_language(&self, name: &str) -> bool;

    /// Run a full decode over `audio` (f32 mono 16 kHz), invoking `filter`
    /// at each decode step when provided, and return the output tokens in
    /// order.
    fn decode(
        &self,
        audio: &[f32],
        params: &DecodeParams,
        filter: Option<&mut LogitsFilter<'_>>,
    ) -> Result<Vec<DecodedToken>>;
}

/// Whether a token piece is a control piece (timestamp or special marker)
/// rather than text. Control pieces start with `<|` or `[_` after any
/// leading whitespace.
pub fn is_control_piece(piece: &str) -> bool {
    let trimmed = piece.trim_start();
    trimmed.starts_with("<|") || trimmed.starts_with("[_")
}
