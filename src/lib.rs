//! streamscribe - low-latency streaming speech-to-text.
//!
//! Segments a 16 kHz mono stream into utterances with a neural VAD and
//! decodes them with a Whisper-family model, emitting newline-delimited
//! JSON events with live partial hypotheses and dictionary-biased decoding.

pub mod audio;
pub mod bias;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod dictionary;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod stt;
pub mod vad;
