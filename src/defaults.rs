//! Default configuration constants for streamscribe.
//!
//! Shared across the CLI, the config file layer and the pipeline so the
//! documented defaults cannot drift apart.

/// Audio sample rate at the decoder boundary, in Hz.
///
/// 16 kHz mono is what both Whisper and Silero VAD expect; every ingest path
/// (microphone, WAV file, stdin PCM) is converted to this rate up front.
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per VAD inference window (≈32 ms at 16 kHz).
pub const VAD_FRAME_SAMPLES: usize = 512;

/// Default whisper model path.
pub const DEFAULT_MODEL: &str = "models/ggml-base.en.bin";

/// Default transcription language.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// VAD probability at or above which an utterance opens.
pub const START_THRESHOLD: f32 = 0.60;

/// VAD probability at or above which a frame still counts as voiced
/// inside an active utterance. Must not exceed the start threshold.
pub const STOP_THRESHOLD: f32 = 0.35;

/// Partial decode cadence in ms while an utterance is active.
pub const STEP_MS: i32 = 200;

/// Minimum utterance length before anything is emitted.
pub const MIN_SEGMENT_MS: u32 = 250;

/// Maximum utterance length before a forced flush.
pub const MAX_SEGMENT_MS: u32 = 12_000;

/// Silence required before an utterance may end naturally.
pub const MIN_SILENCE_MS: u32 = 150;

/// Audio retained before the start trigger.
pub const PRE_PADDING_MS: u32 = 200;

/// Trailing audio kept after the last voiced frame.
pub const POST_PADDING_MS: u32 = 350;

/// Capture ring buffer duration.
pub const RING_BUFFER_MS: u32 = 20_000;

/// Minimum ms between dictionary file reload attempts.
pub const DICTIONARY_POLL_MS: u32 = 1_000;

/// Additive logit boost for dictionary first tokens.
pub const BIAS_FIRST_LOGIT: f32 = 0.35;

/// Additive logit boost for dictionary continuation tokens.
pub const BIAS_CONTINUATION_LOGIT: f32 = 0.85;

/// Tokens reported per `logits` diagnostic packet.
pub const LOGITS_TOP_K: usize = 50;

/// Softmax denominator threshold for `logits` packets; <= 0 sums the
/// full vocabulary.
pub const LOGITS_PROB_THRESHOLD: f32 = 20.0;

/// Minimum ms between flushes of the logits JSONL file.
pub const LOGITS_FLUSH_MS: u32 = 250;

/// Maximum boosted tokens listed per `logits` packet.
pub const LOGITS_BOOSTED_K: usize = 24;

/// Default logits JSONL path when file logging is enabled without an
/// explicit path.
pub const LOGITS_LOG_PATH: &str = ".voice/whisper_logits.jsonl";

/// Whisper initial prompt is truncated to this many bytes.
pub const PROMPT_MAX_BYTES: usize = 4096;

/// Report the GPU backend compiled into this build.
///
/// Only one GPU backend can be active at a time; if none is enabled,
/// returns "CPU".
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else if cfg!(feature = "hipblas") {
        "HipBLAS (AMD)"
    } else if cfg!(feature = "openblas") {
        "OpenBLAS"
    } else {
        "CPU"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_threshold_below_start() {
        assert!(STOP_THRESHOLD <= START_THRESHOLD);
    }

    #[test]
    fn vad_frame_is_32ms() {
        assert_eq!(VAD_FRAME_SAMPLES * 1000 / SAMPLE_RATE as usize, 32);
    }

    #[test]
    fn gpu_backend_matches_compiled_feature() {
        let expected = if cfg!(feature = "cuda") {
            "CUDA"
        } else if cfg!(feature = "vulkan") {
            "Vulkan"
        } else if cfg!(feature = "hipblas") {
            "HipBLAS (AMD)"
        } else if cfg!(feature = "openblas") {
            "OpenBLAS"
        } else {
            "CPU"
        };
        assert_eq!(gpu_backend(), expected);
    }
}
