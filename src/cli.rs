//! Command-line interface for streamscribe
//!
//! Provides argument parsing using clap derive macros. Raw flags are
//! normalized into [`Settings`] (clamps, defaults, config-file fallbacks)
//! before the pipeline sees them.

use crate::config::ConfigFile;
use crate::defaults;
use clap::Parser;
use std::path::PathBuf;

/// Low-latency streaming speech-to-text transcriber
#[derive(Parser, Debug, Default)]
#[command(
    name = "streamscribe",
    version,
    about = "Streaming speech-to-text with VAD segmentation and dictionary-biased decoding"
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Whisper model path
    #[arg(long, value_name = "FILE")]
    pub model: Option<PathBuf>,

    /// Language code, or "auto" to detect
    #[arg(long = "lang", value_name = "XX")]
    pub language: Option<String>,

    /// Decoder threads
    #[arg(long, value_name = "N")]
    pub threads: Option<i32>,

    /// Capture device id (see the startup device listing)
    #[arg(long, value_name = "N")]
    pub capture_id: Option<usize>,

    /// Run offline on a WAV file instead of mic capture
    #[arg(long, value_name = "PATH")]
    pub audio_file: Option<PathBuf>,

    /// Partial decode cadence in ms while active; -1 disables
    #[arg(long = "step", value_name = "N")]
    pub step_ms: Option<i32>,

    /// VAD speech start threshold
    #[arg(long, value_name = "F")]
    pub start_threshold: Option<f32>,

    /// VAD speech stop threshold
    #[arg(long, value_name = "F")]
    pub stop_threshold: Option<f32>,

    /// Minimum segment length before emit (ms)
    #[arg(long, value_name = "N")]
    pub min_segment_ms: Option<u32>,

    /// Maximum segment length before forced emit (ms)
    #[arg(long, value_name = "N")]
    pub max_segment_ms: Option<u32>,

    /// Silence required before considering segment end (ms)
    #[arg(long, value_name = "N")]
    pub min_silence_ms: Option<u32>,

    /// Audio padding before speech start (ms)
    #[arg(long, value_name = "N")]
    pub pre_padding_ms: Option<u32>,

    /// Audio padding after speech end (ms)
    #[arg(long, value_name = "N")]
    pub post_padding_ms: Option<u32>,

    /// Captured ring buffer size (ms)
    #[arg(long, value_name = "N")]
    pub ring_buffer_ms: Option<u32>,

    /// Silero VAD model path (required)
    #[arg(long = "silero-vad", value_name = "PATH")]
    pub silero_vad: Option<PathBuf>,

    /// Dictionary file (words/phrases) used for prompt + biasing
    #[arg(long, value_name = "PATH")]
    pub dictionary_file: Option<PathBuf>,

    /// Minimum ms between dictionary file reloads
    #[arg(long, value_name = "N")]
    pub dictionary_poll_ms: Option<u32>,

    /// Do not pass the dictionary as the whisper initial prompt
    #[arg(long)]
    pub no_send_prompt: bool,

    /// Bias decoding towards dictionary tokens via the logits filter.
    /// Greedy decoding never invokes the filter, so without this flag no
    /// `logits` packets are produced even when logging is enabled.
    #[arg(long)]
    pub bias_decoding: bool,

    /// Additive logit boost for dictionary first tokens
    #[arg(long, value_name = "F")]
    pub bias_first_logit: Option<f32>,

    /// Additive logit boost for dictionary continuation tokens
    #[arg(long, value_name = "F")]
    pub bias_continuation_logit: Option<f32>,

    /// Beam size for beam search (>=2, capped at 8; 0 uses the default)
    #[arg(long, value_name = "N")]
    pub beam_size: Option<i32>,

    /// Number of tokens to emit per logits packet
    #[arg(long, value_name = "N")]
    pub logits_top_k: Option<i32>,

    /// Softmax denom over logits > (max - F); <= 0 for the full denom
    #[arg(long, value_name = "F")]
    pub logits_prob_threshold: Option<f32>,

    /// Include prefix_text in logits packets (slower)
    #[arg(long)]
    pub logits_prefix_text: bool,

    /// Minimum ms between flushing logits jsonl to disk
    #[arg(long, value_name = "N")]
    pub logits_flush_ms: Option<i32>,

    /// Max boosted tokens to include per logits packet
    #[arg(long, value_name = "N")]
    pub logits_boosted_k: Option<i32>,

    /// Where to append logits jsonl
    #[arg(long, value_name = "PATH")]
    pub logits_log_path: Option<PathBuf>,

    /// Enable verbose dictionary/logits logging (stdout + file)
    #[arg(long)]
    pub log: bool,

    /// Do not emit per-chunk VAD probability packets
    #[arg(long)]
    pub no_vad_events: bool,

    /// Disable GPU backends for whisper
    #[arg(long)]
    pub cpu_only: bool,

    /// Read WAV file paths from stdin (one per line), keep the model warm
    #[arg(long)]
    pub stdin_audio: bool,

    /// Read framed float32 PCM from stdin, keep the model warm
    #[arg(long)]
    pub stdin_pcm: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

/// Normalized runtime settings (flags merged with the config file, clamps
/// applied).
#[derive(Debug, Clone)]
pub struct Settings {
    pub model: PathBuf,
    pub language: String,
    pub n_threads: i32,
    pub capture_id: Option<usize>,
    pub audio_file: Option<PathBuf>,
    /// -1 disables partials.
    pub step_ms: i32,
    pub start_threshold: f32,
    pub stop_threshold: f32,
    pub min_segment_ms: u32,
    pub max_segment_ms: u32,
    pub min_silence_ms: u32,
    pub pre_padding_ms: u32,
    pub post_padding_ms: u32,
    pub ring_buffer_ms: u32,
    pub vad_model: Option<PathBuf>,
    pub dictionary_file: Option<PathBuf>,
    pub dictionary_poll_ms: u32,
    pub send_prompt: bool,
    pub bias_decoding: bool,
    pub bias_first_logit: f32,
    pub bias_continuation_logit: f32,
    pub beam_size: i32,
    pub logits_top_k: usize,
    pub logits_prob_threshold: f32,
    pub logits_prefix_text: bool,
    pub logits_flush_ms: u32,
    pub logits_boosted_k: usize,
    pub logits_log_path: Option<PathBuf>,
    pub log: bool,
    pub emit_vad_events: bool,
    pub use_gpu: bool,
    pub debug: bool,
    pub stdin_audio: bool,
    pub stdin_pcm: bool,
}

impl Settings {
    /// Merge CLI flags over config-file values over built-in defaults, and
    /// apply the documented clamps. Threshold inversion is repaired here
    /// (stop clamped down to start) with a stderr warning.
    pub fn resolve(cli: Cli, config: ConfigFile) -> Self {
        let step_ms = match cli.step_ms {
            Some(v) if v < 0 => -1,
            Some(v) => v.max(10),
            None => defaults::STEP_MS,
        };

        let start_threshold = cli
            .start_threshold
            .unwrap_or(defaults::START_THRESHOLD)
            .clamp(0.0, 1.0);
        let mut stop_threshold = cli
            .stop_threshold
            .unwrap_or(defaults::STOP_THRESHOLD)
            .clamp(0.0, 1.0);
        if stop_threshold > start_threshold {
            eprintln!(
                "streamscribe: warning: stop threshold higher than start threshold, clamping"
            );
            stop_threshold = start_threshold;
        }

        let n_threads = cli
            .threads
            .or(config.threads)
            .unwrap_or_else(default_threads)
            .max(1);

        Self {
            model: cli
                .model
                .or(config.model)
                .unwrap_or_else(|| PathBuf::from(defaults::DEFAULT_MODEL)),
            language: cli
                .language
                .or(config.language)
                .unwrap_or_else(|| defaults::DEFAULT_LANGUAGE.to_string()),
            n_threads,
            capture_id: cli.capture_id.or(config.capture_id),
            audio_file: cli.audio_file,
            step_ms,
            start_threshold,
            stop_threshold,
            min_segment_ms: cli.min_segment_ms.unwrap_or(defaults::MIN_SEGMENT_MS),
            max_segment_ms: cli
                .max_segment_ms
                .unwrap_or(defaults::MAX_SEGMENT_MS)
                .max(1000),
            min_silence_ms: cli.min_silence_ms.unwrap_or(defaults::MIN_SILENCE_MS),
            pre_padding_ms: cli.pre_padding_ms.unwrap_or(defaults::PRE_PADDING_MS),
            post_padding_ms: cli.post_padding_ms.unwrap_or(defaults::POST_PADDING_MS),
            ring_buffer_ms: cli
                .ring_buffer_ms
                .unwrap_or(defaults::RING_BUFFER_MS)
                .max(2000),
            vad_model: cli.silero_vad.or(config.silero_vad),
            dictionary_file: cli.dictionary_file.or(config.dictionary_file),
            dictionary_poll_ms: cli
                .dictionary_poll_ms
                .unwrap_or(defaults::DICTIONARY_POLL_MS)
                .max(10),
            send_prompt: !cli.no_send_prompt,
            bias_decoding: cli.bias_decoding,
            bias_first_logit: cli.bias_first_logit.unwrap_or(defaults::BIAS_FIRST_LOGIT),
            bias_continuation_logit: cli
                .bias_continuation_logit
                .unwrap_or(defaults::BIAS_CONTINUATION_LOGIT),
            beam_size: cli.beam_size.unwrap_or(0).max(0),
            logits_top_k: cli
                .logits_top_k
                .map(|v| v.max(1) as usize)
                .unwrap_or(defaults::LOGITS_TOP_K),
            logits_prob_threshold: cli
                .logits_prob_threshold
                .unwrap_or(defaults::LOGITS_PROB_THRESHOLD),
            logits_prefix_text: cli.logits_prefix_text,
            logits_flush_ms: cli
                .logits_flush_ms
                .map(|v| v.max(0) as u32)
                .unwrap_or(defaults::LOGITS_FLUSH_MS),
            logits_boosted_k: cli
                .logits_boosted_k
                .map(|v| v.max(0) as usize)
                .unwrap_or(defaults::LOGITS_BOOSTED_K),
            logits_log_path: cli.logits_log_path,
            log: cli.log,
            emit_vad_events: !cli.no_vad_events,
            use_gpu: !cli.cpu_only,
            debug: cli.debug,
            stdin_audio: cli.stdin_audio,
            stdin_pcm: cli.stdin_pcm,
        }
    }

    /// Effective ring capacity: always big enough to ride out a max-length
    /// segment plus its post padding while a decode blocks the consumer.
    pub fn effective_ring_ms(&self) -> u32 {
        self.ring_buffer_ms
            .max(self.max_segment_ms + self.post_padding_ms + 2000)
    }

    /// Live-capture fetch window.
    pub fn fetch_window_ms(&self) -> i32 {
        self.ring_buffer_ms
            .min(self.max_segment_ms + self.post_padding_ms + 2000) as i32
    }

    /// Verbose `logits` packets on stdout.
    pub fn stdout_logits_packets(&self) -> bool {
        self.log || self.debug
    }

    /// Mirror `dictionary` events into the logits log file.
    pub fn dictionary_to_file(&self) -> bool {
        self.log
    }

    /// Whether the logits log file should be opened at all.
    pub fn logits_file_enabled(&self) -> bool {
        self.log || self.logits_log_path.is_some()
    }

    /// `words[]` samples in `dictionary` events.
    pub fn verbose_dictionary_packets(&self) -> bool {
        self.log || self.debug
    }

    fn samples(&self, ms: u32) -> u64 {
        ms as u64 * defaults::SAMPLE_RATE as u64 / 1000
    }

    pub fn segmenter_config(&self) -> crate::pipeline::SegmenterConfig {
        crate::pipeline::SegmenterConfig {
            start_threshold: self.start_threshold,
            stop_threshold: self.stop_threshold,
            step_samples: if self.step_ms >= 0 {
                Some(self.samples(self.step_ms as u32).max(1))
            } else {
                None
            },
            min_segment_samples: self.samples(self.min_segment_ms) as usize,
            max_segment_samples: self.samples(self.max_segment_ms).max(defaults::SAMPLE_RATE as u64),
            min_silence_samples: self.samples(self.min_silence_ms),
            pre_padding_samples: self.samples(self.pre_padding_ms) as usize,
            post_padding_samples: self.samples(self.post_padding_ms),
            debug: self.debug,
        }
    }

    pub fn bias_config(&self) -> crate::bias::BiasConfig {
        crate::bias::BiasConfig {
            bias_first_logit: self.bias_first_logit,
            bias_continuation_logit: self.bias_continuation_logit,
            top_k: self.logits_top_k,
            prob_threshold: self.logits_prob_threshold,
            prefix_text: self.logits_prefix_text,
            boosted_k: self.logits_boosted_k,
        }
    }

    pub fn decode_options(&self) -> crate::pipeline::DecodeOptions {
        crate::pipeline::DecodeOptions {
            language: self.language.clone(),
            n_threads: self.n_threads,
            send_prompt: self.send_prompt,
            bias_decoding: self.bias_decoding,
            beam_size: self.beam_size,
            bias: self.bias_config(),
        }
    }
}

/// Default decoder thread count: at most two, at least one.
fn default_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get().min(2) as i32)
        .unwrap_or(1)
}
