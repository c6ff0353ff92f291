//! Decode orchestration.
//!
//! Configures one acoustic-model decode per request from the segmenter:
//! reloads the dictionary, attaches the prompt, picks the sampling strategy
//! (beam search iff bias decoding is on), installs the bias filter, and
//! turns the model's token stream into a `segment` event.

use crate::bias::{BiasConfig, BiasFilter, DecodeIdentity};
use crate::defaults::{PROMPT_MAX_BYTES, SAMPLE_RATE};
use crate::dictionary::{DictionaryManager, ReloadIdentity};
use crate::events::{EventSink, StreamEvent, TokenSpan};
use crate::pipeline::segmenter::DecodeRequest;
use crate::stt::model::is_control_piece;
use crate::stt::{AcousticModel, DecodeParams, Sampling};

/// The acoustic model substrate runs a fixed-size decoder array; larger beam
/// requests fail outright, so they are clamped here.
const MAX_DECODERS: i32 = 8;
/// Whisper's default beam size when none was requested.
const DEFAULT_BEAM_SIZE: i32 = 5;

/// Settings shared by every decode in the session.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub language: String,
    pub n_threads: i32,
    pub send_prompt: bool,
    pub bias_decoding: bool,
    /// Requested beam size; 0 selects the model default.
    pub beam_size: i32,
    pub bias: BiasConfig,
}

/// Stateful orchestrator (tracks the one-shot beam clamp warning).
pub struct DecodeOrchestrator {
    options: DecodeOptions,
    warned_beam_clamp: bool,
}

impl DecodeOrchestrator {
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            options,
            warned_beam_clamp: false,
        }
    }

    /// Pick the sampling strategy for this session, clamping the beam size
    /// into the substrate's supported range with a one-shot warning.
    fn sampling(&mut self) -> Sampling {
        if !self.options.bias_decoding {
            return Sampling::Greedy;
        }
        let requested = if self.options.beam_size > 0 {
            self.options.beam_size
        } else {
            DEFAULT_BEAM_SIZE
        };
        let clamped = requested.clamp(2, MAX_DECODERS);
        if requested != clamped && !self.warned_beam_clamp {
            eprintln!(
                "streamscribe: warning: clamping --beam-size {} to {} (decoder limit)",
                requested, clamped
            );
            self.warned_beam_clamp = true;
        }
        Sampling::BeamSearch {
            beam_size: clamped,
        }
    }

    /// Run one decode and emit its `segment` event. Returns the emitted
    /// event, or `None` when the request was empty or inference failed
    /// (partials retry at the next step; a failed final loses the
    /// utterance).
    pub fn decode<M: AcousticModel>(
        &mut self,
        model: &M,
        dictionary: &mut DictionaryManager,
        sink: &EventSink,
        request: &DecodeRequest,
    ) -> Option<StreamEvent> {
        if request.audio.is_empty() {
            return None;
        }

        let identity = ReloadIdentity {
            segment_index: request.segment_index,
            partial_seq: request.partial_seq,
            is_final: request.is_final,
        };
        if let Some(event) = dictionary.reload_if_needed(model, identity, false) {
            sink.emit_dictionary(&event);
        }

        let initial_prompt = if self.options.send_prompt && !dictionary.cache().is_empty() {
            Some(truncate_utf8(dictionary.cache(), PROMPT_MAX_BYTES).to_string())
        } else {
            None
        };

        let params = DecodeParams {
            sampling: self.sampling(),
            language: self.options.language.clone(),
            n_threads: self.options.n_threads,
            initial_prompt,
        };

        let decoded = if self.options.bias_decoding {
            let indices = dictionary.indices();
            let filter = BiasFilter {
                model,
                identity: DecodeIdentity {
                    segment_index: request.segment_index,
                    partial_seq: request.partial_seq,
                    is_final: request.is_final,
                },
                config: &self.options.bias,
                dict: &indices,
                dict_entries_raw: dictionary.entries_raw(),
                sink,
            };
            let mut apply = |prefix: &[i32], logits: &mut [f32]| filter.apply(prefix, logits);
            model.decode(&request.audio, &params, Some(&mut apply))
        } else {
            model.decode(&request.audio, &params, None)
        };

        let decoded = match decoded {
            Ok(tokens) => tokens,
            Err(e) => {
                eprintln!(
                    "streamscribe: decode failed on segment {} (final={}): {}",
                    request.segment_index, request.is_final, e
                );
                return None;
            }
        };

        let start_ms = (request.start_sample * 1000 / SAMPLE_RATE as u64) as i64;
        let end_ms = start_ms + (request.audio.len() as u64 * 1000 / SAMPLE_RATE as u64) as i64;
        let duration_ms = (end_ms - start_ms).max(0);

        let mut text = String::new();
        let mut tokens = Vec::new();
        for token in decoded {
            if is_control_piece(&token.text) {
                continue;
            }
            let leading_space = token
                .text
                .chars()
                .next()
                .is_some_and(|c| c.is_whitespace());
            tokens.push(TokenSpan {
                t0_ms: if token.t0 >= 0 {
                    start_ms + token.t0 * 10
                } else {
                    -1
                },
                t1_ms: if token.t1 >= 0 {
                    start_ms + token.t1 * 10
                } else {
                    -1
                },
                leading_space,
                text: token.text.clone(),
            });
            text.push_str(&token.text);
        }

        let event = StreamEvent::Segment {
            segment_index: request.segment_index,
            start_ms,
            end_ms,
            duration_ms,
            avg_vad: request.avg_vad,
            is_final: request.is_final,
            partial_seq: request.partial_seq,
            text,
            tokens,
        };
        sink.emit(&event);
        Some(event)
    }
}

/// Truncate to at most `max_bytes`, backing off to a char boundary.
fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
