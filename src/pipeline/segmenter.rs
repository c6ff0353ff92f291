//! VAD-driven segmentation state machine.
//!
//! Consumes `(frame, probability)` pairs in timeline order and maintains at
//! most one active utterance. Hysteresis: an utterance opens when a frame
//! reaches the start threshold and frames at or above the (lower) stop
//! threshold keep it voiced. While inactive, recent audio is held in a
//! bounded pre-roll so the first phoneme is not clipped. Flushes happen on
//! max length (forced, keep everything) or on sufficient trailing silence
//! (natural, keep up to last voice + post padding); whatever the flush does
//! not keep becomes the next pre-roll.
//!
//! The machine emits [`DecodeRequest`]s; running the acoustic model on them
//! is the orchestrator's job.

use std::collections::VecDeque;

/// Sample-domain thresholds derived from the ms-domain settings.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub start_threshold: f32,
    pub stop_threshold: f32,
    /// Partial decode cadence in samples; `None` disables partials.
    pub step_samples: Option<u64>,
    pub min_segment_samples: usize,
    pub max_segment_samples: u64,
    pub min_silence_samples: u64,
    pub pre_padding_samples: usize,
    pub post_padding_samples: u64,
    pub debug: bool,
}

/// A decode the state machine wants performed.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeRequest {
    pub audio: Vec<f32>,
    pub segment_index: i32,
    /// Timeline position of the first sample in `audio`.
    pub start_sample: u64,
    pub is_final: bool,
    pub avg_vad: f64,
    pub partial_seq: i32,
}

/// Segmentation state machine over fixed-size VAD frames.
pub struct Segmenter {
    config: SegmenterConfig,

    pre_roll: VecDeque<f32>,
    buffer: Vec<f32>,
    prob_sum: f64,
    prob_count: u32,
    in_segment: bool,
    start_sample: u64,
    last_voice_sample: u64,
    total_samples: u64,
    segment_index: i32,
    active_segment_index: i32,
    partial_seq: i32,
    last_partial_emit_sample: u64,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            pre_roll: VecDeque::new(),
            buffer: Vec::new(),
            prob_sum: 0.0,
            prob_count: 0,
            in_segment: false,
            start_sample: 0,
            last_voice_sample: 0,
            total_samples: 0,
            segment_index: 0,
            active_segment_index: -1,
            partial_seq: 0,
            last_partial_emit_sample: 0,
        }
    }

    /// Timeline position after the last ingested frame.
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Whether an utterance is currently open.
    pub fn is_active(&self) -> bool {
        self.in_segment
    }

    /// Ingest one VAD frame with its speech probability. Returns zero, one
    /// or two decode requests (a partial may be followed by a final from the
    /// same frame).
    pub fn push_frame(&mut self, frame: &[f32], prob: f32) -> Vec<DecodeRequest> {
        self.total_samples += frame.len() as u64;
        let mut requests = Vec::new();

        if !self.in_segment && prob >= self.config.start_threshold {
            if self.config.debug {
                eprintln!(
                    "streamscribe: segment {} start at {} ms (prob={:.3})",
                    self.segment_index,
                    self.total_samples * 1000 / crate::defaults::SAMPLE_RATE as u64,
                    prob
                );
            }
            self.buffer = self.pre_roll.iter().copied().collect();
            self.start_sample = self
                .total_samples
                .saturating_sub(self.pre_roll.len() as u64 + frame.len() as u64);
            self.active_segment_index = self.segment_index;
            self.partial_seq = 0;
            self.last_partial_emit_sample = self.start_sample;
            self.buffer.extend_from_slice(frame);
            self.pre_roll.clear();

            self.last_voice_sample = self.total_samples;
            self.prob_sum = prob as f64;
            self.prob_count = 1;
            self.in_segment = true;
            return requests;
        }

        if self.in_segment {
            self.buffer.extend_from_slice(frame);
            self.prob_sum += prob as f64;
            self.prob_count += 1;
            if prob >= self.config.stop_threshold {
                self.last_voice_sample = self.total_samples;
            }

            let buffer_end_sample = self.start_sample + self.buffer.len() as u64;
            if let Some(step) = self.config.step_samples
                && self.buffer.len() >= self.config.min_segment_samples
                && buffer_end_sample - self.last_partial_emit_sample >= step
            {
                requests.push(DecodeRequest {
                    audio: self.buffer.clone(),
                    segment_index: self.active_segment_index,
                    start_sample: self.start_sample,
                    is_final: false,
                    avg_vad: self.avg_prob(),
                    partial_seq: self.partial_seq,
                });
                self.last_partial_emit_sample = buffer_end_sample;
                self.partial_seq += 1;
            }

            let segment_samples = self.total_samples - self.start_sample;
            let silence_samples = self.total_samples - self.last_voice_sample;

            if segment_samples >= self.config.max_segment_samples {
                if self.config.debug {
                    eprintln!(
                        "streamscribe: segment {} forced flush (max length)",
                        self.active_segment_index
                    );
                }
                requests.extend(self.flush(true));
            } else if silence_samples >= self.config.min_silence_samples
                && silence_samples >= self.config.post_padding_samples
            {
                if self.config.debug {
                    eprintln!(
                        "streamscribe: segment {} flush after silence (prob={:.3})",
                        self.active_segment_index, prob
                    );
                }
                requests.extend(self.flush(false));
            }
        } else {
            for &sample in frame {
                self.pre_roll.push_back(sample);
                if self.pre_roll.len() > self.config.pre_padding_samples {
                    self.pre_roll.pop_front();
                }
            }
        }

        requests
    }

    /// Terminate the active utterance, if any. Forced flushes keep the whole
    /// buffer; natural flushes keep up to last voice + post padding. Returns
    /// the final decode request unless the kept audio is shorter than the
    /// minimum segment length (discarded).
    pub fn flush(&mut self, forced: bool) -> Option<DecodeRequest> {
        if !self.in_segment || self.buffer.is_empty() {
            self.buffer.clear();
            self.prob_sum = 0.0;
            self.prob_count = 0;
            self.in_segment = false;
            return None;
        }

        let keep = if forced {
            self.buffer.len()
        } else {
            let wanted_end_sample =
                (self.last_voice_sample + self.config.post_padding_samples).max(self.start_sample);
            ((wanted_end_sample - self.start_sample) as usize).min(self.buffer.len())
        };

        if keep < self.config.min_segment_samples {
            if self.config.debug {
                eprintln!("streamscribe: discarding short segment ({} samples)", keep);
            }
            self.buffer.clear();
            self.prob_sum = 0.0;
            self.prob_count = 0;
            self.in_segment = false;
            self.pre_roll.clear();
            return None;
        }

        let leftover = self.buffer.split_off(keep);
        let audio = std::mem::take(&mut self.buffer);

        let request = DecodeRequest {
            audio,
            segment_index: if self.active_segment_index >= 0 {
                self.active_segment_index
            } else {
                self.segment_index
            },
            start_sample: self.start_sample,
            is_final: true,
            avg_vad: self.avg_prob(),
            partial_seq: self.partial_seq,
        };

        self.pre_roll.clear();
        for sample in leftover {
            self.pre_roll.push_back(sample);
            if self.pre_roll.len() > self.config.pre_padding_samples {
                self.pre_roll.pop_front();
            }
        }

        self.prob_sum = 0.0;
        self.prob_count = 0;
        self.in_segment = false;
        self.partial_seq = 0;
        self.last_partial_emit_sample = 0;
        self.active_segment_index = -1;
        self.segment_index += 1;
        self.start_sample = self.total_samples;
        self.last_voice_sample = self.total_samples;

        Some(request)
    }

    /// Drop all state including the timeline (job boundaries).
    pub fn reset(&mut self) {
        let config = self.config.clone();
        *self = Self::new(config);
    }

    fn avg_prob(&self) -> f64 {
        if self.prob_count > 0 {
            self.prob_sum / self.prob_count as f64
        } else {
            0.0
        }
    }
}
