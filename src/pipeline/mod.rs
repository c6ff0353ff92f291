//! The streaming transcription pipeline.
//!
//! ```text
//! ┌─────────┐   ┌──────────┐   ┌────────────┐   ┌──────────────┐
//! │ samples │──▶│ VAD pump │──▶│ Segmenter  │──▶│ Decode       │──▶ events
//! │ (deque) │   │ (512/f)  │   │ (state     │   │ orchestrator │
//! └─────────┘   └──────────┘   │  machine)  │   └──────────────┘
//!                              └────────────┘          │
//!                                 dictionary ◀─────────┘
//! ```
//!
//! Everything here runs on one thread; only the capture ring is shared with
//! the audio callback.

pub mod decoder;
pub mod runner;
pub mod segmenter;

pub use decoder::{DecodeOptions, DecodeOrchestrator};
pub use segmenter::{DecodeRequest, Segmenter, SegmenterConfig};

use crate::defaults::{SAMPLE_RATE, VAD_FRAME_SAMPLES};
use crate::dictionary::{DictionaryManager, ReloadIdentity};
use crate::events::{EventSink, StreamEvent};
use crate::stt::AcousticModel;
use crate::vad::VadService;
use std::collections::VecDeque;

/// Frame pump + segmenter + decoder, wired to one event sink.
pub struct Pipeline<M: AcousticModel, V: VadService> {
    model: M,
    vad: V,
    segmenter: Segmenter,
    decoder: DecodeOrchestrator,
    dictionary: DictionaryManager,
    sink: EventSink,
    pending: VecDeque<f32>,
    emit_vad_events: bool,
}

impl<M: AcousticModel, V: VadService> Pipeline<M, V> {
    pub fn new(
        model: M,
        vad: V,
        dictionary: DictionaryManager,
        sink: EventSink,
        segmenter: SegmenterConfig,
        decode: DecodeOptions,
        emit_vad_events: bool,
    ) -> Self {
        Self {
            model,
            vad,
            segmenter: Segmenter::new(segmenter),
            decoder: DecodeOrchestrator::new(decode),
            dictionary,
            sink,
            pending: VecDeque::new(),
            emit_vad_events,
        }
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Force an initial dictionary load so consumers see the dictionary
    /// state before any audio flows.
    pub fn startup_dictionary_reload(&mut self) {
        if let Some(event) =
            self.dictionary
                .reload_if_needed(&self.model, ReloadIdentity::startup(), true)
        {
            self.sink.emit_dictionary(&event);
        }
    }

    /// Queue newly captured samples for VAD framing.
    pub fn push_samples(&mut self, samples: &[f32]) {
        self.pending.extend(samples.iter().copied());
    }

    /// Zero-pad the staging deque up to a whole number of VAD frames
    /// (offline ingest, where trailing audio would otherwise be lost).
    pub fn pad_to_frame_boundary(&mut self) {
        let rem = self.pending.len() % VAD_FRAME_SAMPLES;
        if rem != 0 {
            for _ in 0..(VAD_FRAME_SAMPLES - rem) {
                self.pending.push_back(0.0);
            }
        }
    }

    /// Drain complete frames through VAD, segmentation and decoding.
    pub fn process_pending(&mut self) {
        while self.pending.len() >= VAD_FRAME_SAMPLES {
            let frame: Vec<f32> = self.pending.drain(..VAD_FRAME_SAMPLES).collect();

            let prob = match self.vad.infer(&frame) {
                Ok(prob) => prob,
                Err(e) => {
                    eprintln!("streamscribe: VAD inference failed: {}", e);
                    continue;
                }
            };

            if self.emit_vad_events {
                let end_sample = self.segmenter.total_samples() + frame.len() as u64;
                self.sink.emit(&StreamEvent::Vad {
                    audio_time_ms: (end_sample * 1000 / SAMPLE_RATE as u64) as i64,
                    prob,
                    vad_chunk_samples: VAD_FRAME_SAMPLES,
                    vad_sample_rate: SAMPLE_RATE,
                });
            }

            let requests = self.segmenter.push_frame(&frame, prob);
            for request in requests {
                self.decoder
                    .decode(&self.model, &mut self.dictionary, &self.sink, &request);
            }
        }
    }

    /// Terminate any active utterance (end of stream or job).
    pub fn flush(&mut self, forced: bool) {
        if let Some(request) = self.segmenter.flush(forced) {
            self.decoder
                .decode(&self.model, &mut self.dictionary, &self.sink, &request);
        }
        self.sink.flush_log();
    }

    /// Reset all per-job state; the models stay resident.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.segmenter.reset();
        self.vad.reset();
    }
}
