//! Voice activity detection.
//!
//! The pipeline consumes a neural VAD through the [`VadService`] trait:
//! one fixed-size frame in, one speech probability out. The production
//! implementation wraps the Silero ONNX model; tests substitute stubs.

pub mod silero;

use crate::error::Result;

pub use silero::SileroVad;

/// Per-frame speech probability service.
pub trait VadService {
    /// Run one frame (exactly [`crate::defaults::VAD_FRAME_SAMPLES`] samples
    /// at 16 kHz) and return the speech probability in [0, 1].
    fn infer(&mut self, frame: &[f32]) -> Result<f32>;

    /// Drop recurrent state (job boundaries).
    fn reset(&mut self);
}
