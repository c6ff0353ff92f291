//! Audio ingest: capture ring, microphone capture, WAV decoding.

pub mod capture;
pub mod ring;
pub mod wav;

pub use capture::MicCapture;
pub use ring::CaptureRing;
