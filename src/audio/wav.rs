//! WAV file decoding for the offline and stdin-audio modes.
//!
//! Supports PCM-16, PCM-32 and float-32 RIFF files with any channel count
//! and rate; output is f32 mono at the pipeline sample rate.

use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, ScribeError};
use hound::{SampleFormat, WavReader};
use std::io::Read;
use std::path::Path;

/// Decode a WAV file to f32 mono at 16 kHz.
pub fn read_wav_mono_f32(path: &Path) -> Result<Vec<f32>> {
    let file = std::fs::File::open(path).map_err(|e| ScribeError::WavDecode {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    decode_reader(std::io::BufReader::new(file)).map_err(|e| match e {
        ScribeError::WavDecode { message, .. } => ScribeError::WavDecode {
            path: path.display().to_string(),
            message,
        },
        other => other,
    })
}

/// Decode WAV data from any reader (used by tests with in-memory cursors).
pub fn decode_reader<R: Read>(reader: R) -> Result<Vec<f32>> {
    let mut wav = WavReader::new(reader).map_err(|e| ScribeError::WavDecode {
        path: String::new(),
        message: e.to_string(),
    })?;
    let spec = wav.spec();
    let channels = spec.channels.max(1) as usize;

    let mono: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => {
            let samples: std::result::Result<Vec<i16>, _> = wav.samples::<i16>().collect();
            mix_to_mono(&samples.map_err(read_error)?, channels, |s| {
                s as f64 / 32768.0
            })
        }
        (SampleFormat::Int, 32) => {
            let samples: std::result::Result<Vec<i32>, _> = wav.samples::<i32>().collect();
            mix_to_mono(&samples.map_err(read_error)?, channels, |s| {
                s as f64 / 2_147_483_648.0
            })
        }
        (SampleFormat::Float, 32) => {
            let samples: std::result::Result<Vec<f32>, _> = wav.samples::<f32>().collect();
            mix_to_mono(&samples.map_err(read_error)?, channels, |s| s as f64)
        }
        (format, bits) => {
            return Err(ScribeError::WavDecode {
                path: String::new(),
                message: format!("unsupported WAV encoding {:?}/{} bits", format, bits),
            });
        }
    };

    if spec.sample_rate == SAMPLE_RATE {
        Ok(mono)
    } else {
        Ok(resample_linear(&mono, spec.sample_rate, SAMPLE_RATE))
    }
}

fn read_error(e: hound::Error) -> ScribeError {
    ScribeError::WavDecode {
        path: String::new(),
        message: e.to_string(),
    }
}

/// Average interleaved channels down to mono.
fn mix_to_mono<T: Copy>(samples: &[T], channels: usize, to_f64: impl Fn(T) -> f64) -> Vec<f32> {
    if channels <= 1 {
        return samples.iter().map(|&s| to_f64(s) as f32).collect();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: f64 = frame.iter().map(|&s| to_f64(s)).sum();
            (sum / channels as f64) as f32
        })
        .collect()
}

/// Linear-interpolation resampler.
pub fn resample_linear(input: &[f32], sr_in: u32, sr_out: u32) -> Vec<f32> {
    if sr_in == 0 || sr_out == 0 || input.is_empty() || sr_in == sr_out {
        return input.to_vec();
    }
    let ratio = sr_out as f64 / sr_in as f64;
    let n_out = ((input.len() as f64 * ratio).round() as usize).max(1);

    (0..n_out)
        .map(|i| {
            let pos = i as f64 / ratio;
            let i0 = pos.floor() as usize;
            let i1 = (i0 + 1).min(input.len() - 1);
            let t = pos - i0 as f64;
            ((1.0 - t) * input[i0.min(input.len() - 1)] as f64 + t * input[i1] as f64) as f32
        })
        .collect()
}
