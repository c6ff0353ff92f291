//! Microphone capture using CPAL, feeding the capture ring.

use crate::audio::ring::CaptureRing;
use crate::defaults;
use crate::error::{Result, ScribeError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends. The messages are harmless but confusing to users.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only driven from the pipeline thread; play/pause
/// are called synchronously and the stream never crosses threads afterwards.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture source writing f32 mono 16 kHz samples into a
/// [`CaptureRing`].
pub struct MicCapture {
    ring: Arc<CaptureRing>,
    stream: SendableStream,
}

impl MicCapture {
    /// Open the capture device (by enumeration index, or the default) and
    /// build a paused input stream. Lists the available devices on stderr so
    /// `--capture-id` values can be picked.
    pub fn init(capture_id: Option<usize>, ring: Arc<CaptureRing>) -> Result<Self> {
        let device = with_suppressed_stderr(|| -> Result<cpal::Device> {
            let host = cpal::default_host();
            let devices: Vec<cpal::Device> = host
                .input_devices()
                .map_err(|e| ScribeError::AudioCapture {
                    message: format!("Failed to enumerate input devices: {}", e),
                })?
                .collect();

            eprintln!("streamscribe: found {} capture devices:", devices.len());
            for (i, d) in devices.iter().enumerate() {
                eprintln!(
                    "streamscribe:    - capture device #{}: '{}'",
                    i,
                    d.name().unwrap_or_else(|_| "<unknown>".to_string())
                );
            }

            match capture_id {
                Some(id) => devices.into_iter().nth(id).ok_or_else(|| {
                    ScribeError::AudioDeviceNotFound {
                        device: format!("#{}", id),
                    }
                }),
                None => host
                    .default_input_device()
                    .ok_or_else(|| ScribeError::AudioDeviceNotFound {
                        device: "default".to_string(),
                    }),
            }
        })?;

        let stream = Self::build_stream(&device, Arc::clone(&ring))?;
        stream.pause().ok();

        Ok(Self {
            ring,
            stream: SendableStream(stream),
        })
    }

    /// Build the input stream.
    ///
    /// Tries in order:
    /// 1. f32/16kHz/mono — the pipeline's native format
    /// 2. i16/16kHz/mono — converted in the callback
    /// 3. Device default config — native rate/channels with software conversion
    fn build_stream(device: &cpal::Device, ring: Arc<CaptureRing>) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(defaults::SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            eprintln!("streamscribe: audio stream error: {}", err);
        };

        let sink = Arc::clone(&ring);
        if let Ok(stream) = device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                sink.push(data);
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let sink = Arc::clone(&ring);
        if let Ok(stream) = device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                sink.push(&converted);
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        Self::build_stream_native(device, ring)
    }

    /// Build a stream using the device's default config, mixing to mono and
    /// resampling to 16 kHz in software. Some PipeWire-ALSA setups accept
    /// non-native configs but never deliver data.
    fn build_stream_native(device: &cpal::Device, ring: Arc<CaptureRing>) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            device
                .default_input_config()
                .map_err(|e| ScribeError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        eprintln!(
            "streamscribe: using native audio format ({}ch/{}Hz/{:?}), converting in software",
            native_channels,
            native_rate,
            default_config.sample_format(),
        );

        let err_callback = |err| {
            eprintln!("streamscribe: audio stream error: {}", err);
        };

        match default_config.sample_format() {
            SampleFormat::F32 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let converted = convert_to_mono_16khz(data, native_channels, native_rate);
                        ring.push(&converted);
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| ScribeError::AudioCapture {
                    message: format!("Failed to build native f32 stream: {}", e),
                }),
            SampleFormat::I16 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let as_f32: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                        let converted =
                            convert_to_mono_16khz(&as_f32, native_channels, native_rate);
                        ring.push(&converted);
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| ScribeError::AudioCapture {
                    message: format!("Failed to build native i16 stream: {}", e),
                }),
            fmt => Err(ScribeError::AudioCapture {
                message: format!(
                    "Unsupported native sample format: {:?}. \
                     Try specifying a device with --capture-id.",
                    fmt
                ),
            }),
        }
    }

    /// Start capturing and reset the ring timeline.
    pub fn resume(&self) -> bool {
        if !self.ring.resume() {
            return false;
        }
        if let Err(e) = self.stream.0.play() {
            eprintln!("streamscribe: failed to start capture stream: {}", e);
            self.ring.pause();
            return false;
        }
        true
    }

    /// Stop capturing.
    pub fn pause(&self) -> bool {
        let ok = self.ring.pause();
        if let Err(e) = self.stream.0.pause() {
            eprintln!("streamscribe: failed to pause capture stream: {}", e);
        }
        ok
    }
}

/// Mix multi-channel audio to mono and resample to the pipeline rate.
fn convert_to_mono_16khz(samples: &[f32], channels: usize, source_rate: u32) -> Vec<f32> {
    let mono: Vec<f32> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    crate::audio::wav::resample_linear(&mono, source_rate, defaults::SAMPLE_RATE)
}
