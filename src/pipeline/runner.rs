//! Operating-mode drivers: live microphone, offline WAV, stdin WAV paths,
//! and framed stdin PCM.
//!
//! All four feed the same [`Pipeline`]; the only differences are where the
//! samples come from and where job boundaries fall.

use crate::audio::ring::CaptureRing;
use crate::audio::wav::read_wav_mono_f32;
use crate::audio::MicCapture;
use crate::defaults::SAMPLE_RATE;
use crate::error::Result;
use crate::events::StreamEvent;
use crate::pipeline::Pipeline;
use crate::stt::AcousticModel;
use crate::vad::VadService;
use std::io::{BufRead, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Live microphone loop: poll the ring, append only the timeline delta to
/// the pipeline, and decode until interrupted.
pub fn run_live<M: AcousticModel, V: VadService>(
    pipeline: &mut Pipeline<M, V>,
    capture: &MicCapture,
    ring: &Arc<CaptureRing>,
    fetch_window_ms: i32,
) -> Result<()> {
    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = Arc::clone(&quit);
        ctrlc::set_handler(move || {
            quit.store(true, Ordering::SeqCst);
        })
        .map_err(|e| crate::error::ScribeError::Other(format!("signal handler: {}", e)))?;
    }

    let mut last_fetch_time_ms: i64 = 0;
    while !quit.load(Ordering::SeqCst) {
        let (window, audio_time_ms) = ring.get(fetch_window_ms);

        if audio_time_ms <= last_fetch_time_ms {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }

        let delta_ms = audio_time_ms - last_fetch_time_ms;
        let mut new_samples = (delta_ms as u64 * SAMPLE_RATE as u64 / 1000) as usize;
        if new_samples > window.len() {
            new_samples = window.len();
        }
        if new_samples > 0 {
            pipeline.push_samples(&window[window.len() - new_samples..]);
        }
        last_fetch_time_ms = audio_time_ms;

        pipeline.process_pending();
        std::thread::sleep(Duration::from_millis(1));
    }

    pipeline.flush(true);
    capture.pause();
    Ok(())
}

/// Single-file offline mode.
pub fn run_offline<M: AcousticModel, V: VadService>(
    pipeline: &mut Pipeline<M, V>,
    path: &Path,
    debug: bool,
) -> Result<()> {
    let samples = read_wav_mono_f32(path)?;
    if debug {
        eprintln!(
            "streamscribe: offline audio: '{}' -> {} samples @ {} Hz",
            path.display(),
            samples.len(),
            SAMPLE_RATE
        );
    }
    pipeline.push_samples(&samples);
    pipeline.pad_to_frame_boundary();
    pipeline.process_pending();
    pipeline.flush(true);
    Ok(())
}

/// stdin-audio mode: one WAV path per line, model kept warm between files.
pub fn run_stdin_audio<M: AcousticModel, V: VadService>(
    pipeline: &mut Pipeline<M, V>,
) -> Result<()> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "__quit__" {
            break;
        }

        pipeline.reset();

        let samples = match read_wav_mono_f32(Path::new(line)) {
            Ok(samples) => samples,
            Err(e) => {
                eprintln!("streamscribe: failed to open audio file '{}': {}", line, e);
                continue;
            }
        };

        pipeline.sink().emit(&StreamEvent::JobStart {
            path: Some(line.to_string()),
        });

        pipeline.push_samples(&samples);
        pipeline.pad_to_frame_boundary();
        pipeline.process_pending();
        pipeline.flush(true);

        pipeline.sink().emit(&StreamEvent::JobEnd {
            path: Some(line.to_string()),
        });
    }
    Ok(())
}

/// stdin-pcm mode: framed binary protocol.
///
/// One tag byte per message: `B` begin job, `E` end job, `J` + u32-le count
/// + that many f32-le samples, `Q` quit. Anything else ends the loop — a
/// stray tag means the frame stream is desynchronised and there is no way
/// to resynchronise it.
pub fn run_stdin_pcm<M: AcousticModel, V: VadService>(
    pipeline: &mut Pipeline<M, V>,
) -> Result<()> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();

    loop {
        let mut tag = [0u8; 1];
        if input.read_exact(&mut tag).is_err() {
            break;
        }
        match tag[0] {
            b'Q' => break,
            b'B' => {
                pipeline.reset();
                pipeline.sink().emit(&StreamEvent::JobStart { path: None });
            }
            b'E' => {
                pipeline.flush(true);
                pipeline.sink().emit(&StreamEvent::JobEnd { path: None });
            }
            b'J' => {
                let mut len = [0u8; 4];
                if input.read_exact(&mut len).is_err() {
                    break;
                }
                let n = u32::from_le_bytes(len) as usize;
                if n == 0 {
                    continue;
                }
                let mut raw = vec![0u8; n * 4];
                if input.read_exact(&mut raw).is_err() {
                    break;
                }
                let samples: Vec<f32> = raw
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                pipeline.push_samples(&samples);
                pipeline.process_pending();
            }
            other => {
                eprintln!(
                    "streamscribe: unknown stdin-pcm tag 0x{:02x}, ending input loop",
                    other
                );
                break;
            }
        }
    }
    Ok(())
}
