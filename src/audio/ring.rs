//! Capture ring buffer shared between the audio callback and the pipeline.
//!
//! The producer (audio callback thread) writes under a single mutex; the
//! consumer snapshots `(pos, len, total_samples)` under the same mutex and
//! copies the requested tail out. `total_samples` counts every sample the
//! device ever delivered since the last `resume()`, including samples a
//! single oversized delivery forced the ring to drop, so the derived
//! timeline never drifts from wall clock.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

struct RingState {
    buf: Vec<f32>,
    pos: usize,
    len: usize,
    total_samples: u64,
}

/// Bounded circular buffer of f32 samples with a monotonic sample timeline.
pub struct CaptureRing {
    state: Mutex<RingState>,
    sample_rate: u32,
    running: AtomicBool,
}

impl CaptureRing {
    /// Create a ring holding `capacity_ms` of audio at `sample_rate`.
    pub fn new(capacity_ms: u32, sample_rate: u32) -> Self {
        let capacity = (sample_rate as usize * capacity_ms as usize) / 1000;
        Self {
            state: Mutex::new(RingState {
                buf: vec![0.0; capacity.max(1)],
                pos: 0,
                len: 0,
                total_samples: 0,
            }),
            sample_rate,
            running: AtomicBool::new(false),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start production and reset the timeline to zero.
    pub fn resume(&self) -> bool {
        if self.is_running() {
            eprintln!("streamscribe: capture ring already running");
            return false;
        }
        if let Ok(mut state) = self.state.lock() {
            state.pos = 0;
            state.len = 0;
            state.total_samples = 0;
        }
        self.running.store(true, Ordering::SeqCst);
        true
    }

    /// Stop production. Buffered samples remain readable.
    pub fn pause(&self) -> bool {
        if !self.is_running() {
            eprintln!("streamscribe: capture ring not running");
            return false;
        }
        self.running.store(false, Ordering::SeqCst);
        true
    }

    /// Empty the buffer but keep the timeline advancing from where it was.
    pub fn clear(&self) -> bool {
        if !self.is_running() {
            eprintln!("streamscribe: capture ring not running");
            return false;
        }
        if let Ok(mut state) = self.state.lock() {
            state.pos = 0;
            state.len = 0;
        }
        true
    }

    /// Producer entry point: append a delivery of samples.
    ///
    /// When a single delivery exceeds the ring capacity, only its newest
    /// capacity-worth is stored, but the timeline still advances by the full
    /// delivery size.
    pub fn push(&self, samples: &[f32]) {
        if !self.is_running() || samples.is_empty() {
            return;
        }
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let capacity = state.buf.len();
        let delivered = samples.len();
        let tail = if delivered > capacity {
            &samples[delivered - capacity..]
        } else {
            samples
        };

        let n = tail.len();
        let pos = state.pos;
        if pos + n > capacity {
            let n0 = capacity - pos;
            state.buf[pos..].copy_from_slice(&tail[..n0]);
            state.buf[..n - n0].copy_from_slice(&tail[n0..]);
        } else {
            state.buf[pos..pos + n].copy_from_slice(tail);
        }
        state.pos = (pos + n) % capacity;
        state.len = (state.len + n).min(capacity);
        state.total_samples += delivered as u64;
    }

    /// Copy out the newest `window_ms` of audio plus the current timeline in
    /// ms. Returns an empty buffer (and the timeline) when nothing has been
    /// captured yet; `window_ms <= 0` means the whole buffer.
    pub fn get(&self, window_ms: i32) -> (Vec<f32>, i64) {
        if !self.is_running() {
            eprintln!("streamscribe: capture ring not running");
            return (Vec::new(), 0);
        }
        let Ok(state) = self.state.lock() else {
            return (Vec::new(), 0);
        };
        let capacity = state.buf.len();
        let mut wanted = if window_ms <= 0 {
            capacity
        } else {
            (self.sample_rate as usize * window_ms as usize) / 1000
        };
        if wanted > state.len {
            wanted = state.len;
        }

        let mut out = vec![0.0f32; wanted];
        if wanted > 0 {
            let start = (state.pos + capacity - wanted) % capacity;
            if start + wanted > capacity {
                let n0 = capacity - start;
                out[..n0].copy_from_slice(&state.buf[start..]);
                out[n0..].copy_from_slice(&state.buf[..wanted - n0]);
            } else {
                out.copy_from_slice(&state.buf[start..start + wanted]);
            }
        }

        let time_ms = (state.total_samples * 1000 / self.sample_rate as u64) as i64;
        (out, time_ms)
    }

    /// Timeline in ms since the last `resume()`.
    pub fn timeline_ms(&self) -> i64 {
        self.state
            .lock()
            .map(|s| (s.total_samples * 1000 / self.sample_rate as u64) as i64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, base: f32) -> Vec<f32> {
        (0..n).map(|i| base + i as f32).collect()
    }

    #[test]
    fn get_before_resume_is_empty() {
        let ring = CaptureRing::new(1000, 16_000);
        let (samples, time_ms) = ring.get(100);
        assert!(samples.is_empty());
        assert_eq!(time_ms, 0);
    }

    #[test]
    fn push_ignored_while_paused() {
        let ring = CaptureRing::new(1000, 16_000);
        ring.push(&[1.0; 64]);
        assert!(ring.resume());
        let (samples, _) = ring.get(1000);
        assert!(samples.is_empty());
    }

    #[test]
    fn timeline_counts_every_delivered_sample() {
        let ring = CaptureRing::new(1000, 16_000);
        ring.resume();
        ring.push(&[0.0; 1600]);
        ring.push(&[0.0; 160]);
        // 1760 samples at 16 kHz = 110 ms
        assert_eq!(ring.timeline_ms(), 110);

        let (_, time_ms) = ring.get(50);
        assert_eq!(time_ms, 110);
    }

    #[test]
    fn get_returns_newest_tail() {
        let ring = CaptureRing::new(1000, 16_000); // 16000 samples capacity
        ring.resume();
        ring.push(&ramp(1600, 0.0));
        ring.push(&ramp(1600, 10_000.0));

        // 50 ms = 800 samples; expect the tail of the second delivery
        let (samples, _) = ring.get(50);
        assert_eq!(samples.len(), 800);
        assert_eq!(samples[0], 10_000.0 + 800.0);
        assert_eq!(samples[799], 10_000.0 + 1599.0);
    }

    #[test]
    fn wraparound_preserves_order() {
        // Tiny ring: 10 ms at 16 kHz = 160 samples
        let ring = CaptureRing::new(10, 16_000);
        ring.resume();
        ring.push(&ramp(100, 0.0));
        ring.push(&ramp(100, 1000.0));

        let (samples, _) = ring.get(10);
        assert_eq!(samples.len(), 160);
        // Oldest surviving sample is index 40 of the first delivery
        assert_eq!(samples[0], 40.0);
        assert_eq!(samples[59], 99.0);
        assert_eq!(samples[60], 1000.0);
        assert_eq!(samples[159], 1099.0);
    }

    #[test]
    fn oversized_delivery_keeps_newest_and_advances_timeline() {
        let ring = CaptureRing::new(10, 16_000); // 160 samples
        ring.resume();
        ring.push(&ramp(500, 0.0));

        let (samples, time_ms) = ring.get(10);
        assert_eq!(samples.len(), 160);
        assert_eq!(samples[0], 340.0);
        assert_eq!(samples[159], 499.0);
        // Timeline advanced by all 500 samples, not just the stored 160.
        assert_eq!(time_ms, 500 * 1000 / 16_000);
    }

    #[test]
    fn clear_empties_buffer_but_keeps_timeline() {
        let ring = CaptureRing::new(1000, 16_000);
        ring.resume();
        ring.push(&[0.5; 800]);
        assert!(ring.clear());

        let (samples, time_ms) = ring.get(1000);
        assert!(samples.is_empty());
        assert_eq!(time_ms, 50);

        ring.push(&[0.5; 160]);
        assert_eq!(ring.timeline_ms(), 60);
    }

    #[test]
    fn resume_resets_timeline() {
        let ring = CaptureRing::new(1000, 16_000);
        ring.resume();
        ring.push(&[0.0; 1600]);
        assert!(ring.pause());
        assert!(ring.resume());
        assert_eq!(ring.timeline_ms(), 0);
    }

    #[test]
    fn pause_twice_reports_failure() {
        let ring = CaptureRing::new(1000, 16_000);
        assert!(!ring.pause());
        ring.resume();
        assert!(ring.pause());
        assert!(!ring.pause());
    }

    #[test]
    fn window_larger_than_content_is_clamped() {
        let ring = CaptureRing::new(1000, 16_000);
        ring.resume();
        ring.push(&[0.25; 320]);
        let (samples, _) = ring.get(10_000);
        assert_eq!(samples.len(), 320);
    }
}
