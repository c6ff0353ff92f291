//! Newline-delimited JSON event stream.
//!
//! Every packet the transcriber emits on stdout is one of the variants
//! below, serialized as a single line tagged with `event`. stdout carries
//! the protocol exclusively; diagnostics go to stderr. `logits` packets
//! (and, in verbose mode, `dictionary` packets) are additionally appended
//! to a JSONL log file with a bounded flush cadence.

use crate::error::Result;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

/// One decoded token inside a `segment` event.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TokenSpan {
    pub text: String,
    /// Absolute start in ms, or -1 when the model gave no timestamp.
    pub t0_ms: i64,
    pub t1_ms: i64,
    pub leading_space: bool,
}

/// Token id/text pair used in dictionary `words[]` samples.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TokenRef {
    pub id: i32,
    pub text: String,
}

/// A tokenized dictionary entry sample.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DictWord {
    pub text: String,
    pub tokens: Vec<TokenRef>,
}

/// Why a token received an additive boost.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoostKind {
    First,
    Continuation,
}

/// One boosted token in a `logits` packet.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BoostedToken {
    pub id: i32,
    pub text: String,
    pub bias: f32,
    pub in_top: bool,
    pub logit_before: f32,
    pub logit_after: f32,
    pub kind: BoostKind,
}

/// One top-k entry in a `logits` packet.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TopToken {
    pub id: i32,
    pub text: String,
    pub logit: f32,
    pub prob: f64,
}

/// Per-decode-step diagnostic packet produced by the bias callback.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogitsPacket {
    pub segment_index: i32,
    pub partial_seq: i32,
    #[serde(rename = "final")]
    pub is_final: bool,
    pub decode_step: usize,
    pub prefix_len: usize,
    pub prefix_hash: String,
    pub prefix_prev_hash: String,
    pub prefix_text: String,
    pub prob_mode: String,
    pub prob_threshold: f32,
    pub bias_first_logit: f32,
    pub bias_continuation_logit: f32,
    pub dict_entries: usize,
    pub dict_first_tokens: usize,
    pub boosted_first_total: usize,
    pub boosted_cont_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_last_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_last_text: Option<String>,
    pub boosted: Vec<BoostedToken>,
    pub top: Vec<TopToken>,
}

/// Everything the transcriber writes to stdout.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Ready {
        cwd: String,
        dictionary_file: String,
        send_prompt: bool,
        bias_decoding: bool,
        bias_first_logit: f32,
        bias_continuation_logit: f32,
        logits_log_path: String,
        logits_log_enabled: bool,
    },
    Dictionary {
        dictionary_file: String,
        segment_index: i32,
        partial_seq: i32,
        #[serde(rename = "final")]
        is_final: bool,
        attempted: bool,
        reloaded: bool,
        ok: bool,
        error: String,
        dict_entries_raw: usize,
        dict_entries: usize,
        dict_first_tokens: usize,
        dict_total_tokens: usize,
        dict_cache_bytes: usize,
        words: Vec<DictWord>,
    },
    Vad {
        audio_time_ms: i64,
        prob: f32,
        vad_chunk_samples: usize,
        vad_sample_rate: u32,
    },
    Logits(LogitsPacket),
    Segment {
        segment_index: i32,
        start_ms: i64,
        end_ms: i64,
        duration_ms: i64,
        avg_vad: f64,
        #[serde(rename = "final")]
        is_final: bool,
        partial_seq: i32,
        text: String,
        tokens: Vec<TokenSpan>,
    },
    JobStart {
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    JobEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

/// Appends JSONL lines to the logits log file, flushing at a bounded cadence
/// so sustained beam-search decodes do not pay one syscall per packet.
pub struct LogitsLogWriter {
    path: PathBuf,
    flush_ms: u64,
    inner: Mutex<WriterInner>,
}

struct WriterInner {
    file: BufWriter<File>,
    last_flush: Instant,
}

impl LogitsLogWriter {
    /// Open `path` for append, creating parent directories as needed.
    pub fn open(path: &Path, flush_ms: u64) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            flush_ms,
            inner: Mutex::new(WriterInner {
                file: BufWriter::new(file),
                last_flush: Instant::now(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. The bias callback may run on multiple beams, so the
    /// writer serializes through its own mutex.
    pub fn append_line(&self, line: &str) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let _ = inner.file.write_all(line.as_bytes());
        let _ = inner.file.write_all(b"\n");
        if inner.last_flush.elapsed().as_millis() as u64 >= self.flush_ms {
            let _ = inner.file.flush();
            inner.last_flush = Instant::now();
        }
    }

    /// Force a flush regardless of cadence (process shutdown).
    pub fn flush(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            let _ = inner.file.flush();
            inner.last_flush = Instant::now();
        }
    }
}

/// Routes events to stdout and, where configured, to the logits log file.
pub struct EventSink {
    /// Emit `logits` packets on stdout (verbose mode).
    stdout_logits_packets: bool,
    /// Mirror `dictionary` events into the logits log file.
    dictionary_to_file: bool,
    log: Option<LogitsLogWriter>,
    /// When set, protocol lines land here instead of stdout (tests).
    capture: Option<Mutex<Vec<String>>>,
}

impl EventSink {
    pub fn new(
        stdout_logits_packets: bool,
        dictionary_to_file: bool,
        log: Option<LogitsLogWriter>,
    ) -> Self {
        Self {
            stdout_logits_packets,
            dictionary_to_file,
            log,
            capture: None,
        }
    }

    /// A sink that only writes protocol events to stdout.
    pub fn stdout_only() -> Self {
        Self::new(false, false, None)
    }

    /// A sink that buffers protocol lines instead of writing them to
    /// stdout, so tests can assert on the emitted stream.
    pub fn capturing(stdout_logits_packets: bool) -> Self {
        Self {
            stdout_logits_packets,
            dictionary_to_file: false,
            log: None,
            capture: Some(Mutex::new(Vec::new())),
        }
    }

    /// Lines captured so far (capturing sinks only).
    pub fn captured_lines(&self) -> Vec<String> {
        self.capture
            .as_ref()
            .and_then(|c| c.lock().ok())
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn log_enabled(&self) -> bool {
        self.log.is_some()
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log.as_ref().map(|w| w.path())
    }

    /// The bias callback skips packet assembly entirely when nothing will
    /// consume it.
    pub fn wants_logits_packets(&self) -> bool {
        self.stdout_logits_packets || self.log.is_some()
    }

    fn write_line(&self, line: &str) {
        if let Some(capture) = &self.capture {
            if let Ok(mut lines) = capture.lock() {
                lines.push(line.to_string());
            }
            return;
        }
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let _ = out.write_all(line.as_bytes());
        let _ = out.write_all(b"\n");
        let _ = out.flush();
    }

    /// Emit a protocol event on stdout.
    pub fn emit(&self, event: &StreamEvent) {
        match serde_json::to_string(event) {
            Ok(line) => self.write_line(&line),
            Err(e) => eprintln!("streamscribe: failed to serialize event: {}", e),
        }
    }

    /// Emit a `dictionary` event on stdout, mirroring to the log file in
    /// verbose mode.
    pub fn emit_dictionary(&self, event: &StreamEvent) {
        match serde_json::to_string(event) {
            Ok(line) => {
                self.write_line(&line);
                if self.dictionary_to_file
                    && let Some(log) = &self.log
                {
                    log.append_line(&line);
                }
            }
            Err(e) => eprintln!("streamscribe: failed to serialize event: {}", e),
        }
    }

    /// Emit a `logits` packet to whichever destinations are enabled.
    pub fn emit_logits(&self, packet: &LogitsPacket) {
        if !self.wants_logits_packets() {
            return;
        }
        let event = StreamEvent::Logits(packet.clone());
        match serde_json::to_string(&event) {
            Ok(line) => {
                if self.stdout_logits_packets {
                    self.write_line(&line);
                }
                if let Some(log) = &self.log {
                    log.append_line(&line);
                }
            }
            Err(e) => eprintln!("streamscribe: failed to serialize logits packet: {}", e),
        }
    }

    /// Flush the log file (end of process or job).
    pub fn flush_log(&self) {
        if let Some(log) = &self.log {
            log.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_event_is_tagged() {
        let ev = StreamEvent::Ready {
            cwd: "/work".into(),
            dictionary_file: "words.txt".into(),
            send_prompt: true,
            bias_decoding: false,
            bias_first_logit: 0.35,
            bias_continuation_logit: 0.85,
            logits_log_path: String::new(),
            logits_log_enabled: false,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.starts_with("{\"event\":\"ready\""), "got: {}", json);
        assert!(json.contains("\"send_prompt\":true"));
    }

    #[test]
    fn segment_event_renames_final() {
        let ev = StreamEvent::Segment {
            segment_index: 0,
            start_ms: 200,
            end_ms: 1350,
            duration_ms: 1150,
            avg_vad: 0.91,
            is_final: true,
            partial_seq: 0,
            text: "hello".into(),
            tokens: vec![TokenSpan {
                text: " hello".into(),
                t0_ms: 200,
                t1_ms: 600,
                leading_space: true,
            }],
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"final\":true"));
        assert!(!json.contains("is_final"));
        assert!(json.contains("\"leading_space\":true"));
    }

    #[test]
    fn vad_event_is_single_line() {
        let ev = StreamEvent::Vad {
            audio_time_ms: 32,
            prob: 0.0,
            vad_chunk_samples: 512,
            vad_sample_rate: 16_000,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains("\"event\":\"vad\""));
    }

    #[test]
    fn job_events_omit_missing_path() {
        let ev = StreamEvent::JobStart { path: None };
        assert_eq!(serde_json::to_string(&ev).unwrap(), "{\"event\":\"job_start\"}");

        let ev = StreamEvent::JobEnd {
            path: Some("a.wav".into()),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"path\":\"a.wav\""));
    }

    #[test]
    fn logits_packet_omits_prefix_last_when_empty() {
        let packet = LogitsPacket {
            segment_index: 1,
            partial_seq: 0,
            is_final: false,
            decode_step: 0,
            prefix_len: 0,
            prefix_hash: "cbf29ce484222325".into(),
            prefix_prev_hash: "cbf29ce484222325".into(),
            prefix_text: String::new(),
            prob_mode: "threshold".into(),
            prob_threshold: 20.0,
            bias_first_logit: 0.35,
            bias_continuation_logit: 0.85,
            dict_entries: 0,
            dict_first_tokens: 0,
            boosted_first_total: 0,
            boosted_cont_count: 0,
            prefix_last_id: None,
            prefix_last_text: None,
            boosted: vec![],
            top: vec![],
        };
        let json = serde_json::to_string(&StreamEvent::Logits(packet)).unwrap();
        assert!(json.contains("\"event\":\"logits\""));
        assert!(!json.contains("prefix_last_id"));
    }

    #[test]
    fn boost_kind_serializes_lowercase() {
        let b = BoostedToken {
            id: 7,
            text: " open".into(),
            bias: 0.85,
            in_top: true,
            logit_before: 1.0,
            logit_after: 1.85,
            kind: BoostKind::Continuation,
        };
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"kind\":\"continuation\""));
    }

    #[test]
    fn log_writer_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("logits.jsonl");
        let writer = LogitsLogWriter::open(&path, 0).unwrap();
        writer.append_line("{\"event\":\"logits\"}");
        writer.append_line("{\"event\":\"logits\"}");
        writer.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn sink_without_log_wants_no_packets() {
        let sink = EventSink::stdout_only();
        assert!(!sink.wants_logits_packets());
        assert!(!sink.log_enabled());
    }

    #[test]
    fn sink_with_stdout_packets_wants_packets() {
        let sink = EventSink::new(true, false, None);
        assert!(sink.wants_logits_packets());
    }

    #[test]
    fn capturing_sink_buffers_lines_in_order() {
        let sink = EventSink::capturing(false);
        sink.emit(&StreamEvent::JobStart { path: None });
        sink.emit(&StreamEvent::JobEnd { path: None });

        let lines = sink.captured_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("job_start"));
        assert!(lines[1].contains("job_end"));
    }
}
