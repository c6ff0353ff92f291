//! End-to-end pipeline scenarios over deterministic stubs.
//!
//! The acoustic model and the VAD are replaced with scripted fakes so the
//! full event stream (vad → logits → segment → dictionary) can be asserted
//! without any model files.

use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use streamscribe::dictionary::DictionaryManager;
use streamscribe::error::{Result, ScribeError};
use streamscribe::events::EventSink;
use streamscribe::pipeline::{DecodeOptions, Pipeline, SegmenterConfig};
use streamscribe::stt::model::LogitsFilter;
use streamscribe::stt::{AcousticModel, DecodeParams, DecodedToken, TokenId};
use streamscribe::vad::VadService;

const SR: u64 = 16_000;
const FRAME: usize = 512;

fn samples(ms: u64) -> u64 {
    ms * SR / 1000
}

/// Scripted acoustic model: tokenization comes from a lookup table, decodes
/// replay canned tokens, and the logits filter is driven with scripted
/// prefixes over a zeroed logits row.
struct StubModel {
    vocab: HashMap<String, Vec<TokenId>>,
    decode_tokens: Vec<DecodedToken>,
    filter_prefixes: Vec<Vec<TokenId>>,
    n_vocab: usize,
    token_beg: TokenId,
}

impl StubModel {
    fn new() -> Self {
        Self {
            vocab: HashMap::new(),
            decode_tokens: vec![DecodedToken {
                id: 7,
                text: " hello".to_string(),
                t0: 0,
                t1: 40,
            }],
            filter_prefixes: Vec::new(),
            n_vocab: 1000,
            token_beg: 900,
        }
    }
}

impl AcousticModel for StubModel {
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        if let Some(seq) = self.vocab.get(text) {
            return Ok(seq.clone());
        }
        Ok(text.bytes().map(|b| b as TokenId).collect())
    }

    fn token_text(&self, id: TokenId) -> Option<String> {
        Some(format!("t{}", id))
    }

    fn n_vocab(&self) -> usize {
        self.n_vocab
    }

    fn token_beg(&self) -> TokenId {
        self.token_beg
    }

    fn is_known_language(&self, _name: &str) -> bool {
        true
    }

    fn decode(
        &self,
        _audio: &[f32],
        _params: &DecodeParams,
        filter: Option<&mut LogitsFilter<'_>>,
    ) -> Result<Vec<DecodedToken>> {
        if let Some(filter) = filter {
            for prefix in &self.filter_prefixes {
                let mut logits = vec![0.0f32; self.n_vocab];
                filter(prefix, &mut logits);
            }
        }
        Ok(self.decode_tokens.clone())
    }
}

/// VAD stub: the probability is the largest absolute sample in the frame,
/// so tests encode probabilities directly into the audio.
struct AmplitudeVad;

impl VadService for AmplitudeVad {
    fn infer(&mut self, frame: &[f32]) -> Result<f32> {
        Ok(frame.iter().fold(0.0f32, |acc, s| acc.max(s.abs())).clamp(0.0, 1.0))
    }

    fn reset(&mut self) {}
}

/// VAD stub that always fails.
struct BrokenVad;

impl VadService for BrokenVad {
    fn infer(&mut self, _frame: &[f32]) -> Result<f32> {
        Err(ScribeError::VadInference {
            message: "stub failure".to_string(),
        })
    }

    fn reset(&mut self) {}
}

fn segmenter_config(step_ms: i64) -> SegmenterConfig {
    SegmenterConfig {
        start_threshold: 0.60,
        stop_threshold: 0.35,
        step_samples: if step_ms >= 0 {
            Some(samples(step_ms as u64).max(1))
        } else {
            None
        },
        min_segment_samples: samples(250) as usize,
        max_segment_samples: samples(12_000),
        min_silence_samples: samples(150),
        pre_padding_samples: samples(200) as usize,
        post_padding_samples: samples(350),
        debug: false,
    }
}

fn decode_options(bias_decoding: bool) -> DecodeOptions {
    DecodeOptions {
        language: "en".to_string(),
        n_threads: 1,
        send_prompt: false,
        bias_decoding,
        beam_size: 0,
        bias: streamscribe::bias::BiasConfig {
            bias_first_logit: 0.35,
            bias_continuation_logit: 0.85,
            top_k: 50,
            prob_threshold: 20.0,
            prefix_text: false,
            boosted_k: 24,
        },
    }
}

fn build_pipeline(
    model: StubModel,
    dictionary_path: Option<PathBuf>,
    step_ms: i64,
    bias_decoding: bool,
) -> Pipeline<StubModel, AmplitudeVad> {
    let dictionary = DictionaryManager::new(
        dictionary_path,
        Duration::from_millis(0),
        false,
        false,
    );
    Pipeline::new(
        model,
        AmplitudeVad,
        dictionary,
        EventSink::capturing(bias_decoding),
        segmenter_config(step_ms),
        decode_options(bias_decoding),
        true,
    )
}

fn events_of(lines: &[String], kind: &str) -> Vec<Value> {
    lines
        .iter()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(|v| v["event"] == kind)
        .collect()
}

fn feed_frames(pipeline: &mut Pipeline<StubModel, AmplitudeVad>, value: f32, frames: usize) {
    pipeline.push_samples(&vec![value; frames * FRAME]);
    pipeline.process_pending();
}

#[test]
fn pure_silence_yields_vad_events_and_no_segments() {
    let mut pipeline = build_pipeline(StubModel::new(), None, -1, false);

    // 2.0 s of zeros: 62 complete frames, 256 trailing samples stay queued.
    pipeline.push_samples(&vec![0.0; 2 * SR as usize]);
    pipeline.process_pending();

    let lines = pipeline.sink().captured_lines();
    let vad = events_of(&lines, "vad");
    assert_eq!(vad.len(), 62);
    assert_eq!(vad[0]["prob"], 0.0);
    assert_eq!(vad[0]["vad_chunk_samples"], 512);
    assert_eq!(vad[0]["audio_time_ms"], 32);
    assert!(events_of(&lines, "segment").is_empty());
}

#[test]
fn single_utterance_emits_one_final_segment() {
    let mut pipeline = build_pipeline(StubModel::new(), None, -1, false);

    feed_frames(&mut pipeline, 0.0, 12); // 384 ms pre-roll silence
    feed_frames(&mut pipeline, 0.9, 25); // 800 ms voiced
    feed_frames(&mut pipeline, 0.05, 16); // trailing silence

    let lines = pipeline.sink().captured_lines();
    let segments = events_of(&lines, "segment");
    assert_eq!(segments.len(), 1);

    let seg = &segments[0];
    assert_eq!(seg["segment_index"], 0);
    assert_eq!(seg["final"], true);
    assert_eq!(seg["partial_seq"], 0);
    // Trigger at frame 13, pre-roll capped at 200 ms.
    assert_eq!(seg["start_ms"], 184);
    // Pre-roll + tone + post padding.
    assert_eq!(seg["duration_ms"], 1350);
    assert_eq!(
        seg["end_ms"].as_i64().unwrap() - seg["start_ms"].as_i64().unwrap(),
        seg["duration_ms"].as_i64().unwrap()
    );
    assert!(seg["avg_vad"].as_f64().unwrap() > 0.5);
    assert_eq!(seg["text"], " hello");
    assert_eq!(seg["tokens"][0]["leading_space"], true);
    // Token timestamps are absolute: segment start + 10 ms units.
    assert_eq!(seg["tokens"][0]["t0_ms"], 184);
    assert_eq!(seg["tokens"][0]["t1_ms"], 584);
}

#[test]
fn partial_cadence_then_final() {
    let mut pipeline = build_pipeline(StubModel::new(), None, 200, false);

    feed_frames(&mut pipeline, 0.9, 32); // ~1.02 s voiced
    feed_frames(&mut pipeline, 0.05, 16);

    let lines = pipeline.sink().captured_lines();
    let segments = events_of(&lines, "segment");
    let partials: Vec<&Value> = segments.iter().filter(|s| s["final"] == false).collect();
    let finals: Vec<&Value> = segments.iter().filter(|s| s["final"] == true).collect();

    assert!(partials.len() >= 3, "expected several partials, got {}", partials.len());
    for (i, partial) in partials.iter().enumerate() {
        assert_eq!(partial["partial_seq"], i as i64);
        assert_eq!(partial["segment_index"], 0);
    }
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0]["partial_seq"], partials.len() as i64);

    // All partials precede the final in stream order.
    let final_pos = lines
        .iter()
        .position(|l| l.contains("\"final\":true"))
        .unwrap();
    let last_partial_pos = lines
        .iter()
        .rposition(|l| l.contains("\"final\":false") && l.contains("\"event\":\"segment\""))
        .unwrap();
    assert!(last_partial_pos < final_pos);
}

#[test]
fn forced_flush_caps_segment_duration() {
    let mut pipeline = build_pipeline(StubModel::new(), None, -1, false);

    // 13 s of continuous speech against a 12 s cap.
    feed_frames(&mut pipeline, 0.9, 407);

    let lines = pipeline.sink().captured_lines();
    let segments = events_of(&lines, "segment");
    assert_eq!(segments.len(), 1);
    let duration = segments[0]["duration_ms"].as_i64().unwrap();
    assert!((12_000..=12_032).contains(&duration), "duration {}", duration);
    assert_eq!(segments[0]["final"], true);
}

#[test]
fn dictionary_continuation_bias_reaches_logits_packet() {
    let dir = tempfile::tempdir().unwrap();
    let dict_path = dir.path().join("dict.txt");
    std::fs::write(&dict_path, "openflow").unwrap();

    let mut model = StubModel::new();
    model
        .vocab
        .insert("openflow".to_string(), vec![401, 402]);
    model
        .vocab
        .insert(" openflow".to_string(), vec![501, 502]);
    // The decode prefix ends on the first token of " openflow".
    model.filter_prefixes = vec![vec![501]];

    let mut pipeline = build_pipeline(model, Some(dict_path), -1, true);
    pipeline.startup_dictionary_reload();

    feed_frames(&mut pipeline, 0.9, 25);
    feed_frames(&mut pipeline, 0.05, 16);

    let lines = pipeline.sink().captured_lines();
    let logits = events_of(&lines, "logits");
    assert_eq!(logits.len(), 1);

    let packet = &logits[0];
    assert_eq!(packet["segment_index"], 0);
    assert_eq!(packet["final"], true);
    assert_eq!(packet["prefix_len"], 1);
    assert_eq!(packet["boosted_cont_count"], 1);
    assert_eq!(packet["boosted_first_total"], 0);

    let boosted = packet["boosted"].as_array().unwrap();
    let cont: Vec<&Value> = boosted
        .iter()
        .filter(|b| b["kind"] == "continuation")
        .collect();
    assert_eq!(cont.len(), 1);
    assert_eq!(cont[0]["id"], 502);
    assert!((cont[0]["bias"].as_f64().unwrap() - 0.85).abs() < 1e-6);
    let delta =
        cont[0]["logit_after"].as_f64().unwrap() - cont[0]["logit_before"].as_f64().unwrap();
    assert!((delta - 0.85).abs() < 1e-5);

    // Packets for a decode precede its segment event.
    let logits_pos = lines.iter().position(|l| l.contains("\"event\":\"logits\"")).unwrap();
    let segment_pos = lines.iter().position(|l| l.contains("\"event\":\"segment\"")).unwrap();
    assert!(logits_pos < segment_pos);
}

#[test]
fn empty_prefix_gets_first_token_boosts() {
    let dir = tempfile::tempdir().unwrap();
    let dict_path = dir.path().join("dict.txt");
    std::fs::write(&dict_path, "widget").unwrap();

    let mut model = StubModel::new();
    model.vocab.insert("widget".to_string(), vec![603, 604]);
    model.vocab.insert(" widget".to_string(), vec![601, 602]);
    model.filter_prefixes = vec![vec![]];

    let mut pipeline = build_pipeline(model, Some(dict_path), -1, true);
    pipeline.startup_dictionary_reload();

    feed_frames(&mut pipeline, 0.9, 25);
    feed_frames(&mut pipeline, 0.05, 16);

    let lines = pipeline.sink().captured_lines();
    let logits = events_of(&lines, "logits");
    assert_eq!(logits.len(), 1);
    let packet = &logits[0];
    // Two unique first tokens (603 and 601), both boosted.
    assert_eq!(packet["boosted_first_total"], 2);
    assert_eq!(packet["boosted_cont_count"], 0);
    assert_eq!(packet["dict_first_tokens"], 2);
    let first: Vec<&Value> = packet["boosted"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|b| b["kind"] == "first")
        .collect();
    assert_eq!(first.len(), 2);
}

#[test]
fn dictionary_hot_reload_between_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let dict_path = dir.path().join("dict.txt");
    std::fs::write(&dict_path, "").unwrap();

    let mut model = StubModel::new();
    model.vocab.insert("widget".to_string(), vec![603, 604]);
    model.vocab.insert(" widget".to_string(), vec![601, 602]);

    let mut pipeline = build_pipeline(model, Some(dict_path.clone()), -1, false);
    pipeline.startup_dictionary_reload();

    let lines = pipeline.sink().captured_lines();
    let initial = events_of(&lines, "dictionary");
    assert_eq!(initial.len(), 1);
    assert_eq!(initial[0]["reloaded"], true);
    assert_eq!(initial[0]["dict_entries"], 0);
    assert_eq!(initial[0]["segment_index"], -1);

    // The dictionary grows a word; the next decode must pick it up.
    std::thread::sleep(Duration::from_millis(20));
    std::fs::write(&dict_path, "widget").unwrap();

    feed_frames(&mut pipeline, 0.9, 25);
    feed_frames(&mut pipeline, 0.05, 16);

    let lines = pipeline.sink().captured_lines();
    let dictionary_events = events_of(&lines, "dictionary");
    let reloads: Vec<&Value> = dictionary_events
        .iter()
        .filter(|e| e["reloaded"] == true && e["segment_index"] != -1)
        .collect();
    assert_eq!(reloads.len(), 1);
    assert!(reloads[0]["dict_first_tokens"].as_u64().unwrap() >= 1);
    assert_eq!(reloads[0]["dict_entries_raw"], 1);
    assert_eq!(reloads[0]["ok"], true);
}

#[test]
fn vad_failure_drops_frames_without_events() {
    let dictionary = DictionaryManager::new(None, Duration::from_millis(0), false, false);
    let mut pipeline = Pipeline::new(
        StubModel::new(),
        BrokenVad,
        dictionary,
        EventSink::capturing(false),
        segmenter_config(-1),
        decode_options(false),
        true,
    );

    pipeline.push_samples(&vec![0.9; 10 * FRAME]);
    pipeline.process_pending();
    pipeline.flush(true);

    let lines = pipeline.sink().captured_lines();
    assert!(events_of(&lines, "vad").is_empty());
    assert!(events_of(&lines, "segment").is_empty());
}

#[test]
fn job_reset_restarts_timeline_and_indices() {
    let mut pipeline = build_pipeline(StubModel::new(), None, -1, false);

    feed_frames(&mut pipeline, 0.9, 25);
    pipeline.flush(true);
    let first_job = pipeline.sink().captured_lines();
    let segments = events_of(&first_job, "segment");
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0]["segment_index"], 0);

    pipeline.reset();

    feed_frames(&mut pipeline, 0.9, 25);
    pipeline.flush(true);
    let all = pipeline.sink().captured_lines();
    let segments = events_of(&all, "segment");
    assert_eq!(segments.len(), 2);
    // Indices restart per job, as does the timeline.
    assert_eq!(segments[1]["segment_index"], 0);
    assert_eq!(segments[1]["start_ms"], 0);
}
