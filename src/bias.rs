//! Dictionary logit biasing and decode-step diagnostics.
//!
//! Runs inside the acoustic model's logits filter callback, once per decode
//! step per beam. Phase A additively boosts dictionary tokens: continuation
//! boosts when the beam's token prefix ends on a known entry prefix, first
//! token boosts otherwise. Phase B assembles a `logits` diagnostic packet
//! (top-k probabilities, boosted tokens, prefix hashes) when anything will
//! consume it.
//!
//! The filter borrows everything it touches and lives for exactly one decode
//! call; nothing here is retained across decodes.

use crate::dictionary::DictionaryIndices;
use crate::events::{BoostKind, BoostedToken, EventSink, LogitsPacket, TopToken};
use crate::stt::model::is_control_piece;
use crate::stt::{AcousticModel, TokenId};
use std::collections::HashSet;

const FNV_OFFSET: u64 = 14_695_981_039_346_656_037;
const FNV_PRIME: u64 = 1_099_511_628_211;

/// Bias magnitudes and diagnostic options, fixed for one decode.
#[derive(Debug, Clone)]
pub struct BiasConfig {
    pub bias_first_logit: f32,
    pub bias_continuation_logit: f32,
    pub top_k: usize,
    pub prob_threshold: f32,
    pub prefix_text: bool,
    pub boosted_k: usize,
}

/// Which decode the diagnostic packets belong to.
#[derive(Debug, Clone, Copy)]
pub struct DecodeIdentity {
    pub segment_index: i32,
    pub partial_seq: i32,
    pub is_final: bool,
}

/// Result of the additive phase: accumulated continuation boosts in
/// first-match order, plus how many first-token boosts were applied.
#[derive(Debug, Default, PartialEq)]
pub struct BoostSummary {
    pub continuation: Vec<(TokenId, f32)>,
    pub first_total: usize,
}

impl BoostSummary {
    fn continuation_bias(&self, id: TokenId) -> Option<f32> {
        self.continuation
            .iter()
            .find(|(tid, _)| *tid == id)
            .map(|(_, b)| *b)
    }
}

/// Add `bias` to `logits[id]` unless the id is out of range, falls in the
/// timestamp/control range, or the current logit is non-finite.
fn add_bias(logits: &mut [f32], token_beg: TokenId, id: TokenId, bias: f32) -> bool {
    if id < 0 || id as usize >= logits.len() {
        return false;
    }
    if token_beg > 0 && id >= token_beg {
        return false;
    }
    let slot = &mut logits[id as usize];
    if !slot.is_finite() {
        return false;
    }
    *slot += bias;
    true
}

/// Phase A: apply continuation and first-token boosts in place.
///
/// For each dictionary sequence of length >= 2, the longest suffix of
/// `prefix` equal to a proper prefix of the sequence selects the next token
/// to boost (at most once per sequence). First-token boosts apply only when
/// no continuation matched, so unrelated entries are not kept hot while a
/// beam is already riding a dictionary path.
pub fn apply_additive_bias(
    prefix: &[TokenId],
    logits: &mut [f32],
    dict: &DictionaryIndices,
    token_beg: TokenId,
    bias_first: f32,
    bias_continuation: f32,
) -> BoostSummary {
    let mut summary = BoostSummary::default();

    for seq in &dict.token_seqs {
        if seq.len() < 2 {
            continue;
        }
        let max_l = prefix.len().min(seq.len() - 1);
        for l in (1..=max_l).rev() {
            if prefix[prefix.len() - l..] == seq[..l] {
                let next_id = seq[l];
                add_bias(logits, token_beg, next_id, bias_continuation);
                match summary.continuation.iter_mut().find(|(id, _)| *id == next_id) {
                    Some((_, acc)) => *acc += bias_continuation,
                    None => summary.continuation.push((next_id, bias_continuation)),
                }
                break;
            }
        }
    }

    if summary.continuation.is_empty() {
        for &tid in &dict.first_tokens_ordered {
            add_bias(logits, token_beg, tid, bias_first);
            summary.first_total += 1;
        }
    }

    summary
}

/// FNV-1a over a token id sequence; returns `(hash, hash_before_last_id)`.
pub fn prefix_hashes(prefix: &[TokenId]) -> (u64, u64) {
    let mut hash = FNV_OFFSET;
    let mut prev = FNV_OFFSET;
    for (i, &id) in prefix.iter().enumerate() {
        if i == prefix.len() - 1 {
            prev = hash;
        }
        hash = (hash ^ (id as u32 as u64)).wrapping_mul(FNV_PRIME);
    }
    if prefix.is_empty() {
        prev = hash;
    }
    (hash, prev)
}

/// Keep at most the trailing `max_bytes` of `text`, respecting char
/// boundaries.
fn truncate_to_tail(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = text.len() - max_bytes;
    while cut < text.len() && !text.is_char_boundary(cut) {
        cut += 1;
    }
    text.drain(..cut);
}

/// Concatenate the text of up to the last 48 prefix tokens, skipping control
/// pieces, bounded to the trailing 256 bytes.
fn render_prefix_text<M: AcousticModel>(model: &M, prefix: &[TokenId]) -> String {
    let mut out = String::with_capacity(128);
    let take = prefix.len().min(48);
    for &id in &prefix[prefix.len() - take..] {
        let Some(piece) = model.token_text(id) else {
            continue;
        };
        if is_control_piece(&piece) {
            continue;
        }
        out.push_str(&piece);
        truncate_to_tail(&mut out, 256);
    }
    out
}

/// Phase B: build the diagnostic packet for one decode step, or `None` when
/// the logits row is degenerate (no finite maximum or empty softmax mass).
pub fn build_logits_packet<M: AcousticModel>(
    model: &M,
    identity: DecodeIdentity,
    config: &BiasConfig,
    dict: &DictionaryIndices,
    dict_entries_raw: usize,
    prefix: &[TokenId],
    logits: &[f32],
    summary: &BoostSummary,
) -> Option<LogitsPacket> {
    let top_k = config.top_k.max(1);

    let mut max_logit = f32::NEG_INFINITY;
    for &v in logits {
        if v.is_finite() && v > max_logit {
            max_logit = v;
        }
    }
    if !max_logit.is_finite() {
        return None;
    }

    let thresholded = config.prob_threshold > 0.0;
    let min_v = max_logit - config.prob_threshold;
    let mut sum_exp = 0.0f64;
    for &v in logits {
        if !v.is_finite() {
            continue;
        }
        if thresholded && v < min_v {
            continue;
        }
        sum_exp += ((v as f64) - (max_logit as f64)).exp();
    }
    if sum_exp <= 0.0 {
        return None;
    }

    let mut candidates: Vec<(TokenId, f32)> = logits
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, &v)| (i as TokenId, v))
        .collect();
    if candidates.len() > top_k {
        candidates.select_nth_unstable_by(top_k - 1, |a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        candidates.truncate(top_k);
    }
    candidates.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    let top = candidates;

    let (hash, prev_hash) = prefix_hashes(prefix);

    let prefix_text = if config.prefix_text {
        render_prefix_text(model, prefix)
    } else {
        String::new()
    };

    let mut boosted = Vec::new();
    if config.boosted_k > 0 {
        let mut emitted_ids: HashSet<TokenId> = HashSet::new();
        let mut push = |boosted: &mut Vec<BoostedToken>,
                        emitted_ids: &mut HashSet<TokenId>,
                        id: TokenId,
                        kind: BoostKind,
                        bias: f32,
                        in_top: bool| {
            if boosted.len() >= config.boosted_k || !emitted_ids.insert(id) {
                return;
            }
            let logit_after = logits[id as usize];
            boosted.push(BoostedToken {
                id,
                text: model.token_text(id).unwrap_or_default(),
                bias,
                in_top,
                logit_before: logit_after - bias,
                logit_after,
                kind,
            });
        };

        // First-token boosts currently visible in the top-k.
        if !dict.first_token_ids.is_empty() && config.bias_first_logit != 0.0 {
            for &(id, _) in &top {
                if boosted.len() >= config.boosted_k {
                    break;
                }
                if dict.first_token_ids.contains(&id) {
                    push(
                        &mut boosted,
                        &mut emitted_ids,
                        id,
                        BoostKind::First,
                        config.bias_first_logit,
                        true,
                    );
                }
            }
        }

        // Continuation boosts, preferring ones in the top-k.
        for &(id, _) in &top {
            if boosted.len() >= config.boosted_k {
                break;
            }
            if let Some(bias) = summary.continuation_bias(id) {
                push(
                    &mut boosted,
                    &mut emitted_ids,
                    id,
                    BoostKind::Continuation,
                    bias,
                    true,
                );
            }
        }
        for &(id, bias) in &summary.continuation {
            if boosted.len() >= config.boosted_k {
                break;
            }
            push(
                &mut boosted,
                &mut emitted_ids,
                id,
                BoostKind::Continuation,
                bias,
                false,
            );
        }
    }

    let top_tokens: Vec<TopToken> = top
        .iter()
        .map(|&(id, v)| TopToken {
            id,
            text: model.token_text(id).unwrap_or_default(),
            logit: v,
            prob: ((v as f64) - (max_logit as f64)).exp() / sum_exp,
        })
        .collect();

    let (prefix_last_id, prefix_last_text) = match prefix.last() {
        Some(&id) => (Some(id), Some(model.token_text(id).unwrap_or_default())),
        None => (None, None),
    };

    Some(LogitsPacket {
        segment_index: identity.segment_index,
        partial_seq: identity.partial_seq,
        is_final: identity.is_final,
        decode_step: prefix.len(),
        prefix_len: prefix.len(),
        prefix_hash: format!("{:016x}", hash),
        prefix_prev_hash: format!("{:016x}", prev_hash),
        prefix_text,
        prob_mode: if thresholded { "threshold" } else { "full" }.to_string(),
        prob_threshold: config.prob_threshold,
        bias_first_logit: config.bias_first_logit,
        bias_continuation_logit: config.bias_continuation_logit,
        dict_entries: dict_entries_raw,
        dict_first_tokens: dict.first_tokens_ordered.len(),
        boosted_first_total: summary.first_total,
        boosted_cont_count: summary.continuation.len(),
        prefix_last_id,
        prefix_last_text,
        boosted,
        top: top_tokens,
    })
}

/// Per-decode bias filter: phase A in place, phase B emitted through the
/// sink. Installed into the acoustic model's logits callback for exactly one
/// decode.
pub struct BiasFilter<'a, M: AcousticModel> {
    pub model: &'a M,
    pub identity: DecodeIdentity,
    pub config: &'a BiasConfig,
    pub dict: &'a DictionaryIndices,
    pub dict_entries_raw: usize,
    pub sink: &'a EventSink,
}

impl<'a, M: AcousticModel> BiasFilter<'a, M> {
    /// Entry point called from the decode callback.
    pub fn apply(&self, prefix: &[TokenId], logits: &mut [f32]) {
        let summary = apply_additive_bias(
            prefix,
            logits,
            self.dict,
            self.model.token_beg(),
            self.config.bias_first_logit,
            self.config.bias_continuation_logit,
        );

        if !self.sink.wants_logits_packets() {
            return;
        }

        if let Some(packet) = build_logits_packet(
            self.model,
            self.identity,
            self.config,
            self.dict,
            self.dict_entries_raw,
            prefix,
            logits,
            &summary,
        ) {
            self.sink.emit_logits(&packet);
        }
    }
}
