//! Hot-reloadable decode dictionary.
//!
//! Watches a plain-text vocabulary file (entries separated by any ASCII
//! whitespace), reloads it when the mtime changes, and maintains the token
//! indices consumed by the prompt builder and the bias callback. Each entry
//! is tokenized twice — as written and with a leading space — because the
//! decoder may produce either representation depending on context.
//!
//! Index replacement is copy-on-write: the decode path takes an
//! [`Arc<DictionaryIndices>`] snapshot at decode entry, so the bias callback
//! never observes a half-built dictionary.

use crate::events::{DictWord, StreamEvent, TokenRef};
use crate::stt::{AcousticModel, TokenId};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Maximum tokenized entries sampled into a `dictionary` event.
const MAX_WORD_SAMPLES: usize = 40;

/// Derived token indices for one dictionary snapshot.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DictionaryIndices {
    /// One token sequence per kept variant, each of length >= 1.
    pub token_seqs: Vec<Vec<TokenId>>,
    /// The originating entry text, parallel to `token_seqs`.
    pub entry_texts: Vec<String>,
    /// Unique first token ids, for O(1) membership.
    pub first_token_ids: HashSet<TokenId>,
    /// The same ids in first-seen order.
    pub first_tokens_ordered: Vec<TokenId>,
    /// Sum of all sequence lengths.
    pub total_tokens: usize,
}

/// Identity of the decode a dictionary event precedes (`-1/-1/false` for the
/// startup reload).
#[derive(Debug, Clone, Copy)]
pub struct ReloadIdentity {
    pub segment_index: i32,
    pub partial_seq: i32,
    pub is_final: bool,
}

impl ReloadIdentity {
    pub fn startup() -> Self {
        Self {
            segment_index: -1,
            partial_seq: -1,
            is_final: false,
        }
    }
}

/// Split raw dictionary text on ASCII whitespace, trimming and deduplicating
/// while preserving first-seen order.
pub fn split_dictionary_entries(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for word in raw.split(|c: char| c.is_ascii_whitespace()) {
        let word = word.trim();
        if word.is_empty() {
            continue;
        }
        if seen.insert(word.to_string()) {
            out.push(word.to_string());
        }
    }
    out
}

/// File-backed dictionary with mtime polling and tokenized indices.
pub struct DictionaryManager {
    path: Option<PathBuf>,
    poll_interval: Duration,
    verbose_words: bool,
    debug: bool,

    cache: String,
    indices: Arc<DictionaryIndices>,
    entries_raw: usize,
    last_error: String,
    last_reload: Option<Instant>,
    last_mtime: Option<SystemTime>,
}

impl DictionaryManager {
    pub fn new(
        path: Option<PathBuf>,
        poll_interval: Duration,
        verbose_words: bool,
        debug: bool,
    ) -> Self {
        Self {
            path,
            poll_interval,
            verbose_words,
            debug,
            cache: String::new(),
            indices: Arc::new(DictionaryIndices::default()),
            entries_raw: 0,
            last_error: String::new(),
            last_reload: None,
            last_mtime: None,
        }
    }

    /// Raw file contents from the last successful reload (prompt source).
    pub fn cache(&self) -> &str {
        &self.cache
    }

    /// Snapshot of the current indices for one decode.
    pub fn indices(&self) -> Arc<DictionaryIndices> {
        Arc::clone(&self.indices)
    }

    /// Number of unique whitespace-split entries in the last reload.
    pub fn entries_raw(&self) -> usize {
        self.entries_raw
    }

    /// Reload the dictionary if forced or the poll interval elapsed and the
    /// file changed. Returns the `dictionary` event to emit, or `None` when
    /// the attempt was skipped by the poll gate.
    pub fn reload_if_needed<M: AcousticModel>(
        &mut self,
        model: &M,
        identity: ReloadIdentity,
        force: bool,
    ) -> Option<StreamEvent> {
        let Some(path) = self.path.clone() else {
            self.clear_with_error("dictionary_file not set");
            return Some(self.make_event(model, identity, true, true));
        };

        if !force
            && let Some(last) = self.last_reload
            && last.elapsed() < self.poll_interval
        {
            return None;
        }
        self.last_reload = Some(Instant::now());

        let mtime = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(e) => {
                self.clear_with_error(&e.to_string());
                return Some(self.make_event(model, identity, true, true));
            }
        };

        if !force && self.last_mtime == Some(mtime) {
            // Still emit a status line so downstream UIs can show what the
            // transcriber thinks it has.
            return Some(self.make_event(model, identity, true, false));
        }

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => {
                self.clear_with_error("failed to open dictionary_file");
                return Some(self.make_event(model, identity, true, true));
            }
        };

        self.cache = raw;
        self.last_mtime = Some(mtime);
        self.last_error.clear();

        let entries = split_dictionary_entries(&self.cache);
        self.entries_raw = entries.len();

        let mut indices = DictionaryIndices::default();
        let mut first_seen = HashSet::new();

        for entry in &entries {
            let mut variants = Vec::with_capacity(2);
            variants.push(entry.clone());
            if !entry.starts_with(' ') {
                variants.push(format!(" {}", entry));
            }

            for text in variants {
                let Ok(seq) = model.tokenize(&text) else {
                    continue;
                };
                if seq.is_empty() {
                    continue;
                }
                indices.total_tokens += seq.len();
                let first = seq[0];
                if first_seen.insert(first) {
                    indices.first_tokens_ordered.push(first);
                    indices.first_token_ids.insert(first);
                }
                indices.entry_texts.push(entry.clone());
                indices.token_seqs.push(seq);
            }
        }

        if self.debug {
            eprintln!(
                "streamscribe: dictionary reload: {} raw entries, {} tokenized entries, {} unique first tokens, {} total tokens",
                entries.len(),
                indices.token_seqs.len(),
                indices.first_tokens_ordered.len(),
                indices.total_tokens,
            );
        }

        self.indices = Arc::new(indices);
        Some(self.make_event(model, identity, true, true))
    }

    fn clear_with_error(&mut self, error: &str) {
        self.last_error = error.to_string();
        self.entries_raw = 0;
        self.cache.clear();
        self.indices = Arc::new(DictionaryIndices::default());
    }

    fn make_event<M: AcousticModel>(
        &self,
        model: &M,
        identity: ReloadIdentity,
        attempted: bool,
        reloaded: bool,
    ) -> StreamEvent {
        let words = if self.verbose_words {
            self.indices
                .entry_texts
                .iter()
                .zip(self.indices.token_seqs.iter())
                .take(MAX_WORD_SAMPLES)
                .map(|(text, seq)| DictWord {
                    text: text.clone(),
                    tokens: seq
                        .iter()
                        .map(|&id| TokenRef {
                            id,
                            text: model.token_text(id).unwrap_or_default(),
                        })
                        .collect(),
                })
                .collect()
        } else {
            Vec::new()
        };

        StreamEvent::Dictionary {
            dictionary_file: self
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            segment_index: identity.segment_index,
            partial_seq: identity.partial_seq,
            is_final: identity.is_final,
            attempted,
            reloaded,
            ok: self.last_error.is_empty(),
            error: self.last_error.clone(),
            dict_entries_raw: self.entries_raw,
            dict_entries: self.indices.token_seqs.len(),
            dict_first_tokens: self.indices.first_tokens_ordered.len(),
            dict_total_tokens: self.indices.total_tokens,
            dict_cache_bytes: self.cache.len(),
            words,
        }
    }
}
