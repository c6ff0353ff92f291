//! Whisper backend for the [`AcousticModel`] trait using whisper-rs.
//!
//! # Feature Gate
//!
//! This module requires the `whisper` feature (enabled by default) and
//! cmake to be installed. The context is loaded once with DTW token
//! timestamps enabled (base-English alignment preset) and reused for every
//! decode; each decode creates a fresh state.

use crate::error::{Result, ScribeError};
use crate::stt::model::{AcousticModel, DecodeParams, DecodedToken, LogitsFilter, Sampling, TokenId};
use std::ffi::c_void;
use std::os::raw::c_int;
use std::path::Path;
use std::sync::Once;
use whisper_rs::{
    DtwMode, DtwModelPreset, DtwParameters, FullParams, SamplingStrategy, WhisperContext,
    WhisperContextParameters, install_logging_hooks,
};

static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Long-lived whisper context.
pub struct WhisperModel {
    ctx: WhisperContext,
}

impl std::fmt::Debug for WhisperModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperModel")
            .field("ctx", &"<WhisperContext>")
            .finish()
    }
}

impl WhisperModel {
    /// Load a whisper model from `path`.
    ///
    /// # Errors
    /// Returns `ScribeError::ModelNotFound` if the file doesn't exist and
    /// `ScribeError::ModelLoad` if whisper rejects it.
    pub fn load(path: &Path, use_gpu: bool) -> Result<Self> {
        // Install logging hooks to suppress whisper.cpp output (only once)
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !path.exists() {
            return Err(ScribeError::ModelNotFound {
                path: path.display().to_string(),
            });
        }

        let mut context_params = WhisperContextParameters::default();
        context_params.use_gpu(use_gpu);
        context_params.dtw_parameters(DtwParameters {
            mode: DtwMode::ModelPreset {
                model_preset: DtwModelPreset::BaseEn,
            },
            ..Default::default()
        });

        let path_str = path.to_str().ok_or_else(|| ScribeError::ModelLoad {
            message: "Invalid UTF-8 in model path".to_string(),
        })?;
        let ctx = WhisperContext::new_with_params(path_str, context_params).map_err(|e| {
            ScribeError::ModelLoad {
                message: format!("Failed to load whisper model: {}", e),
            }
        })?;

        Ok(Self { ctx })
    }
}

/// Lifetime-erased hop from the C callback back into the Rust filter.
struct FilterBridge<'a, 'b> {
    filter: &'a mut LogitsFilter<'b>,
    n_vocab: usize,
}

unsafe extern "C" fn logits_filter_trampoline(
    _ctx: *mut whisper_rs_sys::whisper_context,
    _state: *mut whisper_rs_sys::whisper_state,
    tokens: *const whisper_rs_sys::whisper_token_data,
    n_tokens: c_int,
    logits: *mut f32,
    user_data: *mut c_void,
) {
    if logits.is_null() || user_data.is_null() {
        return;
    }
    let bridge = unsafe { &mut *(user_data as *mut FilterBridge) };

    let prefix: Vec<TokenId> = if tokens.is_null() || n_tokens <= 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(tokens, n_tokens as usize) }
            .iter()
            .map(|t| t.id)
            .collect()
    };
    let logits = unsafe { std::slice::from_raw_parts_mut(logits, bridge.n_vocab) };
    (bridge.filter)(&prefix, logits);
}

impl AcousticModel for WhisperModel {
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        self.ctx
            .tokenize(text, text.len() + 8)
            .map_err(|e| ScribeError::Decode {
                message: format!("tokenize failed: {}", e),
            })
    }

    fn token_text(&self, id: TokenId) -> Option<String> {
        self.ctx.token_to_str(id).ok().map(|s| s.to_string())
    }

    fn n_vocab(&self) -> usize {
        self.ctx.n_vocab().max(0) as usize
    }

    fn token_beg(&self) -> TokenId {
        self.ctx.token_beg()
    }

    fn is_known_language(&self, name: &str) -> bool {
        known_language(name)
    }

    fn decode(
        &self,
        audio: &[f32],
        params: &DecodeParams,
        filter: Option<&mut LogitsFilter<'_>>,
    ) -> Result<Vec<DecodedToken>> {
        let mut state = self.ctx.create_state().map_err(|e| ScribeError::Decode {
            message: format!("Failed to create whisper state: {}", e),
        })?;

        let strategy = match params.sampling {
            Sampling::Greedy => SamplingStrategy::Greedy { best_of: 1 },
            Sampling::BeamSearch { beam_size } => SamplingStrategy::BeamSearch {
                beam_size,
                patience: -1.0,
            },
        };
        let mut full_params = FullParams::new(strategy);

        if params.language == crate::defaults::AUTO_LANGUAGE {
            full_params.set_language(None);
        } else {
            full_params.set_language(Some(&params.language));
        }
        full_params.set_n_threads(params.n_threads);

        full_params.set_print_special(false);
        full_params.set_print_progress(false);
        full_params.set_print_realtime(false);
        full_params.set_print_timestamps(true);

        full_params.set_no_context(true);
        full_params.set_single_segment(false);
        full_params.set_max_tokens(0);
        full_params.set_token_timestamps(true);
        full_params.set_thold_pt(0.01);
        full_params.set_entropy_thold(2.40);
        full_params.set_logprob_thold(-1.0);
        full_params.set_no_speech_thold(0.0);

        if let Some(prompt) = &params.initial_prompt {
            full_params.set_initial_prompt(prompt);
        }

        // The bridge lives on this stack frame only; whisper never retains
        // the callback past whisper_full().
        let mut bridge_slot;
        if let Some(filter) = filter {
            bridge_slot = FilterBridge {
                filter,
                n_vocab: self.n_vocab(),
            };
            full_params.set_filter_logits_callback(Some(logits_filter_trampoline));
            full_params
                .set_filter_logits_callback_user_data(&mut bridge_slot as *mut _ as *mut c_void);
        }

        state
            .full(full_params, audio)
            .map_err(|e| ScribeError::Decode {
                message: format!("whisper inference failed: {}", e),
            })?;

        let mut decoded = Vec::new();
        for segment in state.as_iter() {
            for i in 0..segment.n_tokens() {
                let Some(token) = segment.get_token(i) else {
                    continue;
                };
                let data = token.token_data();
                let text = match token.to_str_lossy() {
                    Ok(text) => text.into_owned(),
                    Err(_) => continue,
                };
                decoded.push(DecodedToken {
                    id: data.id,
                    text,
                    t0: data.t0,
                    t1: data.t1,
                });
            }
        }
        Ok(decoded)
    }
}

/// Whether whisper knows the given language code ("auto" excluded).
pub fn known_language(name: &str) -> bool {
    (0..=whisper_rs::get_lang_max_id())
        .any(|id| whisper_rs::get_lang_str(id) == Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fails_for_missing_model() {
        let result = WhisperModel::load(Path::new("/nonexistent/model.bin"), false);
        match result {
            Err(ScribeError::ModelNotFound { path }) => {
                assert_eq!(path, "/nonexistent/model.bin");
            }
            _ => panic!("Expected ModelNotFound error"),
        }
    }

    #[test]
    fn load_fails_for_invalid_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-model.bin");
        std::fs::write(&path, b"definitely not ggml").unwrap();

        let result = WhisperModel::load(&path, false);
        assert!(matches!(result, Err(ScribeError::ModelLoad { .. })));
    }

    #[test]
    fn known_language_accepts_english() {
        assert!(known_language("en"));
        assert!(known_language("de"));
    }

    #[test]
    fn known_language_rejects_nonsense() {
        assert!(!known_language("xx"));
        assert!(!known_language(""));
        assert!(!known_language("auto"));
    }
}
