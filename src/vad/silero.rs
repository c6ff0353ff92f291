//! Silero VAD over ONNX Runtime.
//!
//! Wraps the official Silero VAD model published at
//! <https://github.com/snakers4/silero-vad>, supporting both the v3/v4 LSTM
//! interface (separate `h`/`c` tensors) and the v5 GRU interface (single
//! `state` tensor). Inference runs on exact 512-sample windows at 16 kHz
//! and returns the model's speech probability for that window.

use std::path::Path;

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;

use super::VadService;
use crate::defaults::{SAMPLE_RATE, VAD_FRAME_SAMPLES};
use crate::error::{Result, ScribeError};

/// v3/v4 LSTM state size: 2 layers × 1 batch × 64 units (each of h and c).
const LSTM_SIZE: usize = 128;
/// v5 GRU state size: 2 layers × 1 batch × 128 units.
const GRU_STATE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SileroIoMode {
    /// v3/v4 LSTM: separate `h` [2,1,64] and `c` [2,1,64] state tensors.
    StatefulLstm,
    /// v5 GRU: single `state` [2,1,128] tensor, output `stateN`.
    StatefulGru,
    /// No state passing (stateless fallback).
    Stateless,
}

/// Neural VAD producing per-frame speech probabilities.
#[derive(Debug)]
pub struct SileroVad {
    session: Session,
    io_mode: SileroIoMode,
    input_name: String,
    sr_name: Option<String>,
    output_name: String,
    // v3/v4 LSTM state names
    h_name: Option<String>,
    c_name: Option<String>,
    hn_name: Option<String>,
    cn_name: Option<String>,
    // v5 GRU state names
    state_name: Option<String>,
    state_out_name: Option<String>,
    // recurrent state buffers
    h: Vec<f32>,
    c: Vec<f32>,
    state: Vec<f32>,
}

impl SileroVad {
    /// Load the Silero VAD ONNX model from `path` and probe it once with a
    /// zero window so I/O problems surface at startup, not mid-stream.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ScribeError::VadModelNotFound {
                path: path.display().to_string(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(session_error)?
            .commit_from_file(path)
            .map_err(session_error)?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let input_name = resolve_name(&input_names, &["input", "audio", "x"])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| ScribeError::VadSession {
                message: "Silero model has no inputs".into(),
            })?;
        let sr_name = resolve_name(&input_names, &["sr", "sample_rate"]);

        let h_name = resolve_name(&input_names, &["h", "state_h"]);
        let c_name = resolve_name(&input_names, &["c", "state_c"]);
        let state_name = resolve_name(&input_names, &["state", "h_0", "hidden"]);

        let output_name = resolve_name(&output_names, &["output", "speech_prob", "prob"])
            .or_else(|| output_names.first().cloned())
            .ok_or_else(|| ScribeError::VadSession {
                message: "Silero model has no outputs".into(),
            })?;
        let hn_name = resolve_name(&output_names, &["hn", "state_hn", "h_out"]);
        let cn_name = resolve_name(&output_names, &["cn", "state_cn", "c_out"]);
        let state_out_name =
            resolve_name(&output_names, &["stateN", "state_out", "h_0_out", "hn_out"]);

        let io_mode =
            if h_name.is_some() && c_name.is_some() && hn_name.is_some() && cn_name.is_some() {
                SileroIoMode::StatefulLstm
            } else if state_name.is_some() {
                SileroIoMode::StatefulGru
            } else {
                SileroIoMode::Stateless
            };

        let mut vad = Self {
            session,
            io_mode,
            input_name,
            sr_name,
            output_name,
            h_name,
            c_name,
            hn_name,
            cn_name,
            state_name,
            state_out_name,
            h: vec![0.0; LSTM_SIZE],
            c: vec![0.0; LSTM_SIZE],
            state: vec![0.0; GRU_STATE_SIZE],
        };

        let probe = vec![0.0f32; VAD_FRAME_SAMPLES];
        vad.run_window(&probe)?;
        vad.reset();

        Ok(vad)
    }

    /// Run one 512-sample window; update recurrent state; return the speech
    /// probability.
    fn run_window(&mut self, window: &[f32]) -> Result<f32> {
        let input_arr = Array2::<f32>::from_shape_vec((1, VAD_FRAME_SAMPLES), window.to_vec())
            .map_err(|e| ScribeError::VadSession {
                message: e.to_string(),
            })?;
        let input_val = Value::from_array(input_arr).map_err(session_error)?;

        let mut input_values: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];

        if let Some(sr_name) = &self.sr_name {
            let sr_arr = Array1::<i64>::from_elem(1, SAMPLE_RATE as i64);
            let sr_val = Value::from_array(sr_arr).map_err(session_error)?;
            input_values.push((sr_name.clone(), sr_val.into()));
        }

        match self.io_mode {
            SileroIoMode::StatefulLstm => {
                let h_arr = Array3::<f32>::from_shape_vec((2, 1, 64), self.h.clone())
                    .map_err(|e| ScribeError::VadSession {
                        message: e.to_string(),
                    })?;
                let c_arr = Array3::<f32>::from_shape_vec((2, 1, 64), self.c.clone())
                    .map_err(|e| ScribeError::VadSession {
                        message: e.to_string(),
                    })?;
                if let Some(h_name) = &self.h_name {
                    input_values.push((h_name.clone(), Value::from_array(h_arr).map_err(session_error)?.into()));
                }
                if let Some(c_name) = &self.c_name {
                    input_values.push((c_name.clone(), Value::from_array(c_arr).map_err(session_error)?.into()));
                }
            }
            SileroIoMode::StatefulGru => {
                let state_arr = Array3::<f32>::from_shape_vec((2, 1, 128), self.state.clone())
                    .map_err(|e| ScribeError::VadSession {
                        message: e.to_string(),
                    })?;
                if let Some(state_name) = &self.state_name {
                    input_values.push((
                        state_name.clone(),
                        Value::from_array(state_arr).map_err(session_error)?.into(),
                    ));
                }
            }
            SileroIoMode::Stateless => {}
        }

        let outputs = self.session.run(input_values).map_err(session_error)?;

        let prob_output = outputs
            .get(self.output_name.as_str())
            .unwrap_or(&outputs[0]);
        let (_, prob_data) = prob_output
            .try_extract_tensor::<f32>()
            .map_err(session_error)?;
        let prob = prob_data.first().copied().unwrap_or(0.0);

        match self.io_mode {
            SileroIoMode::StatefulLstm => match (self.hn_name.as_ref(), self.cn_name.as_ref()) {
                (Some(hn_name), Some(cn_name)) => {
                    if let (Some(hn_out), Some(cn_out)) =
                        (outputs.get(hn_name.as_str()), outputs.get(cn_name.as_str()))
                    {
                        let (_, hn_data) =
                            hn_out.try_extract_tensor::<f32>().map_err(session_error)?;
                        let (_, cn_data) =
                            cn_out.try_extract_tensor::<f32>().map_err(session_error)?;
                        self.h = hn_data.to_vec();
                        self.c = cn_data.to_vec();
                    } else {
                        eprintln!(
                            "streamscribe: Silero LSTM state outputs missing; switching to stateless"
                        );
                        self.io_mode = SileroIoMode::Stateless;
                    }
                }
                _ => {
                    self.io_mode = SileroIoMode::Stateless;
                }
            },
            SileroIoMode::StatefulGru => {
                if let Some(state_out_name) = &self.state_out_name {
                    if let Some(state_out) = outputs.get(state_out_name.as_str()) {
                        let (_, state_data) =
                            state_out.try_extract_tensor::<f32>().map_err(session_error)?;
                        self.state = state_data.to_vec();
                    } else {
                        eprintln!(
                            "streamscribe: Silero GRU state output missing; switching to stateless"
                        );
                        self.io_mode = SileroIoMode::Stateless;
                    }
                }
            }
            SileroIoMode::Stateless => {}
        }

        Ok(prob.clamp(0.0, 1.0))
    }
}

fn session_error(e: ort::Error) -> ScribeError {
    ScribeError::VadSession {
        message: e.to_string(),
    }
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

impl VadService for SileroVad {
    fn infer(&mut self, frame: &[f32]) -> Result<f32> {
        if frame.len() != VAD_FRAME_SAMPLES {
            return Err(ScribeError::VadInference {
                message: format!(
                    "expected {} samples per frame, got {}",
                    VAD_FRAME_SAMPLES,
                    frame.len()
                ),
            });
        }
        self.run_window(frame)
    }

    fn reset(&mut self) {
        self.h.iter_mut().for_each(|v| *v = 0.0);
        self.c.iter_mut().for_each(|v| *v = 0.0);
        self.state.iter_mut().for_each(|v| *v = 0.0);
    }
}
