//! Voice Activity Detection
//!
//! Energy-based detector with hysteresis. Incoming samples are grouped
//! into fixed-duration analysis windows; each window's mean-square energy
//! drives a four-state machine:
//!
//! - `Silent`: below threshold.
//! - `Candidate`: energy arrived but has not yet persisted for
//!   `min_sound_duration_ms` (brief pops never become a call onset).
//! - `Active`: a confirmed call segment.
//! - `Hangover`: energy dropped; the segment stays open until silence has
//!   lasted `post_buffer_ms`, and a loud window returns straight to
//!   `Active` without re-arming candidacy.
//!
//! `pre_buffer_ms` of look-back is retained so the confirmed onset carries
//! the attack of the call, not just its sustained body.

use std::collections::VecDeque;

use crate::config::VadConfig;
use crate::dsp::DspError;
use crate::types::VadStatus;

/// Detector state. `Active` and `Hangover` both count as voiced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadState {
    Silent,
    Candidate { onset_ms: f32 },
    Active { onset_ms: f32 },
    Hangover { onset_ms: f32, offset_ms: f32 },
}

impl VadState {
    pub fn is_active(&self) -> bool {
        matches!(self, VadState::Active { .. } | VadState::Hangover { .. })
    }
}

/// Per-window classification emitted by [`VoiceDetector::process`].
#[derive(Debug, Clone)]
pub struct VadWindow {
    pub is_active: bool,
    /// Mean-square window energy, clamped to `[0, 1]`.
    pub energy_level: f32,
    /// Accumulated active time since the last reset, through this window.
    pub active_duration_ms: f32,
    /// Window position in the stream.
    pub start_ms: f32,
    pub end_ms: f32,
    /// Set on the window that confirms an onset: where the active segment
    /// actually begins, `pre_buffer_ms` before the onset. Windows already
    /// classified silent after this point belong to the segment after all.
    pub segment_start_ms: Option<f32>,
    /// Retained look-back, populated only on the window that confirms an
    /// onset (`Candidate` -> `Active`).
    pub onset_preroll: Vec<f32>,
}

pub struct VoiceDetector {
    config: VadConfig,
    window_samples: usize,
    window_ms: f32,
    pre_buffer_samples: usize,
    /// Partial window carried between chunks.
    pending: Vec<f32>,
    /// Look-back ring for onset pre-roll.
    pre_buffer: VecDeque<f32>,
    state: VadState,
    /// Stream position of the *next* window start.
    stream_ms: f32,
    active_duration_ms: f32,
    last_energy: f32,
}

impl VoiceDetector {
    /// `sample_rate` resolves a config whose own rate is 0 ("inherit").
    pub fn new(config: &VadConfig, sample_rate: u32) -> Result<Self, DspError> {
        config
            .validate()
            .map_err(|e| DspError::InvalidConfig(e.to_string()))?;
        let rate = if config.sample_rate == 0 {
            sample_rate
        } else {
            config.sample_rate
        };
        if rate == 0 {
            return Err(DspError::InvalidConfig(
                "VAD sample rate unresolved (both config and session rate are 0)".into(),
            ));
        }

        let window_samples = ((config.window_duration_ms / 1000.0) * rate as f32).round() as usize;
        if window_samples == 0 {
            return Err(DspError::InvalidConfig(format!(
                "window_duration_ms {} is shorter than one sample at {} Hz",
                config.window_duration_ms, rate
            )));
        }
        let pre_buffer_samples = ((config.pre_buffer_ms / 1000.0) * rate as f32).round() as usize;

        Ok(Self {
            window_ms: window_samples as f32 / rate as f32 * 1000.0,
            window_samples,
            pre_buffer_samples,
            pending: Vec::with_capacity(window_samples),
            pre_buffer: VecDeque::with_capacity(pre_buffer_samples),
            state: VadState::Silent,
            stream_ms: 0.0,
            active_duration_ms: 0.0,
            last_energy: 0.0,
            config: config.clone(),
        })
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// End of the last fully classified window.
    pub fn classified_through_ms(&self) -> f32 {
        self.stream_ms
    }

    /// How far a future onset confirmation can reclassify past windows:
    /// candidacy persistence plus pre-roll plus one window of slack.
    /// A silent window older than this can never become part of a segment.
    pub fn resolve_horizon_ms(&self) -> f32 {
        self.config.min_sound_duration_ms + self.config.pre_buffer_ms + self.window_ms
    }

    pub fn status(&self) -> VadStatus {
        VadStatus {
            is_active: self.state.is_active(),
            energy_level: self.last_energy,
            active_duration_ms: self.active_duration_ms,
        }
    }

    /// Feed samples; emits one [`VadWindow`] per completed analysis window.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<VadWindow>, DspError> {
        if samples.is_empty() {
            return Err(DspError::InvalidInput("empty window".into()));
        }

        let mut windows = Vec::new();
        for &sample in samples {
            if self.pre_buffer_samples > 0 {
                if self.pre_buffer.len() == self.pre_buffer_samples {
                    self.pre_buffer.pop_front();
                }
                self.pre_buffer.push_back(sample);
            }
            self.pending.push(sample);
            if self.pending.len() == self.window_samples {
                let window = self.classify_window();
                windows.push(window);
                self.pending.clear();
            }
        }
        Ok(windows)
    }

    fn classify_window(&mut self) -> VadWindow {
        let energy = self
            .pending
            .iter()
            .map(|s| s * s)
            .sum::<f32>()
            / self.pending.len() as f32;
        let energy_level = energy.clamp(0.0, 1.0);
        self.last_energy = energy_level;

        let start_ms = self.stream_ms;
        let end_ms = start_ms + self.window_ms;
        self.stream_ms = end_ms;

        let loud = energy >= self.config.energy_threshold;
        let mut onset_preroll = Vec::new();
        let mut segment_start_ms = None;

        self.state = match (self.state, loud) {
            (VadState::Silent, true) => {
                let candidate = VadState::Candidate { onset_ms: start_ms };
                // A single window may satisfy the persistence requirement
                // outright when min_sound_duration_ms is short.
                if end_ms - start_ms >= self.config.min_sound_duration_ms {
                    self.active_duration_ms += end_ms - start_ms;
                    onset_preroll = self.pre_buffer.iter().copied().collect();
                    segment_start_ms = Some((start_ms - self.config.pre_buffer_ms).max(0.0));
                    VadState::Active { onset_ms: start_ms }
                } else {
                    candidate
                }
            }
            (VadState::Silent, false) => VadState::Silent,
            (VadState::Candidate { onset_ms }, true) => {
                if end_ms - onset_ms >= self.config.min_sound_duration_ms {
                    self.active_duration_ms += end_ms - onset_ms;
                    onset_preroll = self.pre_buffer.iter().copied().collect();
                    segment_start_ms = Some((onset_ms - self.config.pre_buffer_ms).max(0.0));
                    VadState::Active { onset_ms }
                } else {
                    VadState::Candidate { onset_ms }
                }
            }
            (VadState::Candidate { .. }, false) => VadState::Silent,
            (VadState::Active { onset_ms }, true) => {
                self.active_duration_ms += self.window_ms;
                VadState::Active { onset_ms }
            }
            (VadState::Active { onset_ms }, false) => {
                self.active_duration_ms += self.window_ms;
                VadState::Hangover {
                    onset_ms,
                    offset_ms: start_ms,
                }
            }
            (VadState::Hangover { onset_ms, .. }, true) => {
                self.active_duration_ms += self.window_ms;
                VadState::Active { onset_ms }
            }
            (VadState::Hangover { onset_ms, offset_ms }, false) => {
                if end_ms - offset_ms >= self.config.post_buffer_ms {
                    VadState::Silent
                } else {
                    self.active_duration_ms += self.window_ms;
                    VadState::Hangover { onset_ms, offset_ms }
                }
            }
        };

        VadWindow {
            is_active: self.state.is_active(),
            energy_level,
            active_duration_ms: self.active_duration_ms,
            start_ms,
            end_ms,
            segment_start_ms,
            onset_preroll,
        }
    }

    /// Back to `Silent`; buffers cleared, duration zeroed.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.pre_buffer.clear();
        self.state = VadState::Silent;
        self.stream_ms = 0.0;
        self.active_duration_ms = 0.0;
        self.last_energy = 0.0;
    }
}
