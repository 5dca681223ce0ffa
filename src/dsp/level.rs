//! Streaming Audio Level Processor
//!
//! RMS and peak tracks with asymmetric attack/release smoothing, mapped to
//! dB and kept in a bounded measurement ring. The current level is also
//! published through an atomic snapshot (both dB values packed into one
//! `AtomicU64`) so a polling reader never blocks the audio writer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::LevelConfig;
use crate::types::LevelMeasurement;

use super::DspError;

/// Lock-free reader handle onto a session's current level.
///
/// Clone freely; the handle stays valid after the session is destroyed
/// (it keeps reporting the last published value).
#[derive(Clone, Debug)]
pub struct LevelSnapshot {
    packed: Arc<AtomicU64>,
}

impl LevelSnapshot {
    /// Current `(rms_db, peak_db)` pair, read atomically.
    pub fn get(&self) -> (f32, f32) {
        unpack(self.packed.load(Ordering::SeqCst))
    }
}

/// Both dB tracks packed into one word so readers see a consistent pair.
fn pack(rms_db: f32, peak_db: f32) -> u64 {
    ((rms_db.to_bits() as u64) << 32) | peak_db.to_bits() as u64
}

fn unpack(bits: u64) -> (f32, f32) {
    (
        f32::from_bits((bits >> 32) as u32),
        f32::from_bits(bits as u32),
    )
}

pub struct LevelProcessor {
    config: LevelConfig,
    sample_rate: u32,
    alpha_attack: f32,
    alpha_release: f32,
    /// Smoothed mean-square state (linear).
    rms_state: f32,
    /// Smoothed absolute-peak state (linear).
    peak_state: f32,
    samples_since_update: usize,
    update_interval_samples: usize,
    /// Offline sessions bypass the update-rate throttle.
    throttled: bool,
    history: VecDeque<LevelMeasurement>,
    packed: Arc<AtomicU64>,
}

impl LevelProcessor {
    pub fn new(config: &LevelConfig, sample_rate: u32) -> Result<Self, DspError> {
        config
            .validate()
            .map_err(|e| DspError::InvalidConfig(e.to_string()))?;
        if sample_rate == 0 {
            return Err(DspError::InvalidConfig(
                "sample_rate must be > 0".into(),
            ));
        }

        let fs = sample_rate as f32;
        let update_interval_samples =
            ((config.update_rate_ms / 1000.0) * fs).max(1.0) as usize;
        let processor = Self {
            alpha_attack: smoothing_alpha(config.attack_ms, fs),
            alpha_release: smoothing_alpha(config.release_ms, fs),
            rms_state: 0.0,
            peak_state: 0.0,
            samples_since_update: 0,
            update_interval_samples,
            throttled: true,
            history: VecDeque::with_capacity(config.history_size),
            packed: Arc::new(AtomicU64::new(pack(config.db_floor, config.db_floor))),
            config: config.clone(),
            sample_rate,
        };
        Ok(processor)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Disable the update-rate throttle (offline sessions emit one
    /// measurement per chunk regardless of wall-time pacing).
    pub fn set_throttled(&mut self, throttled: bool) {
        self.throttled = throttled;
    }

    /// Lock-free handle for reader threads.
    pub fn snapshot(&self) -> LevelSnapshot {
        LevelSnapshot {
            packed: Arc::clone(&self.packed),
        }
    }

    /// Current `(rms_db, peak_db)`.
    pub fn current(&self) -> (f32, f32) {
        unpack(self.packed.load(Ordering::SeqCst))
    }

    /// Feed a chunk; returns any measurements emitted for it.
    pub fn process(
        &mut self,
        samples: &[f32],
        timestamp_ms: u64,
    ) -> Result<Vec<LevelMeasurement>, DspError> {
        if samples.is_empty() {
            return Err(DspError::InvalidInput("empty chunk".into()));
        }

        let mut emitted = Vec::new();
        for &sample in samples {
            let square = sample * sample;
            self.rms_state = smooth(self.rms_state, square, self.alpha_attack, self.alpha_release);
            let magnitude = sample.abs();
            self.peak_state = smooth(
                self.peak_state,
                magnitude,
                self.alpha_attack,
                self.alpha_release,
            );

            self.samples_since_update += 1;
            if self.throttled && self.samples_since_update >= self.update_interval_samples {
                self.samples_since_update = 0;
                emitted.push(self.publish(timestamp_ms));
            }
        }
        if !self.throttled {
            self.samples_since_update = 0;
            emitted.push(self.publish(timestamp_ms));
        }
        Ok(emitted)
    }

    fn publish(&mut self, timestamp_ms: u64) -> LevelMeasurement {
        let rms_db = self.to_db(self.rms_state.sqrt());
        let peak_db = self.to_db(self.peak_state);
        self.packed.store(pack(rms_db, peak_db), Ordering::SeqCst);

        let measurement = LevelMeasurement {
            rms_db,
            peak_db,
            timestamp_ms,
        };
        if self.history.len() == self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(measurement);
        measurement
    }

    fn to_db(&self, linear: f32) -> f32 {
        let floor_linear = 10.0f32.powf(self.config.db_floor / 20.0);
        (20.0 * linear.max(floor_linear).log10())
            .clamp(self.config.db_floor, self.config.db_ceiling)
    }

    /// Most recent measurements, newest last, capped at `max`.
    pub fn history(&self, max: usize) -> Vec<LevelMeasurement> {
        let take = max.min(self.history.len());
        self.history
            .iter()
            .skip(self.history.len() - take)
            .copied()
            .collect()
    }

    pub fn reset(&mut self) {
        self.rms_state = 0.0;
        self.peak_state = 0.0;
        self.samples_since_update = 0;
        self.history.clear();
        self.packed.store(
            pack(self.config.db_floor, self.config.db_floor),
            Ordering::SeqCst,
        );
    }
}

/// One-pole coefficient from a time constant: `alpha = exp(-1 / (tau * fs))`.
fn smoothing_alpha(tau_ms: f32, sample_rate: f32) -> f32 {
    (-1.0 / (tau_ms / 1000.0 * sample_rate)).exp()
}

/// Asymmetric smoothing: fast attack when the input exceeds the state,
/// slow release otherwise.
fn smooth(state: f32, input: f32, alpha_attack: f32, alpha_release: f32) -> f32 {
    let alpha = if input > state {
        alpha_attack
    } else {
        alpha_release
    };
    alpha * state + (1.0 - alpha) * input
}
