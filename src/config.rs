//! Engine Configuration
//!
//! Per-session configuration structs with validation. Every config is
//! serializable (camelCase) so hosts can persist or ship them, and every
//! config change is transactional: the engine validates before installing,
//! so a rejected config leaves the previous one in place.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default session sample rate (44.1 kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default analysis frame size in samples (power of two)
pub const DEFAULT_FRAME_SIZE: usize = 512;

/// Default hop between frames (50% overlap)
pub const DEFAULT_HOP_SIZE: usize = 256;

/// Maximum sample rate the engine accepts (beyond this is a config typo)
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// MFCC feature extraction configuration.
///
/// Immutable once the session has produced features; reset the session
/// (and unload its reference) before installing a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfccConfig {
    pub sample_rate: u32,
    /// Samples per frame; must be a power of two >= 64.
    pub frame_size: usize,
    /// Samples between successive frame starts; 1..=frame_size.
    pub hop_size: usize,
    /// Cepstral coefficients per frame; 1..=frame_size/2.
    pub num_coefficients: usize,
    /// Triangular mel filters; >= num_coefficients.
    pub num_filters: usize,
    /// Lower filterbank edge in Hz.
    pub low_freq: f32,
    /// Upper filterbank edge in Hz; 0.0 means Nyquist.
    pub high_freq: f32,
    /// Replace coefficient 0 with log frame energy.
    pub use_energy: bool,
    pub apply_lifter: bool,
    /// Sinusoidal lifter parameter L; >= 1 when liftering is applied.
    pub lifter_coeff: f32,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            hop_size: DEFAULT_HOP_SIZE,
            num_coefficients: 13,
            num_filters: 26,
            low_freq: 0.0,
            high_freq: 0.0,
            use_energy: true,
            apply_lifter: true,
            lifter_coeff: 22.0,
        }
    }
}

impl MfccConfig {
    /// Effective upper filterbank edge (resolves the 0.0 = Nyquist convention).
    pub fn effective_high_freq(&self) -> f32 {
        if self.high_freq == 0.0 {
            self.sample_rate as f32 / 2.0
        } else {
            self.high_freq
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(EngineError::InvalidConfig(format!(
                "sample_rate must be in 1..={}, got {}",
                MAX_SAMPLE_RATE, self.sample_rate
            )));
        }
        if self.frame_size < 64 || !self.frame_size.is_power_of_two() {
            return Err(EngineError::InvalidConfig(format!(
                "frame_size must be a power of two >= 64, got {}",
                self.frame_size
            )));
        }
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return Err(EngineError::InvalidConfig(format!(
                "hop_size must be in 1..=frame_size ({}), got {}",
                self.frame_size, self.hop_size
            )));
        }
        if self.num_coefficients == 0 || self.num_coefficients > self.frame_size / 2 {
            return Err(EngineError::InvalidConfig(format!(
                "num_coefficients must be in 1..={}, got {}",
                self.frame_size / 2,
                self.num_coefficients
            )));
        }
        if self.num_filters < self.num_coefficients {
            return Err(EngineError::InvalidConfig(format!(
                "num_filters ({}) must be >= num_coefficients ({})",
                self.num_filters, self.num_coefficients
            )));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        let high = self.effective_high_freq();
        if self.low_freq < 0.0 || self.low_freq >= high || high > nyquist {
            return Err(EngineError::InvalidConfig(format!(
                "filterbank range must satisfy 0 <= low ({}) < high ({}) <= Nyquist ({})",
                self.low_freq, high, nyquist
            )));
        }
        if self.apply_lifter && self.lifter_coeff < 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "lifter_coeff must be >= 1, got {}",
                self.lifter_coeff
            )));
        }
        Ok(())
    }

    /// Stable fingerprint of the fields that determine extraction output.
    /// Two configs with the same fingerprint produce identical features
    /// for the same audio; the reference cache keys on it.
    pub fn fingerprint(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.sample_rate.hash(&mut hasher);
        self.frame_size.hash(&mut hasher);
        self.hop_size.hash(&mut hasher);
        self.num_coefficients.hash(&mut hasher);
        self.num_filters.hash(&mut hasher);
        self.low_freq.to_bits().hash(&mut hasher);
        self.high_freq.to_bits().hash(&mut hasher);
        self.use_energy.hash(&mut hasher);
        self.apply_lifter.hash(&mut hasher);
        self.lifter_coeff.to_bits().hash(&mut hasher);
        hasher.finish()
    }
}

/// Voice activity detection configuration.
///
/// `sample_rate = 0` means "inherit the session's rate"; the engine
/// resolves it when the config is installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VadConfig {
    /// Mean-square energy threshold separating sound from silence.
    pub energy_threshold: f32,
    pub window_duration_ms: f32,
    /// How long energy must persist above threshold before a call onset is confirmed.
    pub min_sound_duration_ms: f32,
    /// Look-back retained and reported with the active segment.
    pub pre_buffer_ms: f32,
    /// Hangover: silence shorter than this does not end the segment.
    pub post_buffer_ms: f32,
    pub sample_rate: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.01,
            window_duration_ms: 20.0,
            min_sound_duration_ms: 100.0,
            pre_buffer_ms: 50.0,
            post_buffer_ms: 150.0,
            sample_rate: 0,
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.energy_threshold > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "energy_threshold must be > 0, got {}",
                self.energy_threshold
            )));
        }
        if !(self.window_duration_ms > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "window_duration_ms must be > 0, got {}",
                self.window_duration_ms
            )));
        }
        for (name, v) in [
            ("min_sound_duration_ms", self.min_sound_duration_ms),
            ("pre_buffer_ms", self.pre_buffer_ms),
            ("post_buffer_ms", self.post_buffer_ms),
        ] {
            if v < 0.0 || !v.is_finite() {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be finite and >= 0, got {}",
                    name, v
                )));
            }
        }
        if self.sample_rate > MAX_SAMPLE_RATE {
            return Err(EngineError::InvalidConfig(format!(
                "sample_rate must be <= {}, got {}",
                MAX_SAMPLE_RATE, self.sample_rate
            )));
        }
        Ok(())
    }
}

/// Dynamic time warping configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtwConfig {
    /// Sakoe-Chiba band half-width as a fraction of the longer sequence.
    pub window_ratio: f32,
    pub use_window: bool,
    /// Divide the final cost by the path length (average local distance).
    pub normalize_distance: bool,
    /// Scale applied to the returned distance.
    pub distance_weight: f32,
    /// Advisory only; the scalar implementation is authoritative and
    /// results are identical either way.
    pub enable_simd: bool,
}

impl Default for DtwConfig {
    fn default() -> Self {
        Self {
            window_ratio: 0.15,
            use_window: true,
            normalize_distance: true,
            distance_weight: 1.0,
            enable_simd: false,
        }
    }
}

impl DtwConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.window_ratio) {
            return Err(EngineError::InvalidConfig(format!(
                "window_ratio must be in [0, 1], got {}",
                self.window_ratio
            )));
        }
        if !(self.distance_weight > 0.0) || !self.distance_weight.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "distance_weight must be finite and > 0, got {}",
                self.distance_weight
            )));
        }
        Ok(())
    }
}

/// Component weights for the fused score. Must sum to 1.0 within 0.01.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreWeights {
    pub mfcc: f32,
    pub volume: f32,
    pub timing: f32,
    pub pitch: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            mfcc: 0.5,
            volume: 0.2,
            timing: 0.2,
            pitch: 0.1,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f32 {
        self.mfcc + self.volume + self.timing + self.pitch
    }
}

/// Realtime scorer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorerConfig {
    pub weights: ScoreWeights,
    /// Confidence needed for a score to count as reliable; [0, 1].
    pub confidence_threshold: f32,
    pub min_score_for_match: f32,
    /// Bounded score-history ring capacity.
    pub scoring_history_size: usize,
    /// Maps raw DTW distance d to similarity exp(-d / scaling).
    pub dtw_distance_scaling: f32,
    /// Samples that must be analyzed before a score can be reliable.
    pub min_samples_for_confidence: u64,
    /// Pitch tracking is reserved; when false its weight is redistributed.
    pub enable_pitch_analysis: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            confidence_threshold: 0.7,
            min_score_for_match: 0.005,
            scoring_history_size: 50,
            dtw_distance_scaling: 10.0,
            min_samples_for_confidence: 22_050,
            enable_pitch_analysis: false,
        }
    }
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<()> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(EngineError::InvalidConfig(format!(
                "score weights must sum to 1.0 (+/- 0.01), got {:.3}",
                sum
            )));
        }
        for (name, w) in [
            ("mfcc", self.weights.mfcc),
            ("volume", self.weights.volume),
            ("timing", self.weights.timing),
            ("pitch", self.weights.pitch),
        ] {
            if w < 0.0 || !w.is_finite() {
                return Err(EngineError::InvalidConfig(format!(
                    "weight {} must be finite and >= 0, got {}",
                    name, w
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(EngineError::InvalidConfig(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.min_score_for_match < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "min_score_for_match must be >= 0, got {}",
                self.min_score_for_match
            )));
        }
        if self.scoring_history_size == 0 {
            return Err(EngineError::InvalidConfig(
                "scoring_history_size must be > 0".into(),
            ));
        }
        if !(self.dtw_distance_scaling > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "dtw_distance_scaling must be > 0, got {}",
                self.dtw_distance_scaling
            )));
        }
        Ok(())
    }
}

/// Streaming level processor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelConfig {
    pub attack_ms: f32,
    pub release_ms: f32,
    /// Minimum interval between emitted measurements.
    pub update_rate_ms: f32,
    /// Bounded measurement-history ring capacity.
    pub history_size: usize,
    pub db_floor: f32,
    pub db_ceiling: f32,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            attack_ms: 10.0,
            release_ms: 150.0,
            update_rate_ms: 50.0,
            history_size: 100,
            db_floor: -60.0,
            db_ceiling: 0.0,
        }
    }
}

impl LevelConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.attack_ms > 0.0) || !(self.release_ms > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "attack_ms ({}) and release_ms ({}) must be > 0",
                self.attack_ms, self.release_ms
            )));
        }
        if !(self.update_rate_ms > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "update_rate_ms must be > 0, got {}",
                self.update_rate_ms
            )));
        }
        if self.history_size == 0 {
            return Err(EngineError::InvalidConfig(
                "history_size must be > 0".into(),
            ));
        }
        if self.db_floor >= self.db_ceiling {
            return Err(EngineError::InvalidConfig(format!(
                "db_floor ({}) must be below db_ceiling ({})",
                self.db_floor, self.db_ceiling
            )));
        }
        Ok(())
    }
}
