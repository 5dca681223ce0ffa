//! Realtime Similarity Scorer
//!
//! Fuses up to four component scores into one [`SimilarityScore`] per
//! processed chunk and keeps the derived feedback state (history, peak,
//! trend). Components that cannot contribute (pitch disabled, no
//! reference loudness track) have their weight redistributed across the
//! rest, so the overall score stays a convex combination.

use std::sync::Arc;

use crate::config::{DtwConfig, ScorerConfig};
use crate::dsp::{DspError, DtwComparator};
use crate::error::{EngineError, Result};
use crate::reference::ReferenceFeatures;
use crate::types::{RealtimeFeedback, SimilarityScore};

use super::feedback;
use super::history::ScoreHistory;

/// Largest loudness mismatch still mapped above zero (dB).
const MAX_VOLUME_DELTA_DB: f32 = 24.0;

/// Scorer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorerState {
    Uninitialized,
    Ready,
    HasReference,
    Scoring,
}

/// Everything the session hands over per scoring pass. The feature and
/// energy sequences contain only VAD-accepted frames; frames whose audio
/// windows were classified silent never reach the scorer.
pub struct ScoreInputs<'a> {
    pub live_features: &'a [Vec<f32>],
    pub live_energy_db: &'a [f32],
    /// Samples consumed into complete MFCC frames.
    pub samples_analyzed: u64,
    pub timestamp_ms: u64,
}

pub struct RealtimeScorer {
    config: ScorerConfig,
    dtw: DtwComparator,
    state: ScorerState,
    reference: Option<Arc<ReferenceFeatures>>,
    history: ScoreHistory,
}

impl RealtimeScorer {
    pub fn new(config: &ScorerConfig, dtw_config: &DtwConfig) -> Result<Self> {
        config.validate()?;
        let dtw = DtwComparator::new(dtw_config).map_err(EngineError::from)?;
        Ok(Self {
            history: ScoreHistory::new(config.scoring_history_size),
            config: config.clone(),
            dtw,
            state: ScorerState::Ready,
            reference: None,
        })
    }

    pub fn state(&self) -> ScorerState {
        self.state
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    pub fn reference(&self) -> Option<&Arc<ReferenceFeatures>> {
        self.reference.as_ref()
    }

    pub fn set_reference(&mut self, reference: Arc<ReferenceFeatures>) {
        self.reference = Some(reference);
        if self.state == ScorerState::Ready {
            self.state = ScorerState::HasReference;
        }
    }

    pub fn clear_reference(&mut self) {
        self.reference = None;
        self.state = ScorerState::Ready;
    }

    /// Transactional: an invalid config is rejected and the old one stays.
    pub fn set_config(&mut self, config: &ScorerConfig) -> Result<()> {
        config.validate()?;
        self.history.set_capacity(config.scoring_history_size);
        self.config = config.clone();
        Ok(())
    }

    /// Transactional, like [`Self::set_config`].
    pub fn set_dtw_config(&mut self, dtw_config: &DtwConfig) -> Result<()> {
        self.dtw = DtwComparator::new(dtw_config).map_err(EngineError::from)?;
        Ok(())
    }

    /// Score the live sequence against the loaded reference.
    pub fn score(&mut self, inputs: ScoreInputs<'_>) -> Result<SimilarityScore> {
        let reference = match &self.reference {
            Some(r) => Arc::clone(r),
            None => return Err(EngineError::NoMasterCall),
        };

        // Nothing voiced yet: publish an all-zero score rather than
        // failing the chunk. The flags still follow the configured
        // thresholds so the score invariants hold at degenerate settings.
        if inputs.live_features.is_empty() {
            let mut score =
                SimilarityScore::silent(inputs.samples_analyzed, inputs.timestamp_ms);
            score.is_match = score.overall >= self.config.min_score_for_match;
            score.is_reliable = score.confidence >= self.config.confidence_threshold
                && inputs.samples_analyzed >= self.config.min_samples_for_confidence;
            return Ok(self.finalize(score));
        }

        let alignment = self
            .dtw
            .compare(inputs.live_features, &reference.features)
            .map_err(|e| match e {
                DspError::NoComparison(msg) => EngineError::InsufficientData(msg),
                other => EngineError::ComponentError(other.to_string()),
            })?;

        let mfcc = (-alignment.distance / self.config.dtw_distance_scaling)
            .exp()
            .clamp(0.0, 1.0);

        let deviation_ratio = if alignment.band_half_width == 0 {
            0.0
        } else {
            (alignment.mean_diagonal_deviation() / alignment.band_half_width as f32)
                .clamp(0.0, 1.0)
        };
        let timing = 1.0 - deviation_ratio;

        let volume_active = reference.has_energy_track() && !inputs.live_energy_db.is_empty();
        let volume = if volume_active {
            volume_similarity(inputs.live_energy_db, &reference.energy_db, &alignment.path)
        } else {
            0.0
        };

        let pitch_active = self.config.enable_pitch_analysis;
        // Pitch tracking is reserved; the component stays at zero even
        // when enabled, and its weight only participates if active.
        let pitch = 0.0;

        let w = &self.config.weights;
        let mut overall = 0.0;
        let mut active_weight = 0.0;
        let mut active_values: Vec<f32> = Vec::with_capacity(4);
        for (value, weight, active) in [
            (mfcc, w.mfcc, true),
            (volume, w.volume, volume_active),
            (timing, w.timing, true),
            (pitch, w.pitch, pitch_active),
        ] {
            if active {
                overall += value * weight;
                active_weight += weight;
                active_values.push(value);
            }
        }
        // Redistribute inactive weight proportionally: dividing by the
        // active mass is the same as scaling each active weight by
        // 1 / active_weight.
        let overall = if active_weight > 0.0 {
            (overall / active_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        // Occupancy is its own signal: how much of the path sits near the
        // diagonal, independent of the mean deviation behind `timing`.
        let occupancy = alignment.band_occupancy();
        let confidence = self.confidence(inputs.samples_analyzed, occupancy, &active_values);

        let score = SimilarityScore {
            overall,
            mfcc,
            volume,
            timing,
            pitch,
            confidence,
            is_reliable: confidence >= self.config.confidence_threshold
                && inputs.samples_analyzed >= self.config.min_samples_for_confidence,
            is_match: overall >= self.config.min_score_for_match,
            samples_analyzed: inputs.samples_analyzed,
            timestamp_ms: inputs.timestamp_ms,
        };

        tracing::debug!(
            overall = %format!("{:.4}", score.overall),
            mfcc = %format!("{:.4}", score.mfcc),
            volume = %format!("{:.4}", score.volume),
            timing = %format!("{:.4}", score.timing),
            confidence = %format!("{:.2}", score.confidence),
            reliable = score.is_reliable,
            "Scorer: score computed"
        );

        Ok(self.finalize(score))
    }

    fn finalize(&mut self, score: SimilarityScore) -> SimilarityScore {
        self.history.push(score.clone());
        self.state = ScorerState::Scoring;
        score
    }

    /// Monotone non-decreasing in analyzed samples, band occupancy, and
    /// component agreement. The data factor caps the result, so a score
    /// cannot reach the reliability threshold on a thin sample.
    fn confidence(&self, samples_analyzed: u64, occupancy: f32, components: &[f32]) -> f32 {
        let data_factor = if self.config.min_samples_for_confidence == 0 {
            1.0
        } else {
            (samples_analyzed as f32 / self.config.min_samples_for_confidence as f32).min(1.0)
        };
        let agreement = match components.len() {
            0 => 0.0,
            _ => {
                let max = components.iter().cloned().fold(f32::MIN, f32::max);
                let min = components.iter().cloned().fold(f32::MAX, f32::min);
                (1.0 - (max - min)).clamp(0.0, 1.0)
            }
        };
        (data_factor * (0.4 + 0.3 * occupancy + 0.3 * agreement)).clamp(0.0, 1.0)
    }

    pub fn latest(&self) -> Option<&SimilarityScore> {
        self.history.latest()
    }

    pub fn history(&self, max: usize) -> Vec<SimilarityScore> {
        self.history.recent(max)
    }

    pub fn peak(&self) -> f32 {
        self.history.peak()
    }

    /// Derived feedback around the most recent score.
    pub fn feedback(&self, progress_ratio: f32) -> Result<RealtimeFeedback> {
        let current = self
            .history
            .latest()
            .cloned()
            .ok_or_else(|| EngineError::InsufficientData("no score computed yet".into()))?;
        let is_improving = self.history.is_improving();
        Ok(RealtimeFeedback {
            quality_assessment: feedback::quality_assessment(current.overall).to_string(),
            recommendation: feedback::recommendation(
                &current,
                self.config.enable_pitch_analysis,
                is_improving,
            ),
            trending_score: self.history.trending(),
            peak_score: self.history.peak(),
            progress_ratio: progress_ratio.clamp(0.0, 1.0),
            is_improving,
            current,
        })
    }

    /// Clear scoring state; the reference (if any) stays loaded.
    pub fn reset(&mut self) {
        self.history.reset();
        self.state = if self.reference.is_some() {
            ScorerState::HasReference
        } else {
            ScorerState::Ready
        };
    }
}

/// Mean absolute dB difference over the aligned region, mapped to [0, 1].
fn volume_similarity(live_db: &[f32], ref_db: &[f32], path: &[(usize, usize)]) -> f32 {
    let mut total = 0.0f32;
    let mut count = 0usize;
    for &(i, j) in path {
        if let (Some(&a), Some(&b)) = (live_db.get(i), ref_db.get(j)) {
            total += (a - b).abs();
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    let mean_delta = total / count as f32;
    (1.0 - mean_delta / MAX_VOLUME_DELTA_DB).clamp(0.0, 1.0)
}
