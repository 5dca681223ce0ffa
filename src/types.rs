//! Public Result Types
//!
//! Serializable value types returned by the engine's query surface.
//! All types use camelCase field names on the wire so any host transport
//! (IPC, HTTP, FFI bridge) can ship them without re-mapping.

use serde::{Deserialize, Serialize};

/// A single multi-dimensional similarity score.
///
/// Invariants upheld by the scorer:
/// - every component is in `[0, 1]`
/// - `overall` equals the weighted sum of the active components (after
///   redistributing the weight of disabled components)
/// - `is_reliable` ⇔ `confidence >= confidence_threshold` and
///   `samples_analyzed >= min_samples_for_confidence`
/// - `is_match` ⇔ `overall >= min_score_for_match`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityScore {
    pub overall: f32,
    pub mfcc: f32,
    pub volume: f32,
    pub timing: f32,
    pub pitch: f32,
    pub confidence: f32,
    pub is_reliable: bool,
    pub is_match: bool,
    /// Samples consumed into complete MFCC frames (not VAD-accepted samples).
    pub samples_analyzed: u64,
    /// Monotonic timestamp from the engine clock.
    pub timestamp_ms: u64,
}

impl SimilarityScore {
    /// All-zero score, used when nothing scoreable has arrived yet.
    pub fn silent(samples_analyzed: u64, timestamp_ms: u64) -> Self {
        Self {
            overall: 0.0,
            mfcc: 0.0,
            volume: 0.0,
            timing: 0.0,
            pitch: 0.0,
            confidence: 0.0,
            is_reliable: false,
            is_match: false,
            samples_analyzed,
            timestamp_ms,
        }
    }
}

/// Derived feedback for the practicing caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeFeedback {
    pub current: SimilarityScore,
    /// Mean `overall` of the most recent reliable scores; 0.0 until enough exist.
    pub trending_score: f32,
    /// Best `overall` seen since the last session reset.
    pub peak_score: f32,
    /// `min(1, live frames / reference frames)`.
    pub progress_ratio: f32,
    pub quality_assessment: String,
    pub recommendation: String,
    pub is_improving: bool,
}

/// One smoothed level reading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelMeasurement {
    pub rms_db: f32,
    pub peak_db: f32,
    pub timestamp_ms: u64,
}

/// Read-only view of the voice activity detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VadStatus {
    pub is_active: bool,
    /// Mean-square energy of the last evaluated window, clamped to `[0, 1]`.
    pub energy_level: f32,
    /// Accumulated active time since the last reset.
    pub active_duration_ms: f32,
}

/// Read-only per-session counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub samples_received: u64,
    pub frames_extracted: u64,
    pub vad_active_ms: f32,
    pub scores_computed: u64,
}
