//! Practice Session State
//!
//! A session owns one complete processing chain: frame cutter, MFCC
//! extractor, VAD, level processor, and scorer, plus the bounded live
//! feature matrix and its loudness track. The engine serializes access;
//! nothing in here is shared across sessions except the `Arc`-owned
//! reference features.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::{DtwConfig, LevelConfig, MfccConfig, ScorerConfig, VadConfig};
use crate::dsp::mfcc::frame_energy_db;
use crate::dsp::{LevelProcessor, LevelSnapshot, MfccExtractor};
use crate::error::{EngineError, Result};
use crate::reference::{RecordingSink, ReferenceFeatures};
use crate::scoring::{RealtimeScorer, ScoreInputs};
use crate::types::{LevelMeasurement, SessionStats, VadStatus};
use crate::vad::VoiceDetector;

/// Realtime sessions never consult the MFCC frame cache and pace level
/// measurements by wall time; offline sessions do the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Realtime,
    Offline,
}

/// Live horizon retained when no reference is loaded (seconds).
const DEFAULT_HORIZON_SECS: u64 = 30;

/// Hard cap on the opt-in recording buffer (10 minutes), preventing OOM
/// on a session that is never stopped.
const MAX_RECORDING_SECS: u64 = 600;

/// Extracted frame waiting for the VAD verdict on its audio span.
struct PendingFrame {
    features: Vec<f32>,
    energy_db: f32,
    start_ms: f32,
    end_ms: f32,
}

/// One classified analysis window, kept while it can still gate frames.
/// A confirmed onset flips the pre-roll windows back to active.
struct ClassifiedWindow {
    start_ms: f32,
    end_ms: f32,
    active: bool,
}

pub(crate) struct Session {
    id: u64,
    sample_rate: u32,
    mode: SessionMode,
    mfcc_config: MfccConfig,
    extractor: MfccExtractor,
    vad: VoiceDetector,
    level: LevelProcessor,
    scorer: RealtimeScorer,
    reference_id: Option<String>,
    /// Samples not yet consumed into a full frame.
    frame_buf: Vec<f32>,
    /// Frames whose covering windows are not all classified yet.
    pending: VecDeque<PendingFrame>,
    /// Recent window verdicts, pruned once they can no longer gate frames.
    window_log: VecDeque<ClassifiedWindow>,
    /// Live feature matrix: VAD-accepted frames only, bounded by the
    /// reference horizon. Silent-window frames never enter it.
    features: VecDeque<Vec<f32>>,
    /// Per-frame energy (dB), parallel to `features`.
    energy_db: VecDeque<f32>,
    samples_received: u64,
    frames_extracted: u64,
    samples_analyzed: u64,
    scores_computed: u64,
    recording_enabled: bool,
    recording: Vec<f32>,
    recording_sink: Option<Arc<dyn RecordingSink>>,
}

impl Session {
    pub fn new(
        id: u64,
        sample_rate: u32,
        mfcc_config: MfccConfig,
        vad_config: VadConfig,
        dtw_config: DtwConfig,
        scorer_config: ScorerConfig,
        level_config: LevelConfig,
    ) -> Result<Self> {
        let extractor = MfccExtractor::new(&mfcc_config).map_err(EngineError::from)?;
        let vad = VoiceDetector::new(&vad_config, sample_rate).map_err(EngineError::from)?;
        let level = LevelProcessor::new(&level_config, sample_rate).map_err(EngineError::from)?;
        let scorer = RealtimeScorer::new(&scorer_config, &dtw_config)?;

        Ok(Self {
            id,
            sample_rate,
            mode: SessionMode::Realtime,
            mfcc_config,
            extractor,
            vad,
            level,
            scorer,
            reference_id: None,
            frame_buf: Vec::new(),
            pending: VecDeque::new(),
            window_log: VecDeque::new(),
            features: VecDeque::new(),
            energy_db: VecDeque::new(),
            samples_received: 0,
            frames_extracted: 0,
            samples_analyzed: 0,
            scores_computed: 0,
            recording_enabled: false,
            recording: Vec::new(),
            recording_sink: None,
        })
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SessionMode) {
        self.mode = mode;
        self.extractor
            .set_cache_enabled(mode == SessionMode::Offline);
        self.level.set_throttled(mode == SessionMode::Realtime);
    }

    /// The chunk contract: append, frame + extract, VAD-gate, level,
    /// score. Frames whose audio windows come back `Silent` are
    /// discarded; only VAD-accepted frames reach the feature matrix.
    pub fn process_chunk(&mut self, samples: &[f32], now_ms: u64) -> Result<()> {
        if samples.is_empty() {
            return Err(EngineError::InvalidParams("empty audio chunk".into()));
        }
        // Reject bad input before any state is touched.
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(EngineError::InvalidAudioData(
                "chunk contains non-finite samples".into(),
            ));
        }

        if self.recording_enabled {
            let cap = (MAX_RECORDING_SECS * self.sample_rate as u64) as usize;
            let room = cap.saturating_sub(self.recording.len());
            if room < samples.len() {
                tracing::warn!(
                    session = self.id,
                    cap_secs = MAX_RECORDING_SECS,
                    "Recording buffer full, trailing samples dropped"
                );
            }
            self.recording
                .extend_from_slice(&samples[..samples.len().min(room)]);
            if let Some(sink) = &self.recording_sink {
                sink.write(self.id, samples);
            }
        }
        self.samples_received += samples.len() as u64;

        // Cut frames at hop offsets; the tail stays for the next chunk.
        let frame_size = self.mfcc_config.frame_size;
        let hop = self.mfcc_config.hop_size;
        let pre_extend = self.frame_buf.len();
        self.frame_buf.extend_from_slice(samples);

        let mut new_frames: Vec<(Vec<f32>, f32)> = Vec::new();
        let mut offset = 0;
        while offset + frame_size <= self.frame_buf.len() {
            let frame = &self.frame_buf[offset..offset + frame_size];
            match self.extractor.extract(frame) {
                Ok(feature) => new_frames.push((feature, frame_energy_db(frame))),
                Err(e) => {
                    // Roll back: nothing from this chunk sticks.
                    self.frame_buf.truncate(pre_extend);
                    self.samples_received -= samples.len() as u64;
                    return Err(EngineError::ComponentError(e.to_string()));
                }
            }
            offset += hop;
        }
        self.frame_buf.drain(..offset);

        // Stage the frames with their stream spans; the VAD verdict below
        // decides which ones become part of the live matrix.
        let ms_per_sample = 1000.0 / self.sample_rate as f32;
        for (feature, energy) in new_frames {
            let index = self.frames_extracted;
            let start_sample = index * hop as u64;
            self.samples_analyzed += if index == 0 {
                frame_size as u64
            } else {
                hop as u64
            };
            self.frames_extracted += 1;
            self.pending.push_back(PendingFrame {
                features: feature,
                energy_db: energy,
                start_ms: start_sample as f32 * ms_per_sample,
                end_ms: (start_sample + frame_size as u64) as f32 * ms_per_sample,
            });
        }

        // Classify this chunk's windows. A confirmed onset reclassifies
        // the pre-roll windows that were provisionally silent.
        let windows = self.vad.process(samples).map_err(EngineError::from)?;
        for window in windows {
            if let Some(segment_start) = window.segment_start_ms {
                for logged in self.window_log.iter_mut() {
                    if logged.end_ms > segment_start {
                        logged.active = true;
                    }
                }
            }
            self.window_log.push_back(ClassifiedWindow {
                start_ms: window.start_ms,
                end_ms: window.end_ms,
                active: window.is_active,
            });
        }

        let committed = self.resolve_pending();
        let cap = self.feature_cap();
        while self.features.len() > cap {
            self.features.pop_front();
            self.energy_db.pop_front();
        }

        self.level
            .process(samples, now_ms)
            .map_err(EngineError::from)?;

        if self.scorer.reference().is_some() {
            let live: &[Vec<f32>] = self.features.make_contiguous();
            let energy: &[f32] = self.energy_db.make_contiguous();
            let result = self.scorer.score(ScoreInputs {
                live_features: live,
                live_energy_db: energy,
                samples_analyzed: self.samples_analyzed,
                timestamp_ms: now_ms,
            });
            if let Err(e) = result {
                // Keep the rollback guarantee even for scorer failures.
                for _ in 0..committed {
                    self.features.pop_back();
                    self.energy_db.pop_back();
                }
                return Err(e);
            }
            self.scores_computed += 1;
        }

        tracing::debug!(
            session = self.id,
            samples = samples.len(),
            frames_committed = committed,
            frames_pending = self.pending.len(),
            live_frames = self.features.len(),
            vad_active = self.vad.state().is_active(),
            "Session: chunk processed"
        );
        Ok(())
    }

    /// Move pending frames whose windows came back active into the live
    /// matrix, in order; drop frames that can no longer belong to any
    /// segment. A frame still inside the VAD's reclassification horizon
    /// stays pending until its fate is final.
    fn resolve_pending(&mut self) -> usize {
        let classified = self.vad.classified_through_ms();
        let horizon = self.vad.resolve_horizon_ms();
        let mut committed = 0;

        loop {
            let (voiced, expired) = match self.pending.front() {
                None => break,
                Some(frame) => (
                    self.window_log.iter().any(|w| {
                        w.active && w.start_ms < frame.end_ms && w.end_ms > frame.start_ms
                    }),
                    frame.end_ms + horizon <= classified,
                ),
            };
            if voiced {
                if let Some(frame) = self.pending.pop_front() {
                    self.features.push_back(frame.features);
                    self.energy_db.push_back(frame.energy_db);
                    committed += 1;
                }
            } else if expired {
                // Every covering window stayed silent and no future onset
                // can reach back this far: discard.
                self.pending.pop_front();
            } else {
                break;
            }
        }

        // Windows older than anything still gateable are done.
        let frame_ms = self.mfcc_config.frame_size as f32 / self.sample_rate as f32 * 1000.0;
        let done_before = classified - horizon - frame_ms;
        while self
            .window_log
            .front()
            .map_or(false, |w| w.end_ms <= done_before)
        {
            self.window_log.pop_front();
        }
        committed
    }

    /// Feature-matrix bound: one reference length, or a fixed horizon
    /// when nothing is loaded yet.
    fn feature_cap(&self) -> usize {
        match self.scorer.reference() {
            Some(r) => r.num_frames().max(1),
            None => {
                let samples = DEFAULT_HORIZON_SECS * self.sample_rate as u64;
                (samples as usize / self.mfcc_config.hop_size).max(1)
            }
        }
    }

    pub fn load_reference(&mut self, id: String, reference: Arc<ReferenceFeatures>) {
        self.scorer.set_reference(reference);
        self.reference_id = Some(id);
    }

    pub fn unload_reference(&mut self) {
        self.scorer.clear_reference();
        self.reference_id = None;
    }

    pub fn reference_id(&self) -> Option<&str> {
        self.reference_id.as_deref()
    }

    pub fn scorer(&self) -> &RealtimeScorer {
        &self.scorer
    }

    pub fn progress_ratio(&self) -> f32 {
        match self.scorer.reference() {
            Some(r) if r.num_frames() > 0 => {
                (self.features.len() as f32 / r.num_frames() as f32).min(1.0)
            }
            _ => 0.0,
        }
    }

    pub fn vad_status(&self) -> VadStatus {
        self.vad.status()
    }

    pub fn level_snapshot(&self) -> LevelSnapshot {
        self.level.snapshot()
    }

    pub fn current_level(&self) -> (f32, f32) {
        self.level.current()
    }

    pub fn level_history(&self, max: usize) -> Vec<LevelMeasurement> {
        self.level.history(max)
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples_received as f32 / self.sample_rate as f32
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            samples_received: self.samples_received,
            frames_extracted: self.frames_extracted,
            vad_active_ms: self.vad.status().active_duration_ms,
            scores_computed: self.scores_computed,
        }
    }

    // ------------------------------------------------------------------
    // Recording (opt-in, bounded)
    // ------------------------------------------------------------------

    pub fn start_recording(&mut self) {
        self.recording.clear();
        self.recording_enabled = true;
    }

    /// Stop and drain the recording buffer.
    pub fn stop_recording(&mut self) -> Vec<f32> {
        self.recording_enabled = false;
        std::mem::take(&mut self.recording)
    }

    pub fn set_recording_sink(&mut self, sink: Option<Arc<dyn RecordingSink>>) {
        self.recording_sink = sink;
    }

    // ------------------------------------------------------------------
    // Configuration (all transactional: validate before install)
    // ------------------------------------------------------------------

    /// MFCC geometry is frozen while features or a reference depend on it.
    pub fn set_mfcc_config(&mut self, config: MfccConfig) -> Result<()> {
        if config.sample_rate != self.sample_rate {
            return Err(EngineError::InvalidParams(format!(
                "MFCC sample_rate {} must match the session rate {}",
                config.sample_rate, self.sample_rate
            )));
        }
        if self.frames_extracted > 0 {
            return Err(EngineError::InvalidParams(
                "session has produced features; reset it before changing the MFCC config".into(),
            ));
        }
        if self.reference_id.is_some() {
            return Err(EngineError::InvalidParams(
                "a master call extracted under the current MFCC config is loaded; unload it first"
                    .into(),
            ));
        }
        let extractor = MfccExtractor::new(&config)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        self.extractor = extractor;
        self.extractor
            .set_cache_enabled(self.mode == SessionMode::Offline);
        self.mfcc_config = config;
        Ok(())
    }

    /// Replaces the detector; VAD state restarts from `Silent`.
    pub fn set_vad_config(&mut self, config: VadConfig) -> Result<()> {
        let vad = VoiceDetector::new(&config, self.sample_rate)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        self.vad = vad;
        Ok(())
    }

    pub fn set_dtw_config(&mut self, config: DtwConfig) -> Result<()> {
        self.scorer
            .set_dtw_config(&config)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))
    }

    pub fn set_scorer_config(&mut self, config: ScorerConfig) -> Result<()> {
        self.scorer
            .set_config(&config)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))
    }

    pub fn set_level_config(&mut self, config: LevelConfig) -> Result<()> {
        let mut level = LevelProcessor::new(&config, self.sample_rate)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        level.set_throttled(self.mode == SessionMode::Realtime);
        self.level = level;
        Ok(())
    }

    pub fn mfcc_config(&self) -> &MfccConfig {
        &self.mfcc_config
    }

    /// Clear all live state; configs, mode, and the loaded reference stay.
    pub fn reset(&mut self) {
        if !self.frame_buf.is_empty() {
            tracing::warn!(
                session = self.id,
                samples = self.frame_buf.len(),
                "Reset discards unconsumed tail samples"
            );
        }
        self.frame_buf.clear();
        self.pending.clear();
        self.window_log.clear();
        self.features.clear();
        self.energy_db.clear();
        self.extractor.reset();
        self.vad.reset();
        self.level.reset();
        self.scorer.reset();
        self.samples_received = 0;
        self.frames_extracted = 0;
        self.samples_analyzed = 0;
        self.scores_computed = 0;
        self.recording.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceFeatures;
    use std::f32::consts::PI;

    fn session() -> Session {
        Session::new(
            1,
            44_100,
            MfccConfig::default(),
            VadConfig::default(),
            DtwConfig::default(),
            ScorerConfig::default(),
            LevelConfig::default(),
        )
        .unwrap()
    }

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / 44_100.0).sin())
            .collect()
    }

    fn reference_from(samples: &[f32]) -> Arc<ReferenceFeatures> {
        let mut extractor = MfccExtractor::new(&MfccConfig::default()).unwrap();
        let (features, energy_db) = extractor.extract_batch(samples).unwrap();
        Arc::new(ReferenceFeatures {
            id: "ref".into(),
            features,
            energy_db,
        })
    }

    #[test]
    fn test_empty_chunk_rejected_without_side_effects() {
        let mut s = session();
        let err = s.process_chunk(&[], 0).unwrap_err();
        assert_eq!(err.kind(), "INVALID_PARAMS");
        assert_eq!(s.stats().samples_received, 0);
    }

    #[test]
    fn test_non_finite_chunk_rejected_without_side_effects() {
        let mut s = session();
        let err = s.process_chunk(&[0.1, f32::NAN, 0.2], 0).unwrap_err();
        assert_eq!(err.kind(), "INVALID_AUDIO_DATA");
        assert_eq!(s.stats().samples_received, 0);
        assert_eq!(s.stats().frames_extracted, 0);
    }

    #[test]
    fn test_frame_accounting_over_chunks() {
        let mut s = session();
        // 1000 samples: one 512 frame fits (offset 256 overruns at 768+512).
        s.process_chunk(&sine(440.0, 1000), 0).unwrap();
        let stats = s.stats();
        assert_eq!(stats.samples_received, 1000);
        // frames at offsets 0 and 256: 256 + 512 <= 1000
        assert_eq!(stats.frames_extracted, 2);
        // analyzed = 512 + 256
        assert_eq!(s.samples_analyzed, 768);
    }

    #[test]
    fn test_chunk_splitting_yields_identical_features() {
        let audio = sine(440.0, 44_100);

        let mut whole = session();
        whole.process_chunk(&audio, 0).unwrap();

        let mut split = session();
        // 1024-sample chunks keep frame alignment (multiple of hop 256).
        for chunk in audio.chunks(1024) {
            split.process_chunk(chunk, 0).unwrap();
        }

        assert_eq!(whole.features.len(), split.features.len());
        for (a, b) in whole.features.iter().zip(split.features.iter()) {
            assert_eq!(a, b, "chunking must not change extracted features");
        }
        assert_eq!(whole.samples_analyzed, split.samples_analyzed);
    }

    #[test]
    fn test_feature_matrix_bounded_by_reference_length() {
        let mut s = session();
        let reference_audio = sine(600.0, 22_050); // 0.5 s
        let reference = reference_from(&reference_audio);
        let cap = reference.num_frames();
        s.load_reference("ref".into(), reference);

        // Feed 2 s: live matrix must stay at the reference horizon.
        for _ in 0..4 {
            s.process_chunk(&sine(600.0, 22_050), 0).unwrap();
        }
        assert_eq!(s.features.len(), cap);
        assert_eq!(s.energy_db.len(), cap);
        assert_eq!(s.progress_ratio(), 1.0);
    }

    #[test]
    fn test_exact_reference_audio_scores_high() {
        let mut s = session();
        let audio = sine(700.0, 44_100);
        s.load_reference("ref".into(), reference_from(&audio));
        s.process_chunk(&audio, 0).unwrap();

        let score = s.scorer().latest().expect("score published").clone();
        assert!(score.mfcc > 0.98, "got mfcc {}", score.mfcc);
        assert!(score.overall > 0.98, "got overall {}", score.overall);
        assert!(score.is_reliable);
        assert_eq!(s.progress_ratio(), 1.0);
    }

    #[test]
    fn test_silence_never_activates_vad_or_matches() {
        let mut s = session();
        let audio = sine(700.0, 44_100);
        s.load_reference("ref".into(), reference_from(&audio));
        s.process_chunk(&vec![0.0; 44_100], 0).unwrap();

        assert!(!s.vad_status().is_active);
        assert!(
            s.features.is_empty(),
            "silent-window frames must never enter the live matrix"
        );
        let score = s.scorer().latest().unwrap();
        assert_eq!(score.overall, 0.0);
        assert!(!score.is_match);
        assert!(!score.is_reliable);
    }

    #[test]
    fn test_silent_surroundings_are_discarded_from_features() {
        let mut s = session();
        let mut audio = vec![0.0; 22_050]; // 0.5 s leading silence
        audio.extend(sine(700.0, 44_100)); // 1 s call
        audio.extend(vec![0.0; 22_050]); // 0.5 s trailing silence
        s.process_chunk(&audio, 0).unwrap();

        let total_cut = s.stats().frames_extracted as usize;
        let kept = s.features.len();
        let staged = s.pending.len();
        // Kept frames cover the call plus its pre-roll and hangover; the
        // surrounding silence (~150 of ~343 frames) is discarded, apart
        // from a small tail still inside the reclassification horizon.
        assert!(
            (195..=220).contains(&kept),
            "expected roughly the call's frames, got {} of {}",
            kept,
            total_cut
        );
        assert!(staged < 40, "only the horizon tail may stay pending, got {}", staged);
        assert!(
            total_cut - kept - staged > 90,
            "leading and trailing silence should be dropped, kept {} + {} of {}",
            kept,
            staged,
            total_cut
        );
    }

    #[test]
    fn test_interstitial_silence_is_dropped_but_hangover_is_kept() {
        let mut s = session();
        // Call, a 500 ms gap (well past the 150 ms hangover), second call.
        let mut audio = sine(700.0, 22_050);
        audio.extend(vec![0.0; 22_050]);
        audio.extend(sine(700.0, 22_050));
        // Settle the tail so the gap's frames are fully resolved.
        audio.extend(vec![0.0; 22_050]);
        s.process_chunk(&audio, 0).unwrap();

        let total_cut = s.stats().frames_extracted as usize;
        let kept = s.features.len() + s.pending.len();
        assert!(
            total_cut - kept > 70,
            "the mid-stream silent gap must be discarded, kept {} of {}",
            kept,
            total_cut
        );
    }

    #[test]
    fn test_mfcc_config_locked_after_features() {
        let mut s = session();
        s.process_chunk(&sine(440.0, 4096), 0).unwrap();
        let err = s
            .set_mfcc_config(MfccConfig {
                num_filters: 40,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_PARAMS");

        s.reset();
        assert!(s
            .set_mfcc_config(MfccConfig {
                num_filters: 40,
                ..Default::default()
            })
            .is_ok());
    }

    #[test]
    fn test_reset_restores_fresh_state_but_keeps_reference() {
        let mut s = session();
        let audio = sine(700.0, 44_100);
        s.load_reference("ref".into(), reference_from(&audio));
        s.process_chunk(&audio, 0).unwrap();
        assert!(s.scorer().latest().is_some());

        s.reset();
        assert_eq!(s.stats().samples_received, 0);
        assert_eq!(s.features.len(), 0);
        assert!(s.scorer().latest().is_none());
        assert_eq!(s.reference_id(), Some("ref"));

        // Identical processing after reset reproduces the score.
        s.process_chunk(&audio, 0).unwrap();
        assert!(s.scorer().latest().unwrap().overall > 0.98);
    }

    #[test]
    fn test_recording_drains_and_is_bounded_by_enable_window() {
        let mut s = session();
        s.process_chunk(&sine(300.0, 1000), 0).unwrap();
        s.start_recording();
        s.process_chunk(&sine(300.0, 2000), 0).unwrap();
        let taken = s.stop_recording();
        assert_eq!(taken.len(), 2000, "only samples while enabled are kept");
        // Drained: a second stop returns nothing.
        assert!(s.stop_recording().is_empty());
    }

    #[test]
    fn test_offline_mode_enables_cache_and_unthrottled_levels() {
        let mut s = session();
        s.set_mode(SessionMode::Offline);
        assert_eq!(s.mode(), SessionMode::Offline);
        s.process_chunk(&sine(440.0, 2048), 0).unwrap();
        assert!(
            !s.level_history(10).is_empty(),
            "offline sessions publish a measurement per chunk"
        );
    }
}
