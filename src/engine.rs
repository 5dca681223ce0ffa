//! Engine: Session Ownership and Public API
//!
//! An explicitly created value (no process-wide singleton): callers share
//! it behind their own `Arc`. Sessions live in a map guarded by an
//! `RwLock`; each session carries its own reader-writer lock, so chunk
//! submission on one session never blocks queries on another. Within a
//! session, writer-lock acquisition order is submission order; a reader
//! always observes the state before or after a chunk, never mid-chunk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{DtwConfig, LevelConfig, MfccConfig, ScorerConfig, VadConfig, MAX_SAMPLE_RATE};
use crate::dsp::LevelSnapshot;
use crate::error::{EngineError, Result};
use crate::reference::{Clock, MonotonicClock, RecordingSink, ReferenceProvider, ReferenceStore};
use crate::session::{Session, SessionMode};
use crate::types::{
    LevelMeasurement, RealtimeFeedback, SessionStats, SimilarityScore, VadStatus,
};

/// Opaque session handle. Zero is never assigned and means "invalid".
pub type SessionId = u64;

pub struct Engine {
    sessions: RwLock<HashMap<SessionId, Arc<RwLock<Session>>>>,
    next_id: AtomicU64,
    store: ReferenceStore,
    provider: Option<Arc<dyn ReferenceProvider>>,
    clock: Arc<dyn Clock>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine without a reference provider: sessions work, but
    /// `load_master_call` reports `INIT_FAILED` until one is attached.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            store: ReferenceStore::new(),
            provider: None,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn with_provider(provider: Arc<dyn ReferenceProvider>) -> Self {
        let mut engine = Self::new();
        engine.provider = Some(provider);
        engine
    }

    /// Replace the clock (tests inject a deterministic one).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn create_session(&self, sample_rate: u32) -> Result<SessionId> {
        if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
            return Err(EngineError::InvalidParams(format!(
                "sample_rate must be in 1..={}, got {}",
                MAX_SAMPLE_RATE, sample_rate
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mfcc = MfccConfig {
            sample_rate,
            ..Default::default()
        };
        let session = Session::new(
            id,
            sample_rate,
            mfcc,
            VadConfig::default(),
            DtwConfig::default(),
            ScorerConfig::default(),
            LevelConfig::default(),
        )?;

        self.sessions_write()
            .insert(id, Arc::new(RwLock::new(session)));
        tracing::info!(session = id, sample_rate, "Session created");
        Ok(id)
    }

    /// Waits for any in-flight writer on the session, then drops it.
    /// A second destroy of the same id reports `SESSION_NOT_FOUND`.
    pub fn destroy_session(&self, id: SessionId) -> Result<()> {
        let removed = self.sessions_write().remove(&id);
        match removed {
            Some(slot) => {
                // Block until the current call (if any) returns.
                drop(slot.write().unwrap_or_else(|poisoned| {
                    tracing::warn!(session = id, "Session lock poisoned, recovering");
                    poisoned.into_inner()
                }));
                tracing::info!(session = id, "Session destroyed");
                Ok(())
            }
            None => Err(EngineError::SessionNotFound(id)),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions_read().len()
    }

    pub fn reset_session(&self, id: SessionId) -> Result<()> {
        self.with_session_mut(id, |session| {
            session.reset();
            Ok(())
        })
    }

    /// Engine-scope reset: every live session back to its post-create,
    /// reference-loaded state.
    pub fn reset_all_sessions(&self) {
        let slots: Vec<Arc<RwLock<Session>>> = self.sessions_read().values().cloned().collect();
        for slot in slots {
            write_session(&slot).reset();
        }
    }

    // ------------------------------------------------------------------
    // Master call handling
    // ------------------------------------------------------------------

    /// Potentially slow: the provider may do I/O and raw audio is
    /// feature-extracted on this call.
    pub fn load_master_call(&self, id: SessionId, reference_id: &str) -> Result<()> {
        let provider = self
            .provider
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| EngineError::InitFailed("no reference provider attached".into()))?;

        self.with_session_mut(id, |session| {
            let features =
                self.store
                    .get_or_load(reference_id, provider.as_ref(), session.mfcc_config())?;
            session.load_reference(reference_id.to_string(), features);
            tracing::info!(session = id, reference = reference_id, "Master call loaded");
            Ok(())
        })
    }

    pub fn unload_master_call(&self, id: SessionId) -> Result<()> {
        self.with_session_mut(id, |session| {
            session.unload_reference();
            Ok(())
        })
    }

    /// ReferenceCallId the session currently scores against, if any.
    pub fn loaded_reference(&self, id: SessionId) -> Result<Option<String>> {
        self.with_session(id, |session| {
            Ok(session.reference_id().map(str::to_string))
        })
    }

    /// Cache keys currently held by the reference store (observability).
    pub fn cached_references(&self) -> Vec<String> {
        self.store.keys()
    }

    /// Drop cached features for a reference id. Sessions holding the
    /// entry keep scoring against it.
    pub fn evict_reference(&self, reference_id: &str) {
        self.store.evict(reference_id);
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    pub fn process_audio_chunk(&self, id: SessionId, samples: &[f32]) -> Result<()> {
        let now_ms = self.clock.now_ms();
        self.with_session_mut(id, |session| {
            session.process_chunk(samples, now_ms).map_err(|e| match e {
                // Input rejections and component failures keep their kind;
                // anything else surfaces as a processing error.
                EngineError::InvalidParams(_)
                | EngineError::InvalidAudioData(_)
                | EngineError::ComponentError(_) => e,
                other => EngineError::ProcessingError(other.to_string()),
            })
        })
    }

    // ------------------------------------------------------------------
    // Queries (reader lock)
    // ------------------------------------------------------------------

    /// Latest overall score in `[0, 1]`.
    pub fn get_similarity_score(&self, id: SessionId) -> Result<f32> {
        Ok(self.get_detailed_score(id)?.overall)
    }

    pub fn get_detailed_score(&self, id: SessionId) -> Result<SimilarityScore> {
        self.with_session(id, |session| {
            if session.scorer().reference().is_none() {
                return Err(EngineError::NoMasterCall);
            }
            session
                .scorer()
                .latest()
                .cloned()
                .ok_or_else(|| EngineError::InsufficientData("no score computed yet".into()))
        })
    }

    pub fn get_realtime_feedback(&self, id: SessionId) -> Result<RealtimeFeedback> {
        self.with_session(id, |session| {
            session.scorer().feedback(session.progress_ratio())
        })
    }

    /// Most recent scores, newest last, capped at `max`.
    pub fn get_scoring_history(&self, id: SessionId, max: usize) -> Result<Vec<SimilarityScore>> {
        self.with_session(id, |session| Ok(session.scorer().history(max)))
    }

    pub fn get_vad_status(&self, id: SessionId) -> Result<VadStatus> {
        self.with_session(id, |session| Ok(session.vad_status()))
    }

    /// Current `(rms_db, peak_db)` level pair.
    pub fn get_current_level(&self, id: SessionId) -> Result<(f32, f32)> {
        self.with_session(id, |session| Ok(session.current_level()))
    }

    /// Lock-free handle for a polling reader (stays valid after destroy,
    /// reporting the last published value).
    pub fn level_snapshot(&self, id: SessionId) -> Result<LevelSnapshot> {
        self.with_session(id, |session| Ok(session.level_snapshot()))
    }

    pub fn get_level_history(
        &self,
        id: SessionId,
        max: usize,
    ) -> Result<Vec<LevelMeasurement>> {
        self.with_session(id, |session| Ok(session.level_history(max)))
    }

    /// Seconds of audio the session has consumed.
    pub fn get_session_duration(&self, id: SessionId) -> Result<f32> {
        self.with_session(id, |session| Ok(session.duration_secs()))
    }

    pub fn get_session_stats(&self, id: SessionId) -> Result<SessionStats> {
        self.with_session(id, |session| Ok(session.stats()))
    }

    // ------------------------------------------------------------------
    // Configuration and modes (writer lock, transactional)
    // ------------------------------------------------------------------

    pub fn configure_mfcc(&self, id: SessionId, config: MfccConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        self.with_session_mut(id, |session| session.set_mfcc_config(config.clone()))
    }

    pub fn configure_vad(&self, id: SessionId, config: VadConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        self.with_session_mut(id, |session| session.set_vad_config(config.clone()))
    }

    pub fn configure_dtw(&self, id: SessionId, config: DtwConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        self.with_session_mut(id, |session| session.set_dtw_config(config.clone()))
    }

    pub fn set_realtime_scorer_config(&self, id: SessionId, config: ScorerConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        self.with_session_mut(id, |session| session.set_scorer_config(config.clone()))
    }

    pub fn configure_level(&self, id: SessionId, config: LevelConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        self.with_session_mut(id, |session| session.set_level_config(config.clone()))
    }

    pub fn set_session_mode(&self, id: SessionId, mode: SessionMode) -> Result<()> {
        self.with_session_mut(id, |session| {
            session.set_mode(mode);
            Ok(())
        })
    }

    pub fn get_session_mode(&self, id: SessionId) -> Result<SessionMode> {
        self.with_session(id, |session| Ok(session.mode()))
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    pub fn start_recording(&self, id: SessionId) -> Result<()> {
        self.with_session_mut(id, |session| {
            session.start_recording();
            Ok(())
        })
    }

    /// Stop recording and drain the captured samples.
    pub fn stop_recording(&self, id: SessionId) -> Result<Vec<f32>> {
        self.with_session_mut(id, |session| Ok(session.stop_recording()))
    }

    pub fn set_recording_sink(
        &self,
        id: SessionId,
        sink: Option<Arc<dyn RecordingSink>>,
    ) -> Result<()> {
        self.with_session_mut(id, |session| {
            session.set_recording_sink(sink.clone());
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Lock plumbing
    // ------------------------------------------------------------------

    fn session_slot(&self, id: SessionId) -> Result<Arc<RwLock<Session>>> {
        self.sessions_read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::SessionNotFound(id))
    }

    fn with_session<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&Session) -> Result<T>,
    ) -> Result<T> {
        let slot = self.session_slot(id)?;
        let guard = read_session(&slot);
        f(&guard)
    }

    fn with_session_mut<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let slot = self.session_slot(id)?;
        let mut guard = write_session(&slot);
        f(&mut guard)
    }

    fn sessions_read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<RwLock<Session>>>> {
        self.sessions.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Engine session map RwLock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn sessions_write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<RwLock<Session>>>> {
        self.sessions.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Engine session map RwLock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn read_session(slot: &Arc<RwLock<Session>>) -> RwLockReadGuard<'_, Session> {
    slot.read().unwrap_or_else(|poisoned| {
        tracing::warn!("Session RwLock poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write_session(slot: &Arc<RwLock<Session>>) -> RwLockWriteGuard<'_, Session> {
    slot.write().unwrap_or_else(|poisoned| {
        tracing::warn!("Session RwLock poisoned, recovering");
        poisoned.into_inner()
    })
}
