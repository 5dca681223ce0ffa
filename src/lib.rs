//! callmaster - Real-time wildlife-call practice engine
//!
//! Streams live audio through an MFCC feature extractor, gates it with an
//! energy VAD, aligns it against a pre-loaded master call via banded DTW,
//! and fuses the result into a weighted similarity score with rolling
//! feedback. Many concurrent practice sessions, each with its own
//! reference, configuration, and state.
//!
//! ```rust,ignore
//! use callmaster::{Engine, MemoryReferenceProvider, ReferenceData};
//! use std::sync::Arc;
//!
//! let provider = MemoryReferenceProvider::new();
//! provider.insert("elk_bugle", ReferenceData::Audio { samples, sample_rate: 44_100 });
//!
//! let engine = Engine::with_provider(Arc::new(provider));
//! let session = engine.create_session(44_100)?;
//! engine.load_master_call(session, "elk_bugle")?;
//! engine.process_audio_chunk(session, &chunk)?;
//! let feedback = engine.get_realtime_feedback(session)?;
//! ```

pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod reference;
pub mod scoring;
mod session;
pub mod types;
pub mod vad;

pub use config::{DtwConfig, LevelConfig, MfccConfig, ScoreWeights, ScorerConfig, VadConfig};
pub use dsp::LevelSnapshot;
pub use engine::{Engine, SessionId};
pub use error::{EngineError, Result};
pub use reference::{
    Clock, MemoryReferenceProvider, MonotonicClock, RecordingSink, ReferenceData,
    ReferenceFeatures, ReferenceProvider,
};
pub use session::SessionMode;
pub use types::{LevelMeasurement, RealtimeFeedback, SessionStats, SimilarityScore, VadStatus};
