//! DSP Pipeline Components
//!
//! The per-session signal chain, leaves first:
//!
//! ```text
//! chunk ─► frame cutter ─► MfccExtractor ─► feature matrix ─┐
//!      │                                                    ├─► DtwComparator ─► scorer
//!      │   reference features (offline, cached) ────────────┘
//!      └─► LevelProcessor (RMS/peak, dB, history)
//! ```
//!
//! Components surface [`DspError`] kinds; the scorer and engine map them
//! into the public [`crate::error::EngineError`] taxonomy.

pub mod dtw;
pub mod fft;
pub mod level;
pub mod mfcc;

pub use dtw::{DtwComparator, DtwResult};
pub use fft::RealFft;
pub use level::{LevelProcessor, LevelSnapshot};
pub use mfcc::MfccExtractor;

use thiserror::Error;

/// Component-level failure kinds, mapped to the public taxonomy at the
/// scorer/engine boundary.
#[derive(Error, Debug)]
pub enum DspError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("FFT failed: {0}")]
    FftFailed(String),
    #[error("Nothing to compare: {0}")]
    NoComparison(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

impl From<DspError> for crate::error::EngineError {
    fn from(err: DspError) -> Self {
        match err {
            DspError::InvalidInput(msg) => crate::error::EngineError::InvalidAudioData(msg),
            DspError::InvalidConfig(msg) => crate::error::EngineError::InvalidConfig(msg),
            DspError::NoComparison(msg) => crate::error::EngineError::InsufficientData(msg),
            other => crate::error::EngineError::ComponentError(other.to_string()),
        }
    }
}
