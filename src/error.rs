//! Engine Error Taxonomy
//!
//! Single result-value convention across the public API: every operation
//! returns `Result<T>` carrying either a payload or one error kind plus a
//! human-readable context string. Errors never cross the API boundary as
//! panics. Internal component failures (FFT, MFCC, DTW) surface as
//! [`crate::dsp::DspError`] and are mapped into this taxonomy by the
//! scorer and engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid audio data: {0}")]
    InvalidAudioData(String),
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    #[error("Session {0} not found")]
    SessionNotFound(u64),
    #[error("No master call loaded")]
    NoMasterCall,
    #[error("Reference not found: {0}")]
    FileNotFound(String),
    #[error("Processing error: {0}")]
    ProcessingError(String),
    #[error("Component error: {0}")]
    ComponentError(String),
    #[error("Initialization failed: {0}")]
    InitFailed(String),
    #[error("Out of memory: {0}")]
    OutOfMemory(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable kind tag, independent of the context string.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidParams(_) => "INVALID_PARAMS",
            EngineError::InvalidConfig(_) => "INVALID_CONFIG",
            EngineError::InvalidAudioData(_) => "INVALID_AUDIO_DATA",
            EngineError::InsufficientData(_) => "INSUFFICIENT_DATA",
            EngineError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            EngineError::NoMasterCall => "NO_MASTER_CALL",
            EngineError::FileNotFound(_) => "FILE_NOT_FOUND",
            EngineError::ProcessingError(_) => "PROCESSING_ERROR",
            EngineError::ComponentError(_) => "COMPONENT_ERROR",
            EngineError::InitFailed(_) => "INIT_FAILED",
            EngineError::OutOfMemory(_) => "OUT_OF_MEMORY",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(EngineError::SessionNotFound(7).kind(), "SESSION_NOT_FOUND");
        assert_eq!(EngineError::NoMasterCall.kind(), "NO_MASTER_CALL");
        assert_eq!(
            EngineError::InvalidParams("weights".into()).kind(),
            "INVALID_PARAMS"
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = EngineError::FileNotFound("elk_bugle_01".into());
        assert!(
            err.to_string().contains("elk_bugle_01"),
            "Display should carry the context string, got: {}",
            err
        );
    }
}
