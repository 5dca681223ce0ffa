//! End-to-end scoring scenarios against the public engine API.
//!
//! Synthetic master calls are built from piecewise tone segments so the
//! MFCC profile is controlled: matching audio shares segment frequencies,
//! a "wrong call" lives in a disjoint band.

use std::f32::consts::PI;
use std::sync::Arc;

use callmaster::{
    Clock, Engine, MemoryReferenceProvider, ReferenceData, ScoreWeights, ScorerConfig,
    SessionMode, VadConfig,
};

const RATE: u32 = 44_100;

/// Opt-in log output for debugging: RUST_LOG=callmaster=debug cargo test
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("callmaster=warn")),
        )
        .try_init();
}

/// Piecewise-constant tone sequence at amplitude 0.5.
fn call(segments: &[(f32, usize)]) -> Vec<f32> {
    let mut samples = Vec::new();
    for &(freq, len) in segments {
        for i in 0..len {
            samples.push(0.5 * (2.0 * PI * freq * i as f32 / RATE as f32).sin());
        }
    }
    samples
}

/// One-second low warble used as the primary master call.
fn master_call() -> Vec<f32> {
    call(&[(500.0, 14_700), (800.0, 14_700), (650.0, 14_700)])
}

/// Same contour stretched to 110% duration, same spectral content.
fn stretched_call() -> Vec<f32> {
    call(&[(500.0, 16_170), (800.0, 16_170), (650.0, 16_170)])
}

/// Spectrally disjoint call (high band).
fn wrong_call() -> Vec<f32> {
    call(&[(4_000.0, 14_700), (6_500.0, 14_700), (5_200.0, 14_700)])
}

fn engine() -> Engine {
    let provider = MemoryReferenceProvider::new();
    provider.insert(
        "master",
        ReferenceData::Audio {
            samples: master_call(),
            sample_rate: RATE,
        },
    );
    provider.insert(
        "other",
        ReferenceData::Audio {
            samples: wrong_call(),
            sample_rate: RATE,
        },
    );
    Engine::with_provider(Arc::new(provider))
}

struct FixedClock;

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        1_000
    }
}

#[test]
fn self_similarity_scores_near_perfect() {
    init_tracing();
    let engine = engine();
    let id = engine.create_session(RATE).unwrap();
    engine.load_master_call(id, "master").unwrap();

    engine.process_audio_chunk(id, &master_call()).unwrap();

    let score = engine.get_detailed_score(id).unwrap();
    assert!(score.overall >= 0.98, "overall {}", score.overall);
    assert!(score.mfcc >= 0.98, "mfcc {}", score.mfcc);
    assert!(score.timing >= 0.95, "timing {}", score.timing);
    assert!(score.is_match);
    assert!(score.is_reliable, "confidence {}", score.confidence);

    let feedback = engine.get_realtime_feedback(id).unwrap();
    assert_eq!(feedback.progress_ratio, 1.0);
    assert!(
        (feedback.peak_score - feedback.current.overall).abs() < 1e-6,
        "first score is also the peak"
    );
    assert_eq!(feedback.quality_assessment, "Excellent");
}

#[test]
fn silence_stays_silent_and_unreliable() {
    let engine = engine();
    let id = engine.create_session(RATE).unwrap();
    engine.load_master_call(id, "master").unwrap();

    engine.process_audio_chunk(id, &vec![0.0; RATE as usize]).unwrap();

    let vad = engine.get_vad_status(id).unwrap();
    assert!(!vad.is_active, "VAD must stay silent on zeros");
    assert_eq!(vad.active_duration_ms, 0.0);

    let score = engine.get_detailed_score(id).unwrap();
    assert!(score.volume < 0.01, "volume {}", score.volume);
    assert!(score.overall < 0.05, "overall {}", score.overall);
    assert!(!score.is_match);
    assert!(!score.is_reliable);
}

#[test]
fn trailing_silence_does_not_erase_the_match() {
    let engine = engine();
    let id = engine.create_session(RATE).unwrap();
    // Tight hangover so the open segment carries almost no dead air.
    engine
        .configure_vad(
            id,
            VadConfig {
                pre_buffer_ms: 0.0,
                post_buffer_ms: 20.0,
                ..Default::default()
            },
        )
        .unwrap();
    engine.load_master_call(id, "master").unwrap();

    engine.process_audio_chunk(id, &master_call()).unwrap();
    let during = engine.get_detailed_score(id).unwrap();
    assert!(during.overall >= 0.98, "got {}", during.overall);

    // Two seconds of dead air after the call. Silent-window frames are
    // discarded rather than scrolling the call out of the live matrix,
    // so the score keeps reflecting the call instead of the silence.
    engine
        .process_audio_chunk(id, &vec![0.0; 2 * RATE as usize])
        .unwrap();
    let after = engine.get_detailed_score(id).unwrap();
    assert!(after.mfcc > 0.25, "got mfcc {}", after.mfcc);
    assert!(after.overall > 0.25, "got overall {}", after.overall);
    assert!(after.is_match);
}

#[test]
fn time_stretched_call_keeps_mfcc_but_loses_timing() {
    let engine = engine();

    // Baseline: exact rendition.
    let exact = engine.create_session(RATE).unwrap();
    engine.load_master_call(exact, "master").unwrap();
    engine.process_audio_chunk(exact, &master_call()).unwrap();
    let baseline = engine.get_detailed_score(exact).unwrap();

    // 110% duration, same spectral content.
    let slow = engine.create_session(RATE).unwrap();
    engine.load_master_call(slow, "master").unwrap();
    engine.process_audio_chunk(slow, &stretched_call()).unwrap();
    let stretched = engine.get_detailed_score(slow).unwrap();

    assert!(stretched.mfcc >= 0.9, "mfcc {}", stretched.mfcc);
    assert!(
        stretched.timing < 0.8 && stretched.timing < baseline.timing - 0.15,
        "stretch must cost timing: {} vs baseline {}",
        stretched.timing,
        baseline.timing
    );
    assert!(
        stretched.is_match,
        "a stretched rendition still clears the match floor, overall {}",
        stretched.overall
    );
}

#[test]
fn wrong_reference_does_not_match() {
    let engine = engine();
    let id = engine.create_session(RATE).unwrap();
    engine.load_master_call(id, "master").unwrap();

    // Discrimination threshold for the match flag; components unchanged.
    engine
        .set_realtime_scorer_config(
            id,
            ScorerConfig {
                min_score_for_match: 0.6,
                ..Default::default()
            },
        )
        .unwrap();

    engine.process_audio_chunk(id, &wrong_call()).unwrap();

    let score = engine.get_detailed_score(id).unwrap();
    assert!(
        score.mfcc < 0.3,
        "disjoint spectra must kill the mfcc component, got {}",
        score.mfcc
    );
    assert!(score.overall < 0.6, "overall {}", score.overall);
    assert!(!score.is_match);
}

#[test]
fn rejected_weights_keep_previous_config() {
    let engine = engine();
    let id = engine.create_session(RATE).unwrap();
    engine.load_master_call(id, "master").unwrap();

    let bad = ScorerConfig {
        weights: ScoreWeights {
            mfcc: 0.5,
            volume: 0.2,
            timing: 0.1,
            pitch: 0.1,
        },
        ..Default::default()
    };
    let err = engine.set_realtime_scorer_config(id, bad).unwrap_err();
    assert_eq!(err.kind(), "INVALID_PARAMS");

    // The session still scores under the retained config.
    engine.process_audio_chunk(id, &master_call()).unwrap();
    let score = engine.get_detailed_score(id).unwrap();
    assert!(score.overall >= 0.98, "overall {}", score.overall);
    assert!(score.is_reliable);
}

#[test]
fn chunk_splitting_is_score_invariant() {
    let engine = engine().with_clock(Arc::new(FixedClock));
    let audio = master_call();

    let whole = engine.create_session(RATE).unwrap();
    engine.load_master_call(whole, "master").unwrap();
    engine.process_audio_chunk(whole, &audio).unwrap();

    let split = engine.create_session(RATE).unwrap();
    engine.load_master_call(split, "master").unwrap();
    // Uneven chunk sizes; the frame cutter carries the tail across calls.
    for chunk in audio.chunks(997) {
        engine.process_audio_chunk(split, chunk).unwrap();
    }

    let a = engine.get_detailed_score(whole).unwrap();
    let b = engine.get_detailed_score(split).unwrap();
    assert_eq!(a.mfcc, b.mfcc, "feature matrices must be identical");
    assert_eq!(a.timing, b.timing);
    assert_eq!(a.volume, b.volume);
    assert_eq!(a.overall, b.overall);
    assert_eq!(a.samples_analyzed, b.samples_analyzed);
}

#[test]
fn reset_session_restores_post_load_state() {
    let engine = engine();
    let id = engine.create_session(RATE).unwrap();
    engine.load_master_call(id, "master").unwrap();
    engine.process_audio_chunk(id, &master_call()).unwrap();
    let first = engine.get_detailed_score(id).unwrap();

    engine.reset_session(id).unwrap();
    // Idempotent: a second reset is harmless.
    engine.reset_session(id).unwrap();

    assert_eq!(
        engine.get_detailed_score(id).unwrap_err().kind(),
        "INSUFFICIENT_DATA",
        "reset clears the score history"
    );
    assert_eq!(
        engine.loaded_reference(id).unwrap().as_deref(),
        Some("master"),
        "reset keeps the reference loaded"
    );
    assert_eq!(engine.get_session_duration(id).unwrap(), 0.0);

    // Same audio after reset reproduces the same components.
    engine.process_audio_chunk(id, &master_call()).unwrap();
    let second = engine.get_detailed_score(id).unwrap();
    assert_eq!(first.mfcc, second.mfcc);
    assert_eq!(first.overall, second.overall);
}

#[test]
fn two_sessions_same_audio_same_score() {
    let engine = engine().with_clock(Arc::new(FixedClock));
    let a = engine.create_session(RATE).unwrap();
    let b = engine.create_session(RATE).unwrap();
    engine.load_master_call(a, "master").unwrap();
    engine.load_master_call(b, "master").unwrap();

    let audio = master_call();
    engine.process_audio_chunk(a, &audio).unwrap();
    engine.process_audio_chunk(b, &audio).unwrap();

    let score_a = engine.get_detailed_score(a).unwrap();
    let score_b = engine.get_detailed_score(b).unwrap();
    assert_eq!(score_a.overall, score_b.overall);
    assert_eq!(score_a.mfcc, score_b.mfcc);
    assert_eq!(score_a.volume, score_b.volume);
    assert_eq!(score_a.timing, score_b.timing);
    assert_eq!(score_a.confidence, score_b.confidence);
    assert_eq!(score_a.timestamp_ms, score_b.timestamp_ms);
}

#[test]
fn offline_session_matches_realtime_output() {
    let engine = engine().with_clock(Arc::new(FixedClock));
    let audio = master_call();

    let realtime = engine.create_session(RATE).unwrap();
    engine.load_master_call(realtime, "master").unwrap();
    engine.process_audio_chunk(realtime, &audio).unwrap();

    let offline = engine.create_session(RATE).unwrap();
    engine
        .set_session_mode(offline, SessionMode::Offline)
        .unwrap();
    assert_eq!(
        engine.get_session_mode(offline).unwrap(),
        SessionMode::Offline
    );
    engine.load_master_call(offline, "master").unwrap();
    engine.process_audio_chunk(offline, &audio).unwrap();

    // The frame cache is an optimization, never a semantic change.
    let a = engine.get_detailed_score(realtime).unwrap();
    let b = engine.get_detailed_score(offline).unwrap();
    assert_eq!(a.mfcc, b.mfcc);
    assert_eq!(a.overall, b.overall);
    assert_eq!(a.samples_analyzed, b.samples_analyzed);
}

#[test]
fn scoring_history_is_capped_and_ordered() {
    let engine = engine();
    let id = engine.create_session(RATE).unwrap();
    engine.load_master_call(id, "master").unwrap();

    let audio = master_call();
    for chunk in audio.chunks(4410) {
        engine.process_audio_chunk(id, chunk).unwrap();
    }
    let history = engine.get_scoring_history(id, 3).unwrap();
    assert_eq!(history.len(), 3);
    let full = engine.get_scoring_history(id, 100).unwrap();
    assert_eq!(full.len(), 10, "one score per processed chunk");
    assert_eq!(
        full.last().unwrap().overall,
        engine.get_detailed_score(id).unwrap().overall
    );
}
