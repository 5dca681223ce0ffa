//! Reference Features and Collaborator Seams
//!
//! The engine consumes three collaborator interfaces it does not
//! implement: a [`ReferenceProvider`] that supplies master-call material,
//! a monotonic [`Clock`] for score timestamps, and an optional
//! [`RecordingSink`] that receives live chunks. A
//! [`MemoryReferenceProvider`] ships for tests and embedders.
//!
//! Extracted reference features are cached in a [`ReferenceStore`] keyed
//! by call id plus the MFCC config fingerprint. Entries are immutable and
//! `Arc`-owned, so eviction never invalidates a matrix a session is
//! still scoring against.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::config::MfccConfig;
use crate::dsp::mfcc::{frame_energy_db, MfccExtractor};
use crate::error::{EngineError, Result};

/// Immutable feature material for one master call under one MFCC config.
#[derive(Debug, Clone)]
pub struct ReferenceFeatures {
    pub id: String,
    /// One feature vector per frame.
    pub features: Vec<Vec<f32>>,
    /// Per-frame energy in dB, same length as `features` when available.
    /// Empty when the provider supplied bare features without an energy
    /// coefficient to derive it from.
    pub energy_db: Vec<f32>,
}

impl ReferenceFeatures {
    pub fn num_frames(&self) -> usize {
        self.features.len()
    }

    pub fn has_energy_track(&self) -> bool {
        self.energy_db.len() == self.features.len() && !self.energy_db.is_empty()
    }
}

/// Material a provider can hand back for a reference call id.
#[derive(Debug, Clone)]
pub enum ReferenceData {
    /// Pre-extracted features (must match the session's MFCC config).
    Features(Vec<Vec<f32>>),
    /// Raw mono audio the engine extracts itself.
    Audio { samples: Vec<f32>, sample_rate: u32 },
}

/// Supplies master-call material by id. May block (file, network); the
/// engine treats `load_master_call` as potentially slow.
pub trait ReferenceProvider: Send + Sync {
    fn fetch(&self, id: &str) -> anyhow::Result<ReferenceData>;
}

/// In-memory provider for tests and embedders that preload references.
#[derive(Default)]
pub struct MemoryReferenceProvider {
    entries: RwLock<HashMap<String, ReferenceData>>,
}

impl MemoryReferenceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, data: ReferenceData) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| {
            tracing::warn!("MemoryReferenceProvider RwLock poisoned, recovering");
            poisoned.into_inner()
        });
        entries.insert(id.into(), data);
    }
}

impl ReferenceProvider for MemoryReferenceProvider {
    fn fetch(&self, id: &str) -> anyhow::Result<ReferenceData> {
        let entries = self.entries.read().unwrap_or_else(|poisoned| {
            tracing::warn!("MemoryReferenceProvider RwLock poisoned, recovering");
            poisoned.into_inner()
        });
        entries
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no reference registered under '{}'", id))
    }
}

/// Monotonic time source for score timestamps.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Default clock: milliseconds since engine creation.
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Receives live chunks while a session records.
pub trait RecordingSink: Send + Sync {
    fn write(&self, session_id: u64, samples: &[f32]);
}

/// Shared read-only cache of extracted reference features.
#[derive(Default)]
pub struct ReferenceStore {
    cache: RwLock<HashMap<String, Arc<ReferenceFeatures>>>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_key(id: &str, config: &MfccConfig) -> String {
        format!("{}#{:016x}", id, config.fingerprint())
    }

    /// Fetch-or-extract the features for `id` under `config`.
    ///
    /// Provider failures map to `FileNotFound`; extraction or shape
    /// problems map to `InitFailed`.
    pub fn get_or_load(
        &self,
        id: &str,
        provider: &dyn ReferenceProvider,
        config: &MfccConfig,
    ) -> Result<Arc<ReferenceFeatures>> {
        let key = Self::cache_key(id, config);
        {
            let cache = self.read_cache();
            if let Some(entry) = cache.get(&key) {
                tracing::debug!(reference = id, "Reference cache hit");
                return Ok(Arc::clone(entry));
            }
        }

        let data = provider
            .fetch(id)
            .map_err(|e| EngineError::FileNotFound(format!("{}: {}", id, e)))?;
        let entry = Arc::new(Self::build(id, data, config)?);

        let mut cache = self.write_cache();
        let entry = cache.entry(key).or_insert(entry);
        tracing::debug!(
            reference = id,
            frames = entry.num_frames(),
            "Reference features cached"
        );
        Ok(Arc::clone(entry))
    }

    fn build(id: &str, data: ReferenceData, config: &MfccConfig) -> Result<ReferenceFeatures> {
        match data {
            ReferenceData::Features(features) => {
                if features.is_empty() {
                    return Err(EngineError::InitFailed(format!(
                        "reference '{}' has no frames",
                        id
                    )));
                }
                if features.iter().any(|f| f.len() != config.num_coefficients) {
                    return Err(EngineError::InitFailed(format!(
                        "reference '{}' feature dimension does not match num_coefficients {}",
                        id, config.num_coefficients
                    )));
                }
                // With the energy coefficient present, c0 = ln(frame energy),
                // so the dB track is 10*log10(e^c0) = 10*c0/ln(10). The
                // lifter leaves k = 0 untouched (sin(0) = 0).
                let energy_db = if config.use_energy {
                    features
                        .iter()
                        .map(|f| 10.0 * f[0] / std::f32::consts::LN_10)
                        .collect()
                } else {
                    Vec::new()
                };
                Ok(ReferenceFeatures {
                    id: id.to_string(),
                    features,
                    energy_db,
                })
            }
            ReferenceData::Audio {
                samples,
                sample_rate,
            } => {
                if sample_rate != config.sample_rate {
                    return Err(EngineError::InitFailed(format!(
                        "reference '{}' is {} Hz but the session expects {} Hz (format conversion is a collaborator concern)",
                        id, sample_rate, config.sample_rate
                    )));
                }
                let mut extractor =
                    MfccExtractor::new(config).map_err(|e| EngineError::InitFailed(e.to_string()))?;
                // Offline extraction; the frame cache pays off on re-loads
                // of overlapping material.
                extractor.set_cache_enabled(true);
                let (features, _) = extractor
                    .extract_batch(&samples)
                    .map_err(|e| EngineError::InitFailed(e.to_string()))?;
                if features.is_empty() {
                    return Err(EngineError::InitFailed(format!(
                        "reference '{}' is shorter than one frame",
                        id
                    )));
                }
                let energy_db = energy_track(&samples, config);
                Ok(ReferenceFeatures {
                    id: id.to_string(),
                    features,
                    energy_db,
                })
            }
        }
    }

    /// Drop cached entries for a call id (all config variants).
    /// Sessions holding an `Arc` keep their entry alive.
    pub fn evict(&self, id: &str) {
        let prefix = format!("{}#", id);
        let mut cache = self.write_cache();
        cache.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn keys(&self) -> Vec<String> {
        let cache = self.read_cache();
        let mut keys: Vec<String> = cache.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn clear(&self) {
        self.write_cache().clear();
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ReferenceFeatures>>> {
        self.cache.read().unwrap_or_else(|poisoned| {
            tracing::warn!("ReferenceStore RwLock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_cache(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ReferenceFeatures>>> {
        self.cache.write().unwrap_or_else(|poisoned| {
            tracing::warn!("ReferenceStore RwLock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Per-frame energy (dB) over the batch framing grid.
fn energy_track(samples: &[f32], config: &MfccConfig) -> Vec<f32> {
    let mut track = Vec::new();
    let mut offset = 0;
    while offset + config.frame_size <= samples.len() {
        track.push(frame_energy_db(&samples[offset..offset + config.frame_size]));
        offset += config.hop_size;
    }
    track
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn config() -> MfccConfig {
        MfccConfig::default()
    }

    #[test]
    fn test_audio_reference_extracts_features_and_energy() {
        let store = ReferenceStore::new();
        let provider = MemoryReferenceProvider::new();
        provider.insert(
            "bugle",
            ReferenceData::Audio {
                samples: sine(700.0, 44_100, 44_100),
                sample_rate: 44_100,
            },
        );

        let entry = store.get_or_load("bugle", &provider, &config()).unwrap();
        assert!(entry.num_frames() > 150, "1 s at hop 256 is ~170 frames");
        assert!(entry.has_energy_track());
        assert_eq!(entry.energy_db.len(), entry.num_frames());
    }

    #[test]
    fn test_missing_reference_is_file_not_found() {
        let store = ReferenceStore::new();
        let provider = MemoryReferenceProvider::new();
        let err = store
            .get_or_load("ghost", &provider, &config())
            .unwrap_err();
        assert_eq!(err.kind(), "FILE_NOT_FOUND");
    }

    #[test]
    fn test_sample_rate_mismatch_is_init_failed() {
        let store = ReferenceStore::new();
        let provider = MemoryReferenceProvider::new();
        provider.insert(
            "wrong_rate",
            ReferenceData::Audio {
                samples: sine(700.0, 16_000, 16_000),
                sample_rate: 16_000,
            },
        );
        let err = store
            .get_or_load("wrong_rate", &provider, &config())
            .unwrap_err();
        assert_eq!(err.kind(), "INIT_FAILED");
    }

    #[test]
    fn test_feature_reference_derives_energy_from_c0() {
        let store = ReferenceStore::new();
        let provider = MemoryReferenceProvider::new();

        // Extract real features first, then feed them back as bare features.
        let mut extractor = MfccExtractor::new(&config()).unwrap();
        let samples = sine(700.0, 44_100, 22_050);
        let (features, energies) = extractor.extract_batch(&samples).unwrap();
        provider.insert("precomputed", ReferenceData::Features(features));

        let entry = store
            .get_or_load("precomputed", &provider, &config())
            .unwrap();
        assert!(entry.has_energy_track());
        for (derived, direct) in entry.energy_db.iter().zip(&energies) {
            assert!(
                (derived - direct).abs() < 0.1,
                "c0-derived dB ({}) should match direct frame energy ({})",
                derived,
                direct
            );
        }
    }

    #[test]
    fn test_cache_shares_one_entry_and_eviction_keeps_borrowers_alive() {
        let store = ReferenceStore::new();
        let provider = MemoryReferenceProvider::new();
        provider.insert(
            "shared",
            ReferenceData::Audio {
                samples: sine(500.0, 44_100, 44_100),
                sample_rate: 44_100,
            },
        );

        let first = store.get_or_load("shared", &provider, &config()).unwrap();
        let second = store.get_or_load("shared", &provider, &config()).unwrap();
        assert!(Arc::ptr_eq(&first, &second), "cache must hand out one entry");

        store.evict("shared");
        assert!(store.keys().is_empty());
        assert!(first.num_frames() > 0, "borrowed entry outlives eviction");
    }

    #[test]
    fn test_cache_keys_on_config_fingerprint() {
        let store = ReferenceStore::new();
        let provider = MemoryReferenceProvider::new();
        provider.insert(
            "multi",
            ReferenceData::Audio {
                samples: sine(500.0, 44_100, 44_100),
                sample_rate: 44_100,
            },
        );

        let a = store.get_or_load("multi", &provider, &config()).unwrap();
        let other = MfccConfig {
            num_filters: 40,
            ..config()
        };
        let b = store.get_or_load("multi", &provider, &other).unwrap();
        assert!(!Arc::ptr_eq(&a, &b), "different configs must not share entries");
        assert_eq!(store.keys().len(), 2);
    }

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::default();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
