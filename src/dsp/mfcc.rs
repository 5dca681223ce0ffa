//! MFCC Feature Extraction
//!
//! Frame pipeline: Hann window -> power spectrum -> triangular mel
//! filterbank -> log -> DCT-II -> optional energy coefficient and
//! sinusoidal liftering. The filterbank and DCT matrix are precomputed at
//! construction; per-frame work reuses scratch buffers.
//!
//! The frame cache exists for offline reference extraction, where the same
//! material is re-framed repeatedly. Live session frames are unique, so
//! the cache must stay disabled on the realtime path.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::f32::consts::PI;
use std::hash::{Hash, Hasher};

use crate::config::MfccConfig;

use super::fft::RealFft;
use super::DspError;

/// Floor added before the log so silent bins stay finite.
const LOG_FLOOR: f32 = 1e-10;

/// Cap on cached frames; beyond this new frames are extracted directly.
const MAX_CACHE_ENTRIES: usize = 8192;

/// Frame -> cepstrum extractor for one [`MfccConfig`].
pub struct MfccExtractor {
    config: MfccConfig,
    fft: RealFft,
    window: Vec<f32>,
    /// One dense row of filter weights per mel filter.
    filterbank: Vec<Vec<f32>>,
    /// DCT-II matrix, `num_coefficients` x `num_filters`, orthonormal.
    dct: Vec<Vec<f32>>,
    /// Lifter gains per coefficient; all 1.0 when liftering is off.
    lifter: Vec<f32>,
    windowed: Vec<f32>,
    spectrum: Vec<f32>,
    mel_energies: Vec<f32>,
    cache: HashMap<u64, Vec<f32>>,
    cache_enabled: bool,
}

impl MfccExtractor {
    pub fn new(config: &MfccConfig) -> Result<Self, DspError> {
        config
            .validate()
            .map_err(|e| DspError::InvalidConfig(e.to_string()))?;

        let fft = RealFft::new(config.frame_size)?;
        let num_bins = fft.num_bins();
        let window = hann_window(config.frame_size);
        let filterbank = build_mel_filterbank(config, num_bins);
        let dct = build_dct_matrix(config.num_filters, config.num_coefficients);
        let lifter = build_lifter(config);

        Ok(Self {
            config: config.clone(),
            fft,
            window,
            filterbank,
            dct,
            lifter,
            windowed: vec![0.0; config.frame_size],
            spectrum: vec![0.0; num_bins],
            mel_energies: vec![0.0; config.num_filters],
            cache: HashMap::new(),
            cache_enabled: false,
        })
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    /// Enable the frame cache (offline reference extraction only).
    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
        if !enabled {
            self.cache.clear();
        }
    }

    /// Extract one feature vector from a frame of exactly `frame_size` samples.
    pub fn extract(&mut self, frame: &[f32]) -> Result<Vec<f32>, DspError> {
        if frame.len() != self.config.frame_size {
            return Err(DspError::InvalidInput(format!(
                "frame length {} does not match configured frame_size {}",
                frame.len(),
                self.config.frame_size
            )));
        }

        let key = if self.cache_enabled {
            let key = frame_hash(frame);
            if let Some(hit) = self.cache.get(&key) {
                return Ok(hit.clone());
            }
            Some(key)
        } else {
            None
        };

        let features = self.extract_uncached(frame)?;

        if let Some(key) = key {
            if self.cache.len() < MAX_CACHE_ENTRIES {
                self.cache.insert(key, features.clone());
            }
        }
        Ok(features)
    }

    fn extract_uncached(&mut self, frame: &[f32]) -> Result<Vec<f32>, DspError> {
        for ((w, &sample), &gain) in self.windowed.iter_mut().zip(frame).zip(&self.window) {
            *w = sample * gain;
        }

        self.fft.power_spectrum(&self.windowed, &mut self.spectrum)?;

        for (energy, filter) in self.mel_energies.iter_mut().zip(&self.filterbank) {
            let acc: f32 = filter
                .iter()
                .zip(&self.spectrum)
                .map(|(&w, &p)| w * p)
                .sum();
            *energy = (acc + LOG_FLOOR).ln();
        }

        let mut coeffs = Vec::with_capacity(self.config.num_coefficients);
        for row in &self.dct {
            let c: f32 = row
                .iter()
                .zip(&self.mel_energies)
                .map(|(&d, &e)| d * e)
                .sum();
            coeffs.push(c);
        }

        if self.config.use_energy {
            let energy: f32 = frame.iter().map(|s| s * s).sum();
            coeffs[0] = (energy + LOG_FLOOR).ln();
        }

        if self.config.apply_lifter {
            for (c, &gain) in coeffs.iter_mut().zip(&self.lifter) {
                *c *= gain;
            }
        }

        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(DspError::ProcessingFailed(
                "non-finite cepstral coefficient".into(),
            ));
        }
        Ok(coeffs)
    }

    /// Batch mode: cut frames at offsets `0, hop, 2*hop, ...` while a full
    /// frame fits, returning one feature vector and one energy (dB) reading
    /// per frame. The tail shorter than a frame is the caller's to retain.
    pub fn extract_batch(&mut self, samples: &[f32]) -> Result<(Vec<Vec<f32>>, Vec<f32>), DspError> {
        let frame_size = self.config.frame_size;
        let hop = self.config.hop_size;

        let mut features = Vec::new();
        let mut energies = Vec::new();
        let mut offset = 0;
        while offset + frame_size <= samples.len() {
            let frame = &samples[offset..offset + frame_size];
            energies.push(frame_energy_db(frame));
            features.push(self.extract(frame)?);
            offset += hop;
        }
        Ok((features, energies))
    }

    /// Drop cached frames (the configuration itself stays).
    pub fn reset(&mut self) {
        self.cache.clear();
    }
}

/// Frame energy as dB relative to full scale: `10 * log10(sum(frame^2))`.
/// Matches the scale of the energy coefficient `ln(sum(frame^2))` so live
/// and reference loudness tracks are directly comparable.
pub fn frame_energy_db(frame: &[f32]) -> f32 {
    let energy: f32 = frame.iter().map(|s| s * s).sum();
    10.0 * (energy + LOG_FLOOR).log10()
}

fn frame_hash(frame: &[f32]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for sample in frame {
        sample.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

/// Symmetric Hann window.
fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (size - 1) as f32).cos()))
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank spanning `[low_freq, high_freq]`,
/// `num_filters` rows over `num_bins` spectrum bins.
fn build_mel_filterbank(config: &MfccConfig, num_bins: usize) -> Vec<Vec<f32>> {
    let num_filters = config.num_filters;
    let mel_lo = hz_to_mel(config.low_freq);
    let mel_hi = hz_to_mel(config.effective_high_freq());

    // num_filters + 2 edge points; each filter spans three consecutive edges.
    let bin_points: Vec<f32> = (0..num_filters + 2)
        .map(|i| {
            let mel = mel_lo + (mel_hi - mel_lo) * i as f32 / (num_filters + 1) as f32;
            mel_to_hz(mel) * config.frame_size as f32 / config.sample_rate as f32
        })
        .collect();

    let mut filters = Vec::with_capacity(num_filters);
    for f in 0..num_filters {
        let left = bin_points[f];
        let center = bin_points[f + 1];
        let right = bin_points[f + 2];

        let mut filter = vec![0.0f32; num_bins];
        for (bin, weight) in filter.iter_mut().enumerate() {
            let b = bin as f32;
            if b >= left && b <= center && (center - left) > 1e-10 {
                *weight = (b - left) / (center - left);
            } else if b > center && b <= right && (right - center) > 1e-10 {
                *weight = (right - b) / (right - center);
            }
        }
        filters.push(filter);
    }
    filters
}

/// Orthonormal DCT-II matrix, `num_coefficients` rows x `num_filters` columns.
fn build_dct_matrix(num_filters: usize, num_coefficients: usize) -> Vec<Vec<f32>> {
    let m = num_filters as f32;
    (0..num_coefficients)
        .map(|k| {
            let scale = if k == 0 {
                (1.0 / m).sqrt()
            } else {
                (2.0 / m).sqrt()
            };
            (0..num_filters)
                .map(|i| scale * (PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * m)).cos())
                .collect()
        })
        .collect()
}

/// Sinusoidal lifter gains `1 + (L/2) * sin(pi * k / L)`.
fn build_lifter(config: &MfccConfig) -> Vec<f32> {
    let l = config.lifter_coeff;
    (0..config.num_coefficients)
        .map(|k| {
            if config.apply_lifter {
                1.0 + (l / 2.0) * (PI * k as f32 / l).sin()
            } else {
                1.0
            }
        })
        .collect()
}
