//! FFT Kernel
//!
//! Real-valued forward FFT on power-of-two windows. Plans are cached
//! process-wide per size, so every extractor sharing a frame size reuses
//! one plan; the per-instance complex buffer and scratch are allocated at
//! construction, keeping the per-frame path allocation-free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::DspError;

/// Process-wide forward-plan cache, keyed by transform size.
static PLAN_CACHE: Lazy<Mutex<HashMap<usize, Arc<dyn Fft<f32>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn plan_forward(size: usize) -> Arc<dyn Fft<f32>> {
    let mut cache = PLAN_CACHE.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("FFT plan cache Mutex poisoned, recovering");
        poisoned.into_inner()
    });
    if let Some(plan) = cache.get(&size) {
        return Arc::clone(plan);
    }
    let plan = FftPlanner::new().plan_fft_forward(size);
    cache.insert(size, Arc::clone(&plan));
    plan
}

/// Forward FFT over real input frames of a fixed power-of-two size.
pub struct RealFft {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl RealFft {
    pub fn new(size: usize) -> Result<Self, DspError> {
        if size < 2 || !size.is_power_of_two() {
            return Err(DspError::InvalidConfig(format!(
                "FFT size must be a power of two >= 2, got {}",
                size
            )));
        }
        let fft = plan_forward(size);
        let scratch_len = fft.get_inplace_scratch_len();
        Ok(Self {
            size,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of non-redundant spectrum bins (DC through Nyquist).
    pub fn num_bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Power spectrum of `frame` into `out` (length [`Self::num_bins`]).
    /// Bins above Nyquist are discarded.
    pub fn power_spectrum(&mut self, frame: &[f32], out: &mut [f32]) -> Result<(), DspError> {
        if frame.len() != self.size {
            return Err(DspError::InvalidInput(format!(
                "frame length {} does not match FFT size {}",
                frame.len(),
                self.size
            )));
        }
        if out.len() != self.num_bins() {
            return Err(DspError::InvalidInput(format!(
                "output length {} does not match bin count {}",
                out.len(),
                self.num_bins()
            )));
        }

        for (slot, &sample) in self.buffer.iter_mut().zip(frame.iter()) {
            *slot = Complex::new(sample, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (bin, slot) in out.iter_mut().zip(self.buffer.iter()) {
            *bin = slot.norm_sqr();
        }
        if out.iter().any(|bin| !bin.is_finite()) {
            return Err(DspError::FftFailed(
                "non-finite value in spectrum output".into(),
            ));
        }
        Ok(())
    }
}
