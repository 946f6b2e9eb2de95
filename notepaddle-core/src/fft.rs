//! # Fast Fourier Transform (FFT) Module
//!
//! Thin helpers over RustFFT shared by the spectrum engine and both pitch
//! strategies.
//!
//! ## Features
//! - Reusable forward/inverse plans for a fixed transform length
//! - Hann windowing and DC offset removal
//! - FFT-based cross-correlation for the YIN difference function

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Removes the DC offset from a signal by making its average value zero.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 { return; }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Symmetric Hann window of `len` points.
pub fn hann_window(len: usize) -> Vec<f32> {
    match len {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let n_minus_1 = (len - 1) as f32;
            (0..len)
                .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
                .collect()
        }
    }
}

/// Applies a Hann window to the input buffer to reduce spectral leakage.
///
/// # Arguments
/// * `buffer` - Audio buffer to window (modified in-place)
pub fn apply_hann_window(buffer: &mut [f32]) {
    let window = hann_window(buffer.len());
    for (sample, w) in buffer.iter_mut().zip(window) {
        *sample *= w;
    }
}

/// Forward and inverse plans for one transform length.
///
/// Planning is the expensive part of RustFFT; build one plan per length
/// and reuse it for every frame of that length.
pub struct FftPlan {
    len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl FftPlan {
    pub fn new(len: usize) -> Self {
        let len = len.max(1);
        let mut planner = FftPlanner::new();
        Self {
            len,
            forward: planner.plan_fft_forward(len),
            inverse: planner.plan_fft_inverse(len),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Forward transform of a real signal, zero-padded (or truncated) to
    /// the plan length. The result is unnormalized.
    pub fn forward_real(&self, signal: &[f32]) -> Vec<Complex<f32>> {
        let mut buffer = vec![Complex { re: 0.0, im: 0.0 }; self.len];
        for (slot, &sample) in buffer.iter_mut().zip(signal) {
            slot.re = sample;
        }
        self.forward.process(&mut buffer);
        buffer
    }

    /// Forward transform of a complex buffer in place. The buffer must be
    /// exactly the plan length.
    pub fn forward_in_place(&self, buffer: &mut [Complex<f32>]) {
        debug_assert_eq!(buffer.len(), self.len);
        self.forward.process(buffer);
    }

    /// Windowed cross-correlation `r[lag] = sum_{j < head.len()} head[j] * signal[j + lag]`
    /// for `lag < max_lag`.
    ///
    /// This is the cross term of the YIN difference function. The plan
    /// length must be at least `signal.len()`, and
    /// `head.len() + max_lag - 1` must not exceed `signal.len()`.
    pub fn cross_correlate(&self, head: &[f32], signal: &[f32], max_lag: usize) -> Vec<f32> {
        let head_spectrum = self.forward_real(head);
        let mut spectrum = self.forward_real(signal);
        for (bin, h) in spectrum.iter_mut().zip(&head_spectrum) {
            *bin *= h.conj();
        }
        self.inverse.process(&mut spectrum);
        let scale = 1.0 / self.len as f32;
        spectrum
            .iter()
            .take(max_lag.min(self.len))
            .map(|c| c.re * scale)
            .collect()
    }
}

/// Plans kept across polls, one per transform length.
#[derive(Default)]
pub struct PlanCache {
    plans: Vec<FftPlan>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The plan for `len`, built on first use.
    pub fn get(&mut self, len: usize) -> &FftPlan {
        let len = len.max(1);
        let index = match self.plans.iter().position(|plan| plan.len() == len) {
            Some(index) => index,
            None => {
                self.plans.push(FftPlan::new(len));
                self.plans.len() - 1
            }
        };
        &self.plans[index]
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plans.iter().map(FftPlan::len))
            .finish()
    }
}

/// Performs a forward FFT on a windowed copy of `signal`.
///
/// Steps:
/// 1. DC offset removal
/// 2. Hann windowing
/// 3. Zero padding to `plan.len()` and forward transform
pub fn perform_fft(plan: &FftPlan, signal: &[f32]) -> Vec<Complex<f32>> {
    let mut processed_signal = signal.to_vec();
    remove_dc_offset(&mut processed_signal);
    apply_hann_window(&mut processed_signal);
    plan.forward_real(&processed_signal)
}

/// Calculates the magnitude vector from a complex spectrum.
///
/// Only the first half of the spectrum (up to the Nyquist frequency) is
/// kept.
pub fn spectrum_to_magnitudes(spectrum: &[Complex<f32>]) -> Vec<f32> {
    spectrum
        .iter()
        .take(spectrum.len() / 2 + 1)
        .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
        .collect()
}
