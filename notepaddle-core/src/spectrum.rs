//! # Note Spectrum Module
//!
//! Computes one frame of a constant-Q transform over the whole buffered
//! waveform: one bin per semitone of the active [`NoteRange`], converted to
//! decibels and corrected by the A-weighting curve.
//!
//! The transform follows the spectral-kernel formulation: each bin's
//! time-domain kernel (a Hann-windowed complex exponential whose length
//! shrinks as frequency rises, keeping the same number of cycles per bin) is
//! transformed once, pruned to its significant coefficients, and then applied
//! to the waveform's FFT as a sparse dot product. Kernels shorter than the
//! waveform are stepped across it with half overlap and the bin reports the
//! loudest hop, so every bin sees the whole buffer, newest samples included.
//! Kernels depend only on the range, the sample rate and the waveform
//! length, so they are rebuilt only when one of those changes. The spectrum
//! itself is recomputed on every call.

use crate::fft::{hann_window, FftPlan};
use crate::range::NoteRange;
use crate::tuning::Note;
use log::debug;
use rustfft::num_complex::Complex;

/// Smallest magnitude considered before taking the logarithm.
pub const AMIN: f32 = 1e-5;

/// Dynamic range kept below the loudest bin.
pub const TOP_DB: f32 = 80.0;

/// Spectral kernel coefficients below this fraction of the kernel's peak
/// are dropped.
const SPARSITY_THRESHOLD: f32 = 1e-3;

/// One semitone bin of the corrected spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumBin {
    pub note: Note,
    /// Bin center frequency in Hz.
    pub frequency: f32,
    /// A-weighted magnitude in dB relative to full scale (reference 1.0).
    pub magnitude_db: f32,
}

/// Quality factor for 12 bins per octave.
pub fn semitone_q() -> f32 {
    1.0 / (2.0_f32.powf(1.0 / 12.0) - 1.0)
}

#[derive(Debug, Clone, PartialEq)]
struct KernelKey {
    frequencies: Vec<f32>,
    sample_rate: u32,
    waveform_len: usize,
}

/// Sparse spectral kernel: `(fft index, conj(H[j]) / N)` pairs.
type SparseKernel = Vec<(usize, Complex<f32>)>;

struct KernelBank {
    key: KernelKey,
    plan: FftPlan,
    /// Per bin, one kernel per hop across the waveform.
    kernels: Vec<Vec<SparseKernel>>,
}

impl KernelBank {
    fn build(key: KernelKey) -> Self {
        let waveform_len = key.waveform_len.max(1);
        let plan = FftPlan::new(waveform_len.next_power_of_two());
        let q = semitone_q();
        let inv_len = 1.0 / plan.len() as f32;

        let kernels = key
            .frequencies
            .iter()
            .map(|&freq| {
                let ideal = (q * key.sample_rate as f32 / freq).ceil() as usize;
                let kernel_len = ideal.clamp(1, waveform_len);
                let window = hann_window(kernel_len);
                let norm = window.iter().sum::<f32>() / 2.0;
                if norm <= 0.0 {
                    return Vec::new();
                }

                let mut temporal = vec![Complex { re: 0.0, im: 0.0 }; plan.len()];
                let omega = 2.0 * std::f64::consts::PI * freq as f64 / key.sample_rate as f64;
                for (m, w) in window.iter().enumerate() {
                    let phase = omega * m as f64;
                    temporal[m] = Complex {
                        re: (w * phase.cos() as f32) / norm,
                        im: (w * phase.sin() as f32) / norm,
                    };
                }
                plan.forward_in_place(&mut temporal);

                let peak = temporal.iter().map(|c| c.norm()).fold(0.0_f32, f32::max);
                let cutoff = peak * SPARSITY_THRESHOLD;
                let base: SparseKernel = temporal
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.norm() >= cutoff && c.norm() > 0.0)
                    .map(|(j, c)| (j, c.conj() * inv_len))
                    .collect();

                // A delay of `offset` samples is a phase ramp on the spectrum.
                frame_offsets(waveform_len, kernel_len)
                    .into_iter()
                    .map(|offset| shift_kernel(&base, offset, plan.len()))
                    .collect()
            })
            .collect::<Vec<_>>();

        debug!(
            "[SPECTRUM] Built {} kernels for {} samples (fft {}), {} hops, {} coefficients",
            kernels.len(),
            key.waveform_len,
            plan.len(),
            kernels.iter().map(Vec::len).sum::<usize>(),
            kernels.iter().flatten().map(Vec::len).sum::<usize>()
        );

        Self { key, plan, kernels }
    }
}

/// Start offsets of a `kernel_len` window stepped across `waveform_len`
/// samples. Windows overlap by at least half, the first starts at 0 and
/// the last ends at the final sample.
fn frame_offsets(waveform_len: usize, kernel_len: usize) -> Vec<usize> {
    if kernel_len >= waveform_len {
        return vec![0];
    }
    let span = waveform_len - kernel_len;
    let hop = (kernel_len / 2).max(1);
    let hops = span.div_ceil(hop);
    (0..=hops).map(|i| (i * span + hops / 2) / hops).collect()
}

fn shift_kernel(base: &[(usize, Complex<f32>)], offset: usize, fft_len: usize) -> SparseKernel {
    if offset == 0 {
        return base.to_vec();
    }
    base.iter()
        .map(|&(j, c)| {
            let turns = ((j * offset) % fft_len) as f64 / fft_len as f64;
            let phase = 2.0 * std::f64::consts::PI * turns;
            (j, c * Complex::new(phase.cos() as f32, phase.sin() as f32))
        })
        .collect()
}

/// Single-frame constant-Q analyzer with a cached kernel bank.
#[derive(Default)]
pub struct SpectrumEngine {
    bank: Option<KernelBank>,
}

impl SpectrumEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linear magnitude per bin of `range`, scaled so a sine of amplitude
    /// `A` centered on a bin reads about `A`. A tone that fills only part of
    /// the waveform still reads its full amplitude once it spans one kernel.
    pub fn magnitudes(&mut self, waveform: &[f32], range: &NoteRange) -> Vec<f32> {
        if waveform.is_empty() {
            return vec![0.0; range.bin_count()];
        }

        let key = KernelKey {
            frequencies: range.frequencies().to_vec(),
            sample_rate: range.sample_rate(),
            waveform_len: waveform.len(),
        };
        let bank = match self.bank.take() {
            Some(bank) if bank.key == key => bank,
            _ => KernelBank::build(key),
        };

        let spectrum = bank.plan.forward_real(waveform);
        let magnitudes = bank
            .kernels
            .iter()
            .map(|hops| {
                hops.iter()
                    .map(|kernel| {
                        kernel
                            .iter()
                            .map(|&(j, k)| spectrum[j] * k)
                            .sum::<Complex<f32>>()
                            .norm()
                    })
                    .fold(0.0_f32, f32::max)
            })
            .collect();

        self.bank = Some(bank);
        magnitudes
    }

    /// Computes the A-weighted decibel spectrum of `waveform` over `range`.
    ///
    /// Output is ordered like the range's bins (ascending frequency). Silent
    /// or empty input yields a flat floor, never NaN or infinity.
    pub fn compute_spectrum(&mut self, waveform: &[f32], range: &NoteRange) -> Vec<SpectrumBin> {
        let magnitudes = self.magnitudes(waveform, range);
        let db = amplitude_to_db(&magnitudes);

        range
            .notes()
            .iter()
            .zip(range.frequencies())
            .zip(range.a_weighting())
            .zip(db)
            .map(|(((&note, &frequency), &weight), level)| SpectrumBin {
                note,
                frequency,
                magnitude_db: level + weight,
            })
            .collect()
    }
}

/// Converts linear magnitudes to dB (reference 1.0), flooring inputs at
/// [`AMIN`] and outputs at [`TOP_DB`] below the loudest value.
pub fn amplitude_to_db(magnitudes: &[f32]) -> Vec<f32> {
    let db: Vec<f32> = magnitudes
        .iter()
        .map(|&m| {
            let m = if m.is_finite() { m.max(AMIN) } else { AMIN };
            20.0 * m.log10()
        })
        .collect();
    let max_db = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    db.into_iter().map(|d| d.max(max_db - TOP_DB)).collect()
}

/// Index of the loudest bin, if any.
pub fn peak_bin(spectrum: &[SpectrumBin]) -> Option<usize> {
    spectrum
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.magnitude_db.total_cmp(&b.1.magnitude_db))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 44100;

    fn note(name: &str) -> Note {
        name.parse().unwrap()
    }

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE as f32).sin()
            })
            .collect()
    }

    #[test]
    fn sine_peaks_at_nearest_bin() {
        let range = NoteRange::new(note("C2"), note("C7"), SAMPLE_RATE);
        let mut engine = SpectrumEngine::new();
        let spectrum = engine.compute_spectrum(&sine(440.0, 0.5, 10240), &range);

        assert_eq!(spectrum.len(), range.bin_count());
        let peak = peak_bin(&spectrum).unwrap();
        assert_eq!(spectrum[peak].note, note("A4"));
        assert!((spectrum[peak].frequency - 440.0).abs() < 0.1);
    }

    #[test]
    fn magnitude_tracks_amplitude() {
        let range = NoteRange::new(note("C2"), note("C7"), SAMPLE_RATE);
        let mut engine = SpectrumEngine::new();
        let magnitudes = engine.magnitudes(&sine(440.0, 0.5, 10240), &range);
        let a4 = range.nearest_bin(440.0).unwrap();
        assert!((magnitudes[a4] - 0.5).abs() < 0.05, "got {}", magnitudes[a4]);
        // Neighbouring semitones are well below the peak.
        assert!(magnitudes[a4 - 1] < magnitudes[a4] * 0.7);
        assert!(magnitudes[a4 + 1] < magnitudes[a4] * 0.7);
    }

    #[test]
    fn a_weighting_is_applied() {
        let range = NoteRange::new(note("C2"), note("C7"), SAMPLE_RATE);
        let mut engine = SpectrumEngine::new();
        let waveform = sine(440.0, 1.0, 10240);
        let magnitudes = engine.magnitudes(&waveform, &range);
        let spectrum = engine.compute_spectrum(&waveform, &range);
        let a4 = range.nearest_bin(440.0).unwrap();
        let raw_db = 20.0 * magnitudes[a4].log10();
        let expected = raw_db + range.a_weighting()[a4];
        assert!((spectrum[a4].magnitude_db - expected).abs() < 1e-3);
    }

    #[test]
    fn silence_and_empty_input_stay_finite() {
        let range = NoteRange::new(note("C2"), note("C7"), SAMPLE_RATE);
        let mut engine = SpectrumEngine::new();

        for waveform in [Vec::new(), vec![0.0; 4096]] {
            let spectrum = engine.compute_spectrum(&waveform, &range);
            assert_eq!(spectrum.len(), 61);
            for (bin, weight) in spectrum.iter().zip(range.a_weighting()) {
                assert!(bin.magnitude_db.is_finite());
                assert!((bin.magnitude_db - (-100.0 + weight)).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn kernels_follow_range_changes() {
        let mut range = NoteRange::new(note("C2"), note("C7"), SAMPLE_RATE);
        let mut engine = SpectrumEngine::new();
        let waveform = sine(440.0, 0.5, 10240);
        assert_eq!(engine.compute_spectrum(&waveform, &range).len(), 61);

        range.set_range(note("A3"), note("A5"));
        let spectrum = engine.compute_spectrum(&waveform, &range);
        assert_eq!(spectrum.len(), 25);
        assert_eq!(spectrum[peak_bin(&spectrum).unwrap()].note, note("A4"));

        // Shorter waveform (buffer still filling) also rebuilds.
        let spectrum = engine.compute_spectrum(&waveform[..2048], &range);
        assert_eq!(spectrum[peak_bin(&spectrum).unwrap()].note, note("A4"));
    }

    #[test]
    fn recent_onset_reaches_every_bin() {
        // Silence, then a loud tone in only the newest 4096 of 10240 samples.
        let range = NoteRange::new(note("C2"), note("C7"), SAMPLE_RATE);
        let mut engine = SpectrumEngine::new();
        for (name, freq) in [("A4", 440.0), ("C7", 2093.0)] {
            let mut waveform = vec![0.0; 6144];
            waveform.extend(sine(freq, 0.9, 4096));
            let magnitudes = engine.magnitudes(&waveform, &range);
            let bin = range.nearest_bin(freq).unwrap();
            assert!((magnitudes[bin] - 0.9).abs() < 0.05, "{name}: {}", magnitudes[bin]);

            let spectrum = engine.compute_spectrum(&waveform, &range);
            assert_eq!(spectrum[peak_bin(&spectrum).unwrap()].note, note(name));
            assert!(spectrum[bin].magnitude_db > -10.0, "{name}: {}", spectrum[bin].magnitude_db);
        }
    }

    #[test]
    fn hops_cover_the_waveform() {
        assert_eq!(frame_offsets(100, 100), vec![0]);
        assert_eq!(frame_offsets(100, 400), vec![0]);
        assert_eq!(frame_offsets(100, 40), vec![0, 20, 40, 60]);

        let offsets = frame_offsets(10240, 355);
        assert_eq!(offsets.first(), Some(&0));
        assert_eq!(offsets.last(), Some(&(10240 - 355)));
        assert!(offsets.windows(2).all(|w| w[1] > w[0] && w[1] - w[0] <= 355 / 2));
    }

    #[test]
    fn amplitude_to_db_floors() {
        let db = amplitude_to_db(&[1.0, 0.1, 0.0, f32::NAN]);
        assert!((db[0] - 0.0).abs() < 1e-4);
        assert!((db[1] - -20.0).abs() < 1e-3);
        assert!((db[2] - -80.0).abs() < 1e-3);
        assert!((db[3] - -80.0).abs() < 1e-3);
    }
}
