//! Peak tracking over a single chunk.
//!
//! The latest chunk is windowed and transformed. Local maxima inside the
//! search band that reach a fraction of the frame's loudest bin become
//! candidates, and each is refined by parabolic interpolation. The strongest
//! candidate wins.

use super::{parabolic_offset, search_band, PitchEstimate};
use crate::fft::{perform_fft, spectrum_to_magnitudes, PlanCache};
use crate::range::NoteRange;

/// Minimum transform length. Shorter chunks are zero-padded up to it.
pub const MIN_FFT_SIZE: usize = 2048;

/// Candidates must reach this fraction of the loudest bin in the frame.
const PEAK_THRESHOLD: f32 = 0.1;

/// An interpolated spectral peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakCandidate {
    pub frequency: f32,
    pub magnitude: f32,
}

/// All interpolated peaks of `chunk` inside `[fmin, fmax]`, in ascending
/// frequency order.
pub fn pitch_candidates(
    plans: &mut PlanCache,
    chunk: &[f32],
    sample_rate: u32,
    fmin: f32,
    fmax: f32,
) -> Vec<PeakCandidate> {
    if chunk.is_empty() {
        return Vec::new();
    }
    let fft_len = chunk.len().next_power_of_two().max(MIN_FFT_SIZE);
    let magnitudes = spectrum_to_magnitudes(&perform_fft(plans.get(fft_len), chunk));

    let reference = magnitudes.iter().copied().fold(0.0_f32, f32::max);
    if reference <= 0.0 || !reference.is_finite() {
        return Vec::new();
    }
    let floor = PEAK_THRESHOLD * reference;
    let bin_hz = sample_rate as f32 / fft_len as f32;

    (1..magnitudes.len() - 1)
        .filter(|&i| {
            let freq = i as f32 * bin_hz;
            freq >= fmin
                && freq <= fmax
                && magnitudes[i] > floor
                && magnitudes[i] > magnitudes[i - 1]
                && magnitudes[i] >= magnitudes[i + 1]
        })
        .map(|i| {
            let (y1, y2, y3) = (magnitudes[i - 1], magnitudes[i], magnitudes[i + 1]);
            let shift = parabolic_offset(y1, y2, y3);
            PeakCandidate {
                frequency: (i as f32 + shift) * bin_hz,
                magnitude: y2 + 0.25 * (y3 - y1) * shift,
            }
        })
        .collect()
}

fn strongest(candidates: &[PeakCandidate]) -> Option<(f32, f32)> {
    candidates
        .iter()
        .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
        .map(|c| (c.frequency, c.magnitude))
}

/// The single strongest pitch candidate of `chunk`, searched over the
/// range's band.
///
/// # Returns
/// * `Some((frequency, magnitude))` - Interpolated peak frequency and its
///   raw spectral magnitude
/// * `None` - No peak inside the band (e.g. silence)
pub fn strongest_bin_pitch(plans: &mut PlanCache, chunk: &[f32], range: &NoteRange) -> Option<(f32, f32)> {
    let (fmin, fmax) = search_band(range);
    strongest(&pitch_candidates(plans, chunk, range.sample_rate(), fmin, fmax))
}

/// Peak-tracking estimate built on the strongest bin. Confidence is its
/// share of the total candidate magnitude.
pub fn detect_pitch_peak(plans: &mut PlanCache, chunk: &[f32], range: &NoteRange) -> Option<PitchEstimate> {
    let (fmin, fmax) = search_band(range);
    let candidates = pitch_candidates(plans, chunk, range.sample_rate(), fmin, fmax);
    let (frequency, magnitude) = strongest(&candidates)?;
    let total: f32 = candidates.iter().map(|c| c.magnitude).sum();
    if total <= 0.0 {
        return None;
    }
    Some(PitchEstimate {
        frequency,
        confidence: (magnitude / total).clamp(0.0, 1.0),
    })
}
