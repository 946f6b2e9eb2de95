//! Probabilistic YIN.
//!
//! Classic YIN picks the first dip of the cumulative mean normalized
//! difference function (CMNDF) under one fixed threshold. Here the threshold
//! is treated as a random variable with a Beta(2, 18) prior. Every dip
//! collects probability from the thresholds it falls under, with earlier dips
//! favoured by a Boltzmann prior. The summed probability of a frame is its
//! voicing probability. A two-state hidden Markov model then smooths the
//! voiced/unvoiced decision across frames before aggregation.

use super::{parabolic_offset, PitchEstimate};
use crate::fft::{FftPlan, PlanCache};
use log::trace;

/// Samples per analysis frame.
pub const FRAME_LENGTH: usize = 2048;

/// Samples between successive frames.
pub const HOP_LENGTH: usize = 512;

/// Integration window of the difference function.
const WIN_LENGTH: usize = FRAME_LENGTH / 2;

/// Thresholds are evaluated on a 0.01 grid over (0, 1].
const N_THRESHOLDS: usize = 100;
const BETA_A: i32 = 2;
const BETA_B: i32 = 18;
const BOLTZMANN_PARAMETER: f32 = 2.0;

/// Share of a threshold's mass given to the global minimum when no dip lies
/// under that threshold.
const NO_TROUGH_PROB: f32 = 0.01;

/// Per-frame probability of switching between voiced and unvoiced.
const SWITCH_PROB: f32 = 0.01;

/// Per-frame output of the estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEstimate {
    /// Most probable fundamental for the frame, if any dip was found.
    pub frequency: Option<f32>,
    /// Total probability that the frame is periodic.
    pub voiced_probability: f32,
    /// Smoothed voicing decision.
    pub voiced: bool,
}

/// Runs probabilistic YIN on `signal` and aggregates the voiced frames.
///
/// # Returns
/// * `Some(estimate)` - Median frequency of the voiced frames, with their
///   mean voicing probability as confidence
/// * `None` - No voiced frame, or the signal is shorter than one frame
pub fn detect_pitch_pyin(
    plans: &mut PlanCache,
    signal: &[f32],
    sample_rate: u32,
    fmin: f32,
    fmax: f32,
) -> Option<PitchEstimate> {
    let frames = pyin_frames(plans, signal, sample_rate, fmin, fmax);

    let (mut pitches, probs): (Vec<f32>, Vec<f32>) = frames
        .iter()
        .filter(|f| f.voiced)
        .filter_map(|f| f.frequency.map(|freq| (freq, f.voiced_probability)))
        .unzip();

    trace!(
        "[PITCH] pyin: {} frames, {} voiced",
        frames.len(),
        pitches.len()
    );

    if pitches.is_empty() {
        return None;
    }

    let frequency = median(&mut pitches);
    let confidence = probs.iter().sum::<f32>() / probs.len() as f32;
    Some(PitchEstimate { frequency, confidence })
}

/// Frame-by-frame probabilistic YIN estimates.
///
/// Frames are taken without padding, so a signal shorter than
/// [`FRAME_LENGTH`] yields no frames.
pub fn pyin_frames(
    plans: &mut PlanCache,
    signal: &[f32],
    sample_rate: u32,
    fmin: f32,
    fmax: f32,
) -> Vec<FrameEstimate> {
    if signal.len() < FRAME_LENGTH || fmin <= 0.0 || fmax <= fmin {
        return Vec::new();
    }

    let sr = sample_rate as f32;
    let min_period = ((sr / fmax).floor() as usize).max(1);
    let max_period = ((sr / fmin).ceil() as usize).min(FRAME_LENGTH - WIN_LENGTH - 1);
    if max_period <= min_period {
        return Vec::new();
    }

    let plan = plans.get(FRAME_LENGTH);
    let beta_probs = beta_threshold_probs();
    let n_frames = 1 + (signal.len() - FRAME_LENGTH) / HOP_LENGTH;

    let mut frames: Vec<FrameEstimate> = (0..n_frames)
        .map(|i| {
            let frame = &signal[i * HOP_LENGTH..i * HOP_LENGTH + FRAME_LENGTH];
            let cmndf = cumulative_mean_normalized_difference(plan, frame, max_period);
            analyze_frame(&cmndf[min_period..=max_period], min_period, sr, &beta_probs)
        })
        .collect();

    let voiced_probs: Vec<f32> = frames.iter().map(|f| f.voiced_probability).collect();
    for (frame, voiced) in frames.iter_mut().zip(viterbi_voicing(&voiced_probs)) {
        frame.voiced = voiced && frame.frequency.is_some();
    }
    frames
}

/// YIN steps 1-3: difference function and its cumulative mean
/// normalization, for lags `0..=max_period`.
fn cumulative_mean_normalized_difference(plan: &FftPlan, frame: &[f32], max_period: usize) -> Vec<f32> {
    let head = &frame[..WIN_LENGTH];
    let cross = plan.cross_correlate(head, frame, max_period + 1);

    // energy[t] = sum of squares over frame[t..t + WIN_LENGTH]
    let mut energy = Vec::with_capacity(max_period + 1);
    let mut running: f32 = head.iter().map(|s| s * s).sum();
    energy.push(running);
    for tau in 1..=max_period {
        running += frame[tau + WIN_LENGTH - 1].powi(2) - frame[tau - 1].powi(2);
        energy.push(running.max(0.0));
    }

    let mut yin_buffer = vec![1.0; max_period + 1];
    let mut running_sum = 0.0;
    for tau in 1..=max_period {
        let diff = (energy[0] + energy[tau] - 2.0 * cross[tau]).max(0.0);
        running_sum += diff;
        yin_buffer[tau] = if running_sum > f32::EPSILON {
            diff * tau as f32 / running_sum
        } else {
            1.0
        };
    }
    yin_buffer
}

/// Turns one frame's CMNDF (restricted to `min_period..=max_period`) into
/// its most probable frequency and voicing probability.
fn analyze_frame(yin: &[f32], min_period: usize, sr: f32, beta_probs: &[f32]) -> FrameEstimate {
    let troughs = find_troughs(yin);
    if troughs.is_empty() {
        return FrameEstimate { frequency: None, voiced_probability: 0.0, voiced: false };
    }

    let heights: Vec<f32> = troughs.iter().map(|&i| yin[i]).collect();
    let mut probs = vec![0.0_f32; troughs.len()];

    for (t, &beta) in beta_probs.iter().enumerate() {
        let threshold = (t + 1) as f32 / N_THRESHOLDS as f32;
        let n_below = heights.iter().filter(|&&h| h < threshold).count();
        if n_below == 0 {
            continue;
        }
        let mut position = 0;
        for (p, &h) in probs.iter_mut().zip(&heights) {
            if h < threshold {
                *p += boltzmann_pmf(position, BOLTZMANN_PARAMETER, n_below) * beta;
                position += 1;
            }
        }
    }

    let global_min = heights
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let thresholds_below_min = (0..N_THRESHOLDS)
        .filter(|&t| heights[global_min] >= (t + 1) as f32 / N_THRESHOLDS as f32)
        .count();
    probs[global_min] += NO_TROUGH_PROB * beta_probs[..thresholds_below_min].iter().sum::<f32>();

    let voiced_probability = probs.iter().sum::<f32>().clamp(0.0, 1.0);
    let best = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| troughs[i])
        .unwrap_or(troughs[0]);

    // Step 6: parabolic interpolation around the chosen dip.
    let shift = if best > 0 && best + 1 < yin.len() {
        parabolic_offset(yin[best - 1], yin[best], yin[best + 1])
    } else {
        0.0
    };
    let period = (min_period + best) as f32 + shift;
    let frequency = (period > 0.0).then(|| sr / period).filter(|f| f.is_finite());

    FrameEstimate { frequency, voiced_probability, voiced: false }
}

/// Indices of local minima. The first point counts if it is below its
/// neighbour, and so does the last.
fn find_troughs(yin: &[f32]) -> Vec<usize> {
    let n = yin.len();
    if n < 2 {
        return Vec::new();
    }
    let mut troughs = Vec::new();
    if yin[0] < yin[1] {
        troughs.push(0);
    }
    for i in 1..n - 1 {
        if yin[i] < yin[i - 1] && yin[i] <= yin[i + 1] {
            troughs.push(i);
        }
    }
    if yin[n - 1] < yin[n - 2] {
        troughs.push(n - 1);
    }
    troughs
}

/// Probability mass of each 0.01-wide threshold bin under Beta(2, 18).
fn beta_threshold_probs() -> Vec<f32> {
    let cdf: Vec<f64> = (0..=N_THRESHOLDS)
        .map(|t| beta_cdf(t as f64 / N_THRESHOLDS as f64, BETA_A, BETA_B))
        .collect();
    cdf.windows(2).map(|w| (w[1] - w[0]) as f32).collect()
}

/// CDF of Beta(a, b) for integer parameters, via the binomial identity
/// `I_x(a, b) = P(Binomial(a + b - 1, x) >= a)`.
fn beta_cdf(x: f64, a: i32, b: i32) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let n = a + b - 1;
    let mut below = 0.0;
    let mut coeff = 1.0; // C(n, j)
    for j in 0..a {
        if j > 0 {
            coeff *= (n - j + 1) as f64 / j as f64;
        }
        below += coeff * x.powi(j) * (1.0 - x).powi(n - j);
    }
    1.0 - below
}

/// Truncated geometric (Boltzmann) distribution over `0..n`.
fn boltzmann_pmf(k: usize, lambda: f32, n: usize) -> f32 {
    let num = (1.0 - (-lambda).exp()) * (-lambda * k as f32).exp();
    let den = 1.0 - (-lambda * n as f32).exp();
    num / den
}

/// Most likely voiced/unvoiced path given per-frame voicing probabilities.
fn viterbi_voicing(voiced_probs: &[f32]) -> Vec<bool> {
    const FLOOR: f32 = 1e-10;
    if voiced_probs.is_empty() {
        return Vec::new();
    }

    let stay = (1.0 - SWITCH_PROB).ln();
    let switch = SWITCH_PROB.ln();
    let emit = |p: f32, voiced: bool| {
        let p = if voiced { p } else { 1.0 - p };
        p.max(FLOOR).ln()
    };

    // State 0 = unvoiced, 1 = voiced.
    let mut score = [
        0.5_f32.ln() + emit(voiced_probs[0], false),
        0.5_f32.ln() + emit(voiced_probs[0], true),
    ];
    let mut backpointers: Vec<[usize; 2]> = Vec::with_capacity(voiced_probs.len());
    backpointers.push([0, 1]);

    for &p in &voiced_probs[1..] {
        let mut next = [0.0; 2];
        let mut from = [0; 2];
        for state in 0..2 {
            let via_same = score[state] + stay;
            let via_other = score[1 - state] + switch;
            if via_same >= via_other {
                next[state] = via_same;
                from[state] = state;
            } else {
                next[state] = via_other;
                from[state] = 1 - state;
            }
            next[state] += emit(p, state == 1);
        }
        score = next;
        backpointers.push(from);
    }

    let mut state = if score[1] > score[0] { 1 } else { 0 };
    let mut path = vec![false; voiced_probs.len()];
    for i in (0..voiced_probs.len()).rev() {
        path[i] = state == 1;
        state = backpointers[i][state];
    }
    path
}

/// Median that averages the two middle values for even lengths. Sorts in
/// place.
fn median(values: &mut [f32]) -> f32 {
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44100;

    fn tone(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    #[test]
    fn beta_probabilities_sum_to_one() {
        let probs = beta_threshold_probs();
        assert_eq!(probs.len(), N_THRESHOLDS);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
        // Beta(2, 18) has its mode near 0.056.
        let mode = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((3..=7).contains(&mode), "mode bin {mode}");
    }

    #[test]
    fn boltzmann_prior_prefers_first_dip() {
        let total: f32 = (0..4).map(|k| boltzmann_pmf(k, 2.0, 4)).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(boltzmann_pmf(0, 2.0, 4) > boltzmann_pmf(1, 2.0, 4));
        assert!((boltzmann_pmf(0, 2.0, 1) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sine_frames_are_voiced_at_the_right_pitch() {
        let signal = tone(440.0, 0.5, 10240);
        let frames = pyin_frames(&mut PlanCache::new(), &signal, SR, 60.0, 2200.0);
        assert_eq!(frames.len(), 17);
        for frame in &frames {
            assert!(frame.voiced);
            assert!(frame.voiced_probability > 0.9);
            assert!((frame.frequency.unwrap() - 440.0).abs() < 2.0, "{frame:?}");
        }
    }

    #[test]
    fn aggregation_uses_median_and_mean() {
        let mut plans = PlanCache::new();
        let estimate = detect_pitch_pyin(&mut plans, &tone(220.0, 0.5, 8192), SR, 60.0, 2200.0).unwrap();
        assert!((estimate.frequency - 220.0).abs() < 1.0, "{estimate:?}");
        assert!(estimate.confidence > 0.9 && estimate.confidence <= 1.0);

        let mut values = [5.0, 1.0, 3.0, 2.0];
        assert_eq!(median(&mut values), 2.5);
        let mut values = [5.0, 1.0, 3.0];
        assert_eq!(median(&mut values), 3.0);
    }

    #[test]
    fn short_or_silent_input_is_unvoiced() {
        let mut plans = PlanCache::new();
        assert_eq!(detect_pitch_pyin(&mut plans, &tone(440.0, 0.5, 1024), SR, 60.0, 2200.0), None);
        assert_eq!(detect_pitch_pyin(&mut plans, &vec![0.0; 10240], SR, 60.0, 2200.0), None);
        assert!(pyin_frames(&mut plans, &vec![0.0; 4096], SR, 60.0, 2200.0)
            .iter()
            .all(|f| !f.voiced && f.voiced_probability == 0.0));
    }

    #[test]
    fn band_excludes_out_of_range_pitch() {
        // 110 Hz is below a band starting at 400 Hz; the only dips the
        // estimator can see are poor ones, so no confident A2 appears.
        let mut plans = PlanCache::new();
        let estimate = detect_pitch_pyin(&mut plans, &tone(110.0, 0.5, 10240), SR, 400.0, 2200.0);
        if let Some(e) = estimate {
            assert!(e.frequency >= 400.0 * 0.9, "{e:?}");
        }
    }

    #[test]
    fn viterbi_smooths_isolated_flips() {
        let path = viterbi_voicing(&[0.9, 0.9, 0.4, 0.9, 0.9]);
        assert_eq!(path, vec![true; 5]);
        let path = viterbi_voicing(&[0.05, 0.05, 0.05]);
        assert_eq!(path, vec![false; 3]);
        assert!(viterbi_voicing(&[]).is_empty());
    }
}
