//! Tempo estimation from a spectral-flux onset envelope
//!
//! 1. Log-compressed magnitude STFT, half-wave rectified frame-to-frame
//!    difference (spectral flux) gives an onset strength envelope.
//! 2. The envelope is detrended with a short moving average so only
//!    transients remain.
//! 3. Autocorrelation of the envelope over the lag range of
//!    `tempo_min_bpm..=tempo_max_bpm` measures periodicity.
//! 4. Picked onsets give an inter-onset-interval histogram. Intervals outside
//!    the lag range are doubled or halved into it.
//! 5. Each lag scores `acf × prior × (1 + ioi support)`. The log-normal prior
//!    folds half/double tempo ambiguity toward the most plausible octave, and
//!    the IOI histogram settles octaves the prior alone cannot.
//!
//! Everything runs sequentially in a fixed order, so the estimate is
//! bit-for-bit reproducible for identical input.

use crate::analysis::stft::magnitude_frames;
use crate::analysis::traits::{TempoEstimate, TempoEstimator};
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::types::Waveform;
use tracing::debug;

/// FFT size for onset analysis (~46ms at 22.05kHz)
const ONSET_FFT_SIZE: usize = 1024;
/// Hop between onset frames (~86 frames per second at 22.05kHz)
const ONSET_HOP_SIZE: usize = 256;
/// Log compression gain applied to magnitudes before differencing
const LOG_GAIN: f64 = 100.0;
/// Half-width of the detrending moving average in frames
const DETREND_RADIUS: usize = 8;
/// Envelope energy below this is treated as silence
const SILENCE_EPSILON: f64 = 1e-9;
/// Normalized autocorrelation below this means no usable periodicity
const MIN_PERIODICITY: f64 = 0.01;

/// Onset-autocorrelation tempo estimator
pub struct OnsetTempoEstimator {
    min_bpm: f64,
    max_bpm: f64,
    prior_bpm: f64,
    prior_octaves: f64,
}

impl OnsetTempoEstimator {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            min_bpm: config.tempo_min_bpm,
            max_bpm: config.tempo_max_bpm,
            prior_bpm: config.tempo_prior_bpm,
            prior_octaves: config.tempo_prior_octaves,
        }
    }

    /// Log-normal weight of a tempo around the prior centre
    fn prior(&self, bpm: f64) -> f64 {
        let octaves = (bpm / self.prior_bpm).log2() / self.prior_octaves;
        (-0.5 * octaves * octaves).exp()
    }

    /// `acf × prior × (1 + ioi support)` for one lag
    fn lag_score(&self, acf: &[f64], support: &[f64], lag: usize, fps: f64) -> f64 {
        let bpm = 60.0 * fps / lag as f64;
        let ioi = support.get(lag).copied().unwrap_or(0.0);
        acf[lag] / acf[0] * self.prior(bpm) * (1.0 + ioi)
    }

    /// Highest scoring lag in `lag_min..=lag_max`; the first one wins ties
    fn select_lag(&self, acf: &[f64], support: &[f64], lag_min: usize, lag_max: usize, fps: f64) -> usize {
        let mut best_lag = lag_min;
        let mut best_score = f64::NEG_INFINITY;
        for lag in lag_min..=lag_max {
            let score = self.lag_score(acf, support, lag, fps);
            if score > best_score {
                best_score = score;
                best_lag = lag;
            }
        }
        best_lag
    }

    fn sentinel(&self, onset_count: usize) -> TempoEstimate {
        TempoEstimate {
            bpm: self.min_bpm,
            confidence: 0.0,
            candidates: vec![],
            onset_count,
        }
    }
}

impl Default for OnsetTempoEstimator {
    fn default() -> Self {
        Self::new(&AnalysisConfig::default())
    }
}

impl TempoEstimator for OnsetTempoEstimator {
    fn estimate(&self, waveform: &Waveform) -> Result<TempoEstimate> {
        let fps = waveform.sample_rate() as f64 / ONSET_HOP_SIZE as f64;
        let envelope = onset_envelope(waveform.samples());

        let energy: f64 = envelope.iter().map(|v| v * v).sum();
        if energy < SILENCE_EPSILON {
            debug!("Onset envelope is silent, using sentinel tempo {}", self.min_bpm);
            return Ok(self.sentinel(0));
        }

        let onsets = pick_onsets(&envelope);
        if onsets.len() < 2 {
            debug!("Only {} onsets detected, using sentinel tempo", onsets.len());
            return Ok(self.sentinel(onsets.len()));
        }

        let lag_min = ((60.0 * fps / self.max_bpm).floor() as usize).max(1);
        let lag_max = ((60.0 * fps / self.min_bpm).ceil() as usize).min(envelope.len() - 1);
        if lag_min >= lag_max {
            return Ok(self.sentinel(onsets.len()));
        }

        let acf = autocorrelation(&envelope, lag_max + 1);
        let r0 = acf[0];

        let support = ioi_support(&onsets, lag_min, lag_max);
        let best_lag = self.select_lag(&acf, &support, lag_min, lag_max, fps);

        let periodicity = acf[best_lag] / r0;
        if periodicity < MIN_PERIODICITY {
            debug!("No periodicity in onset envelope ({:.4})", periodicity);
            return Ok(self.sentinel(onsets.len()));
        }

        let refined_lag = parabolic_peak(&acf, best_lag);
        let bpm = (60.0 * fps / refined_lag).clamp(self.min_bpm, self.max_bpm);

        // Report the octave neighbours that lost, with their weighted scores
        let candidates = [bpm / 2.0, bpm * 2.0]
            .into_iter()
            .filter(|c| *c >= self.min_bpm && *c <= self.max_bpm)
            .filter_map(|c| {
                let lag = (60.0 * fps / c).round() as usize;
                (lag > 0 && lag < acf.len()).then(|| (c, self.lag_score(&acf, &support, lag, fps)))
            })
            .collect();

        debug!(
            "Tempo {:.2} BPM (lag {:.2} frames, periodicity {:.3}, {} onsets)",
            bpm,
            refined_lag,
            periodicity,
            onsets.len()
        );

        Ok(TempoEstimate {
            bpm,
            confidence: periodicity.clamp(0.0, 1.0),
            candidates,
            onset_count: onsets.len(),
        })
    }

    fn name(&self) -> &'static str {
        "onset-autocorrelation"
    }
}

/// Detrended spectral-flux onset strength envelope
pub fn onset_envelope(samples: &[f32]) -> Vec<f64> {
    let frames = magnitude_frames(samples, ONSET_FFT_SIZE, ONSET_HOP_SIZE);
    if frames.is_empty() {
        return vec![];
    }

    let mut flux = Vec::with_capacity(frames.len());
    flux.push(0.0f64);
    for pair in frames.windows(2) {
        let sum: f64 = pair[0]
            .iter()
            .zip(pair[1].iter())
            .map(|(&prev, &cur)| {
                let diff = (1.0 + LOG_GAIN * cur as f64).ln() - (1.0 + LOG_GAIN * prev as f64).ln();
                diff.max(0.0)
            })
            .sum();
        flux.push(sum);
    }

    // Subtract a centred moving average, keep the positive part
    let n = flux.len();
    let mut prefix = vec![0.0f64; n + 1];
    for (i, &v) in flux.iter().enumerate() {
        prefix[i + 1] = prefix[i] + v;
    }
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(DETREND_RADIUS);
            let hi = (i + DETREND_RADIUS + 1).min(n);
            let mean = (prefix[hi] - prefix[lo]) / (hi - lo) as f64;
            (flux[i] - mean).max(0.0)
        })
        .collect()
}

/// Local maxima of the envelope above mean + half a standard deviation
pub fn pick_onsets(envelope: &[f64]) -> Vec<usize> {
    if envelope.len() < 3 {
        return vec![];
    }
    let n = envelope.len() as f64;
    let mean = envelope.iter().sum::<f64>() / n;
    let var = envelope.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let threshold = mean + 0.5 * var.sqrt();

    const RADIUS: usize = 3;
    let mut onsets = Vec::new();
    let mut last: Option<usize> = None;
    for i in 0..envelope.len() {
        let v = envelope[i];
        if v <= threshold || v <= 0.0 {
            continue;
        }
        let lo = i.saturating_sub(RADIUS);
        let hi = (i + RADIUS + 1).min(envelope.len());
        let is_peak = envelope[lo..hi].iter().all(|&u| u <= v);
        let spaced = last.map_or(true, |l| i - l > RADIUS);
        if is_peak && spaced {
            onsets.push(i);
            last = Some(i);
        }
    }
    onsets
}

/// Inter-onset-interval histogram indexed by lag, as a fraction of intervals
///
/// Each interval is folded into `lag_min..=lag_max` by doubling or halving,
/// then spread over its nearest lag and that lag's neighbours at half weight.
pub fn ioi_support(onsets: &[usize], lag_min: usize, lag_max: usize) -> Vec<f64> {
    let mut histogram = vec![0.0f64; lag_max + 2];
    let intervals: Vec<f64> = onsets.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
    if intervals.is_empty() || lag_min == 0 {
        return histogram;
    }

    let (lo, hi) = (lag_min as f64 - 0.5, lag_max as f64 + 0.5);
    for &interval in &intervals {
        let mut folded = interval;
        while folded < lo {
            folded *= 2.0;
        }
        while folded > hi {
            folded /= 2.0;
        }
        if folded < lo {
            continue;
        }
        let lag = (folded.round() as usize).clamp(lag_min, lag_max);
        histogram[lag] += 1.0;
        histogram[lag - 1] += 0.5;
        histogram[lag + 1] += 0.5;
    }

    let count = intervals.len() as f64;
    for v in histogram.iter_mut() {
        *v = (*v / count).min(1.0);
    }
    histogram
}

/// Raw autocorrelation for lags `0..max_lag`
fn autocorrelation(envelope: &[f64], max_lag: usize) -> Vec<f64> {
    let max_lag = max_lag.min(envelope.len());
    (0..max_lag)
        .map(|lag| {
            envelope[..envelope.len() - lag]
                .iter()
                .zip(envelope[lag..].iter())
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect()
}

/// Sub-frame peak position by parabolic interpolation
fn parabolic_peak(values: &[f64], idx: usize) -> f64 {
    if idx == 0 || idx + 1 >= values.len() {
        return idx as f64;
    }
    let (a, b, c) = (values[idx - 1], values[idx], values[idx + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() < f64::EPSILON {
        return idx as f64;
    }
    let offset = 0.5 * (a - c) / denom;
    if offset.is_finite() && offset.abs() <= 1.0 {
        idx as f64 + offset
    } else {
        idx as f64
    }
}
