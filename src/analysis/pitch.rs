//! Median fundamental frequency via YIN
//!
//! The waveform is cut into overlapping frames; each frame runs the YIN
//! cumulative-mean-normalized difference and reports a period when a dip
//! falls below the threshold. Quiet frames are gated as unvoiced before any
//! pitch work. The track summary is the median over voiced frames.
//!
//! The difference function is evaluated through an FFT cross-correlation
//! (`d(tau) = E(0) + E(tau) - 2 r(tau)`), which keeps a 20 second window
//! cheap enough to analyze inline with the request.

use crate::analysis::stft::COMPLEX_ZERO;
use crate::analysis::traits::{PitchEstimate, PitchEstimator};
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::types::{rms, Waveform};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

/// Frames whose best CMND value exceeds this are unvoiced even without a dip
const MAX_ACCEPTED_CMND: f32 = 0.5;

/// YIN-based pitch estimator
pub struct YinPitchEstimator {
    frame_size: usize,
    hop_size: usize,
    min_hz: f64,
    max_hz: f64,
    threshold: f32,
    voicing_rms: f64,
    max_seconds: f64,
}

impl YinPitchEstimator {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            frame_size: config.pitch_frame_size,
            hop_size: config.pitch_hop_size,
            min_hz: config.pitch_min_hz,
            max_hz: config.pitch_max_hz,
            threshold: config.yin_threshold as f32,
            voicing_rms: config.voicing_rms_threshold,
            max_seconds: config.pitch_max_seconds,
        }
    }
}

impl Default for YinPitchEstimator {
    fn default() -> Self {
        Self::new(&AnalysisConfig::default())
    }
}

impl PitchEstimator for YinPitchEstimator {
    fn estimate(&self, waveform: &Waveform) -> Result<PitchEstimate> {
        let rate = waveform.sample_rate() as f64;
        let limit = ((self.max_seconds * rate) as usize).min(waveform.len());
        let samples = &waveform.samples()[..limit];

        let mut frame = YinFrame::new(self.frame_size);
        let min_tau = ((rate / self.max_hz).floor() as usize).max(2);
        let max_tau = ((rate / self.min_hz).ceil() as usize).min(frame.half - 2);

        let mut voiced: Vec<f64> = Vec::new();
        let mut total_frames = 0usize;
        let mut start = 0usize;
        while start + self.frame_size <= samples.len() {
            let chunk = &samples[start..start + self.frame_size];
            total_frames += 1;
            start += self.hop_size;

            if rms(chunk) < self.voicing_rms {
                continue;
            }
            if let Some(tau) = frame.detect(chunk, min_tau, max_tau, self.threshold) {
                let hz = rate / tau;
                if hz >= self.min_hz && hz <= self.max_hz {
                    voiced.push(hz);
                }
            }
        }

        let median_hz = median(&mut voiced).unwrap_or(0.0);
        debug!(
            "Pitch median {:.2} Hz ({} of {} frames voiced)",
            median_hz,
            voiced.len(),
            total_frames
        );

        Ok(PitchEstimate {
            median_hz,
            voiced_frames: voiced.len(),
            total_frames,
        })
    }

    fn name(&self) -> &'static str {
        "yin"
    }
}

/// Reusable per-call YIN buffers and FFT plans
struct YinFrame {
    half: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    signal: Vec<Complex<f32>>,
    reference: Vec<Complex<f32>>,
    diff: Vec<f32>,
    cmnd: Vec<f32>,
}

impl YinFrame {
    fn new(frame_size: usize) -> Self {
        let fft_len = (frame_size * 2).next_power_of_two();
        let mut planner = FftPlanner::new();
        let half = frame_size / 2;
        Self {
            half,
            fft: planner.plan_fft_forward(fft_len),
            ifft: planner.plan_fft_inverse(fft_len),
            signal: vec![COMPLEX_ZERO; fft_len],
            reference: vec![COMPLEX_ZERO; fft_len],
            diff: vec![0.0; half],
            cmnd: vec![1.0; half],
        }
    }

    /// Best period in samples (sub-sample precision) or `None` when unvoiced
    fn detect(&mut self, frame: &[f32], min_tau: usize, max_tau: usize, threshold: f32) -> Option<f64> {
        if min_tau >= max_tau {
            return None;
        }
        self.difference_function(frame, max_tau + 2);
        self.cumulative_mean_normalized_difference(max_tau + 2);

        let mut best_tau = 0;
        let mut tau = min_tau;
        while tau < max_tau {
            if self.cmnd[tau] < threshold {
                while tau + 1 < max_tau && self.cmnd[tau + 1] < self.cmnd[tau] {
                    tau += 1;
                }
                best_tau = tau;
                break;
            }
            tau += 1;
        }

        if best_tau == 0 {
            // No dip under the threshold, fall back to the global minimum
            let mut best_value = f32::MAX;
            for tau in min_tau..max_tau {
                if self.cmnd[tau] < best_value {
                    best_tau = tau;
                    best_value = self.cmnd[tau];
                }
            }
        }

        if best_tau == 0 || self.cmnd[best_tau] > MAX_ACCEPTED_CMND {
            return None;
        }
        Some(self.parabolic_interpolation(best_tau))
    }

    /// Squared difference for lags `0..taus` over a half-frame integration window
    fn difference_function(&mut self, frame: &[f32], taus: usize) {
        let half = self.half;
        let n = self.signal.len();

        for (i, slot) in self.signal.iter_mut().enumerate() {
            *slot = Complex::new(frame.get(i).copied().unwrap_or(0.0), 0.0);
        }
        for (i, slot) in self.reference.iter_mut().enumerate() {
            let v = if i < half { frame[i] } else { 0.0 };
            *slot = Complex::new(v, 0.0);
        }
        self.fft.process(&mut self.signal);
        self.fft.process(&mut self.reference);
        for (s, r) in self.signal.iter_mut().zip(self.reference.iter()) {
            *s *= r.conj();
        }
        self.ifft.process(&mut self.signal);
        let scale = 1.0 / n as f64;

        // Running energy of the lagged window
        let mut prefix = vec![0.0f64; frame.len() + 1];
        for (i, &x) in frame.iter().enumerate() {
            prefix[i + 1] = prefix[i] + (x as f64) * (x as f64);
        }
        let e0 = prefix[half];

        for tau in 0..taus.min(half) {
            let e_tau = prefix[tau + half] - prefix[tau];
            let r = self.signal[tau].re as f64 * scale;
            self.diff[tau] = (e0 + e_tau - 2.0 * r).max(0.0) as f32;
        }
    }

    fn cumulative_mean_normalized_difference(&mut self, taus: usize) {
        self.cmnd[0] = 1.0;
        let mut running_sum = 0.0f32;
        for tau in 1..taus.min(self.half) {
            running_sum += self.diff[tau];
            self.cmnd[tau] = if running_sum > 0.0 {
                self.diff[tau] * tau as f32 / running_sum
            } else {
                1.0
            };
        }
    }

    fn parabolic_interpolation(&self, tau: usize) -> f64 {
        if tau == 0 || tau + 1 >= self.cmnd.len() {
            return tau as f64;
        }
        let s0 = self.cmnd[tau - 1] as f64;
        let s1 = self.cmnd[tau] as f64;
        let s2 = self.cmnd[tau + 1] as f64;
        let adjustment = (s0 - s2) / (2.0 * (s0 - 2.0 * s1 + s2));
        if adjustment.is_finite() && adjustment.abs() <= 1.0 {
            tau as f64 + adjustment
        } else {
            tau as f64
        }
    }
}

/// Median of a list, averaging the two middle values for even lengths
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const RATE: u32 = 22050;

    fn sine(freq: f32, secs: f32, amp: f32) -> Waveform {
        let samples = (0..(RATE as f32 * secs) as usize)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / RATE as f32).sin())
            .collect();
        Waveform::new(samples, RATE)
    }

    #[test]
    fn test_detects_220hz() {
        let est = YinPitchEstimator::default().estimate(&sine(220.0, 3.0, 0.5)).unwrap();
        assert!((est.median_hz - 220.0).abs() < 3.0, "got {}", est.median_hz);
        assert_eq!(est.voiced_frames, est.total_frames);
    }

    #[test]
    fn test_detects_range_of_pitches() {
        for freq in [82.41f32, 110.0, 440.0, 880.0] {
            let est = YinPitchEstimator::default().estimate(&sine(freq, 2.0, 0.5)).unwrap();
            let cents = 1200.0 * (est.median_hz / freq as f64).log2().abs();
            assert!(cents < 20.0, "freq {} got {}", freq, est.median_hz);
        }
    }

    #[test]
    fn test_silence_is_unpitched() {
        let est = YinPitchEstimator::default()
            .estimate(&Waveform::new(vec![0.0; RATE as usize * 2], RATE))
            .unwrap();
        assert_eq!(est.median_hz, 0.0);
        assert_eq!(est.voiced_frames, 0);
        assert!(est.total_frames > 0);
    }

    #[test]
    fn test_quiet_frames_are_gated() {
        let est = YinPitchEstimator::default().estimate(&sine(220.0, 2.0, 0.005)).unwrap();
        assert_eq!(est.median_hz, 0.0);
    }

    #[test]
    fn test_only_first_window_is_analyzed() {
        let config = AnalysisConfig {
            pitch_max_seconds: 1.0,
            ..AnalysisConfig::default()
        };
        let est = YinPitchEstimator::new(&config).estimate(&sine(220.0, 5.0, 0.5)).unwrap();
        let expected = (RATE as usize - 2048) / 512 + 1;
        assert_eq!(est.total_frames, expected);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }
}
