//! STFT (Short-Time Fourier Transform) shared by onset detection,
//! fingerprinting and stem separation
//!
//! # Parameter choices
//!
//! - **Hann window** with hop <= nfft/4 (75% overlap): smooth tapering reduces
//!   spectral leakage and the overlap-add in [`compute_istft`] reconstructs the
//!   input when the spectrogram is left untouched.
//! - **Centered frames**: the signal is zero-padded by nfft/2 on both sides so
//!   every input sample is covered by full-weight frames, including the edges.

use rustfft::{num_complex::Complex, FftPlanner};

/// Zero-valued complex number, used for FFT buffer initialization
pub const COMPLEX_ZERO: Complex<f32> = Complex::new(0.0, 0.0);

/// Complex spectrogram of a mono signal
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// `[time_frames][freq_bins]`, positive frequencies only
    pub frames: Vec<Vec<Complex<f32>>>,
    pub nfft: usize,
    pub hop: usize,
    /// Length of the signal the spectrogram was computed from
    pub signal_len: usize,
}

impl Spectrogram {
    /// Number of time frames
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Number of frequency bins per frame (nfft/2 + 1)
    pub fn num_bins(&self) -> usize {
        self.nfft / 2 + 1
    }

    /// Magnitude of every bin, `[time_frames][freq_bins]`
    pub fn magnitudes(&self) -> Vec<Vec<f32>> {
        self.frames
            .iter()
            .map(|frame| frame.iter().map(|c| c.norm()).collect())
            .collect()
    }
}

/// Centre frequency of an FFT bin in Hz
pub fn bin_frequency(bin: usize, nfft: usize, sample_rate: u32) -> f32 {
    bin as f32 * sample_rate as f32 / nfft as f32
}

/// Generate Hann window of given size
pub fn hann_window(size: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Number of centered frames for a signal of `len` samples
pub fn num_frames(len: usize, hop: usize) -> usize {
    len / hop + 1
}

/// Compute the centered STFT of a mono signal
pub fn compute_stft(samples: &[f32], nfft: usize, hop: usize) -> Spectrogram {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(nfft);
    let window = hann_window(nfft);
    let num_bins = nfft / 2 + 1;
    let pad = nfft / 2;

    let frame_count = num_frames(samples.len(), hop);
    let mut frames = Vec::with_capacity(frame_count);
    let mut buffer = vec![COMPLEX_ZERO; nfft];

    for frame_idx in 0..frame_count {
        fill_frame(&mut buffer, samples, frame_idx * hop, pad, &window);
        fft.process(&mut buffer);
        frames.push(buffer[..num_bins].to_vec());
    }

    Spectrogram {
        frames,
        nfft,
        hop,
        signal_len: samples.len(),
    }
}

/// Magnitude-only STFT; skips keeping the complex spectrum around
pub fn magnitude_frames(samples: &[f32], nfft: usize, hop: usize) -> Vec<Vec<f32>> {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(nfft);
    let window = hann_window(nfft);
    let num_bins = nfft / 2 + 1;
    let pad = nfft / 2;

    let frame_count = num_frames(samples.len(), hop);
    let mut out = Vec::with_capacity(frame_count);
    let mut buffer = vec![COMPLEX_ZERO; nfft];

    for frame_idx in 0..frame_count {
        fill_frame(&mut buffer, samples, frame_idx * hop, pad, &window);
        fft.process(&mut buffer);
        out.push(buffer[..num_bins].iter().map(|c| c.norm()).collect());
    }

    out
}

/// Window one frame of the virtually zero-padded signal into `buffer`
fn fill_frame(
    buffer: &mut [Complex<f32>],
    samples: &[f32],
    padded_start: usize,
    pad: usize,
    window: &[f32],
) {
    for (i, (slot, &w)) in buffer.iter_mut().zip(window.iter()).enumerate() {
        let padded_idx = padded_start + i;
        let sample = if padded_idx >= pad && padded_idx - pad < samples.len() {
            samples[padded_idx - pad]
        } else {
            0.0
        };
        *slot = Complex::new(sample * w, 0.0);
    }
}

/// Compute inverse STFT to reconstruct `spectrogram.signal_len` samples
pub fn compute_istft(spectrogram: &Spectrogram) -> Vec<f32> {
    let nfft = spectrogram.nfft;
    let hop = spectrogram.hop;
    let num_bins = spectrogram.num_bins();
    let pad = nfft / 2;

    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(nfft);
    let window = hann_window(nfft);

    let padded_len = spectrogram.signal_len + nfft;
    let mut output = vec![0.0f32; padded_len];
    let mut window_sum = vec![0.0f32; padded_len];
    let mut buffer = vec![COMPLEX_ZERO; nfft];
    let scale = 1.0 / nfft as f32;

    for (frame_idx, frame) in spectrogram.frames.iter().enumerate() {
        let start = frame_idx * hop;

        buffer.iter_mut().for_each(|c| *c = COMPLEX_ZERO);
        buffer[..num_bins].copy_from_slice(&frame[..num_bins]);

        // Mirror negative frequencies (conjugate symmetric)
        for i in 1..num_bins - 1 {
            buffer[nfft - i] = frame[i].conj();
        }

        ifft.process(&mut buffer);

        for (i, &w) in window.iter().enumerate() {
            let idx = start + i;
            if idx < padded_len {
                output[idx] += buffer[i].re * scale * w;
                window_sum[idx] += w * w;
            }
        }
    }

    // Normalize by window sum (COLA normalization)
    for (sample, &ws) in output.iter_mut().zip(window_sum.iter()) {
        if ws > 1e-8 {
            *sample /= ws;
        }
    }

    output
        .into_iter()
        .skip(pad)
        .take(spectrogram.signal_len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_window() {
        let window = hann_window(4);
        assert_eq!(window.len(), 4);
        // Hann window should be 0 at endpoints, max at center
        assert!(window[0] < 0.01);
        assert!(window[2] > 0.9);
    }

    #[test]
    fn test_frame_count_covers_signal() {
        let spec = compute_stft(&vec![0.0; 1000], 256, 64);
        assert_eq!(spec.num_frames(), 1000 / 64 + 1);
        assert_eq!(spec.num_bins(), 129);
    }

    #[test]
    fn test_identity_reconstruction() {
        use std::f32::consts::PI;
        let samples: Vec<f32> = (0..4000)
            .map(|i| 0.5 * (2.0 * PI * 330.0 * i as f32 / 22050.0).sin() + 0.1 * (i as f32 * 0.37).sin())
            .collect();
        let spec = compute_stft(&samples, 512, 128);
        let rebuilt = compute_istft(&spec);
        assert_eq!(rebuilt.len(), samples.len());
        let max_err = samples
            .iter()
            .zip(rebuilt.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-3, "max reconstruction error {}", max_err);
    }

    #[test]
    fn test_magnitude_frames_match_stft() {
        let samples: Vec<f32> = (0..2048).map(|i| ((i * 7) % 13) as f32 / 13.0 - 0.5).collect();
        let a = magnitude_frames(&samples, 256, 64);
        let b = compute_stft(&samples, 256, 64).magnitudes();
        assert_eq!(a, b);
    }

    #[test]
    fn test_bin_frequency() {
        assert!((bin_frequency(1, 2048, 22050) - 10.766).abs() < 0.01);
    }
}
