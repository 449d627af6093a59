//! Compact spectral fingerprint
//!
//! A fixed-length summary of the long-term spectrum: [`BAND_COUNT`]
//! log-spaced band energies (timbre and brightness) followed by 12 chroma
//! bins (harmonic content folded into one octave). Each block is L2
//! normalized on its own so neither dominates cosine similarity.

use crate::analysis::stft::{bin_frequency, magnitude_frames};
use crate::types::Waveform;

pub const BAND_COUNT: usize = 20;
pub const CHROMA_COUNT: usize = 12;
/// Total fingerprint dimensions
pub const FINGERPRINT_LEN: usize = BAND_COUNT + CHROMA_COUNT;

const FFT_SIZE: usize = 2048;
const HOP_SIZE: usize = 1024;
const MAX_SECONDS: f64 = 30.0;
const BAND_MIN_HZ: f32 = 30.0;
const BAND_MAX_HZ: f32 = 8000.0;
const CHROMA_MIN_HZ: f32 = 55.0;
const CHROMA_MAX_HZ: f32 = 5000.0;
/// A4 reference for pitch class mapping
const A4_HZ: f32 = 440.0;

/// Compute the fingerprint of a waveform
pub fn compute_fingerprint(waveform: &Waveform) -> Vec<f32> {
    let rate = waveform.sample_rate();
    let limit = ((MAX_SECONDS * rate as f64) as usize).min(waveform.len());
    let frames = magnitude_frames(&waveform.samples()[..limit], FFT_SIZE, HOP_SIZE);
    let num_bins = FFT_SIZE / 2 + 1;

    // Long-term average magnitude per bin
    let mut mean_mag = vec![0.0f64; num_bins];
    for frame in &frames {
        for (acc, &m) in mean_mag.iter_mut().zip(frame.iter()) {
            *acc += m as f64;
        }
    }
    if !frames.is_empty() {
        let n = frames.len() as f64;
        mean_mag.iter_mut().for_each(|v| *v /= n);
    }

    let band_max = BAND_MAX_HZ.min(rate as f32 / 2.0);
    let edges: Vec<f32> = (0..=BAND_COUNT)
        .map(|i| BAND_MIN_HZ * (band_max / BAND_MIN_HZ).powf(i as f32 / BAND_COUNT as f32))
        .collect();

    let mut bands = vec![0.0f64; BAND_COUNT];
    let mut band_counts = vec![0usize; BAND_COUNT];
    let mut chroma = vec![0.0f64; CHROMA_COUNT];

    for (bin, &mag) in mean_mag.iter().enumerate().skip(1) {
        let freq = bin_frequency(bin, FFT_SIZE, rate);

        if freq >= edges[0] && freq < edges[BAND_COUNT] {
            let band = edges.windows(2).position(|e| freq >= e[0] && freq < e[1]);
            if let Some(b) = band {
                bands[b] += mag;
                band_counts[b] += 1;
            }
        }

        if (CHROMA_MIN_HZ..CHROMA_MAX_HZ).contains(&freq) {
            chroma[pitch_class(freq)] += mag * mag;
        }
    }

    let mut fingerprint: Vec<f32> = bands
        .iter()
        .zip(band_counts.iter())
        .map(|(&sum, &count)| {
            let mean = if count > 0 { sum / count as f64 } else { 0.0 };
            (1.0 + 100.0 * mean).ln() as f32
        })
        .collect();
    l2_normalize(&mut fingerprint);

    let mut chroma: Vec<f32> = chroma.into_iter().map(|v| v as f32).collect();
    l2_normalize(&mut chroma);
    fingerprint.extend(chroma);
    fingerprint
}

/// Pitch class (0 = A) of a frequency
fn pitch_class(freq: f32) -> usize {
    let semitones = (12.0 * (freq / A4_HZ).log2()).round() as i32;
    semitones.rem_euclid(12) as usize
}

fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Cosine similarity mapped to [0, 100]
///
/// Two silent (all-zero) fingerprints are identical; a silent and a
/// non-silent one share nothing.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    match (na > 1e-12, nb > 1e-12) {
        (false, false) => 100.0,
        (true, true) => (100.0 * dot / (na * nb)).clamp(0.0, 100.0),
        _ => 0.0,
    }
}
