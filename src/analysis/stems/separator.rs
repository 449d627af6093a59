//! Spectral-mask stem separator
//!
//! Splits a mono waveform into vocals, drums, bass and other with
//! median-filter masks (see [`super::masks`]). Runs chunk by chunk and polls
//! the [`SeparationControl`] throughout, so a deadline or a cancel request
//! stops the work within one filter block.

use super::chunking::{chunk_audio, overlap_add, ChunkConfig, StemChunk};
use super::masks::{compute_masks, MaskParams};
use super::SeparationControl;
use crate::analysis::stft::{compute_istft, compute_stft};
use crate::analysis::traits::StemSeparator;
use crate::config::SeparationConfig;
use crate::error::Result;
use crate::types::{rms, Stem, StemName, Waveform};
use std::time::Instant;
use tracing::{debug, info};

/// Stem separator built on STFT masking
pub struct SpectralStemSeparator {
    nfft: usize,
    hop: usize,
    chunk_seconds: f64,
    overlap_seconds: f64,
    low_confidence_ratio: f64,
}

impl SpectralStemSeparator {
    pub fn new(config: &SeparationConfig) -> Self {
        Self {
            nfft: config.nfft,
            hop: config.hop,
            chunk_seconds: config.chunk_seconds,
            overlap_seconds: config.overlap_seconds,
            low_confidence_ratio: config.low_confidence_ratio,
        }
    }

    /// Separate one chunk into its four stem signals
    fn separate_chunk(
        &self,
        samples: &[f32],
        sample_rate: u32,
        control: &SeparationControl,
    ) -> Result<[Vec<f32>; 4]> {
        let spectrogram = compute_stft(samples, self.nfft, self.hop);
        control.checkpoint()?;

        let params = MaskParams::for_hop(self.hop, sample_rate);
        let masks = compute_masks(
            &spectrogram.magnitudes(),
            self.nfft,
            sample_rate,
            &params,
            control,
        )?;

        let mut stems: [Vec<f32>; 4] = Default::default();
        for stem in StemName::ALL {
            control.checkpoint()?;
            let mask = &masks[stem.index()];
            let mut masked = spectrogram.clone();
            for (frame, gains) in masked.frames.iter_mut().zip(mask.iter()) {
                for (c, &g) in frame.iter_mut().zip(gains.iter()) {
                    *c *= g;
                }
            }
            stems[stem.index()] = compute_istft(&masked);
        }

        Ok(stems)
    }
}

impl Default for SpectralStemSeparator {
    fn default() -> Self {
        Self::new(&SeparationConfig::default())
    }
}

impl StemSeparator for SpectralStemSeparator {
    fn separate(&self, waveform: &Waveform, control: &SeparationControl) -> Result<Vec<Stem>> {
        control.checkpoint()?;
        let start = Instant::now();
        let sample_rate = waveform.sample_rate();
        let total_samples = waveform.len();

        let config = ChunkConfig::new(self.chunk_seconds, self.overlap_seconds, sample_rate);
        let chunks = chunk_audio(waveform.samples(), &config);
        debug!(
            "Separating {:.2}s of audio in {} chunk(s)",
            waveform.duration(),
            chunks.len()
        );

        let mut stem_chunks = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            control.checkpoint()?;
            let stems = self.separate_chunk(&chunk.samples, sample_rate, control)?;
            stem_chunks.push(StemChunk {
                index: chunk.index,
                start_sample: chunk.start_sample,
                stems,
            });
        }

        control.checkpoint()?;
        let separated = overlap_add(&stem_chunks, &config, total_samples);

        let source_rms = waveform.rms();
        let stems: Vec<Stem> = StemName::ALL
            .into_iter()
            .zip(separated)
            .map(|(name, samples)| {
                let energy_ratio = if source_rms > 0.0 {
                    rms(&samples) / source_rms
                } else {
                    0.0
                };
                Stem {
                    name,
                    audio: Waveform::new(samples, sample_rate),
                    energy_ratio,
                    low_confidence: energy_ratio < self.low_confidence_ratio,
                    resource: None,
                }
            })
            .collect();

        info!(
            "Separated {} stems in {:.2}s ({})",
            stems.len(),
            start.elapsed().as_secs_f64(),
            stems
                .iter()
                .map(|s| format!("{} {:.2}", s.name, s.energy_ratio))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(stems)
    }

    fn name(&self) -> &'static str {
        "spectral-hpss"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stems::CancelFlag;
    use crate::error::TunematchError;
    use std::f32::consts::PI;
    use std::time::Duration;

    const RATE: u32 = 22050;

    fn mix(secs: f32) -> Waveform {
        let n = (RATE as f32 * secs) as usize;
        let period = RATE as usize / 2;
        let samples = (0..n)
            .map(|i| {
                let t = i as f32 / RATE as f32;
                let bass = 0.3 * (2.0 * PI * 60.0 * t).sin();
                let lead = 0.2 * (2.0 * PI * 440.0 * t).sin();
                let click = if i % period < 40 { 0.6 } else { 0.0 };
                bass + lead + click
            })
            .collect();
        Waveform::new(samples, RATE)
    }

    #[test]
    fn test_produces_all_stems_in_order() {
        let stems = SpectralStemSeparator::default()
            .separate(&mix(2.0), &SeparationControl::unbounded())
            .unwrap();
        let names: Vec<StemName> = stems.iter().map(|s| s.name).collect();
        assert_eq!(names, StemName::ALL.to_vec());
        for stem in &stems {
            assert_eq!(stem.audio.len(), 2 * RATE as usize);
            assert_eq!(stem.audio.sample_rate(), RATE);
        }
    }

    #[test]
    fn test_stems_sum_to_mix() {
        let input = mix(2.0);
        let stems = SpectralStemSeparator::default()
            .separate(&input, &SeparationControl::unbounded())
            .unwrap();
        let max_err = (0..input.len())
            .map(|i| {
                let sum: f32 = stems.iter().map(|s| s.audio.samples()[i]).sum();
                (sum - input.samples()[i]).abs()
            })
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-3, "max error {}", max_err);
    }

    #[test]
    fn test_bass_carries_low_tone() {
        let n = RATE as usize * 2;
        let samples = (0..n)
            .map(|i| 0.5 * (2.0 * PI * 60.0 * i as f32 / RATE as f32).sin())
            .collect();
        let stems = SpectralStemSeparator::default()
            .separate(&Waveform::new(samples, RATE), &SeparationControl::unbounded())
            .unwrap();
        let bass = &stems[StemName::Bass.index()];
        let vocals = &stems[StemName::Vocals.index()];
        assert!(bass.energy_ratio > 0.8, "bass ratio {}", bass.energy_ratio);
        assert!(!bass.low_confidence);
        assert!(vocals.low_confidence);
    }

    #[test]
    fn test_silence_is_low_confidence_everywhere() {
        let stems = SpectralStemSeparator::default()
            .separate(&Waveform::new(vec![0.0; RATE as usize], RATE), &SeparationControl::unbounded())
            .unwrap();
        assert_eq!(stems.len(), 4);
        assert!(stems.iter().all(|s| s.low_confidence));
    }

    #[test]
    fn test_chunked_separation_matches_length() {
        let config = SeparationConfig {
            chunk_seconds: 1.0,
            overlap_seconds: 0.25,
            ..SeparationConfig::default()
        };
        let input = mix(3.5);
        let stems = SpectralStemSeparator::new(&config)
            .separate(&input, &SeparationControl::unbounded())
            .unwrap();
        assert!(stems.iter().all(|s| s.audio.len() == input.len()));
    }

    #[test]
    fn test_expired_budget_times_out() {
        let control = SeparationControl::start(Duration::ZERO, CancelFlag::new());
        let err = SpectralStemSeparator::default()
            .separate(&mix(1.0), &control)
            .unwrap_err();
        assert!(matches!(err, TunematchError::SeparationTimeout { .. }));
    }
}
