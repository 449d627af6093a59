//! Feature extraction: waveform in, [`FeatureSet`] out
//!
//! Tempo and pitch are independent, so they run on the two sides of a
//! `rayon::join`. Each backend is deterministic on its own, and joining
//! does not change the result.

use crate::analysis::fingerprint::compute_fingerprint;
use crate::analysis::pitch::YinPitchEstimator;
use crate::analysis::tempo::OnsetTempoEstimator;
use crate::analysis::traits::{PitchEstimator, TempoEstimator};
use crate::config::AnalysisConfig;
use crate::error::{Result, TunematchError};
use crate::types::{FeatureSet, Waveform};
use std::time::Instant;
use tracing::debug;

/// Computes tempo, median pitch and (optionally) the fingerprint
pub struct FeatureExtractor {
    tempo: Box<dyn TempoEstimator>,
    pitch: Box<dyn PitchEstimator>,
    min_seconds: f64,
    fingerprint: bool,
}

impl FeatureExtractor {
    /// Extractor with the built-in onset tempo and YIN pitch backends
    pub fn new(config: &AnalysisConfig) -> Self {
        Self::with_backends(
            config,
            Box::new(OnsetTempoEstimator::new(config)),
            Box::new(YinPitchEstimator::new(config)),
        )
    }

    pub fn with_backends(
        config: &AnalysisConfig,
        tempo: Box<dyn TempoEstimator>,
        pitch: Box<dyn PitchEstimator>,
    ) -> Self {
        Self {
            tempo,
            pitch,
            min_seconds: config.min_analysis_seconds,
            fingerprint: config.fingerprint,
        }
    }

    /// Extract features from a decoded waveform
    ///
    /// Fails with `InsufficientAudio` for clips shorter than the analysis
    /// minimum and with `InvalidFeatureSet` if a backend produced values
    /// outside the feature invariants.
    pub fn extract(&self, waveform: &Waveform) -> Result<FeatureSet> {
        let duration = waveform.duration();
        if duration < self.min_seconds {
            return Err(TunematchError::InsufficientAudio {
                duration_secs: duration,
                required_secs: self.min_seconds,
            });
        }

        let start = Instant::now();
        let (tempo, pitch) = rayon::join(
            || self.tempo.estimate(waveform),
            || self.pitch.estimate(waveform),
        );
        let tempo = tempo?;
        let pitch = pitch?;

        let mut features = FeatureSet::new(tempo.bpm, pitch.median_hz);
        if self.fingerprint {
            features = features.with_fingerprint(compute_fingerprint(waveform));
        }
        features.validate()?;

        debug!(
            "Extracted features in {:.0}ms: tempo {:.2} ({}), pitch {:.2} Hz ({})",
            start.elapsed().as_secs_f64() * 1000.0,
            features.tempo_bpm,
            self.tempo.name(),
            features.pitch_median_hz,
            self.pitch.name()
        );

        Ok(features)
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(&AnalysisConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::traits::{PitchEstimate, TempoEstimate};

    struct FixedTempo(f64);

    impl TempoEstimator for FixedTempo {
        fn estimate(&self, _: &Waveform) -> Result<TempoEstimate> {
            Ok(TempoEstimate {
                bpm: self.0,
                confidence: 1.0,
                candidates: vec![],
                onset_count: 0,
            })
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct FixedPitch(f64);

    impl PitchEstimator for FixedPitch {
        fn estimate(&self, _: &Waveform) -> Result<PitchEstimate> {
            Ok(PitchEstimate {
                median_hz: self.0,
                voiced_frames: 0,
                total_frames: 0,
            })
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn one_second() -> Waveform {
        Waveform::new(vec![0.0; 22050], 22050)
    }

    #[test]
    fn test_short_clip_is_insufficient() {
        let err = FeatureExtractor::default()
            .extract(&Waveform::new(vec![0.1; 4410], 22050))
            .unwrap_err();
        assert!(matches!(err, TunematchError::InsufficientAudio { .. }));
    }

    #[test]
    fn test_backend_values_pass_through() {
        let config = AnalysisConfig {
            fingerprint: false,
            ..AnalysisConfig::default()
        };
        let extractor =
            FeatureExtractor::with_backends(&config, Box::new(FixedTempo(123.0)), Box::new(FixedPitch(220.0)));
        let features = extractor.extract(&one_second()).unwrap();
        assert_eq!(features.tempo_bpm, 123.0);
        assert_eq!(features.pitch_median_hz, 220.0);
        assert!(features.fingerprint.is_none());
    }

    #[test]
    fn test_non_finite_backend_output_is_rejected() {
        let extractor = FeatureExtractor::with_backends(
            &AnalysisConfig::default(),
            Box::new(FixedTempo(f64::NAN)),
            Box::new(FixedPitch(220.0)),
        );
        let err = extractor.extract(&one_second()).unwrap_err();
        assert!(matches!(err, TunematchError::InvalidFeatureSet { .. }));
    }

    #[test]
    fn test_silence_uses_sentinels() {
        let features = FeatureExtractor::default()
            .extract(&Waveform::new(vec![0.0; 22050 * 2], 22050))
            .unwrap();
        assert_eq!(features.tempo_bpm, 40.0);
        assert_eq!(features.pitch_median_hz, 0.0);
        assert!(features.fingerprint.is_some());
    }
}
