//! Core data types for tunematch
//!
//! These types represent the domain model and flow through the pipeline.

use crate::error::{Result, TunematchError};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Audio buffer types
// =============================================================================

/// Decoded mono audio at the canonical sample rate
///
/// Immutable once loaded; owned by the request that decoded it.
#[derive(Debug, Clone)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: u32,
    duration: f64,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        // Guard against division by zero - use 0 duration for invalid sample rate
        let duration = if sample_rate > 0 {
            samples.len() as f64 / sample_rate as f64
        } else {
            0.0
        };
        Self {
            samples,
            sample_rate,
            duration,
        }
    }

    /// Mono samples normalized to [-1.0, 1.0]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square level, accumulated in f64 for a stable result
    pub fn rms(&self) -> f64 {
        rms(&self.samples)
    }

    /// Absolute peak level
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

/// RMS of a sample slice (0 for an empty slice)
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
    (sum / samples.len() as f64).sqrt()
}

// =============================================================================
// Features
// =============================================================================

/// Deterministic features extracted from one waveform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Estimated tempo, always > 0
    pub tempo_bpm: f64,
    /// Median fundamental frequency of voiced frames; 0 means no pitched content
    pub pitch_median_hz: f64,
    /// Compact spectral summary (band energies + chroma)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Vec<f32>>,
}

impl FeatureSet {
    pub fn new(tempo_bpm: f64, pitch_median_hz: f64) -> Self {
        Self {
            tempo_bpm,
            pitch_median_hz,
            fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Vec<f32>) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Reject non-finite values and values outside the feature invariants
    pub fn validate(&self) -> Result<()> {
        if !self.tempo_bpm.is_finite() || self.tempo_bpm <= 0.0 {
            return Err(TunematchError::invalid_features(format!(
                "tempo must be finite and > 0, got {}",
                self.tempo_bpm
            )));
        }
        if !self.pitch_median_hz.is_finite() || self.pitch_median_hz < 0.0 {
            return Err(TunematchError::invalid_features(format!(
                "pitch median must be finite and >= 0, got {}",
                self.pitch_median_hz
            )));
        }
        if let Some(fp) = &self.fingerprint {
            if fp.iter().any(|v| !v.is_finite()) {
                return Err(TunematchError::invalid_features(
                    "fingerprint contains non-finite values",
                ));
            }
        }
        Ok(())
    }

    /// True when the pitch tracker found no voiced frames
    pub fn is_unpitched(&self) -> bool {
        self.pitch_median_hz == 0.0
    }
}

// =============================================================================
// Corpus entries and match results
// =============================================================================

/// Metadata extracted from audio file tags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// A reference track with precomputed features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub track_id: String,
    pub features: FeatureSet,
    #[serde(default)]
    pub metadata: TrackMetadata,
}

impl Track {
    pub fn new(track_id: impl Into<String>, features: FeatureSet) -> Self {
        Self {
            track_id: track_id.into(),
            features,
            metadata: TrackMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: TrackMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Similarity of a query against one track; every score is in [0, 100]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub track_id: String,
    pub tempo_similarity: f64,
    pub pitch_similarity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_similarity: Option<f64>,
    pub overall_score: f64,
}

/// Query features plus the best matches, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub query: FeatureSet,
    pub top_matches: Vec<Match>,
    /// Corpus snapshot version the ranking was computed against
    pub corpus_version: u64,
}

// =============================================================================
// Stems
// =============================================================================

/// The fixed set of stems every separation produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemName {
    Vocals,
    Drums,
    Bass,
    Other,
}

impl StemName {
    /// All stems, in output order
    pub const ALL: [StemName; 4] = [
        StemName::Vocals,
        StemName::Drums,
        StemName::Bass,
        StemName::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StemName::Vocals => "vocals",
            StemName::Drums => "drums",
            StemName::Bass => "bass",
            StemName::Other => "other",
        }
    }

    /// Position in [`StemName::ALL`]
    pub fn index(self) -> usize {
        match self {
            StemName::Vocals => 0,
            StemName::Drums => 1,
            StemName::Bass => 2,
            StemName::Other => 3,
        }
    }
}

impl fmt::Display for StemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One isolated source of a separated recording
#[derive(Debug, Clone)]
pub struct Stem {
    pub name: StemName,
    pub audio: Waveform,
    /// Stem RMS relative to the source RMS
    pub energy_ratio: f64,
    /// Set when the stem carries almost no energy (still always present)
    pub low_confidence: bool,
    /// Relative address assigned by the persistence layer, once exported
    pub resource: Option<String>,
}

/// Lifecycle of one separation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparationState {
    Received,
    Decomposing,
    Complete,
    Failed,
}

impl SeparationState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: SeparationState) -> bool {
        matches!(
            (self, next),
            (SeparationState::Received, SeparationState::Decomposing)
                | (SeparationState::Received, SeparationState::Failed)
                | (SeparationState::Decomposing, SeparationState::Complete)
                | (SeparationState::Decomposing, SeparationState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SeparationState::Complete | SeparationState::Failed)
    }
}

// =============================================================================
// Supported formats
// =============================================================================

/// Audio formats the loader is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
    Flac,
    Aiff,
    Ogg,
}

impl AudioFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "wav" => Some(AudioFormat::Wav),
            "flac" => Some(AudioFormat::Flac),
            "aiff" | "aif" => Some(AudioFormat::Aiff),
            "ogg" | "oga" => Some(AudioFormat::Ogg),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_duration() {
        let wf = Waveform::new(vec![0.0; 22050], 22050);
        assert!((wf.duration() - 1.0).abs() < 1e-9);
        assert_eq!(Waveform::new(vec![0.0; 10], 0).duration(), 0.0);
    }

    #[test]
    fn test_waveform_levels() {
        let wf = Waveform::new(vec![0.5, -0.5, 0.5, -0.5], 4);
        assert!((wf.rms() - 0.5).abs() < 1e-9);
        assert_eq!(wf.peak(), 0.5);
    }

    #[test]
    fn test_feature_set_validation() {
        assert!(FeatureSet::new(120.0, 220.0).validate().is_ok());
        assert!(FeatureSet::new(120.0, 0.0).validate().is_ok());
        assert!(FeatureSet::new(0.0, 220.0).validate().is_err());
        assert!(FeatureSet::new(f64::NAN, 220.0).validate().is_err());
        assert!(FeatureSet::new(120.0, f64::INFINITY).validate().is_err());
        assert!(FeatureSet::new(120.0, 220.0)
            .with_fingerprint(vec![0.1, f32::NAN])
            .validate()
            .is_err());
    }

    #[test]
    fn test_stem_names_fixed() {
        assert_eq!(StemName::ALL.len(), 4);
        for (i, name) in StemName::ALL.iter().enumerate() {
            assert_eq!(name.index(), i);
        }
        assert_eq!(StemName::Vocals.to_string(), "vocals");
    }

    #[test]
    fn test_separation_transitions() {
        use SeparationState::*;
        assert!(Received.can_transition_to(Decomposing));
        assert!(Decomposing.can_transition_to(Complete));
        assert!(Decomposing.can_transition_to(Failed));
        assert!(!Complete.can_transition_to(Decomposing));
        assert!(!Received.can_transition_to(Complete));
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(AudioFormat::from_extension("WAV"), Some(AudioFormat::Wav));
        assert_eq!(AudioFormat::from_extension("aif"), Some(AudioFormat::Aiff));
        assert_eq!(AudioFormat::from_extension("txt"), None);
    }
}
