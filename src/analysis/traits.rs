//! Analysis trait abstractions
//!
//! These traits define the interface for swappable analysis backends.
//! The extractor and the engine only talk to these traits, so a learned
//! separator or a different pitch tracker can be dropped in without
//! touching the pipeline.

use crate::analysis::stems::SeparationControl;
use crate::error::Result;
use crate::types::{Stem, StemName, Waveform};

/// Tempo analysis result
#[derive(Debug, Clone, PartialEq)]
pub struct TempoEstimate {
    /// Detected tempo, always > 0
    pub bpm: f64,
    /// Periodicity strength of the chosen tempo (0.0 - 1.0)
    pub confidence: f64,
    /// Octave alternatives (bpm, weighted score) that lost to `bpm`
    pub candidates: Vec<(f64, f64)>,
    /// Number of detected onsets
    pub onset_count: usize,
}

/// Pitch analysis result
#[derive(Debug, Clone, PartialEq)]
pub struct PitchEstimate {
    /// Median fundamental frequency over voiced frames, 0 when none were voiced
    pub median_hz: f64,
    pub voiced_frames: usize,
    pub total_frames: usize,
}

/// Tempo detection backend
pub trait TempoEstimator: Send + Sync {
    /// Estimate the dominant tempo of a waveform
    fn estimate(&self, waveform: &Waveform) -> Result<TempoEstimate>;

    /// Get the name of this estimator (for logging)
    fn name(&self) -> &'static str;
}

/// Fundamental frequency backend
pub trait PitchEstimator: Send + Sync {
    /// Estimate the median fundamental frequency of a waveform
    fn estimate(&self, waveform: &Waveform) -> Result<PitchEstimate>;

    /// Get the name of this estimator (for logging)
    fn name(&self) -> &'static str;
}

/// Stem separation backend
pub trait StemSeparator: Send + Sync {
    /// Separate a waveform into every stem of [`StemSeparator::stem_names`]
    ///
    /// Implementations return either the complete set or an error; partial
    /// stem sets are never returned. `control` carries the deadline and the
    /// cancellation flag and must be polled regularly.
    fn separate(&self, waveform: &Waveform, control: &SeparationControl) -> Result<Vec<Stem>>;

    /// The fixed stem set this separator produces
    fn stem_names(&self) -> &'static [StemName] {
        &StemName::ALL
    }

    /// Get the name of this separator (for logging)
    fn name(&self) -> &'static str;
}
