//! Audio analysis modules
//!
//! This module provides traits for analysis backends and concrete implementations.
//! The trait abstraction allows swapping backends without changing pipeline code.

pub mod extractor;
pub mod fingerprint;
pub mod metadata;
pub mod pitch;
pub mod stems;
pub mod stft;
pub mod tempo;
pub mod traits;

pub use extractor::FeatureExtractor;
pub use pitch::YinPitchEstimator;
pub use stems::{CancelFlag, SeparationControl, SpectralStemSeparator};
pub use tempo::OnsetTempoEstimator;
pub use traits::{PitchEstimate, PitchEstimator, StemSeparator, TempoEstimate, TempoEstimator};
