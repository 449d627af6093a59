//! Stem separation module
//!
//! Separates a waveform into: vocals, drums, bass, and other.

pub mod chunking;
pub mod control;
pub mod masks;
pub mod separator;

pub use control::{CancelFlag, SeparationControl};
pub use separator::SpectralStemSeparator;
