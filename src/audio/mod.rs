//! Audio loading and encoding
//!
//! - `decoder`: any supported container -> mono [`Waveform`](crate::types::Waveform)
//!   at the canonical rate
//! - `wav`: 16-bit PCM WAV encoding for exported stems

pub mod decoder;
pub mod wav;

pub use decoder::{decode_bytes, decode_file};
pub use wav::{encode_wav, write_wav};
