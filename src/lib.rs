//! tunematch - audio similarity matching and stem separation
//!
//! Decodes recordings to mono PCM at a single canonical rate, extracts a
//! small feature set (tempo, median pitch, spectral fingerprint), ranks a
//! reference corpus by similarity and splits recordings into vocals, drums,
//! bass and other.
//!
//! # Architecture
//!
//! - `config`: engine settings and CLI argument parsing
//! - `audio`: decoding with symphonia, WAV encoding for stems
//! - `analysis`: tempo, pitch, fingerprint and stem separation (swappable backends)
//! - `matching`: similarity scoring, the snapshot-swapped corpus index and ranking
//! - `discovery`: reference file scanning and track ids
//! - `pipeline`: parallel corpus indexing and the request engine
//! - `export`: corpus JSON, response shapes and stem sinks
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tunematch::config::EngineConfig;
//! use tunematch::export::read_corpus;
//! use tunematch::matching::CorpusIndex;
//! use tunematch::pipeline::Engine;
//!
//! let tracks = read_corpus("corpus.json".as_ref()).expect("corpus");
//! let corpus = Arc::new(CorpusIndex::from_tracks(tracks).expect("valid corpus"));
//! let engine = Engine::new(EngineConfig::default(), corpus).expect("valid config");
//!
//! let bytes = std::fs::read("query.mp3").expect("readable file");
//! let result = engine.analyze(&bytes, Some("mp3")).expect("analysis failed");
//! for m in &result.top_matches {
//!     println!("{} {:.1}", m.track_id, m.overall_score);
//! }
//! ```

pub mod analysis;
pub mod audio;
pub mod config;
pub mod discovery;
pub mod error;
pub mod export;
pub mod matching;
pub mod pipeline;
pub mod types;

// Re-export key types at crate root
pub use error::{ErrorKind, Result, TunematchError};
pub use pipeline::{Engine, SeparationTicket};
pub use types::{FeatureSet, Match, RankedResult, SeparationState, Stem, StemName, Track, Waveform};
