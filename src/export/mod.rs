//! Corpus JSON, response shapes and stem export

pub mod json;
pub mod stems;

pub use json::{read_corpus, read_existing_tracks, write_corpus, AnalyzeResponse, SeparateResponse, Status};
pub use stems::{store_all, DirectoryStemSink, StemSink};
