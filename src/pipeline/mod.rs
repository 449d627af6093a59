//! Corpus indexing and the request engine

pub mod engine;
pub mod indexer;

pub use engine::{Engine, SeparationTicket};
pub use indexer::{build_tracks, configure_thread_pool, run_index, IndexOptions, IndexResult};
