//! Similarity scoring, corpus storage and ranking

pub mod corpus;
pub mod ranker;
pub mod scorer;

pub use corpus::{CorpusIndex, CorpusSnapshot};
pub use ranker::MatchRanker;
pub use scorer::SimilarityScorer;
