//! Configuration and CLI handling

pub mod cli;
pub mod settings;

pub use cli::{Cli, Command};
pub use settings::{
    AnalysisConfig, EngineConfig, RankingConfig, ScoringConfig, SeparationConfig, TempoFolding,
    CANONICAL_SAMPLE_RATE,
};
