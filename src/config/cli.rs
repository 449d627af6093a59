//! CLI argument parsing and configuration

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// tunematch - find similar tracks and split recordings into stems
///
/// Builds a reference corpus of tempo/pitch features, ranks uploads against it,
/// and separates recordings into vocals, drums, bass and other.
#[derive(Parser, Debug)]
#[command(name = "tunematch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only, no progress bars)
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    #[command(flatten)]
    pub tuning: Tuning,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract features for every audio file under a directory and save the corpus
    Index {
        /// Directory of reference tracks
        #[arg(short, long, value_name = "DIR")]
        input: PathBuf,

        /// Corpus JSON file to write
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Only scan the top-level directory
        #[arg(long, default_value = "false")]
        no_recursive: bool,

        /// Number of worker threads (defaults to CPU count - 1)
        #[arg(short = 'j', long, value_name = "N")]
        threads: Option<usize>,

        /// Re-analyze tracks already present in the output corpus
        #[arg(short, long, default_value = "false")]
        force: bool,
    },

    /// Rank a recording against a saved corpus
    Analyze {
        /// Audio file to analyze
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Corpus JSON file produced by `index`
        #[arg(short, long, value_name = "FILE")]
        corpus: PathBuf,

        /// Number of matches to return
        #[arg(short = 'n', long, value_name = "N")]
        top: Option<usize>,
    },

    /// Separate a recording into stems
    Separate {
        /// Audio file to separate
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Directory that receives the stem WAV files
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Prefix of the relative stem URLs
        #[arg(long, value_name = "PREFIX", default_value = "stems")]
        url_prefix: String,
    },
}

/// Scoring overrides shared by all commands
#[derive(Args, Debug, Default)]
pub struct Tuning {
    /// Tempo difference (BPM) at which tempo similarity reaches 0
    #[arg(long, global = true, value_name = "BPM")]
    pub tempo_tolerance: Option<f64>,

    /// Pitch difference (cents) at which pitch similarity reaches 0
    #[arg(long, global = true, value_name = "CENTS")]
    pub pitch_tolerance: Option<f64>,

    /// Weight of tempo in the overall score (pitch gets the remainder)
    #[arg(long, global = true, value_name = "W")]
    pub tempo_weight: Option<f64>,

    /// Treat half/double tempo as equivalent when scoring
    #[arg(long, global = true, default_value = "false")]
    pub octave_equivalent: bool,

    /// Separation time budget base in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub separation_timeout: Option<f64>,
}

impl Cli {
    /// Get the log level based on verbosity flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            return tracing::Level::ERROR;
        }
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }

    /// Whether progress bars should be drawn
    pub fn show_progress(&self) -> bool {
        !self.quiet
    }
}
