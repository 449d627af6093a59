//! Corpus indexing
//!
//! Discovers reference files, extracts features in parallel and saves the
//! corpus. Files that fail with an input error are skipped with a warning,
//! other failures are logged and counted. Neither stops the run.

use crate::analysis::metadata::extract_metadata;
use crate::analysis::FeatureExtractor;
use crate::audio::decode_file;
use crate::config::EngineConfig;
use crate::discovery::{self, DiscoveredFile};
use crate::error::{Result, TunematchError};
use crate::export;
use crate::types::Track;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Index run summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexResult {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    /// Skipped because they were already indexed, or because of input errors
    pub skipped: usize,
    pub corpus_size: usize,
}

/// Options of one index run
#[derive(Debug, Clone)]
pub struct IndexOptions<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub recursive: bool,
    /// Re-analyze files whose track id is already in the output corpus
    pub force: bool,
    pub threads: Option<usize>,
    pub show_progress: bool,
}

/// Scan, analyze and save a corpus
pub fn run_index(options: &IndexOptions<'_>, config: &EngineConfig) -> Result<IndexResult> {
    config.validate()?;
    let start = Instant::now();

    if let Some(threads) = options.threads {
        configure_thread_pool(threads)?;
    }

    info!("Scanning {} for audio files...", options.input.display());
    let files = discovery::scan(options.input, options.recursive)?;

    let existing = if options.force || !options.output.exists() {
        Vec::new()
    } else {
        export::read_existing_tracks(options.output)
    };

    let existing_ids: HashSet<&str> = existing.iter().map(|t| t.track_id.as_str()).collect();
    let (to_analyze, already): (Vec<_>, Vec<_>) = files
        .into_iter()
        .partition(|f| !existing_ids.contains(f.track_id.as_str()));

    if !already.is_empty() {
        info!(
            "Skipping {} already-indexed files (use --force to re-analyze)",
            already.len()
        );
    }

    let total_files = to_analyze.len() + already.len();
    let outcome = build_tracks(&to_analyze, config, options.show_progress);

    let mut tracks = existing;
    tracks.extend(outcome.tracks);
    tracks.sort_by(|a, b| a.track_id.cmp(&b.track_id));
    tracks.dedup_by(|later, earlier| later.track_id == earlier.track_id);

    if outcome.successful > 0 || !options.output.exists() {
        export::write_corpus(&tracks, options.output)?;
    }

    info!(
        "Indexed {} of {} files in {:.2}s, corpus holds {} tracks",
        outcome.successful,
        total_files,
        start.elapsed().as_secs_f64(),
        tracks.len()
    );

    Ok(IndexResult {
        total_files,
        successful: outcome.successful,
        failed: outcome.failed,
        skipped: outcome.skipped + already.len(),
        corpus_size: tracks.len(),
    })
}

/// Tracks built from a batch of files, with per-outcome counts
pub struct BuildOutcome {
    /// In input order
    pub tracks: Vec<Track>,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Analyze files in parallel into corpus tracks
pub fn build_tracks(files: &[DiscoveredFile], config: &EngineConfig, show_progress: bool) -> BuildOutcome {
    let extractor = FeatureExtractor::new(&config.analysis);
    let sample_rate = config.analysis.sample_rate;

    let progress_bar = if show_progress && !files.is_empty() {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Some(pb)
    } else {
        None
    };

    let failed = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);

    let tracks: Vec<Track> = files
        .par_iter()
        .filter_map(|file| {
            let result = analyze_file(file, &extractor, sample_rate);
            if let Some(ref pb) = progress_bar {
                pb.inc(1);
                pb.set_message(file.track_id.clone());
            }
            match result {
                Ok(track) => Some(track),
                Err(e) if e.is_input_error() => {
                    warn!("Skipping {}: {}", file.path.display(), e);
                    skipped.fetch_add(1, Ordering::Relaxed);
                    None
                }
                Err(e) => {
                    error!("Failed {}: {}", file.path.display(), e);
                    failed.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
        })
        .collect();

    if let Some(pb) = progress_bar {
        pb.finish_with_message("Indexing complete");
    }

    BuildOutcome {
        successful: tracks.len(),
        tracks,
        failed: failed.load(Ordering::Relaxed),
        skipped: skipped.load(Ordering::Relaxed),
    }
}

fn analyze_file(file: &DiscoveredFile, extractor: &FeatureExtractor, sample_rate: u32) -> Result<Track> {
    debug!("Analyzing: {}", file.path.display());

    let waveform = decode_file(&file.path, sample_rate)?;
    let features = extractor.extract(&waveform)?;

    let mut metadata = extract_metadata(&file.path);
    metadata.duration_seconds = Some(waveform.duration());

    debug!(
        "Analyzed {}: tempo {:.1} BPM, pitch {:.1} Hz",
        file.track_id, features.tempo_bpm, features.pitch_median_hz
    );

    Ok(Track::new(file.track_id.clone(), features).with_metadata(metadata))
}

/// Configure the global rayon pool; a pool that already exists is kept
pub fn configure_thread_pool(num_threads: usize) -> Result<()> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.max(1))
        .build_global()
    {
        Ok(()) => {
            debug!("Configured thread pool with {} threads", num_threads);
            Ok(())
        }
        Err(e) if e.to_string().contains("already been initialized") => {
            debug!("Thread pool already initialized, using existing pool");
            Ok(())
        }
        Err(e) => Err(TunematchError::ConfigError(format!(
            "Failed to configure thread pool: {}",
            e
        ))),
    }
}
