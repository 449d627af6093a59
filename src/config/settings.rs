//! Runtime configuration settings
//!
//! Every numeric policy of the engine lives here with a documented default.
//! Nothing is read from the environment; callers build an [`EngineConfig`]
//! (or take the default) and hand it to the engine.

use crate::error::{Result, TunematchError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Canonical analysis sample rate (22050 Hz)
///
/// Sufficient for tempo and pitch (content below 11 kHz) and shared by every
/// stage so features stay commensurable.
pub const CANONICAL_SAMPLE_RATE: u32 = 22050;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analysis: AnalysisConfig,
    pub scoring: ScoringConfig,
    pub ranking: RankingConfig,
    pub separation: SeparationConfig,
}

/// Feature extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Sample rate every waveform is decoded to
    pub sample_rate: u32,
    /// Shortest input accepted for extraction
    pub min_analysis_seconds: f64,
    /// Lower bound of the tempo search; also the sentinel tempo for silence
    pub tempo_min_bpm: f64,
    /// Upper bound of the tempo search
    pub tempo_max_bpm: f64,
    /// Centre of the log-normal tempo prior used to fold octave errors
    pub tempo_prior_bpm: f64,
    /// Width of the tempo prior in octaves
    pub tempo_prior_octaves: f64,
    pub pitch_min_hz: f64,
    pub pitch_max_hz: f64,
    /// Pitch analysis frame length in samples
    pub pitch_frame_size: usize,
    pub pitch_hop_size: usize,
    /// YIN aperiodicity threshold; frames above it are unvoiced
    pub yin_threshold: f64,
    /// Frames quieter than this RMS are unvoiced
    pub voicing_rms_threshold: f64,
    /// Only the first N seconds are pitch tracked
    pub pitch_max_seconds: f64,
    /// Compute the spectral fingerprint
    pub fingerprint: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: CANONICAL_SAMPLE_RATE,
            min_analysis_seconds: 1.0,
            tempo_min_bpm: 40.0,
            tempo_max_bpm: 220.0,
            tempo_prior_bpm: 120.0,
            tempo_prior_octaves: 1.0,
            pitch_min_hz: 50.0,
            pitch_max_hz: 2000.0,
            pitch_frame_size: 2048,
            pitch_hop_size: 512,
            yin_threshold: 0.15,
            voicing_rms_threshold: 0.01,
            pitch_max_seconds: 20.0,
            fingerprint: true,
        }
    }
}

/// How tempo distance treats half/double tempo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoFolding {
    /// Plain absolute BPM difference
    #[default]
    Strict,
    /// Smallest difference over {t, 2t, t/2} of the reference tempo
    OctaveEquivalent,
}

/// Similarity scoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// BPM difference at which tempo similarity reaches 0
    pub tempo_tolerance_bpm: f64,
    /// Pitch distance in cents at which pitch similarity reaches 0
    pub pitch_tolerance_cents: f64,
    pub tempo_weight: f64,
    pub pitch_weight: f64,
    /// Weight of fingerprint cosine similarity; 0 disables the axis
    pub fingerprint_weight: f64,
    pub tempo_folding: TempoFolding,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            tempo_tolerance_bpm: 30.0,
            pitch_tolerance_cents: 1200.0,
            tempo_weight: 0.5,
            pitch_weight: 0.5,
            fingerprint_weight: 0.0,
            tempo_folding: TempoFolding::Strict,
        }
    }
}

/// Corpus ranking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Number of matches returned
    pub top_n: usize,
    /// Corpus size above which scoring fans out over the rayon pool
    pub parallel_threshold: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            parallel_threshold: 2048,
        }
    }
}

/// Stem separation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationConfig {
    /// Worker threads running separations
    pub workers: usize,
    /// Admitted jobs waiting for a worker beyond the running ones
    pub queue_depth: usize,
    /// Fixed part of the time budget
    pub timeout_base_secs: f64,
    /// Budget added per second of input audio
    pub timeout_per_audio_second: f64,
    /// Stems below this energy ratio are flagged low-confidence
    pub low_confidence_ratio: f64,
    /// STFT size
    pub nfft: usize,
    /// STFT hop
    pub hop: usize,
    /// Audio is separated in chunks of this length
    pub chunk_seconds: f64,
    /// Crossfade between neighbouring chunks
    pub overlap_seconds: f64,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            workers: (num_cpus::get() / 2).max(1),
            queue_depth: 4,
            timeout_base_secs: 10.0,
            timeout_per_audio_second: 2.0,
            low_confidence_ratio: 0.01,
            nfft: 2048,
            hop: 512,
            chunk_seconds: 30.0,
            overlap_seconds: 1.0,
        }
    }
}

impl SeparationConfig {
    /// Time budget for an input of the given duration
    pub fn budget_for(&self, duration_secs: f64) -> Duration {
        let secs = self.timeout_base_secs + self.timeout_per_audio_second * duration_secs.max(0.0);
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Maximum number of admitted (running + queued) jobs
    pub fn admission_limit(&self) -> usize {
        self.workers + self.queue_depth
    }
}

impl EngineConfig {
    /// Apply CLI overrides on top of the defaults
    pub fn from_cli(cli: &super::cli::Cli) -> Self {
        let mut config = Self::default();
        let tuning = &cli.tuning;

        if let Some(tol) = tuning.tempo_tolerance {
            config.scoring.tempo_tolerance_bpm = tol;
        }
        if let Some(tol) = tuning.pitch_tolerance {
            config.scoring.pitch_tolerance_cents = tol;
        }
        if let Some(w) = tuning.tempo_weight {
            config.scoring.tempo_weight = w;
            config.scoring.pitch_weight = 1.0 - w - config.scoring.fingerprint_weight;
        }
        if tuning.octave_equivalent {
            config.scoring.tempo_folding = TempoFolding::OctaveEquivalent;
        }
        if let Some(secs) = tuning.separation_timeout {
            config.separation.timeout_base_secs = secs;
        }
        if let super::cli::Command::Analyze { top: Some(n), .. } = &cli.command {
            config.ranking.top_n = *n;
        }

        config
    }

    /// Check every invariant the engine relies on
    pub fn validate(&self) -> Result<()> {
        let a = &self.analysis;
        if a.sample_rate == 0 {
            return Err(config_err("analysis.sample_rate must be > 0"));
        }
        if !(a.min_analysis_seconds.is_finite() && a.min_analysis_seconds > 0.0) {
            return Err(config_err("analysis.min_analysis_seconds must be > 0"));
        }
        if !(a.tempo_min_bpm.is_finite() && a.tempo_min_bpm > 0.0) {
            return Err(config_err("analysis.tempo_min_bpm must be > 0"));
        }
        if !(a.tempo_max_bpm.is_finite() && a.tempo_min_bpm < a.tempo_max_bpm) {
            return Err(config_err("analysis.tempo_min_bpm must be below tempo_max_bpm"));
        }
        if !(a.tempo_prior_bpm > 0.0 && a.tempo_prior_octaves > 0.0) {
            return Err(config_err("analysis tempo prior must be positive"));
        }
        if !(a.pitch_min_hz > 0.0 && a.pitch_min_hz < a.pitch_max_hz) {
            return Err(config_err("analysis.pitch_min_hz must be > 0 and below pitch_max_hz"));
        }
        if a.pitch_frame_size < 64 || a.pitch_hop_size == 0 {
            return Err(config_err("analysis pitch frame must be >= 64 samples with a non-zero hop"));
        }
        if (a.sample_rate as f64 / a.pitch_min_hz) as usize >= a.pitch_frame_size / 2 {
            return Err(config_err(
                "analysis.pitch_frame_size is too short for pitch_min_hz",
            ));
        }

        let s = &self.scoring;
        for (name, value) in [
            ("scoring.tempo_tolerance_bpm", s.tempo_tolerance_bpm),
            ("scoring.pitch_tolerance_cents", s.pitch_tolerance_cents),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(config_err(format!("{} must be finite and > 0", name)));
            }
        }
        for (name, value) in [
            ("scoring.tempo_weight", s.tempo_weight),
            ("scoring.pitch_weight", s.pitch_weight),
            ("scoring.fingerprint_weight", s.fingerprint_weight),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(config_err(format!("{} must be finite and >= 0", name)));
            }
        }
        let total = s.tempo_weight + s.pitch_weight + s.fingerprint_weight;
        if (total - 1.0).abs() > 1e-6 {
            return Err(config_err(format!("scoring weights must sum to 1, got {}", total)));
        }
        if s.tempo_weight + s.pitch_weight <= 0.0 {
            return Err(config_err("scoring.tempo_weight + pitch_weight must be > 0"));
        }

        if self.ranking.top_n == 0 {
            return Err(config_err("ranking.top_n must be >= 1"));
        }

        let sep = &self.separation;
        if sep.workers == 0 || sep.queue_depth == 0 {
            return Err(config_err("separation.workers and queue_depth must be >= 1"));
        }
        if sep.nfft < 16 || !sep.nfft.is_power_of_two() {
            return Err(config_err("separation.nfft must be a power of two >= 16"));
        }
        if sep.hop == 0 || sep.hop > sep.nfft {
            return Err(config_err("separation.hop must be in 1..=nfft"));
        }
        if !(sep.timeout_base_secs.is_finite()
            && sep.timeout_per_audio_second.is_finite()
            && sep.timeout_base_secs >= 0.0
            && sep.timeout_per_audio_second >= 0.0)
        {
            return Err(config_err("separation timeouts must be finite and >= 0"));
        }
        if !(sep.chunk_seconds > 0.0 && sep.overlap_seconds >= 0.0 && sep.overlap_seconds < sep.chunk_seconds) {
            return Err(config_err("separation.overlap_seconds must be below chunk_seconds"));
        }
        if !(sep.low_confidence_ratio >= 0.0 && sep.low_confidence_ratio.is_finite()) {
            return Err(config_err("separation.low_confidence_ratio must be >= 0"));
        }

        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> TunematchError {
    TunematchError::ConfigError(msg.into())
}
