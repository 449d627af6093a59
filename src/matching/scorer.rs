//! Similarity between a query and one reference track
//!
//! Every axis maps a distance onto `[0, 100]` with a linear falloff that
//! reaches 0 at the configured tolerance:
//!
//! - tempo: absolute BPM difference (optionally octave-folded)
//! - pitch: distance in cents, `1200 * |log2(q / t)|`
//! - fingerprint: cosine similarity, only when weighted and present on both sides
//!
//! The overall score is the weighted average of the axes that apply.

use crate::analysis::fingerprint::cosine_similarity;
use crate::config::{ScoringConfig, TempoFolding};
use crate::error::{Result, TunematchError};
use crate::types::{FeatureSet, Match, Track};

/// Pure scoring function over two feature sets
#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    config: ScoringConfig,
}

impl SimilarityScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score `query` against `track`
    ///
    /// Fails with `InvalidFeatureSet` when either side carries non-finite or
    /// out-of-range features, or when the fingerprint axis is weighted and the
    /// two fingerprints differ in length.
    pub fn score(&self, query: &FeatureSet, track: &Track) -> Result<Match> {
        query.validate()?;
        track.features.validate()?;
        let reference = &track.features;

        let tempo_similarity = self.tempo_similarity(query.tempo_bpm, reference.tempo_bpm);
        let pitch_similarity = self.pitch_similarity(query.pitch_median_hz, reference.pitch_median_hz);

        let fingerprint_similarity = match (&query.fingerprint, &reference.fingerprint) {
            (Some(q), Some(t)) if self.config.fingerprint_weight > 0.0 => {
                if q.len() != t.len() {
                    return Err(TunematchError::invalid_features(format!(
                        "fingerprint of track '{}' has {} values, query has {}; re-index the corpus",
                        track.track_id,
                        t.len(),
                        q.len()
                    )));
                }
                Some(cosine_similarity(q, t))
            }
            _ => None,
        };

        let c = &self.config;
        let mut weighted = c.tempo_weight * tempo_similarity + c.pitch_weight * pitch_similarity;
        let mut total_weight = c.tempo_weight + c.pitch_weight;
        if let Some(fp) = fingerprint_similarity {
            weighted += c.fingerprint_weight * fp;
            total_weight += c.fingerprint_weight;
        }
        let overall_score = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 100.0)
        } else {
            0.0
        };

        Ok(Match {
            track_id: track.track_id.clone(),
            tempo_similarity,
            pitch_similarity,
            fingerprint_similarity,
            overall_score,
        })
    }

    /// Tempo similarity in `[0, 100]`
    pub fn tempo_similarity(&self, query_bpm: f64, reference_bpm: f64) -> f64 {
        let distance = match self.config.tempo_folding {
            TempoFolding::Strict => (query_bpm - reference_bpm).abs(),
            TempoFolding::OctaveEquivalent => [reference_bpm, reference_bpm * 2.0, reference_bpm / 2.0]
                .into_iter()
                .map(|r| (query_bpm - r).abs())
                .fold(f64::INFINITY, f64::min),
        };
        linear_falloff(distance, self.config.tempo_tolerance_bpm)
    }

    /// Pitch similarity in `[0, 100]` on a log-frequency scale
    ///
    /// Two unpitched inputs match perfectly; pitched against unpitched
    /// shares nothing.
    pub fn pitch_similarity(&self, query_hz: f64, reference_hz: f64) -> f64 {
        match (query_hz > 0.0, reference_hz > 0.0) {
            (false, false) => 100.0,
            (true, true) => {
                let cents = 1200.0 * (query_hz / reference_hz).log2().abs();
                linear_falloff(cents, self.config.pitch_tolerance_cents)
            }
            _ => 0.0,
        }
    }
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new(&ScoringConfig::default())
    }
}

/// `clamp(100 * (1 - distance / tolerance), 0, 100)`
fn linear_falloff(distance: f64, tolerance: f64) -> f64 {
    (100.0 * (1.0 - distance / tolerance)).clamp(0.0, 100.0)
}
