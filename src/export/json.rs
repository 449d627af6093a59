//! JSON corpus persistence and response shapes

use crate::error::{ErrorKind, Result, TunematchError};
use crate::types::{FeatureSet, RankedResult, Stem, Track, TrackMetadata};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info};

/// Corpus file schema version
const SCHEMA_VERSION: &str = "1.0";

// =============================================================================
// Corpus file
// =============================================================================

/// Top-level corpus file structure
#[derive(Debug, Serialize, Deserialize)]
pub struct CorpusJson {
    /// Schema version for forward compatibility
    pub version: String,
    pub metadata: ExportMetadata,
    pub tracks: Vec<TrackJson>,
}

/// Export metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportMetadata {
    /// tunematch version that generated this file
    pub generator_version: String,
    /// Timestamp of export (RFC3339)
    pub exported_at: String,
    pub track_count: usize,
}

/// JSON representation of a corpus track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackJson {
    pub track_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub tempo_bpm: f64,
    pub pitch_median_hz: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Vec<f32>>,
}

impl From<&Track> for TrackJson {
    fn from(track: &Track) -> Self {
        Self {
            track_id: track.track_id.clone(),
            title: track.metadata.title.clone(),
            artist: track.metadata.artist.clone(),
            duration_seconds: track.metadata.duration_seconds,
            tempo_bpm: track.features.tempo_bpm,
            pitch_median_hz: track.features.pitch_median_hz,
            fingerprint: track.features.fingerprint.clone(),
        }
    }
}

impl From<TrackJson> for Track {
    fn from(json: TrackJson) -> Self {
        Track {
            track_id: json.track_id,
            features: FeatureSet {
                tempo_bpm: json.tempo_bpm,
                pitch_median_hz: json.pitch_median_hz,
                fingerprint: json.fingerprint,
            },
            metadata: TrackMetadata {
                title: json.title,
                artist: json.artist,
                duration_seconds: json.duration_seconds,
            },
        }
    }
}

/// Write corpus tracks to a JSON file
///
/// Uses atomic write pattern: writes to a temp file first, then renames.
/// This prevents data corruption if the write is interrupted.
pub fn write_corpus(tracks: &[Track], output_path: &Path) -> Result<()> {
    // Same directory as the target so the rename stays on one filesystem
    let temp_path = output_path.with_extension("json.tmp");

    let file = File::create(&temp_path).map_err(|e| TunematchError::ExportError {
        path: output_path.to_path_buf(),
        reason: format!("Failed to create temp file: {}", e),
    })?;

    let writer = BufWriter::new(file);

    let output = CorpusJson {
        version: SCHEMA_VERSION.to_string(),
        metadata: ExportMetadata {
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: chrono::Utc::now().to_rfc3339(),
            track_count: tracks.len(),
        },
        tracks: tracks.iter().map(TrackJson::from).collect(),
    };

    serde_json::to_writer_pretty(writer, &output).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        TunematchError::ExportError {
            path: output_path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    std::fs::rename(&temp_path, output_path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        TunematchError::ExportError {
            path: output_path.to_path_buf(),
            reason: format!("Failed to finalize file: {}", e),
        }
    })?;

    info!("Wrote {} tracks to {}", tracks.len(), output_path.display());

    Ok(())
}

/// Load a corpus file written by [`write_corpus`]
///
/// Every track is validated; a single malformed entry rejects the file.
pub fn read_corpus(path: &Path) -> Result<Vec<Track>> {
    let corpus_err = |reason: String| TunematchError::CorpusError {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| corpus_err(format!("Failed to open: {}", e)))?;
    let json: CorpusJson = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| corpus_err(format!("Failed to parse: {}", e)))?;

    if json.version != SCHEMA_VERSION {
        return Err(corpus_err(format!(
            "Unsupported schema version '{}' (expected '{}')",
            json.version, SCHEMA_VERSION
        )));
    }

    let tracks: Vec<Track> = json.tracks.into_iter().map(Track::from).collect();
    for track in &tracks {
        track
            .features
            .validate()
            .map_err(|e| corpus_err(format!("Track '{}': {}", track.track_id, e)))?;
    }

    debug!("Loaded {} tracks from {}", tracks.len(), path.display());
    Ok(tracks)
}

/// Read an existing corpus for incremental indexing
///
/// Returns an empty list when the file is missing or unreadable, so a
/// damaged corpus is simply rebuilt.
pub fn read_existing_tracks(path: &Path) -> Vec<Track> {
    if !path.exists() {
        debug!("No existing corpus at {}", path.display());
        return Vec::new();
    }
    match read_corpus(path) {
        Ok(tracks) => tracks,
        Err(e) => {
            debug!("Could not reuse existing corpus: {}", e);
            Vec::new()
        }
    }
}

// =============================================================================
// Response shapes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Query features as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryJson {
    pub tempo: f64,
    pub pitch_median: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchJson {
    pub track_id: String,
    pub tempo_similarity: f64,
    pub pitch_similarity: f64,
    pub overall_score: f64,
}

/// Result of an Analyze request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryJson>,
    #[serde(default)]
    pub top_matches: Vec<MatchJson>,
}

impl AnalyzeResponse {
    /// Presentation copy of a ranking, every value rounded to 2 decimals
    pub fn success(result: &RankedResult) -> Self {
        Self {
            status: Status::Success,
            message: None,
            kind: None,
            query: Some(QueryJson {
                tempo: round2(result.query.tempo_bpm),
                pitch_median: round2(result.query.pitch_median_hz),
            }),
            top_matches: result
                .top_matches
                .iter()
                .map(|m| MatchJson {
                    track_id: m.track_id.clone(),
                    tempo_similarity: round2(m.tempo_similarity),
                    pitch_similarity: round2(m.pitch_similarity),
                    overall_score: round2(m.overall_score),
                })
                .collect(),
        }
    }

    pub fn error(err: &TunematchError) -> Self {
        Self {
            status: Status::Error,
            message: Some(err.to_string()),
            kind: Some(err.kind()),
            query: None,
            top_matches: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemJson {
    pub name: String,
    /// Relative address assigned by the stem sink
    pub url: String,
    #[serde(default)]
    pub low_confidence: bool,
}

/// Result of a Separate request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparateResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default)]
    pub stems: Vec<StemJson>,
}

impl SeparateResponse {
    /// Response for exported stems; every stem must carry its resource
    pub fn success(stems: &[Stem]) -> Self {
        Self {
            status: Status::Success,
            message: None,
            kind: None,
            stems: stems
                .iter()
                .map(|s| StemJson {
                    name: s.name.to_string(),
                    url: s.resource.clone().unwrap_or_default(),
                    low_confidence: s.low_confidence,
                })
                .collect(),
        }
    }

    pub fn error(err: &TunematchError) -> Self {
        Self {
            status: Status::Error,
            message: Some(err.to_string()),
            kind: Some(err.kind()),
            stems: Vec::new(),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Match;

    fn sample_tracks() -> Vec<Track> {
        vec![
            Track::new("house/a.wav", FeatureSet::new(124.0, 220.0).with_fingerprint(vec![0.5, 0.5]))
                .with_metadata(TrackMetadata {
                    title: Some("A".into()),
                    artist: Some("Someone".into()),
                    duration_seconds: Some(180.5),
                }),
            Track::new("b.flac", FeatureSet::new(90.0, 0.0)),
        ]
    }

    #[test]
    fn test_corpus_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("corpus.json");
        let tracks = sample_tracks();

        write_corpus(&tracks, &path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(read_corpus(&path).unwrap(), tracks);

        assert_eq!(read_existing_tracks(&path).len(), 2);
        assert!(read_existing_tracks(&dir.path().join("missing.json")).is_empty());
    }

    #[test]
    fn test_corpus_file_schema() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("corpus.json");
        write_corpus(&sample_tracks(), &path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["version"], "1.0");
        assert_eq!(value["metadata"]["track_count"], 2);
        assert!(chrono::DateTime::parse_from_rfc3339(value["metadata"]["exported_at"].as_str().unwrap()).is_ok());
        assert!(value["tracks"][1].get("fingerprint").is_none());
    }

    #[test]
    fn test_malformed_corpus_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("corpus.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(read_corpus(&path), Err(TunematchError::CorpusError { .. })));
        assert!(read_existing_tracks(&path).is_empty());

        let bad = r#"{"version":"1.0","metadata":{"generator_version":"0","exported_at":"x","track_count":1},
            "tracks":[{"track_id":"x","tempo_bpm":-1.0,"pitch_median_hz":0.0}]}"#;
        std::fs::write(&path, bad).unwrap();
        assert!(matches!(read_corpus(&path), Err(TunematchError::CorpusError { .. })));
    }

    #[test]
    fn test_analyze_response_rounds() {
        let result = RankedResult {
            query: FeatureSet::new(118.04321, 218.5),
            top_matches: vec![Match {
                track_id: "A".into(),
                tempo_similarity: 93.33333,
                pitch_similarity: 98.6789,
                fingerprint_similarity: None,
                overall_score: 96.00611,
            }],
            corpus_version: 3,
        };
        let response = AnalyzeResponse::success(&result);
        assert_eq!(response.query, Some(QueryJson { tempo: 118.04, pitch_median: 218.5 }));
        assert_eq!(response.top_matches[0].tempo_similarity, 93.33);
        assert_eq!(response.top_matches[0].overall_score, 96.01);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("message").is_none());
    }

    #[test]
    fn test_error_responses_carry_kind() {
        let err = TunematchError::Busy { in_flight: 6, limit: 6 };
        let json = serde_json::to_value(SeparateResponse::error(&err)).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "busy");
        assert_eq!(json["stems"], serde_json::json!([]));

        let json = serde_json::to_value(AnalyzeResponse::error(&TunematchError::unsupported("x"))).unwrap();
        assert_eq!(json["kind"], "unsupported_format");
    }
}
