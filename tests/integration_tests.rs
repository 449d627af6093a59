//! Integration tests for tunematch
//!
//! These tests drive the public API end to end over generated WAV files.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tunematch::config::EngineConfig;
use tunematch::export::{self, DirectoryStemSink, Status};
use tunematch::matching::{CorpusIndex, MatchRanker};
use tunematch::pipeline::{run_index, Engine, IndexOptions};
use tunematch::{FeatureSet, StemName, Track, TunematchError};

/// Generate a sine wave WAV file for testing
///
/// Creates a mono 16-bit WAV file at the specified path.
fn generate_sine_wav(path: &Path, frequency_hz: f32, duration_secs: f32, sample_rate: u32) {
    use std::f32::consts::PI;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).expect("Failed to create WAV file");

    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let amplitude = 0.5f32; // 50% amplitude to avoid clipping

    for i in 0..num_samples {
        let t = i as f32 / sample_rate as f32;
        let sample = (2.0 * PI * frequency_hz * t).sin() * amplitude;
        let sample_i16 = (sample * 32767.0) as i16;
        writer.write_sample(sample_i16).expect("Failed to write sample");
    }

    writer.finalize().expect("Failed to finalize WAV");
}

/// Generate a click track WAV file for tempo testing
///
/// Short decaying impulses at every beat of the given tempo.
fn generate_click_track(path: &Path, bpm: f32, duration_secs: f32, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).expect("Failed to create WAV file");

    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let samples_per_beat = (60.0 / bpm * sample_rate as f32) as usize;

    // Impulse duration: ~5ms (short click)
    let impulse_samples = (0.005 * sample_rate as f32) as usize;

    for i in 0..num_samples {
        let position_in_beat = i % samples_per_beat;

        let sample = if position_in_beat < impulse_samples {
            let decay = (-5.0 * position_in_beat as f32 / impulse_samples as f32).exp();
            0.8 * decay
        } else {
            0.0
        };

        let sample_i16 = (sample * 32767.0) as i16;
        writer
            .write_sample(sample_i16)
            .expect("Failed to write sample");
    }

    writer.finalize().expect("Failed to finalize WAV");
}

/// Generate a silent WAV file
fn generate_silence(path: &Path, duration_secs: f32, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("Failed to create WAV file");
    for _ in 0..(duration_secs * sample_rate as f32) as usize {
        writer.write_sample(0i16).expect("Failed to write sample");
    }
    writer.finalize().expect("Failed to finalize WAV");
}

/// Small pool so tests stay light on threads
fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.separation.workers = 1;
    config.separation.queue_depth = 1;
    config
}

fn empty_engine() -> Engine {
    Engine::new(test_config(), Arc::new(CorpusIndex::new())).expect("valid config")
}

fn index_options<'a>(input: &'a Path, output: &'a Path) -> IndexOptions<'a> {
    IndexOptions {
        input,
        output,
        recursive: true,
        force: false,
        threads: Some(2),
        show_progress: false, // Disable progress bars in tests
    }
}

#[test]
fn test_click_track_tempo() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("click_120.wav");
    generate_click_track(&path, 120.0, 10.0, 44100);

    let result = empty_engine()
        .analyze(&fs::read(&path).unwrap(), Some("wav"))
        .expect("Analysis failed");

    assert!(
        (result.query.tempo_bpm - 120.0).abs() <= 3.0,
        "Expected ~120 BPM, got {:.2}",
        result.query.tempo_bpm
    );
    assert!(result.top_matches.is_empty(), "Empty corpus gives no matches");
}

#[test]
fn test_sine_pitch() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("a3.wav");
    generate_sine_wav(&path, 220.0, 3.0, 44100);

    let result = empty_engine()
        .analyze(&fs::read(&path).unwrap(), Some("wav"))
        .expect("Analysis failed");

    let cents = 1200.0 * (result.query.pitch_median_hz / 220.0).log2();
    assert!(
        cents.abs() < 20.0,
        "Expected ~220 Hz, got {:.2} Hz",
        result.query.pitch_median_hz
    );
}

#[test]
fn test_extraction_is_deterministic() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("click.wav");
    generate_click_track(&path, 100.0, 6.0, 22050);
    let bytes = fs::read(&path).unwrap();

    let engine = empty_engine();
    let first = engine.analyze(&bytes, Some("wav")).unwrap();
    let second = engine.analyze(&bytes, Some("wav")).unwrap();

    assert_eq!(first.query.tempo_bpm.to_bits(), second.query.tempo_bpm.to_bits());
    assert_eq!(
        first.query.pitch_median_hz.to_bits(),
        second.query.pitch_median_hz.to_bits()
    );
    assert_eq!(first.query.fingerprint, second.query.fingerprint);
}

#[test]
fn test_short_clip_is_insufficient() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("blip.wav");
    generate_silence(&path, 0.2, 22050);

    let err = empty_engine()
        .analyze(&fs::read(&path).unwrap(), Some("wav"))
        .unwrap_err();
    assert!(
        matches!(err, TunematchError::InsufficientAudio { .. }),
        "Expected InsufficientAudio, got {:?}",
        err
    );
}

#[test]
fn test_silence_uses_sentinels() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("silence.wav");
    generate_silence(&path, 3.0, 22050);

    let config = test_config();
    let result = empty_engine()
        .analyze(&fs::read(&path).unwrap(), Some("wav"))
        .expect("Silence is valid input");

    assert_eq!(result.query.tempo_bpm, config.analysis.tempo_min_bpm);
    assert_eq!(result.query.pitch_median_hz, 0.0);
}

#[test]
fn test_reference_ranking_scenario() {
    let corpus = CorpusIndex::from_tracks(vec![
        Track::new("TrackB", FeatureSet::new(60.0, 220.0)),
        Track::new("TrackA", FeatureSet::new(120.0, 220.0)),
    ])
    .unwrap();
    let config = EngineConfig::default();
    let ranker = MatchRanker::new(&config.scoring, &config.ranking);

    let result = ranker
        .rank(&FeatureSet::new(118.0, 218.0), &corpus.snapshot())
        .unwrap();

    assert_eq!(result.top_matches[0].track_id, "TrackA");
    assert!(result.top_matches[0].overall_score > 90.0);
    assert!(result.top_matches[0].overall_score > result.top_matches[1].overall_score);
    for m in &result.top_matches {
        for value in [m.tempo_similarity, m.pitch_similarity, m.overall_score] {
            assert!((0.0..=100.0).contains(&value));
        }
    }
}

#[test]
fn test_top_three_of_two_tracks() {
    let corpus = CorpusIndex::from_tracks(vec![
        Track::new("a", FeatureSet::new(100.0, 300.0)),
        Track::new("b", FeatureSet::new(140.0, 150.0)),
    ])
    .unwrap();
    let config = EngineConfig::default();
    let ranker = MatchRanker::new(&config.scoring, &config.ranking);

    let result = ranker
        .rank_top(&FeatureSet::new(120.0, 200.0), &corpus.snapshot(), 3)
        .unwrap();
    assert_eq!(result.top_matches.len(), 2);
}

#[test]
fn test_index_then_analyze() {
    let refs = TempDir::new().expect("Failed to create input temp dir");
    let out = TempDir::new().expect("Failed to create output temp dir");

    generate_sine_wav(&refs.path().join("low.wav"), 110.0, 3.0, 44100);
    generate_sine_wav(&refs.path().join("mid.wav"), 220.0, 3.0, 22050);
    fs::create_dir(refs.path().join("sub")).unwrap();
    generate_click_track(&refs.path().join("sub").join("click.wav"), 120.0, 6.0, 22050);

    let corpus_path = out.path().join("corpus.json");
    let summary = run_index(&index_options(refs.path(), &corpus_path), &test_config())
        .expect("Indexing failed");
    assert_eq!(summary.total_files, 3);
    assert_eq!(summary.successful, 3);
    assert_eq!(summary.failed, 0);

    let tracks = export::read_corpus(&corpus_path).expect("Corpus should load");
    let ids: Vec<_> = tracks.iter().map(|t| t.track_id.as_str()).collect();
    assert_eq!(ids, vec!["low.wav", "mid.wav", "sub/click.wav"]);

    let engine = Engine::new(
        test_config(),
        Arc::new(CorpusIndex::from_tracks(tracks).unwrap()),
    )
    .unwrap();

    let query = out.path().join("query.wav");
    generate_sine_wav(&query, 220.0, 3.0, 22050);
    let response = engine.analyze_response(&fs::read(&query).unwrap(), Some("wav"));

    assert_eq!(response.status, Status::Success);
    assert_eq!(response.top_matches.len(), 3);
    assert_eq!(response.top_matches[0].track_id, "mid.wav");
    assert_eq!(response.top_matches[0].overall_score, 100.0);

    let json = serde_json::to_value(&response).unwrap();
    assert!(json.get("query").and_then(|q| q.get("pitch_median")).is_some());
}

#[test]
fn test_index_empty_directory() {
    let refs = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let corpus_path = out.path().join("corpus.json");

    let summary = run_index(&index_options(refs.path(), &corpus_path), &test_config()).unwrap();
    assert_eq!(summary.total_files, 0);
    assert_eq!(summary.corpus_size, 0);
    assert!(export::read_corpus(&corpus_path).unwrap().is_empty());
}

#[test]
fn test_handles_empty_audio_file() {
    let dir = TempDir::new().unwrap();
    let empty_file = dir.path().join("empty.wav");
    fs::write(&empty_file, b"").expect("Failed to create empty file");

    let engine = empty_engine();
    let err = engine.analyze(&fs::read(&empty_file).unwrap(), Some("wav")).unwrap_err();
    assert!(err.is_input_error(), "Expected an input error, got {:?}", err);

    let summary = run_index(
        &index_options(dir.path(), &dir.path().join("corpus.json")),
        &test_config(),
    )
    .unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
}

#[test]
fn test_handles_invalid_audio_data() {
    let engine = empty_engine();
    let response = engine.analyze_response(b"RIFF garbage that is not a wave file", Some("wav"));
    assert_eq!(response.status, Status::Error);
    assert!(response.message.is_some());
    assert!(response.kind.is_some());

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["status"], "error");
}

#[test]
fn test_separation_returns_every_stem() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bass_line.wav");
    generate_sine_wav(&path, 82.4, 3.0, 44100);

    let stems = empty_engine()
        .separate(&fs::read(&path).unwrap(), Some("wav"))
        .expect("Separation failed");

    let names: Vec<_> = stems.iter().map(|s| s.name).collect();
    assert_eq!(names, StemName::ALL.to_vec());
    for stem in &stems {
        assert_eq!(stem.audio.sample_rate(), 22050);
        assert!((stem.audio.duration() - 3.0).abs() < 0.01);
    }

    // An instrumental still gets a vocals stem, just a quiet one
    let vocals = &stems[StemName::Vocals.index()];
    let bass = &stems[StemName::Bass.index()];
    assert!(bass.energy_ratio > vocals.energy_ratio);
}

#[test]
fn test_separate_and_export_writes_wavs() {
    let input = TempDir::new().unwrap();
    let stems_dir = TempDir::new().unwrap();
    let path = input.path().join("tone.wav");
    generate_sine_wav(&path, 440.0, 2.0, 22050);

    let sink = DirectoryStemSink::new(stems_dir.path(), "stems");
    let response = empty_engine().separate_and_export(&fs::read(&path).unwrap(), Some("wav"), &sink);

    assert_eq!(response.status, Status::Success);
    let names: Vec<_> = response.stems.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["vocals", "drums", "bass", "other"]);

    for stem in &response.stems {
        let relative = stem.url.strip_prefix("stems/").expect("relative url with prefix");
        let file = stems_dir.path().join(relative);
        let reader = hound::WavReader::open(&file).expect("stem should be a valid WAV");
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 22050);
    }
}

#[test]
fn test_separation_of_invalid_input_fails_cleanly() {
    let stems_dir = TempDir::new().unwrap();
    let sink = DirectoryStemSink::new(stems_dir.path(), "stems");
    let engine = empty_engine();

    let response = engine.separate_and_export(b"", Some("wav"), &sink);
    assert_eq!(response.status, Status::Error);
    assert!(response.stems.is_empty());
    assert_eq!(fs::read_dir(stems_dir.path()).unwrap().count(), 0);
    assert_eq!(engine.separations_in_flight(), 0);
}

#[test]
fn test_corpus_publish_is_seen_by_engine() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    generate_sine_wav(&path, 330.0, 2.0, 22050);
    let bytes = fs::read(&path).unwrap();

    let engine = empty_engine();
    assert!(engine.analyze(&bytes, Some("wav")).unwrap().top_matches.is_empty());

    let version = engine
        .corpus()
        .publish(vec![Track::new("ref", FeatureSet::new(120.0, 330.0))])
        .unwrap();
    let result = engine.analyze(&bytes, Some("wav")).unwrap();
    assert_eq!(result.corpus_version, version);
    assert_eq!(result.top_matches.len(), 1);
}
