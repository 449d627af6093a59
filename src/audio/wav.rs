//! WAV encoding for exported stems (16-bit PCM, mono)

use crate::error::{Result, TunematchError};
use crate::types::Waveform;
use std::io::{Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

fn spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn write_samples<W: Write + Seek>(
    writer: W,
    samples: &[f32],
    sample_rate: u32,
    path: &Path,
) -> Result<()> {
    let to_export_err = |e: hound::Error| TunematchError::ExportError {
        path: path.to_path_buf(),
        reason: format!("Failed to encode WAV: {}", e),
    };

    let mut writer = hound::WavWriter::new(writer, spec(sample_rate)).map_err(to_export_err)?;
    for &s in samples {
        let v = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer.write_sample(v).map_err(to_export_err)?;
    }
    writer.finalize().map_err(to_export_err)?;
    Ok(())
}

/// Encode mono samples as an in-memory WAV file
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(44 + samples.len() * 2);
    write_samples(
        Cursor::new(&mut bytes),
        samples,
        sample_rate,
        &PathBuf::from("<memory>"),
    )?;
    Ok(bytes)
}

/// Write a waveform to `path`
///
/// Uses atomic write pattern: writes to a temp file first, then renames.
pub fn write_wav(path: &Path, audio: &Waveform) -> Result<()> {
    let temp_path = path.with_extension("wav.tmp");

    let file = std::fs::File::create(&temp_path)
        .map_err(|e| TunematchError::export_error(&temp_path, e))?;

    if let Err(e) = write_samples(
        std::io::BufWriter::new(file),
        audio.samples(),
        audio.sample_rate(),
        path,
    ) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        TunematchError::export_error(path, e)
    })?;

    debug!("Wrote {:.2}s of audio to {}", audio.duration(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header_and_length() {
        let bytes = encode_wav(&[0.0, 0.5, -0.5, 1.0], 22050).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + 4 * 2);
    }

    #[test]
    fn test_write_wav_clamps_and_reads_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stem.wav");
        let wf = Waveform::new(vec![2.0, -2.0, 0.25], 22050);
        write_wav(&path, &wf).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples[0], 32767);
        assert_eq!(samples[1], -32768);
        assert_eq!(samples[2], (0.25f32 * 32767.0) as i16);
        assert!(!path.with_extension("wav.tmp").exists());
    }
}
