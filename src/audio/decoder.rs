//! Audio decoding using symphonia
//!
//! Decodes uploaded bytes to mono f32 samples at the canonical sample rate.
//! Uses rubato for high-quality resampling with proper anti-aliasing.

use crate::error::{Result, TunematchError};
use crate::types::Waveform;
use rubato::{FftFixedInOut, Resampler};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

/// Maximum upload size we'll attempt to decode (1GB)
/// Prevents OOM on hostile or accidental huge uploads
const MAX_INPUT_BYTES: usize = 1024 * 1024 * 1024;

/// Decode an in-memory audio file to a mono [`Waveform`] at `sample_rate`
///
/// `hint` is an optional file extension ("wav", "mp3", ...) that speeds up
/// probing; the container is sniffed either way.
pub fn decode_bytes(bytes: &[u8], hint: Option<&str>, sample_rate: u32) -> Result<Waveform> {
    if bytes.is_empty() {
        return Err(TunematchError::unsupported("input is empty"));
    }
    if bytes.len() > MAX_INPUT_BYTES {
        return Err(TunematchError::unsupported(format!(
            "input too large ({:.1} MB). Maximum supported size is 1 GB",
            bytes.len() as f64 / (1024.0 * 1024.0)
        )));
    }

    let source = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut probe_hint = Hint::new();
    if let Some(ext) = hint {
        probe_hint.with_extension(ext);
    }

    // Probe the media source
    let probed = symphonia::default::get_probe()
        .format(&probe_hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| TunematchError::unsupported(format!("failed to probe format: {}", e)))?;

    let mut format = probed.format;

    // Find the first audio track
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| TunematchError::unsupported("no audio tracks found"))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| TunematchError::unsupported(format!("unsupported codec: {}", e)))?;

    let mut source_rate = codec_params.sample_rate;
    let mut all_samples: Vec<f32> = Vec::new();
    let mut decoded_packets = 0usize;
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break; // End of stream
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(TunematchError::corrupt(format!("failed to read packet: {}", e)));
            }
        };

        // Skip packets from other tracks
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Skip corrupted frames
                trace!("Skipping corrupted frame: {}", e);
                skipped_packets += 1;
                continue;
            }
            Err(e) => {
                return Err(TunematchError::corrupt(format!("decode error: {}", e)));
            }
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        source_rate.get_or_insert(spec.rate);

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        all_samples.extend(to_mono(sample_buf.samples(), channels));
        decoded_packets += 1;
    }

    if decoded_packets == 0 && skipped_packets > 0 {
        return Err(TunematchError::corrupt(format!(
            "all {} audio packets failed to decode",
            skipped_packets
        )));
    }
    if all_samples.is_empty() {
        return Err(TunematchError::corrupt("stream contains no audio samples"));
    }

    let source_rate = source_rate
        .filter(|&r| r > 0)
        .ok_or_else(|| TunematchError::corrupt("stream does not declare a sample rate"))?;

    debug!(
        "Decoded {} packets ({} skipped) @ {}Hz",
        decoded_packets, skipped_packets, source_rate
    );

    // Resample to target rate if needed
    let final_samples = if source_rate != sample_rate {
        resample(&all_samples, source_rate, sample_rate)
    } else {
        all_samples
    };

    let waveform = Waveform::new(final_samples, sample_rate);
    debug!(
        "Loaded waveform: {} samples ({:.2}s, peak {:.3})",
        waveform.len(),
        waveform.duration(),
        waveform.peak()
    );

    Ok(waveform)
}

/// Read and decode an audio file, using its extension as the probe hint
pub fn decode_file(path: &Path, sample_rate: u32) -> Result<Waveform> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|e| e.to_str());
    decode_bytes(&bytes, ext, sample_rate)
}

/// Convert interleaved multi-channel audio to mono
fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// High-quality audio resampling using rubato
///
/// FFT-based resampling with an anti-aliasing filter. Fully deterministic:
/// the same input always produces the same output samples.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    const CHUNK_SIZE: usize = 1024;

    let mut resampler = match FftFixedInOut::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_SIZE,
        1, // mono channel
    ) {
        Ok(r) => r,
        Err(e) => {
            debug!("Rubato initialization failed ({}), using fallback", e);
            return resample_linear_fallback(samples, from_rate, to_rate);
        }
    };

    let input_frames_per_chunk = resampler.input_frames_next();
    let output_frames_per_chunk = resampler.output_frames_next();

    let ratio = to_rate as f64 / from_rate as f64;
    let estimated_output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(estimated_output_len);

    let mut pos = 0;
    while pos < samples.len() {
        let end = (pos + input_frames_per_chunk).min(samples.len());
        let mut chunk = samples[pos..end].to_vec();

        // Pad last chunk if needed
        if chunk.len() < input_frames_per_chunk {
            chunk.resize(input_frames_per_chunk, 0.0);
        }

        let input_channels = vec![chunk];

        match resampler.process(&input_channels, None) {
            Ok(resampled) => {
                if let Some(channel) = resampled.first() {
                    // Only take valid samples (not padding)
                    let valid_samples = if pos + input_frames_per_chunk > samples.len() {
                        let input_valid = samples.len() - pos;
                        let output_valid = (input_valid as f64 * ratio).ceil() as usize;
                        output_valid.min(output_frames_per_chunk)
                    } else {
                        output_frames_per_chunk
                    };
                    let safe_samples = valid_samples.min(channel.len());
                    output.extend_from_slice(&channel[..safe_samples]);
                }
            }
            Err(e) => {
                debug!("Rubato processing error ({}), using fallback for remaining", e);
                let remaining = resample_linear_fallback(&samples[pos..], from_rate, to_rate);
                output.extend(remaining);
                break;
            }
        }

        pos += input_frames_per_chunk;
    }

    output
}

/// Fallback linear interpolation resampler
///
/// Used only when rubato fails to initialize or process.
fn resample_linear_fallback(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < samples.len() {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else {
            samples[src_idx.min(samples.len() - 1)]
        };

        output.push(sample);
    }

    output
}
