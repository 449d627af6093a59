//! Audio chunking with overlap-add for stem separation
//!
//! Long recordings are separated in fixed-length chunks so memory stays
//! bounded and the deadline is checked between chunks. Chunks overlap and
//! are blended back with linear crossfades; the crossfade weights are
//! normalized, so the stems of a chunk set still sum to the input.

use crate::types::StemName;

/// Configuration for audio chunking
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Maximum samples per chunk
    pub chunk_samples: usize,
    /// Overlap samples between chunks
    pub overlap_samples: usize,
}

impl ChunkConfig {
    /// Create config from durations at a given sample rate
    pub fn new(chunk_seconds: f64, overlap_seconds: f64, sample_rate: u32) -> Self {
        let chunk_samples = ((chunk_seconds * sample_rate as f64) as usize).max(1);
        let overlap_samples = ((overlap_seconds * sample_rate as f64) as usize).min(chunk_samples / 2);
        Self {
            chunk_samples,
            overlap_samples,
        }
    }

    /// Calculate stride (hop) between chunk starts
    pub fn stride(&self) -> usize {
        self.chunk_samples.saturating_sub(self.overlap_samples).max(1)
    }
}

/// A single audio chunk ready for processing
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Chunk index (0-based)
    pub index: usize,
    /// Start sample in original audio
    pub start_sample: usize,
    /// End sample in original audio
    pub end_sample: usize,
    pub samples: Vec<f32>,
}

/// Separated stems for a single chunk, indexed by [`StemName::index`]
#[derive(Debug, Clone)]
pub struct StemChunk {
    pub index: usize,
    pub start_sample: usize,
    pub stems: [Vec<f32>; 4],
}

/// Split audio into overlapping chunks
pub fn chunk_audio(samples: &[f32], config: &ChunkConfig) -> Vec<AudioChunk> {
    let total_samples = samples.len();

    if total_samples <= config.chunk_samples {
        return vec![AudioChunk {
            index: 0,
            start_sample: 0,
            end_sample: total_samples,
            samples: samples.to_vec(),
        }];
    }

    let stride = config.stride();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total_samples {
        let end = (start + config.chunk_samples).min(total_samples);
        chunks.push(AudioChunk {
            index: chunks.len(),
            start_sample: start,
            end_sample: end,
            samples: samples[start..end].to_vec(),
        });

        if end == total_samples {
            break;
        }
        start += stride;
    }

    chunks
}

/// Reassemble separated stem chunks using overlap-add with linear crossfade
pub fn overlap_add(chunks: &[StemChunk], config: &ChunkConfig, total_samples: usize) -> [Vec<f32>; 4] {
    let mut out: [Vec<f32>; 4] = std::array::from_fn(|_| vec![0.0f32; total_samples]);
    let mut weight_sum = vec![0.0f32; total_samples];

    for chunk in chunks {
        let chunk_len = chunk.stems[0].len();
        let weights = generate_crossfade_weights(
            chunk_len,
            config.overlap_samples,
            chunk.index == 0,
            chunk.index + 1 == chunks.len(),
        );

        for (i, &w) in weights.iter().enumerate() {
            let out_idx = chunk.start_sample + i;
            if out_idx >= total_samples {
                break;
            }
            for stem in StemName::ALL {
                out[stem.index()][out_idx] += chunk.stems[stem.index()][i] * w;
            }
            weight_sum[out_idx] += w;
        }
    }

    for (i, &ws) in weight_sum.iter().enumerate() {
        if ws > 1e-8 {
            let inv_w = 1.0 / ws;
            for stem in out.iter_mut() {
                stem[i] *= inv_w;
            }
        }
    }

    out
}

/// Linear fade-in/out weights for one chunk
fn generate_crossfade_weights(
    chunk_len: usize,
    overlap: usize,
    is_first: bool,
    is_last: bool,
) -> Vec<f32> {
    let mut weights = vec![1.0f32; chunk_len];
    let fade_len = overlap.min(chunk_len);
    if fade_len == 0 {
        return weights;
    }

    if !is_first {
        // Start slightly above zero so a lone fade-in sample still carries weight
        for (i, weight) in weights.iter_mut().take(fade_len).enumerate() {
            *weight = (i + 1) as f32 / (fade_len + 1) as f32;
        }
    }

    if !is_last {
        let start = chunk_len - fade_len;
        for (i, weight) in weights[start..].iter_mut().enumerate() {
            *weight *= (fade_len - i) as f32 / (fade_len + 1) as f32;
        }
    }

    weights
}
