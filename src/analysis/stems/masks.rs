//! Time-frequency masks for the four stems
//!
//! Separation is median-filter HPSS extended with frequency priors:
//!
//! - **drums**: the percussive estimate (vertical median across bins)
//! - **bass**: the harmonic estimate below [`MaskParams::bass_cutoff_hz`],
//!   rolled off linearly up to [`MaskParams::bass_rolloff_hz`]
//! - **vocals**: harmonic energy that deviates from a long (about one
//!   second) horizontal median, restricted to the vocal band; sustained
//!   accompaniment is absorbed by the long median, melodic lines are not
//! - **other**: what is left of the harmonic estimate
//!
//! Estimates become Wiener soft masks. `other` receives `1 - sum` of the
//! three others, so the masks add up to exactly 1 in every bin and the
//! stems sum back to the mix.

use crate::analysis::stems::SeparationControl;
use crate::analysis::stft::bin_frequency;
use crate::error::Result;
use crate::types::StemName;

/// Frames between deadline checks inside the filters
const CHECK_INTERVAL: usize = 32;

/// Median filter and band prior parameters
#[derive(Debug, Clone, Copy)]
pub struct MaskParams {
    /// Horizontal (time) median width in frames
    pub harmonic_width: usize,
    /// Vertical (frequency) median width in bins
    pub percussive_width: usize,
    /// Long horizontal median width in frames for the vocal foreground
    pub foreground_width: usize,
    pub bass_cutoff_hz: f32,
    pub bass_rolloff_hz: f32,
    pub vocal_low_hz: f32,
    pub vocal_high_hz: f32,
}

impl MaskParams {
    /// Defaults for a given hop; the foreground median spans about one second
    pub fn for_hop(hop: usize, sample_rate: u32) -> Self {
        let frames_per_second = sample_rate as usize / hop.max(1);
        Self {
            harmonic_width: 17,
            percussive_width: 17,
            foreground_width: (frames_per_second | 1).max(3),
            bass_cutoff_hz: 150.0,
            bass_rolloff_hz: 300.0,
            vocal_low_hz: 180.0,
            vocal_high_hz: 4000.0,
        }
    }
}

/// Soft masks `[stem][frame][bin]`, indexed by [`StemName::index`]
pub type StemMasks = [Vec<Vec<f32>>; 4];

/// Compute the four stem masks from a magnitude spectrogram
pub fn compute_masks(
    mags: &[Vec<f32>],
    nfft: usize,
    sample_rate: u32,
    params: &MaskParams,
    control: &SeparationControl,
) -> Result<StemMasks> {
    let num_frames = mags.len();
    let num_bins = mags.first().map_or(0, |f| f.len());

    let harmonic = median_filter_horizontal(mags, params.harmonic_width, control)?;
    control.checkpoint()?;
    let percussive = median_filter_vertical(mags, params.percussive_width, control)?;
    control.checkpoint()?;
    let background = median_filter_horizontal(&harmonic, params.foreground_width, control)?;
    control.checkpoint()?;

    let bass_gain: Vec<f32> = (0..num_bins)
        .map(|bin| bass_weight(bin_frequency(bin, nfft, sample_rate), params))
        .collect();
    let vocal_gain: Vec<f32> = (0..num_bins)
        .map(|bin| {
            let f = bin_frequency(bin, nfft, sample_rate);
            if f >= params.vocal_low_hz && f <= params.vocal_high_hz {
                1.0
            } else {
                0.0
            }
        })
        .collect();

    let eps = 1e-10f32;
    let mut masks: StemMasks = std::array::from_fn(|_| Vec::with_capacity(num_frames));

    for frame in 0..num_frames {
        if frame % CHECK_INTERVAL == 0 {
            control.checkpoint()?;
        }
        let mut rows: [Vec<f32>; 4] = std::array::from_fn(|_| Vec::with_capacity(num_bins));

        for bin in 0..num_bins {
            let h = harmonic[frame][bin];
            let p = percussive[frame][bin];
            let foreground = (h - background[frame][bin]).max(0.0);

            let vocals = foreground * vocal_gain[bin];
            let bass = h * bass_gain[bin];
            let drums = p;
            let other = (h - vocals - bass).max(0.0);

            let v2 = vocals * vocals;
            let d2 = drums * drums;
            let b2 = bass * bass;
            let denom = v2 + d2 + b2 + other * other + eps;

            let vm = v2 / denom;
            let dm = d2 / denom;
            let bm = b2 / denom;
            let om = (1.0 - vm - dm - bm).max(0.0);

            rows[StemName::Vocals.index()].push(vm);
            rows[StemName::Drums.index()].push(dm);
            rows[StemName::Bass.index()].push(bm);
            rows[StemName::Other.index()].push(om);
        }

        for (mask, row) in masks.iter_mut().zip(rows) {
            mask.push(row);
        }
    }

    Ok(masks)
}

/// 1 below the cutoff, linear ramp to 0 at the rolloff frequency
fn bass_weight(freq: f32, params: &MaskParams) -> f32 {
    if freq <= params.bass_cutoff_hz {
        1.0
    } else if freq >= params.bass_rolloff_hz {
        0.0
    } else {
        (params.bass_rolloff_hz - freq) / (params.bass_rolloff_hz - params.bass_cutoff_hz)
    }
}

/// Median of `values`, reordering them in place
fn median_in_place(values: &mut [f32]) -> f32 {
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Median across time for each bin; enhances temporally stable components
pub fn median_filter_horizontal(
    mags: &[Vec<f32>],
    width: usize,
    control: &SeparationControl,
) -> Result<Vec<Vec<f32>>> {
    let num_frames = mags.len();
    if num_frames == 0 {
        return Ok(vec![]);
    }
    let num_bins = mags[0].len();
    let half = width / 2;
    let mut result: Vec<Vec<f32>> = Vec::with_capacity(num_frames);
    let mut scratch = Vec::with_capacity(width);

    for frame_idx in 0..num_frames {
        if frame_idx % CHECK_INTERVAL == 0 {
            control.checkpoint()?;
        }
        let start = frame_idx.saturating_sub(half);
        let end = (frame_idx + half + 1).min(num_frames);

        let mut row = Vec::with_capacity(num_bins);
        for bin in 0..num_bins {
            scratch.clear();
            scratch.extend(mags[start..end].iter().map(|frame| frame[bin]));
            row.push(median_in_place(&mut scratch));
        }
        result.push(row);
    }

    Ok(result)
}

/// Median across frequency for each frame; enhances broadband transients
pub fn median_filter_vertical(
    mags: &[Vec<f32>],
    width: usize,
    control: &SeparationControl,
) -> Result<Vec<Vec<f32>>> {
    let half = width / 2;
    let mut result = Vec::with_capacity(mags.len());
    let mut scratch = Vec::with_capacity(width);

    for (frame_idx, frame) in mags.iter().enumerate() {
        if frame_idx % CHECK_INTERVAL == 0 {
            control.checkpoint()?;
        }
        let num_bins = frame.len();
        let mut row = Vec::with_capacity(num_bins);
        for bin in 0..num_bins {
            let start = bin.saturating_sub(half);
            let end = (bin + half + 1).min(num_bins);
            scratch.clear();
            scratch.extend_from_slice(&frame[start..end]);
            row.push(median_in_place(&mut scratch));
        }
        result.push(row);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::stems::CancelFlag;
    use crate::error::TunematchError;
    use std::time::Duration;

    fn params() -> MaskParams {
        MaskParams::for_hop(512, 22050)
    }

    #[test]
    fn test_masks_sum_to_one() {
        let mags: Vec<Vec<f32>> = (0..40)
            .map(|t| (0..65).map(|b| ((t * 7 + b * 13) % 11) as f32 * 0.1).collect())
            .collect();
        let masks = compute_masks(&mags, 128, 22050, &params(), &SeparationControl::unbounded()).unwrap();
        for t in 0..40 {
            for b in 0..65 {
                let sum: f32 = masks.iter().map(|m| m[t][b]).sum();
                assert!((sum - 1.0).abs() < 1e-5, "frame {} bin {} sum {}", t, b, sum);
                assert!(masks.iter().all(|m| m[t][b] >= 0.0));
            }
        }
    }

    #[test]
    fn test_silent_bins_go_to_other() {
        let mags = vec![vec![0.0f32; 33]; 10];
        let masks = compute_masks(&mags, 64, 22050, &params(), &SeparationControl::unbounded()).unwrap();
        assert!(masks[StemName::Other.index()].iter().flatten().all(|&m| m == 1.0));
    }

    #[test]
    fn test_steady_low_tone_goes_to_bass() {
        // 1025 bins at nfft 2048, bin 5 ~ 54 Hz
        let mags: Vec<Vec<f32>> = (0..30)
            .map(|_| {
                let mut frame = vec![0.0f32; 1025];
                frame[5] = 10.0;
                frame
            })
            .collect();
        let masks = compute_masks(&mags, 2048, 22050, &params(), &SeparationControl::unbounded()).unwrap();
        assert!(masks[StemName::Bass.index()][15][5] > 0.9);
    }

    #[test]
    fn test_cancel_stops_filtering() {
        let flag = CancelFlag::new();
        flag.cancel();
        let control = SeparationControl::start(Duration::from_secs(60), flag);
        let mags = vec![vec![1.0f32; 33]; 10];
        let err = compute_masks(&mags, 64, 22050, &params(), &control).unwrap_err();
        assert!(matches!(err, TunematchError::Cancelled));
    }

    #[test]
    fn test_bass_weight_ramp() {
        let p = params();
        assert_eq!(bass_weight(100.0, &p), 1.0);
        assert!((bass_weight(225.0, &p) - 0.5).abs() < 1e-6);
        assert_eq!(bass_weight(400.0, &p), 0.0);
    }

    #[test]
    fn test_median_filters() {
        let mags = vec![vec![1.0, 9.0, 1.0], vec![1.0, 1.0, 1.0], vec![1.0, 9.0, 1.0]];
        let control = SeparationControl::unbounded();
        let h = median_filter_horizontal(&mags, 3, &control).unwrap();
        assert_eq!(h[1][1], 9.0);
        let v = median_filter_vertical(&mags, 3, &control).unwrap();
        assert_eq!(v[0][1], 1.0);
    }
}
