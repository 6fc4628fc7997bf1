// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-window segmentation and scale resampling.

use std::sync::Arc;

use crate::config::SegmentConfig;
use crate::types::{AudioClip, AudioSegment};

/// Number of samples in one segment window at `sample_rate`.
pub fn segment_len(sample_rate: u32, config: &SegmentConfig) -> usize {
    ((config.seconds * sample_rate as f32).round() as usize).max(1)
}

/// Split a clip into consecutive, non-overlapping windows.
///
/// A trailing partial window survives when it holds at least
/// `min_tail_fraction` of a full window, so a 30 s clip at 3.5 s windows
/// yields 8 full segments plus a 2 s tail.
pub fn segment_clip(track_id: &str, clip: &AudioClip, config: &SegmentConfig) -> Vec<AudioSegment> {
    if clip.samples.is_empty() || clip.sample_rate == 0 {
        return Vec::new();
    }

    let window = segment_len(clip.sample_rate, config);
    let min_tail = ((window as f32) * config.min_tail_fraction).ceil() as usize;
    let mut segments = Vec::with_capacity(clip.samples.len() / window + 1);

    let mut start = 0usize;
    while start < clip.samples.len() {
        let end = (start + window).min(clip.samples.len());
        let len = end - start;
        if len < window && len < min_tail.max(1) {
            break;
        }
        segments.push(AudioSegment {
            track_id: track_id.to_string(),
            segment_index: segments.len(),
            start_offset: start as f32 / clip.sample_rate as f32,
            sample_rate: clip.sample_rate,
            samples: Arc::from(&clip.samples[start..end]),
        });
        start = end;
    }

    segments
}

/// Resample by `scale` with linear interpolation.
///
/// Output sample `i` reads input position `i * scale`, so scales above 1.0
/// raise pitch and shorten the window when played at the original rate.
pub fn resample(samples: &[f32], scale: f32) -> Vec<f32> {
    if samples.is_empty() || scale <= 0.0 {
        return Vec::new();
    }
    if (scale - 1.0).abs() < f32::EPSILON {
        return samples.to_vec();
    }

    let out_len = ((samples.len() as f64) / scale as f64).floor() as usize;
    let last = samples.len() - 1;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * scale as f64;
        let idx = pos.floor() as usize;
        if idx >= last {
            out.push(samples[last]);
            continue;
        }
        let frac = (pos - idx as f64) as f32;
        out.push(samples[idx] * (1.0 - frac) + samples[idx + 1] * frac);
    }
    out
}
