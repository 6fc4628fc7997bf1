// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synthetic audio shared by the integration tests.

#![allow(dead_code)]

use std::f32::consts::PI;

use audiomatch::config::{Config, EmbeddingConfig, PipelineConfig};
use audiomatch::types::AudioClip;

pub const SAMPLE_RATE: u32 = 8_000;
pub const SEGMENT_SECONDS: f32 = 3.5;

/// Small deterministic generator so fixtures never depend on a rand crate.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1))
    }

    pub fn next_f32(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 40) as f32) / ((1u64 << 24) as f32)
    }

    pub fn range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + (hi - lo) * self.next_f32()
    }
}

/// A track whose every segment-length block plays two tones in 150-900 Hz,
/// over faint 2500 Hz and 3200 Hz partials that a low-pass filter removes.
pub fn synthetic_track(seed: u64, seconds: f32) -> AudioClip {
    let mut rng = Lcg::new(seed);
    let total = (seconds * SAMPLE_RATE as f32) as usize;
    let block = (SEGMENT_SECONDS * SAMPLE_RATE as f32) as usize;
    let mut samples = Vec::with_capacity(total);
    let mut tones = (0.0, 0.0);

    for i in 0..total {
        if i % block == 0 {
            tones = (rng.range(150.0, 900.0), rng.range(150.0, 900.0));
        }
        let t = i as f32 / SAMPLE_RATE as f32;
        let value = 0.5 * (2.0 * PI * tones.0 * t).sin()
            + 0.3 * (2.0 * PI * tones.1 * t).sin()
            + 0.075 * (2.0 * PI * 2_500.0 * t).sin()
            + 0.075 * (2.0 * PI * 3_200.0 * t).sin();
        samples.push(value);
    }
    AudioClip::new(SAMPLE_RATE, samples)
}

/// Windowed-sinc FIR low-pass (Hamming, odd tap count), zero-phase aligned.
pub fn low_pass(clip: &AudioClip, cutoff_hz: f32, taps: usize) -> AudioClip {
    let taps = taps | 1;
    let half = (taps / 2) as isize;
    let fc = cutoff_hz / clip.sample_rate as f32;
    let mut kernel: Vec<f32> = (0..taps)
        .map(|n| {
            let m = n as isize - half;
            let sinc = if m == 0 {
                2.0 * fc
            } else {
                (2.0 * PI * fc * m as f32).sin() / (PI * m as f32)
            };
            let window = 0.54 - 0.46 * (2.0 * PI * n as f32 / (taps - 1) as f32).cos();
            sinc * window
        })
        .collect();
    let gain: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= gain;
    }

    let len = clip.samples.len() as isize;
    let samples = (0..len)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(n, k)| {
                    let j = i + n as isize - half;
                    if (0..len).contains(&j) {
                        k * clip.samples[j as usize]
                    } else {
                        0.0
                    }
                })
                .sum()
        })
        .collect();
    AudioClip::new(clip.sample_rate, samples)
}

/// Matcher configuration for 8 kHz fixtures with no query deadline.
pub fn test_config() -> Config {
    Config {
        embedding: EmbeddingConfig {
            sample_rate: SAMPLE_RATE,
            max_hz: 3_800.0,
            ..EmbeddingConfig::default()
        },
        pipeline: PipelineConfig {
            timeout_ms: None,
            workers: 2,
            ..PipelineConfig::default()
        },
        ..Config::default()
    }
}
