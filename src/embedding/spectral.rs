// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::audio::fft::PowerSpectrum;
use crate::audio::segment::resample;
use crate::config::EmbeddingConfig;
use crate::errors::EmbedError;
use crate::types::{AudioSegment, EmbeddingVector};
use crate::vector::l2_normalize;

const MODEL_ID: &str = "spectral-bands-v1";

/// Log-spaced band magnitudes of the frame-averaged spectrum, unit length.
#[derive(Debug, Clone)]
pub struct SpectralEmbedder {
    config: EmbeddingConfig,
}

impl SpectralEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }
}

impl Default for SpectralEmbedder {
    fn default() -> Self {
        Self::new(EmbeddingConfig::default())
    }
}

impl super::EmbeddingProvider for SpectralEmbedder {
    fn model_id(&self) -> &str {
        MODEL_ID
    }

    fn config_fingerprint(&self) -> String {
        format!(
            "bands={};frame={};min_hz={};max_hz={}",
            self.config.bands, self.config.frame_size, self.config.min_hz, self.config.max_hz
        )
    }

    fn dimension(&self) -> usize {
        self.config.bands
    }

    fn embed(&self, segment: &AudioSegment, scale: f32) -> Result<EmbeddingVector, EmbedError> {
        if !(0.25..=4.0).contains(&scale) {
            return Err(EmbedError::InvalidScale(scale));
        }

        let samples = resample(&segment.samples, scale);
        if samples.len() < self.config.frame_size / 4 {
            return Err(EmbedError::SegmentTooShort {
                track_id: segment.track_id.clone(),
                segment_index: segment.segment_index,
                samples: samples.len(),
            });
        }

        let spectrum = PowerSpectrum::compute(&samples, segment.sample_rate, self.config.frame_size)
            .ok_or_else(|| EmbedError::Provider("spectrum unavailable".to_string()))?;
        let mut vector =
            spectrum.log_envelope(self.config.min_hz, self.config.max_hz, self.config.bands);
        if !l2_normalize(&mut vector) {
            return Err(EmbedError::Provider(format!(
                "segment {} of '{}' carries no energy in {}-{} Hz",
                segment.segment_index, segment.track_id, self.config.min_hz, self.config.max_hz
            )));
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::vector::cosine;
    use std::sync::Arc;

    fn tone_segment(freqs: &[f32], len: usize) -> AudioSegment {
        let samples: Vec<f32> = (0..len)
            .map(|i| {
                let t = i as f32 / 8_000.0;
                freqs
                    .iter()
                    .map(|f| (2.0 * std::f32::consts::PI * f * t).sin())
                    .sum()
            })
            .collect();
        AudioSegment {
            track_id: "t".to_string(),
            segment_index: 0,
            start_offset: 0.0,
            sample_rate: 8_000,
            samples: Arc::from(samples),
        }
    }

    #[test]
    fn embedding_is_deterministic_and_unit_length() {
        let embedder = SpectralEmbedder::default();
        let segment = tone_segment(&[220.0, 330.0], 16_384);
        let a = embedder.embed(&segment, 1.0).expect("embed");
        let b = embedder.embed(&segment, 1.0).expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), embedder.dimension());
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn different_pitches_are_dissimilar() {
        let embedder = SpectralEmbedder::default();
        let low = embedder
            .embed(&tone_segment(&[180.0], 16_384), 1.0)
            .expect("embed");
        let high = embedder
            .embed(&tone_segment(&[900.0], 16_384), 1.0)
            .expect("embed");
        assert!(cosine(&low, &high) < 0.3);
    }

    #[test]
    fn silence_is_reported_not_zero_filled() {
        let embedder = SpectralEmbedder::default();
        let segment = tone_segment(&[], 4_096);
        assert!(matches!(
            embedder.embed(&segment, 1.0),
            Err(EmbedError::Provider(_))
        ));
    }

    #[test]
    fn scale_shifts_pitch() {
        let embedder = SpectralEmbedder::default();
        // 400 Hz sped up by 1.05 reads as 420 Hz
        let shifted = embedder
            .embed(&tone_segment(&[400.0], 16_384), 1.05)
            .expect("embed");
        let target = embedder
            .embed(&tone_segment(&[420.0], 16_384), 1.0)
            .expect("embed");
        let far = embedder
            .embed(&tone_segment(&[800.0], 16_384), 1.0)
            .expect("embed");
        assert!(cosine(&shifted, &target) > 0.8);
        assert!(cosine(&shifted, &target) > cosine(&shifted, &far));
    }
}
