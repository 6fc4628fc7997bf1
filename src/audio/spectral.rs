// SPDX-License-Identifier: MIT OR Apache-2.0

//! Frequency-band analysis for transform-aware re-ranking.
//!
//! The analyzer is an optional capability: [`detect_band_analyzer`] is called
//! once when the optimizer is constructed and returns `None` when the crate
//! is built without the `spectral` feature.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(feature = "spectral")]
use crate::audio::fft::PowerSpectrum;

/// Upper edge of the low-frequency band kept by low-pass filtering.
pub const LOW_BAND_HZ: f32 = 2_000.0;
/// Upper edge of the bass band least affected by vocals.
pub const BASS_BAND_HZ: f32 = 200.0;
pub const LOW_ENVELOPE_BINS: usize = 16;
pub const BASS_ENVELOPE_BINS: usize = 8;

/// Per-segment band summary stored next to reference embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandProfile {
    /// Sub-band magnitudes across 0..LOW_BAND_HZ.
    pub low_envelope: Vec<f32>,
    /// Sub-band magnitudes across 0..BASS_BAND_HZ.
    pub bass_envelope: Vec<f32>,
    /// Fraction of energy below LOW_BAND_HZ.
    pub low_ratio: f32,
    /// Fraction of energy below BASS_BAND_HZ.
    pub bass_ratio: f32,
}

pub trait BandAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Band profile of one segment; `None` when the input carries no energy.
    fn profile(&self, samples: &[f32], sample_rate: u32) -> Option<BandProfile>;

    /// Fraction of total energy within `[lo_hz, hi_hz)`.
    fn energy_ratio(&self, samples: &[f32], sample_rate: u32, lo_hz: f32, hi_hz: f32)
        -> Option<f32>;
}

/// FFT-backed analyzer.
#[cfg(feature = "spectral")]
#[derive(Debug, Clone)]
pub struct FftBandAnalyzer {
    fft_size: usize,
}

#[cfg(feature = "spectral")]
impl FftBandAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        Self {
            fft_size: fft_size.next_power_of_two().max(256),
        }
    }
}

#[cfg(feature = "spectral")]
impl BandAnalyzer for FftBandAnalyzer {
    fn name(&self) -> &'static str {
        "fft"
    }

    fn profile(&self, samples: &[f32], sample_rate: u32) -> Option<BandProfile> {
        let spectrum = PowerSpectrum::compute(samples, sample_rate, self.fft_size)?;
        let total = spectrum.total_energy();
        if total <= f32::EPSILON {
            return None;
        }
        let low_hi = LOW_BAND_HZ.min(spectrum.nyquist());
        Some(BandProfile {
            low_envelope: spectrum.linear_envelope(0.0, low_hi, LOW_ENVELOPE_BINS),
            bass_envelope: spectrum.linear_envelope(0.0, BASS_BAND_HZ, BASS_ENVELOPE_BINS),
            low_ratio: spectrum.energy_between(0.0, LOW_BAND_HZ) / total,
            bass_ratio: spectrum.energy_between(0.0, BASS_BAND_HZ) / total,
        })
    }

    fn energy_ratio(
        &self,
        samples: &[f32],
        sample_rate: u32,
        lo_hz: f32,
        hi_hz: f32,
    ) -> Option<f32> {
        let spectrum = PowerSpectrum::compute(samples, sample_rate, self.fft_size)?;
        let total = spectrum.total_energy();
        if total <= f32::EPSILON {
            return None;
        }
        Some(spectrum.energy_between(lo_hz, hi_hz) / total)
    }
}

/// Select the band analyzer available in this build.
pub fn detect_band_analyzer(fft_size: usize) -> Option<Arc<dyn BandAnalyzer>> {
    #[cfg(feature = "spectral")]
    {
        Some(Arc::new(FftBandAnalyzer::new(fft_size)))
    }
    #[cfg(not(feature = "spectral"))]
    {
        let _ = fft_size;
        None
    }
}
