// SPDX-License-Identifier: MIT OR Apache-2.0

//! Audio handling - segmentation, spectra and raw PCM input

pub mod fft;
pub mod pcm;
pub mod segment;
pub mod spectral;

pub use segment::{resample, segment_clip};
pub use spectral::{detect_band_analyzer, BandAnalyzer, BandProfile};
