// SPDX-License-Identifier: MIT OR Apache-2.0

//! Radix-2 FFT and frame-averaged power spectra.

use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const ZERO: Self = Self::new(0.0, 0.0);

    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    pub fn mag_sq(self) -> f64 {
        self.re.mul_add(self.re, self.im * self.im)
    }
}

impl std::ops::Add for Complex {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl std::ops::Sub for Complex {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl std::ops::Mul for Complex {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.re.mul_add(rhs.re, -(self.im * rhs.im)),
            self.re.mul_add(rhs.im, self.im * rhs.re),
        )
    }
}

/// Hann window coefficients for a frame of `n` samples.
#[must_use]
pub fn hann_window(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / denom).cos()))
        .collect()
}

/// In-place iterative Cooley-Tukey FFT. Lengths that are not a power of two
/// are left untouched.
pub(crate) fn fft_in_place(data: &mut [Complex]) {
    let n = data.len();
    if n <= 1 || !n.is_power_of_two() {
        return;
    }

    let mut j = 0usize;
    for i in 0..n {
        if i < j {
            data.swap(i, j);
        }
        let mut m = n >> 1;
        while m >= 1 && j >= m {
            j -= m;
            m >>= 1;
        }
        j += m;
    }

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let angle = -2.0 * PI / len as f64;
        for start in (0..n).step_by(len) {
            for k in 0..half {
                let tw = Complex::new((angle * k as f64).cos(), (angle * k as f64).sin());
                let u = data[start + k];
                let v = data[start + k + half] * tw;
                data[start + k] = u + v;
                data[start + k + half] = u - v;
            }
        }
        len <<= 1;
    }
}

/// Power spectrum averaged over non-overlapping Hann-windowed frames.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSpectrum {
    pub sample_rate: u32,
    pub fft_size: usize,
    /// `fft_size / 2 + 1` bins from DC to Nyquist.
    pub bins: Vec<f32>,
}

impl PowerSpectrum {
    /// Compute the averaged spectrum; `None` for empty input.
    ///
    /// Input shorter than one frame is zero-padded into a single frame.
    pub fn compute(samples: &[f32], sample_rate: u32, fft_size: usize) -> Option<Self> {
        if samples.is_empty() || sample_rate == 0 || !fft_size.is_power_of_two() {
            return None;
        }

        let window = hann_window(fft_size);
        let frames = (samples.len() / fft_size).max(1);
        let mut bins = vec![0.0f32; fft_size / 2 + 1];
        let mut data = vec![Complex::ZERO; fft_size];

        for frame in 0..frames {
            let start = frame * fft_size;
            for (i, slot) in data.iter_mut().enumerate() {
                let sample = samples.get(start + i).copied().unwrap_or(0.0) as f64;
                *slot = Complex::new(sample * window[i], 0.0);
            }
            fft_in_place(&mut data);
            for (value, point) in bins.iter_mut().zip(&data) {
                *value += point.mag_sq() as f32;
            }
        }

        let norm = frames as f32;
        for value in &mut bins {
            *value /= norm;
        }

        Some(Self {
            sample_rate,
            fft_size,
            bins,
        })
    }

    pub fn bin_hz(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Summed power of bins whose center lies in `[lo_hz, hi_hz)`, DC excluded.
    pub fn energy_between(&self, lo_hz: f32, hi_hz: f32) -> f32 {
        let width = self.bin_hz();
        self.bins
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(idx, _)| {
                let hz = *idx as f32 * width;
                hz >= lo_hz && hz < hi_hz
            })
            .map(|(_, power)| *power)
            .sum()
    }

    /// Total power excluding DC.
    pub fn total_energy(&self) -> f32 {
        self.bins.iter().skip(1).sum()
    }

    /// Magnitudes of `count` equal-width sub-bands covering `[lo_hz, hi_hz)`.
    pub fn linear_envelope(&self, lo_hz: f32, hi_hz: f32, count: usize) -> Vec<f32> {
        if count == 0 || hi_hz <= lo_hz {
            return Vec::new();
        }
        let step = (hi_hz - lo_hz) / count as f32;
        (0..count)
            .map(|band| {
                let lo = lo_hz + band as f32 * step;
                self.energy_between(lo, lo + step).sqrt()
            })
            .collect()
    }

    /// Magnitudes of `count` log-spaced bands covering `[lo_hz, hi_hz)`.
    ///
    /// `hi_hz` is clamped below Nyquist.
    pub fn log_envelope(&self, lo_hz: f32, hi_hz: f32, count: usize) -> Vec<f32> {
        let hi = hi_hz.min(self.nyquist() * 0.98);
        if count == 0 || hi <= lo_hz || lo_hz <= 0.0 {
            return vec![0.0; count];
        }
        let ratio = (hi / lo_hz).powf(1.0 / count as f32);
        (0..count)
            .map(|band| {
                let lo = lo_hz * ratio.powi(band as i32);
                self.energy_between(lo, lo * ratio).sqrt()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn fft_of_impulse_is_flat() {
        let mut data = vec![Complex::ZERO; 8];
        data[0] = Complex::new(1.0, 0.0);
        fft_in_place(&mut data);
        for point in &data {
            assert!((point.re - 1.0).abs() < 1e-9);
            assert!(point.im.abs() < 1e-9);
        }
    }

    #[test]
    fn odd_lengths_are_left_alone() {
        let mut data = vec![Complex::new(1.0, 0.0), Complex::new(2.0, 0.0), Complex::ZERO];
        let before = data.clone();
        fft_in_place(&mut data);
        assert_eq!(data, before);
    }

    #[test]
    fn hann_window_tapers_to_zero() {
        let window = hann_window(9);
        assert!(window[0].abs() < 1e-12);
        assert!((window[4] - 1.0).abs() < 1e-12);
        assert!(window[8].abs() < 1e-12);
        assert_eq!(hann_window(1), vec![1.0]);
    }

    #[test]
    fn tone_energy_lands_in_its_band() {
        let samples = tone(440.0, 8_000, 8_192);
        let spectrum = PowerSpectrum::compute(&samples, 8_000, 1024).expect("spectrum");
        let near = spectrum.energy_between(400.0, 480.0);
        let total = spectrum.total_energy();
        assert!(near / total > 0.95, "ratio {}", near / total);
        assert!(spectrum.energy_between(1_000.0, 4_000.0) / total < 0.01);
    }

    #[test]
    fn short_input_is_zero_padded() {
        let samples = tone(200.0, 8_000, 300);
        let spectrum = PowerSpectrum::compute(&samples, 8_000, 1024).expect("spectrum");
        assert_eq!(spectrum.bins.len(), 513);
        assert!(spectrum.total_energy() > 0.0);
        assert!(PowerSpectrum::compute(&[], 8_000, 1024).is_none());
    }
}
