// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for audiomatch
//!
//! Loads configuration from .audiomatchrc.toml in current directory or
//! ~/.config/audiomatch/config.toml. Every tuned constant of the matcher lives
//! here as a default so it can be adjusted without code changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{MatchError, Result};
use crate::index::IndexKind;
use crate::types::{Severity, TransformKind};

pub const CONFIG_FILE_NAME: &str = ".audiomatchrc.toml";

/// Configuration loaded from .audiomatchrc.toml or ~/.config/audiomatch/config.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub segment: SegmentConfig,
    pub embedding: EmbeddingConfig,
    pub pipeline: PipelineConfig,
    pub topk: TopKConfig,
    pub early_termination: EarlyTerminationConfig,
    pub enforcer: EnforcerConfig,
    pub transform: TransformConfig,
    pub index: IndexConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .audiomatchrc.toml in current directory
    /// 2. ~/.config/audiomatch/config.toml
    pub fn load() -> Self {
        if let Some(config) = Self::load_from_path(&PathBuf::from(CONFIG_FILE_NAME)) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("audiomatch").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str::<Self>(&content) {
            Ok(config) => match config.validate() {
                Ok(()) => Some(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config");
                None
            }
        }
    }

    /// Load an explicitly named config file; errors are not swallowed.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|source| MatchError::io(path, source))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MatchError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.segment.validate()?;
        self.embedding.validate()?;
        self.pipeline.validate()?;
        self.topk.validate()?;
        self.early_termination.validate()?;
        self.enforcer.validate()?;
        self.transform.validate()?;
        self.index.validate()
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MatchError::InvalidConfig(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

fn check_positive(name: &str, value: usize) -> Result<()> {
    if value > 0 {
        Ok(())
    } else {
        Err(MatchError::InvalidConfig(format!("{name} must be > 0")))
    }
}

/// Segmentation granularity. Must match between indexing and querying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub seconds: f32,
    /// A trailing partial window is kept when at least this fraction of a segment.
    pub min_tail_fraction: f32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            seconds: 3.5,
            min_tail_fraction: 0.5,
        }
    }
}

impl SegmentConfig {
    fn validate(&self) -> Result<()> {
        if !(0.25..=60.0).contains(&self.seconds) {
            return Err(MatchError::InvalidConfig(format!(
                "segment.seconds must be within [0.25, 60], got {}",
                self.seconds
            )));
        }
        check_unit("segment.min_tail_fraction", self.min_tail_fraction)
    }
}

/// Parameters of the built-in spectral embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub sample_rate: u32,
    pub bands: usize,
    pub frame_size: usize,
    pub min_hz: f32,
    pub max_hz: f32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            bands: 32,
            frame_size: 1024,
            min_hz: 50.0,
            max_hz: 6_000.0,
        }
    }
}

impl EmbeddingConfig {
    fn validate(&self) -> Result<()> {
        check_positive("embedding.sample_rate", self.sample_rate as usize)?;
        check_positive("embedding.bands", self.bands)?;
        if !self.frame_size.is_power_of_two() || self.frame_size < 64 {
            return Err(MatchError::InvalidConfig(format!(
                "embedding.frame_size must be a power of two >= 64, got {}",
                self.frame_size
            )));
        }
        if self.min_hz <= 0.0 || self.max_hz <= self.min_hz {
            return Err(MatchError::InvalidConfig(
                "embedding band range must satisfy 0 < min_hz < max_hz".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Resampling factors; the first entry is the primary scale.
    pub scales: Vec<f32>,
    /// Worker threads for segment fan-out (0 = available parallelism).
    pub workers: usize,
    /// Advisory per-query deadline.
    pub timeout_ms: Option<u64>,
    pub use_query_cache: bool,
    pub auto_detect_transform: bool,
    pub default_severity: Severity,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scales: vec![1.0, 0.95, 1.05],
            workers: 0,
            timeout_ms: Some(5_000),
            use_query_cache: true,
            auto_detect_transform: true,
            default_severity: Severity::Moderate,
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<()> {
        if self.scales.is_empty() {
            return Err(MatchError::InvalidConfig(
                "pipeline.scales must name at least one scale".to_string(),
            ));
        }
        if let Some(bad) = self.scales.iter().find(|s| !(0.5..=2.0).contains(*s)) {
            return Err(MatchError::InvalidConfig(format!(
                "pipeline.scales entries must be within [0.5, 2.0], got {bad}"
            )));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .clamp(1, 8)
    }
}

/// Adaptive top-k inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopKConfig {
    pub identity: usize,
    pub low_pass: usize,
    pub vocal_overlay: usize,
    pub embedded: usize,
    pub pitch_shift: usize,
    pub time_stretch: usize,
    pub unknown: usize,
    pub mild_factor: f32,
    pub moderate_factor: f32,
    pub severe_factor: f32,
    /// Running confidence above which k starts shrinking.
    pub confidence_threshold: f32,
    pub max_confidence_reduction: f32,
    pub max_k: usize,
}

impl Default for TopKConfig {
    fn default() -> Self {
        Self {
            identity: 10,
            low_pass: 75,
            vocal_overlay: 25,
            embedded: 30,
            pitch_shift: 20,
            time_stretch: 20,
            unknown: 20,
            mild_factor: 1.0,
            moderate_factor: 1.2,
            severe_factor: 1.5,
            confidence_threshold: 0.8,
            max_confidence_reduction: 0.3,
            max_k: 200,
        }
    }
}

impl TopKConfig {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("topk.identity", self.identity),
            ("topk.low_pass", self.low_pass),
            ("topk.vocal_overlay", self.vocal_overlay),
            ("topk.embedded", self.embedded),
            ("topk.pitch_shift", self.pitch_shift),
            ("topk.time_stretch", self.time_stretch),
            ("topk.unknown", self.unknown),
            ("topk.max_k", self.max_k),
        ] {
            check_positive(name, value)?;
        }
        for (name, value) in [
            ("topk.mild_factor", self.mild_factor),
            ("topk.moderate_factor", self.moderate_factor),
            ("topk.severe_factor", self.severe_factor),
        ] {
            if !(1.0..=4.0).contains(&value) {
                return Err(MatchError::InvalidConfig(format!(
                    "{name} must be within [1, 4], got {value}"
                )));
            }
        }
        check_unit("topk.confidence_threshold", self.confidence_threshold)?;
        check_unit("topk.max_confidence_reduction", self.max_confidence_reduction)
    }

    pub fn base_for(&self, kind: TransformKind) -> usize {
        match kind {
            TransformKind::Identity => self.identity,
            TransformKind::LowPass => self.low_pass,
            TransformKind::VocalOverlay => self.vocal_overlay,
            TransformKind::Embedded => self.embedded,
            TransformKind::PitchShift => self.pitch_shift,
            TransformKind::TimeStretch => self.time_stretch,
            TransformKind::Unknown => self.unknown,
        }
    }

    pub fn severity_factor(&self, severity: Severity) -> f32 {
        match severity {
            Severity::Mild => self.mild_factor,
            Severity::Moderate => self.moderate_factor,
            Severity::Severe => self.severe_factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyTerminationConfig {
    pub enabled: bool,
    /// Fraction of segments that must agree on the top-1 track.
    pub agreement_fraction: f32,
    /// Mean top-1 similarity required together with agreement.
    pub agreement_similarity: f32,
    /// Mean top-1 similarity that stops on its own.
    pub high_similarity: f32,
}

impl Default for EarlyTerminationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            agreement_fraction: 0.8,
            agreement_similarity: 0.90,
            high_similarity: 0.95,
        }
    }
}

impl EarlyTerminationConfig {
    fn validate(&self) -> Result<()> {
        check_unit("early_termination.agreement_fraction", self.agreement_fraction)?;
        check_unit(
            "early_termination.agreement_similarity",
            self.agreement_similarity,
        )?;
        check_unit("early_termination.high_similarity", self.high_similarity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcerConfig {
    pub mild_floor: f32,
    pub moderate_floor: f32,
    pub severe_floor: f32,
    pub revalidate: bool,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            mild_floor: 0.95,
            moderate_floor: 0.90,
            severe_floor: 0.85,
            revalidate: true,
        }
    }
}

impl EnforcerConfig {
    fn validate(&self) -> Result<()> {
        check_unit("enforcer.mild_floor", self.mild_floor)?;
        check_unit("enforcer.moderate_floor", self.moderate_floor)?;
        check_unit("enforcer.severe_floor", self.severe_floor)
    }

    pub fn floor(&self, severity: Severity) -> f32 {
        match severity {
            Severity::Mild => self.mild_floor,
            Severity::Moderate => self.moderate_floor,
            Severity::Severe => self.severe_floor,
        }
    }
}

/// Transform-specific re-ranking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub low_pass_vector_weight: f32,
    pub low_pass_k_min: usize,
    pub low_pass_k_max: usize,
    pub vocal_vector_weight: f32,
    pub vocal_k_min: usize,
    pub vocal_k_max: usize,
    pub embedded_k_min: usize,
    /// Relative boost for hits on the caller's expected original.
    pub expected_boost: f32,
    /// Confidence gained per additional consecutive segment.
    pub temporal_step: f32,
    pub temporal_max: f32,
    /// Energy above this frequency marks audio as unfiltered.
    pub detect_cutoff_hz: f32,
    pub detect_high_ratio: f32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            low_pass_vector_weight: 0.6,
            low_pass_k_min: 50,
            low_pass_k_max: 100,
            vocal_vector_weight: 0.7,
            vocal_k_min: 20,
            vocal_k_max: 30,
            embedded_k_min: 30,
            expected_boost: 0.1,
            temporal_step: 0.1,
            temporal_max: 0.3,
            detect_cutoff_hz: 2_500.0,
            detect_high_ratio: 0.002,
        }
    }
}

impl TransformConfig {
    fn validate(&self) -> Result<()> {
        check_unit(
            "transform.low_pass_vector_weight",
            self.low_pass_vector_weight,
        )?;
        check_unit("transform.vocal_vector_weight", self.vocal_vector_weight)?;
        check_unit("transform.expected_boost", self.expected_boost)?;
        check_unit("transform.temporal_step", self.temporal_step)?;
        check_unit("transform.temporal_max", self.temporal_max)?;
        check_unit("transform.detect_high_ratio", self.detect_high_ratio)?;
        if self.low_pass_k_min > self.low_pass_k_max || self.vocal_k_min > self.vocal_k_max {
            return Err(MatchError::InvalidConfig(
                "transform top-k ranges must satisfy min <= max".to_string(),
            ));
        }
        check_positive("transform.embedded_k_min", self.embedded_k_min)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub kind: IndexKind,
    /// `auto` switches to IVF at this many vectors.
    pub ivf_min_vectors: usize,
    /// IVF partitions (0 = sqrt of the vector count).
    pub nlist: usize,
    pub nprobe: usize,
    pub kmeans_iterations: usize,
    /// Flat scans go parallel above this many vectors.
    pub parallel_threshold: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::Auto,
            ivf_min_vectors: 4_096,
            nlist: 0,
            nprobe: 8,
            kmeans_iterations: 12,
            parallel_threshold: 8_192,
        }
    }
}

impl IndexConfig {
    fn validate(&self) -> Result<()> {
        check_positive("index.nprobe", self.nprobe)?;
        check_positive("index.kmeans_iterations", self.kmeans_iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_validate() {
        Config::default().validate().expect("defaults are valid");
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[pipeline]\nscales = [1.0]\n\n[enforcer]\nsevere_floor = 0.8\n",
        )
        .expect("write");
        let config = Config::load_file(&path).expect("load");
        assert_eq!(config.pipeline.scales, vec![1.0]);
        assert_eq!(config.enforcer.severe_floor, 0.8);
        assert_eq!(config.enforcer.mild_floor, 0.95);
        assert_eq!(config.segment.seconds, 3.5);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[enforcer]\nmild_floor = 1.5\n").expect("write");
        let err = Config::load_file(&path).expect_err("invalid floor");
        assert!(matches!(err, MatchError::InvalidConfig(_)));
    }

    #[test]
    fn severity_factors_follow_defaults() {
        let topk = TopKConfig::default();
        assert_eq!(topk.severity_factor(Severity::Mild), 1.0);
        assert_eq!(topk.severity_factor(Severity::Moderate), 1.2);
        assert_eq!(topk.severity_factor(Severity::Severe), 1.5);
        assert!(topk.base_for(TransformKind::LowPass) > topk.base_for(TransformKind::Identity));
    }
}
