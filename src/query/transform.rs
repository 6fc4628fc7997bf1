// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transform-aware search strategies
//!
//! Known distortions get a specialized search: a deeper candidate pool
//! re-ranked by the frequency bands the distortion leaves intact. The band
//! analyzer is optional; without it every strategy degrades to plain search.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::context::QueryContext;
use crate::audio::{detect_band_analyzer, BandAnalyzer, BandProfile};
use crate::config::TransformConfig;
use crate::errors::Result;
use crate::index::FingerprintIndex;
use crate::types::{AudioClip, Severity, TransformKind, Vote};
use crate::vector::cosine;

/// Below this frequency, a missing high band marks a severe low-pass.
const SEVERE_CUTOFF_HZ: f32 = 1_000.0;
const MODERATE_CUTOFF_HZ: f32 = 1_800.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Plain,
    LowPassReweight,
    VocalBassReweight,
    EmbeddedDeep,
}

impl SearchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::LowPassReweight => "low_pass_reweight",
            Self::VocalBassReweight => "vocal_bass_reweight",
            Self::EmbeddedDeep => "embedded_deep",
        }
    }
}

/// Query-side view of one segment.
#[derive(Debug, Clone, Copy)]
pub struct Probe<'a> {
    pub vector: &'a [f32],
    pub profile: Option<&'a BandProfile>,
}

/// One index hit with its plain and re-weighted score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub vector_id: usize,
    pub track_id: String,
    /// Segment of the reference track the hit belongs to.
    pub segment_index: usize,
    pub raw_similarity: f32,
    pub score: f32,
}

impl RankedHit {
    pub fn is_reweighted(&self) -> bool {
        (self.score - self.raw_similarity).abs() > f32::EPSILON
    }
}

pub struct TransformOptimizer {
    config: TransformConfig,
    analyzer: Option<Arc<dyn BandAnalyzer>>,
}

impl TransformOptimizer {
    pub fn new(config: TransformConfig, analyzer: Option<Arc<dyn BandAnalyzer>>) -> Self {
        if analyzer.is_none() {
            tracing::debug!("no band analyzer available; transform re-weighting disabled");
        }
        Self { config, analyzer }
    }

    /// Use whichever band analyzer this build provides.
    pub fn with_detected_analyzer(config: TransformConfig, fft_size: usize) -> Self {
        Self::new(config, detect_band_analyzer(fft_size))
    }

    pub fn has_analyzer(&self) -> bool {
        self.analyzer.is_some()
    }

    pub fn should_apply(&self, transform: TransformKind, _severity: Severity) -> bool {
        matches!(
            transform,
            TransformKind::LowPass | TransformKind::VocalOverlay | TransformKind::Embedded
        )
    }

    pub fn strategy(&self, transform: TransformKind, severity: Severity) -> SearchStrategy {
        if !self.should_apply(transform, severity) {
            return SearchStrategy::Plain;
        }
        match transform {
            TransformKind::LowPass if self.has_analyzer() => SearchStrategy::LowPassReweight,
            TransformKind::VocalOverlay if self.has_analyzer() => SearchStrategy::VocalBassReweight,
            TransformKind::Embedded => SearchStrategy::EmbeddedDeep,
            _ => SearchStrategy::Plain,
        }
    }

    /// Candidate pool size for `strategy`, given the adaptive `k`.
    pub fn top_k(&self, strategy: SearchStrategy, k: usize) -> usize {
        match strategy {
            SearchStrategy::Plain => k,
            SearchStrategy::LowPassReweight => {
                k.clamp(self.config.low_pass_k_min, self.config.low_pass_k_max)
            }
            SearchStrategy::VocalBassReweight => {
                k.clamp(self.config.vocal_k_min, self.config.vocal_k_max)
            }
            SearchStrategy::EmbeddedDeep => k.max(self.config.embedded_k_min),
        }
    }

    /// Band profile of a segment, when an analyzer is available.
    pub fn profile(&self, samples: &[f32], sample_rate: u32) -> Option<BandProfile> {
        self.analyzer
            .as_ref()
            .and_then(|analyzer| analyzer.profile(samples, sample_rate))
    }

    /// Search with the strategy for the context's transform.
    ///
    /// Hits are ordered by descending score, ties by vector id.
    pub fn apply(
        &self,
        ctx: &QueryContext,
        index: &FingerprintIndex,
        probe: &Probe<'_>,
        k: usize,
    ) -> Result<Vec<RankedHit>> {
        let strategy = self.strategy(ctx.transform, ctx.severity);
        let pool = self.top_k(strategy, k);
        let mut hits: Vec<RankedHit> = index
            .search(probe.vector, pool)?
            .into_iter()
            .filter_map(|hit| {
                let entry = index.entry(hit.vector_id)?;
                Some(RankedHit {
                    vector_id: hit.vector_id,
                    track_id: entry.track_id.clone(),
                    segment_index: entry.segment_index,
                    raw_similarity: hit.similarity,
                    score: hit.similarity,
                })
            })
            .collect();

        match strategy {
            SearchStrategy::Plain => return Ok(hits),
            SearchStrategy::LowPassReweight => {
                let weight = self.config.low_pass_vector_weight;
                self.reweight(index, probe, &mut hits, |profile| &profile.low_envelope, weight);
            }
            SearchStrategy::VocalBassReweight => {
                let weight = self.config.vocal_vector_weight;
                self.reweight(index, probe, &mut hits, |profile| &profile.bass_envelope, weight);
            }
            SearchStrategy::EmbeddedDeep => {
                if let Some(expected) = ctx.expected_track_id.as_deref() {
                    for hit in hits.iter_mut().filter(|hit| hit.track_id == expected) {
                        hit.score = (hit.raw_similarity * (1.0 + self.config.expected_boost)).min(1.0);
                    }
                }
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.vector_id.cmp(&b.vector_id))
        });
        Ok(hits)
    }

    fn reweight(
        &self,
        index: &FingerprintIndex,
        probe: &Probe<'_>,
        hits: &mut [RankedHit],
        band: impl Fn(&BandProfile) -> &Vec<f32>,
        vector_weight: f32,
    ) {
        let Some(query_profile) = probe.profile else {
            return;
        };
        for hit in hits.iter_mut() {
            let Some(reference) = index
                .entry(hit.vector_id)
                .and_then(|entry| entry.profile.as_ref())
            else {
                continue;
            };
            let band_similarity = cosine(band(query_profile), band(reference)).max(0.0);
            hit.score =
                vector_weight * hit.raw_similarity + (1.0 - vector_weight) * band_similarity;
        }
    }

    /// Reinforce votes that sit in runs of consecutive query segments.
    ///
    /// A vote in a run of `n` segments for the same track closes
    /// `min(step * (n - 1), max)` of its remaining gap to 1.0.
    pub fn temporal_reinforce(&self, votes: &mut [Vote]) {
        let mut segments: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        for vote in votes.iter() {
            segments
                .entry(vote.track_id.clone())
                .or_default()
                .insert(vote.query_segment);
        }

        for vote in votes.iter_mut() {
            let Some(voted) = segments.get(&vote.track_id) else {
                continue;
            };
            let run = run_length(voted, vote.query_segment);
            let bonus = (self.config.temporal_step * (run.saturating_sub(1)) as f32)
                .min(self.config.temporal_max);
            vote.score += (1.0 - vote.score) * bonus;
        }
    }

    /// Guess a transform from the audio itself.
    ///
    /// Only low-pass filtering is detectable: almost no energy above the
    /// detection cutoff. Severity follows how low the content stops.
    pub fn detect(&self, clip: &AudioClip) -> Option<(TransformKind, Severity)> {
        let analyzer = self.analyzer.as_ref()?;
        if clip.sample_rate as f32 / 2.0 <= self.config.detect_cutoff_hz {
            return None;
        }
        let above = |cutoff: f32| {
            analyzer.energy_ratio(&clip.samples, clip.sample_rate, cutoff, f32::INFINITY)
        };

        let high = above(self.config.detect_cutoff_hz)?;
        if high >= self.config.detect_high_ratio {
            return None;
        }
        let threshold = self.config.detect_high_ratio;
        let severity = if above(SEVERE_CUTOFF_HZ).is_some_and(|ratio| ratio < threshold) {
            Severity::Severe
        } else if above(MODERATE_CUTOFF_HZ).is_some_and(|ratio| ratio < threshold) {
            Severity::Moderate
        } else {
            Severity::Mild
        };
        tracing::debug!(high_ratio = high, %severity, "detected low-pass query");
        Some((TransformKind::LowPass, severity))
    }
}

fn run_length(voted: &BTreeSet<usize>, segment: usize) -> usize {
    let mut run = 1;
    let mut cursor = segment;
    while cursor > 0 && voted.contains(&(cursor - 1)) {
        run += 1;
        cursor -= 1;
    }
    cursor = segment;
    while voted.contains(&(cursor + 1)) {
        run += 1;
        cursor += 1;
    }
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::index::{IndexEntry, IndexKind};

    fn optimizer(analyzer: bool) -> TransformOptimizer {
        if analyzer {
            TransformOptimizer::with_detected_analyzer(TransformConfig::default(), 1024)
        } else {
            TransformOptimizer::new(TransformConfig::default(), None)
        }
    }

    fn profile(low: Vec<f32>, bass: Vec<f32>) -> BandProfile {
        BandProfile {
            low_envelope: low,
            bass_envelope: bass,
            low_ratio: 1.0,
            bass_ratio: 0.5,
        }
    }

    fn index() -> FingerprintIndex {
        let items = vec![
            (
                IndexEntry {
                    track_id: "close-vector".to_string(),
                    segment_index: 0,
                    profile: Some(profile(vec![0.0, 1.0], vec![0.0, 1.0])),
                },
                vec![1.0, 0.0],
            ),
            (
                IndexEntry {
                    track_id: "close-bands".to_string(),
                    segment_index: 0,
                    profile: Some(profile(vec![1.0, 0.0], vec![1.0, 0.0])),
                },
                vec![0.9, 0.436],
            ),
        ];
        FingerprintIndex::build(
            items,
            &IndexConfig {
                kind: IndexKind::Flat,
                ..IndexConfig::default()
            },
        )
        .expect("build")
    }

    fn ctx(transform: TransformKind, expected: Option<&str>) -> QueryContext {
        QueryContext::new(
            transform,
            Severity::Moderate,
            expected.map(str::to_string),
            None,
        )
    }

    #[test]
    fn top_k_is_clamped_per_strategy() {
        let optimizer = optimizer(true);
        assert_eq!(optimizer.top_k(SearchStrategy::LowPassReweight, 10), 50);
        assert_eq!(optimizer.top_k(SearchStrategy::LowPassReweight, 500), 100);
        assert_eq!(optimizer.top_k(SearchStrategy::VocalBassReweight, 90), 30);
        assert_eq!(optimizer.top_k(SearchStrategy::EmbeddedDeep, 12), 30);
        assert_eq!(optimizer.top_k(SearchStrategy::Plain, 12), 12);
    }

    #[test]
    fn should_apply_only_to_known_transforms() {
        let optimizer = optimizer(true);
        assert!(optimizer.should_apply(TransformKind::LowPass, Severity::Mild));
        assert!(optimizer.should_apply(TransformKind::Embedded, Severity::Severe));
        assert!(!optimizer.should_apply(TransformKind::PitchShift, Severity::Mild));
        assert!(!optimizer.should_apply(TransformKind::Identity, Severity::Mild));
    }

    #[test]
    fn low_pass_reweighting_can_reorder() {
        let optimizer = optimizer(true);
        let index = index();
        let query_profile = profile(vec![1.0, 0.0], vec![1.0, 0.0]);
        let probe = Probe {
            vector: &[1.0, 0.0],
            profile: Some(&query_profile),
        };
        let hits = optimizer
            .apply(&ctx(TransformKind::LowPass, None), &index, &probe, 10)
            .expect("apply");
        assert_eq!(hits[0].track_id, "close-bands");
        assert!(hits.iter().all(RankedHit::is_reweighted));
        // 0.6 * 0.9 + 0.4 * 1.0
        assert!((hits[0].score - 0.94).abs() < 1e-3);
    }

    #[test]
    fn missing_analyzer_falls_back_to_plain_search() {
        let optimizer = optimizer(false);
        assert_eq!(
            optimizer.strategy(TransformKind::LowPass, Severity::Moderate),
            SearchStrategy::Plain
        );
        let index = index();
        let query_profile = profile(vec![1.0, 0.0], vec![1.0, 0.0]);
        let probe = Probe {
            vector: &[1.0, 0.0],
            profile: Some(&query_profile),
        };
        let hits = optimizer
            .apply(&ctx(TransformKind::LowPass, None), &index, &probe, 10)
            .expect("apply");
        assert_eq!(hits[0].track_id, "close-vector");
        assert!(!hits.iter().any(RankedHit::is_reweighted));
    }

    #[test]
    fn embedded_boosts_expected_track() {
        let optimizer = optimizer(false);
        let index = index();
        let probe = Probe {
            vector: &[1.0, 0.0],
            profile: None,
        };
        let hits = optimizer
            .apply(
                &ctx(TransformKind::Embedded, Some("close-bands")),
                &index,
                &probe,
                5,
            )
            .expect("apply");
        let boosted = hits
            .iter()
            .find(|hit| hit.track_id == "close-bands")
            .expect("hit");
        assert!((boosted.score - (boosted.raw_similarity * 1.1).min(1.0)).abs() < 1e-6);
        let untouched = hits
            .iter()
            .find(|hit| hit.track_id == "close-vector")
            .expect("hit");
        assert!(!untouched.is_reweighted());
    }

    #[test]
    fn consecutive_segments_gain_confidence() {
        let optimizer = optimizer(false);
        let vote = |track: &str, segment: usize| Vote {
            track_id: track.to_string(),
            query_segment: segment,
            scale_index: 0,
            ref_segment: segment,
            score: 0.5,
            raw_score: 0.5,
        };
        let mut votes = vec![
            vote("run", 0),
            vote("run", 1),
            vote("run", 2),
            vote("isolated", 5),
        ];
        optimizer.temporal_reinforce(&mut votes);
        // run of 3: bonus 0.2
        assert!((votes[1].score - 0.6).abs() < 1e-6);
        assert!((votes[3].score - 0.5).abs() < 1e-6);
    }

    #[cfg(feature = "spectral")]
    #[test]
    fn detects_missing_high_band() {
        let optimizer = optimizer(true);
        let tone = |freqs: &[f32]| {
            let samples = (0..16_000)
                .map(|i| {
                    let t = i as f32 / 8_000.0;
                    freqs
                        .iter()
                        .map(|f| (2.0 * std::f32::consts::PI * f * t).sin())
                        .sum()
                })
                .collect();
            AudioClip::new(8_000, samples)
        };
        let filtered = optimizer.detect(&tone(&[300.0, 600.0]));
        assert_eq!(filtered, Some((TransformKind::LowPass, Severity::Severe)));
        assert_eq!(optimizer.detect(&tone(&[300.0, 3_000.0])), None);
    }
}
