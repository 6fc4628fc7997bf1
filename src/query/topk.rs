// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adaptive top-k and early termination.

use std::collections::BTreeMap;

use crate::config::{EarlyTerminationConfig, TopKConfig};
use crate::types::{Severity, TransformKind};

/// Neighbors to request per segment.
///
/// The transform base is scaled by severity, then shrunk by up to
/// `max_confidence_reduction` as running confidence climbs from the threshold
/// to 1.0.
pub fn adaptive_k(
    config: &TopKConfig,
    transform: TransformKind,
    severity: Severity,
    confidence: f32,
) -> usize {
    let base = config.base_for(transform) as f32 * config.severity_factor(severity);
    let threshold = config.confidence_threshold;
    let progress = if confidence > threshold && threshold < 1.0 {
        ((confidence - threshold) / (1.0 - threshold)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let reduced = base * (1.0 - config.max_confidence_reduction * progress);
    (reduced.round() as usize).clamp(1, config.max_k.max(1))
}

/// Top-1 result of one completed segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTop {
    pub track_id: String,
    pub similarity: f32,
}

/// Mean top-1 similarity, or 0.0 with no completed segments.
pub fn running_confidence(tops: &[SegmentTop]) -> f32 {
    if tops.is_empty() {
        return 0.0;
    }
    tops.iter().map(|top| top.similarity).sum::<f32>() / tops.len() as f32
}

/// Whether further scales can be skipped.
///
/// Stops when one track leads more than `agreement_fraction` of segments with
/// mean similarity above `agreement_similarity`, or when mean similarity alone
/// exceeds `high_similarity`. Severe distortions always run every scale.
///
/// `tops` holds completed segments only; failed or timed-out segments are left
/// out of both the agreement fraction and the mean rather than counted as
/// disagreeing.
pub fn should_terminate_early(
    config: &EarlyTerminationConfig,
    severity: Severity,
    tops: &[SegmentTop],
) -> bool {
    if !config.enabled || severity == Severity::Severe || tops.is_empty() {
        return false;
    }

    let mean = running_confidence(tops);
    if mean > config.high_similarity {
        return true;
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for top in tops {
        *counts.entry(top.track_id.as_str()).or_default() += 1;
    }
    let leader = counts.values().copied().max().unwrap_or(0);
    let agreement = leader as f32 / tops.len() as f32;
    agreement > config.agreement_fraction && mean > config.agreement_similarity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tops(entries: &[(&str, f32)]) -> Vec<SegmentTop> {
        entries
            .iter()
            .map(|(track, similarity)| SegmentTop {
                track_id: track.to_string(),
                similarity: *similarity,
            })
            .collect()
    }

    #[test]
    fn k_scales_with_transform_and_severity() {
        let config = TopKConfig::default();
        assert_eq!(
            adaptive_k(&config, TransformKind::Identity, Severity::Mild, 0.0),
            10
        );
        assert_eq!(
            adaptive_k(&config, TransformKind::LowPass, Severity::Moderate, 0.0),
            90
        );
        assert_eq!(
            adaptive_k(&config, TransformKind::VocalOverlay, Severity::Severe, 0.5),
            38
        );
    }

    #[test]
    fn confidence_shrinks_k_by_at_most_thirty_percent() {
        let config = TopKConfig::default();
        let full = adaptive_k(&config, TransformKind::Embedded, Severity::Mild, 0.8);
        let half = adaptive_k(&config, TransformKind::Embedded, Severity::Mild, 0.9);
        let max = adaptive_k(&config, TransformKind::Embedded, Severity::Mild, 1.0);
        assert_eq!(full, 30);
        assert!(half < full && half > max);
        assert_eq!(max, 21);
    }

    #[test]
    fn k_never_drops_below_one() {
        let config = TopKConfig {
            identity: 1,
            max_confidence_reduction: 1.0,
            ..TopKConfig::default()
        };
        assert_eq!(
            adaptive_k(&config, TransformKind::Identity, Severity::Mild, 1.0),
            1
        );
    }

    #[test]
    fn agreement_rule_needs_both_conditions() {
        let config = EarlyTerminationConfig::default();
        let agreeing = tops(&[("a", 0.92); 5]);
        assert!(should_terminate_early(&config, Severity::Mild, &agreeing));

        let split = tops(&[("a", 0.92), ("a", 0.92), ("b", 0.92), ("b", 0.92), ("a", 0.92)]);
        assert!(!should_terminate_early(&config, Severity::Mild, &split));

        let weak = tops(&[("a", 0.85); 5]);
        assert!(!should_terminate_early(&config, Severity::Mild, &weak));
    }

    #[test]
    fn high_similarity_stops_alone_but_never_when_severe() {
        let config = EarlyTerminationConfig::default();
        let strong = tops(&[("a", 0.97), ("b", 0.97)]);
        assert!(should_terminate_early(&config, Severity::Moderate, &strong));
        assert!(!should_terminate_early(&config, Severity::Severe, &strong));

        let disabled = EarlyTerminationConfig {
            enabled: false,
            ..config
        };
        assert!(!should_terminate_early(&disabled, Severity::Mild, &strong));
    }
}
