// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-aggregation similarity enforcement.

use std::collections::HashMap;

use crate::config::EnforcerConfig;
use crate::index::FingerprintIndex;
use crate::types::{renumber, Candidate, EmbeddingVector, MatchResult, Severity};
use crate::vector::cosine;

/// Source of a track's original reference embeddings.
pub trait OriginalSource {
    fn originals(&self, track_id: &str) -> Vec<EmbeddingVector>;
}

impl OriginalSource for FingerprintIndex {
    fn originals(&self, track_id: &str) -> Vec<EmbeddingVector> {
        self.track_vectors(track_id)
    }
}

impl OriginalSource for HashMap<String, Vec<EmbeddingVector>> {
    fn originals(&self, track_id: &str) -> Vec<EmbeddingVector> {
        self.get(track_id).cloned().unwrap_or_default()
    }
}

/// Inputs for direct re-checking of the leading candidate.
pub struct Revalidation<'a> {
    pub query_vectors: &'a [EmbeddingVector],
    pub source: &'a dyn OriginalSource,
}

pub struct SimilarityEnforcer {
    config: EnforcerConfig,
}

impl SimilarityEnforcer {
    pub fn new(config: EnforcerConfig) -> Self {
        Self { config }
    }

    pub fn floor(&self, severity: Severity) -> f32 {
        self.config.floor(severity)
    }

    /// Revalidate, then filter by the severity floor.
    ///
    /// The revalidation target is the expected track when it is a candidate,
    /// otherwise the leader. A direct similarity at or above the floor
    /// replaces its score and moves it to rank 1. The floor filter keeps the
    /// single best candidate rather than return an empty list. No candidate is
    /// ever added.
    pub fn enforce(
        &self,
        mut candidates: Vec<Candidate>,
        severity: Severity,
        expected_track_id: Option<&str>,
        revalidation: Option<Revalidation<'_>>,
    ) -> MatchResult {
        let floor = self.floor(severity);
        let mut promoted = None;

        if let Some(revalidation) = revalidation.filter(|_| self.config.revalidate) {
            let target = expected_track_id
                .and_then(|expected| candidates.iter().position(|c| c.track_id == expected))
                .or(if candidates.is_empty() { None } else { Some(0) });

            if let Some(position) = target {
                let originals = revalidation
                    .source
                    .originals(&candidates[position].track_id);
                if let Some(direct) = direct_similarity(revalidation.query_vectors, &originals) {
                    if direct >= floor {
                        let mut candidate = candidates.remove(position);
                        tracing::debug!(
                            track_id = %candidate.track_id,
                            aggregated = candidate.similarity,
                            direct,
                            "revalidated candidate"
                        );
                        candidate.similarity = direct;
                        if position != 0 {
                            promoted = Some(candidate.track_id.clone());
                        }
                        candidates.insert(0, candidate);
                    }
                }
            }
        }

        let total = candidates.len();
        let mut kept: Vec<Candidate> = candidates
            .iter()
            .filter(|candidate| candidate.similarity >= floor)
            .cloned()
            .collect();
        if kept.is_empty() {
            if let Some(best) = candidates.into_iter().next() {
                kept.push(best);
            }
        }
        if kept.len() < total {
            tracing::debug!(floor, kept = kept.len(), total, "applied similarity floor");
        }

        renumber(&mut kept);
        MatchResult {
            candidates: kept,
            promoted,
        }
    }
}

/// Mean over query vectors of the best cosine against any original.
fn direct_similarity(query: &[EmbeddingVector], originals: &[EmbeddingVector]) -> Option<f32> {
    if query.is_empty() || originals.is_empty() {
        return None;
    }
    let total: f32 = query
        .iter()
        .map(|q| {
            originals
                .iter()
                .map(|o| cosine(q, o))
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .sum();
    Some(total / query.len() as f32)
}
