// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core data model shared by the cache, index and query pipeline.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Fixed-dimension embedding of one segment at one processing scale.
pub type EmbeddingVector = Vec<f32>;

/// Mono PCM audio held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioClip {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A fixed-duration window of a track. Immutable once created.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub track_id: String,
    pub segment_index: usize,
    /// Offset of the window start in seconds.
    pub start_offset: f32,
    pub sample_rate: u32,
    pub samples: Arc<[f32]>,
}

impl AudioSegment {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Qualitative strength of an applied distortion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mild => "mild",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "mild" => Ok(Self::Mild),
            "moderate" => Ok(Self::Moderate),
            "severe" => Ok(Self::Severe),
            other => Err(format!(
                "invalid severity '{other}'. Expected one of: mild, moderate, severe"
            )),
        }
    }
}

/// Known transform families a query may have been through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Identity,
    LowPass,
    VocalOverlay,
    Embedded,
    PitchShift,
    TimeStretch,
    Unknown,
}

impl TransformKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::LowPass => "low_pass",
            Self::VocalOverlay => "vocal_overlay",
            Self::Embedded => "embedded",
            Self::PitchShift => "pitch_shift",
            Self::TimeStretch => "time_stretch",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().replace('-', "_").as_str() {
            "identity" | "none" => Ok(Self::Identity),
            "low_pass" | "lowpass" => Ok(Self::LowPass),
            "vocal_overlay" | "vocals" => Ok(Self::VocalOverlay),
            "embedded" => Ok(Self::Embedded),
            "pitch_shift" => Ok(Self::PitchShift),
            "time_stretch" => Ok(Self::TimeStretch),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!(
                "invalid transform '{other}'. Expected one of: identity, low-pass, vocal-overlay, embedded, pitch-shift, time-stretch, unknown"
            )),
        }
    }
}

/// One index hit attributed to a query segment at a given scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub track_id: String,
    pub query_segment: usize,
    pub scale_index: usize,
    /// Segment index of the matched reference vector.
    pub ref_segment: usize,
    pub score: f32,
    pub raw_score: f32,
}

/// Provenance of a candidate: which segment and scale voted for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRef {
    pub segment_index: usize,
    pub scale_index: usize,
}

/// A provisional match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub track_id: String,
    pub similarity: f32,
    /// Same aggregation over plain vector similarity, before any re-weighting.
    pub raw_similarity: f32,
    pub rank: usize,
    pub supporting_segment_count: usize,
    pub provenance: Vec<VoteRef>,
}

/// Descending similarity, then support count, then track id.
pub fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.supporting_segment_count.cmp(&a.supporting_segment_count))
        .then_with(|| a.track_id.cmp(&b.track_id))
}

/// Renumber ranks 1..=n in list order.
pub fn renumber(candidates: &mut [Candidate]) {
    for (idx, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = idx + 1;
    }
}

/// Final ranked, deduplicated-by-track result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub candidates: Vec<Candidate>,
    /// Track the enforcer moved to rank 1 from a lower rank, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted: Option<String>,
}

impl MatchResult {
    pub fn top(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Entry of the match query surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMatch {
    pub track_id: String,
    pub similarity: f32,
}

/// Response of the match query surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub matches: Vec<TrackMatch>,
    pub total_count: usize,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(track: &str, similarity: f32, support: usize) -> Candidate {
        Candidate {
            track_id: track.to_string(),
            similarity,
            raw_similarity: similarity,
            rank: 0,
            supporting_segment_count: support,
            provenance: Vec::new(),
        }
    }

    #[test]
    fn candidate_order_breaks_ties_by_support_then_id() {
        let mut list = vec![
            candidate("b", 0.9, 2),
            candidate("a", 0.9, 2),
            candidate("c", 0.9, 5),
            candidate("d", 0.95, 1),
        ];
        list.sort_by(compare_candidates);
        let ids: Vec<&str> = list.iter().map(|c| c.track_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn transform_parse_accepts_dashes() {
        assert_eq!(
            "low-pass".parse::<TransformKind>().unwrap(),
            TransformKind::LowPass
        );
        assert_eq!(
            "Vocal-Overlay".parse::<TransformKind>().unwrap(),
            TransformKind::VocalOverlay
        );
        assert!("reverb".parse::<TransformKind>().is_err());
    }

    #[test]
    fn severity_roundtrips_through_str() {
        for severity in [Severity::Mild, Severity::Moderate, Severity::Severe] {
            assert_eq!(severity.as_str().parse::<Severity>().unwrap(), severity);
        }
    }
}
