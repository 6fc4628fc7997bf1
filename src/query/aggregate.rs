// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merge per-segment, per-scale votes into one ranked candidate list.

use std::collections::BTreeMap;

use crate::types::{compare_candidates, renumber, Candidate, Vote, VoteRef};

#[derive(Default)]
struct SegmentBest {
    score: f32,
    raw_score: f32,
}

#[derive(Default)]
struct TrackTally {
    segments: BTreeMap<usize, SegmentBest>,
    provenance: Vec<VoteRef>,
}

/// Reduce votes to candidates.
///
/// Per track, each query segment contributes its best vote over all scales;
/// the track similarity is the mean of those per-segment bests. Votes are put
/// in canonical order first, so the output does not depend on the order in
/// which segment tasks completed.
pub fn aggregate(votes: &[Vote]) -> Vec<Candidate> {
    let mut ordered: Vec<&Vote> = votes
        .iter()
        .filter(|vote| vote.score.is_finite() && vote.raw_score.is_finite())
        .collect();
    ordered.sort_by(|a, b| {
        a.track_id
            .cmp(&b.track_id)
            .then_with(|| a.query_segment.cmp(&b.query_segment))
            .then_with(|| a.scale_index.cmp(&b.scale_index))
            .then_with(|| a.ref_segment.cmp(&b.ref_segment))
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| b.raw_score.total_cmp(&a.raw_score))
    });

    let mut tallies: BTreeMap<&str, TrackTally> = BTreeMap::new();
    for vote in ordered {
        let tally = tallies.entry(vote.track_id.as_str()).or_default();
        let best = tally
            .segments
            .entry(vote.query_segment)
            .or_insert(SegmentBest {
                score: f32::NEG_INFINITY,
                raw_score: f32::NEG_INFINITY,
            });
        best.score = best.score.max(vote.score);
        best.raw_score = best.raw_score.max(vote.raw_score);

        let vote_ref = VoteRef {
            segment_index: vote.query_segment,
            scale_index: vote.scale_index,
        };
        if tally.provenance.last() != Some(&vote_ref) {
            tally.provenance.push(vote_ref);
        }
    }

    let mut candidates: Vec<Candidate> = tallies
        .into_iter()
        .map(|(track_id, tally)| {
            let count = tally.segments.len();
            let (score_sum, raw_sum) = tally
                .segments
                .values()
                .fold((0.0f32, 0.0f32), |(s, r), best| {
                    (s + best.score, r + best.raw_score)
                });
            Candidate {
                track_id: track_id.to_string(),
                similarity: score_sum / count as f32,
                raw_similarity: raw_sum / count as f32,
                rank: 0,
                supporting_segment_count: count,
                provenance: tally.provenance,
            }
        })
        .collect();

    candidates.sort_by(compare_candidates);
    renumber(&mut candidates);
    candidates
}
