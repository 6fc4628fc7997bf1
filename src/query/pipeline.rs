// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-scale query orchestration
//!
//! One query runs scale by scale. Within a scale every segment is embedded
//! and searched on the worker pool; between scales the pipeline adapts `k`
//! to the running confidence and may stop early.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::aggregate::aggregate;
use super::context::QueryContext;
use super::enforce::{Revalidation, SimilarityEnforcer};
use super::pool::{CancelToken, TaskOutcome, WorkerPool};
use super::topk::{adaptive_k, running_confidence, should_terminate_early, SegmentTop};
use super::transform::{Probe, RankedHit, SearchStrategy, TransformOptimizer};
use crate::audio::{segment_clip, BandProfile};
use crate::cache::{EmbeddingCache, SegmentMeta};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::errors::{MatchError, Result};
use crate::hashing::{content_hash, scaled_model_hash};
use crate::index::SharedIndex;
use crate::types::{
    AudioClip, AudioSegment, EmbeddingVector, MatchResult, QueryResponse, Severity, TrackMatch,
    TransformKind, Vote,
};

/// Track id under which query segments are embedded.
const QUERY_TRACK_ID: &str = "query";

pub enum QueryInput {
    Audio(AudioClip),
    /// Precomputed per-segment embeddings at the primary scale.
    Embeddings(Vec<EmbeddingVector>),
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub min_score: Option<f32>,
    pub max_matches: Option<usize>,
    pub expected_track_id: Option<String>,
    /// Declared transform; detected from the audio when absent.
    pub transform: Option<TransformKind>,
    pub severity: Option<Severity>,
    /// Overrides `pipeline.timeout_ms`.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub result: MatchResult,
    pub elapsed_ms: u64,
    pub transform: TransformKind,
    pub severity: Severity,
    pub strategy: SearchStrategy,
    pub scales_run: usize,
    pub segments_total: usize,
    pub segments_completed: usize,
    /// Distinct segments whose embedding or search failed at any scale.
    pub segments_failed: usize,
    pub early_terminated: bool,
    pub timed_out: bool,
    /// Hits whose score differs from plain vector similarity.
    pub reweighted_hits: usize,
    /// Scales served entirely from the embedding cache.
    pub cached_scales: usize,
}

impl QueryOutcome {
    /// Candidates at or above `min_score`, truncated to `max_matches`.
    /// `total_count` counts matches before truncation.
    pub fn to_response(&self, options: &QueryOptions) -> QueryResponse {
        let min_score = options.min_score.unwrap_or(f32::NEG_INFINITY);
        let mut matches: Vec<TrackMatch> = self
            .result
            .candidates
            .iter()
            .filter(|candidate| candidate.similarity >= min_score)
            .map(|candidate| TrackMatch {
                track_id: candidate.track_id.clone(),
                similarity: candidate.similarity,
            })
            .collect();
        let total_count = matches.len();
        if let Some(max) = options.max_matches {
            matches.truncate(max);
        }
        QueryResponse {
            matches,
            total_count,
            elapsed_ms: self.elapsed_ms,
        }
    }
}

enum Source {
    Audio(AudioSegment),
    Vector(EmbeddingVector),
}

struct SegmentWork {
    index: usize,
    source: Source,
    profile: Option<BandProfile>,
}

struct SegmentHits {
    vector: EmbeddingVector,
    hits: Vec<RankedHit>,
}

pub struct QueryPipeline {
    config: Config,
    index: Arc<SharedIndex>,
    cache: Option<Arc<EmbeddingCache>>,
    provider: Arc<dyn EmbeddingProvider>,
    optimizer: TransformOptimizer,
    enforcer: SimilarityEnforcer,
    pool: WorkerPool,
}

impl QueryPipeline {
    pub fn new(
        config: Config,
        index: Arc<SharedIndex>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.pipeline.worker_count())?;
        let optimizer = TransformOptimizer::with_detected_analyzer(
            config.transform.clone(),
            config.embedding.frame_size,
        );
        let enforcer = SimilarityEnforcer::new(config.enforcer.clone());
        Ok(Self {
            config,
            index,
            cache: None,
            provider,
            optimizer,
            enforcer,
            pool,
        })
    }

    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_optimizer(mut self, optimizer: TransformOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Match surface: filtered and truncated track list.
    pub fn query(&self, input: QueryInput, options: &QueryOptions) -> Result<QueryResponse> {
        Ok(self.run(input, options)?.to_response(options))
    }

    /// Run one query end to end and report how it went.
    pub fn run(&self, input: QueryInput, options: &QueryOptions) -> Result<QueryOutcome> {
        let snapshot = self.index.snapshot();
        if snapshot.is_empty() {
            return Err(MatchError::EmptyIndex);
        }

        let (transform, detected_severity) = self.resolve_transform(&input, options);
        let severity = options
            .severity
            .or(detected_severity)
            .unwrap_or(if transform == TransformKind::Identity {
                Severity::Mild
            } else {
                self.config.pipeline.default_severity
            });
        let timeout = options
            .timeout
            .or_else(|| self.config.pipeline.timeout_ms.map(Duration::from_millis));
        let mut ctx = QueryContext::new(
            transform,
            severity,
            options.expected_track_id.clone(),
            timeout,
        );
        let strategy = self.optimizer.strategy(transform, severity);
        let cancel = CancelToken::new();

        let (work, query_hash, scales) = match input {
            QueryInput::Audio(clip) => {
                let segments = segment_clip(QUERY_TRACK_ID, &clip, &self.config.segment);
                if segments.is_empty() {
                    return Err(MatchError::EmptyQuery {
                        reason: format!(
                            "clip of {:.2}s is shorter than the minimum segment",
                            clip.duration_secs()
                        ),
                    });
                }
                let wants_profile = matches!(
                    strategy,
                    SearchStrategy::LowPassReweight | SearchStrategy::VocalBassReweight
                );
                let profiles: Vec<Option<BandProfile>> = if wants_profile {
                    self.pool
                        .run_ordered(&segments, &cancel, None, |segment| {
                            self.optimizer
                                .profile(&segment.samples, segment.sample_rate)
                        })
                        .into_iter()
                        .map(|outcome| match outcome {
                            TaskOutcome::Done(profile) => profile,
                            _ => None,
                        })
                        .collect()
                } else {
                    vec![None; segments.len()]
                };
                let work: Vec<SegmentWork> = segments
                    .into_iter()
                    .zip(profiles)
                    .enumerate()
                    .map(|(index, (segment, profile))| SegmentWork {
                        index,
                        source: Source::Audio(segment),
                        profile,
                    })
                    .collect();
                (work, Some(content_hash(&clip)), self.config.pipeline.scales.clone())
            }
            QueryInput::Embeddings(vectors) => {
                if vectors.is_empty() {
                    return Err(MatchError::EmptyQuery {
                        reason: "no query embeddings supplied".to_string(),
                    });
                }
                if let Some(bad) = vectors.iter().find(|v| v.len() != snapshot.dimension()) {
                    return Err(MatchError::DimensionMismatch {
                        expected: snapshot.dimension(),
                        actual: bad.len(),
                    });
                }
                let work: Vec<SegmentWork> = vectors
                    .into_iter()
                    .enumerate()
                    .map(|(index, vector)| SegmentWork {
                        index,
                        source: Source::Vector(vector),
                        profile: None,
                    })
                    .collect();
                // supplied vectors are already at the primary scale
                (work, None, vec![self.config.pipeline.scales[0]])
            }
        };

        let total = work.len();
        let mut votes: Vec<Vote> = Vec::new();
        let mut tops: Vec<Option<SegmentTop>> = vec![None; total];
        let mut completed = vec![false; total];
        let mut primary_vectors: Vec<EmbeddingVector> = Vec::new();
        let mut failed = vec![false; total];
        let mut reweighted = 0usize;
        let mut cached_scales = 0usize;
        let mut scales_run = 0usize;
        let mut early_terminated = false;
        let mut timed_out = false;

        for (scale_index, scale) in scales.iter().copied().enumerate() {
            if scale_index > 0 && ctx.is_expired() {
                timed_out = true;
                break;
            }

            let k = adaptive_k(&self.config.topk, transform, severity, ctx.confidence);
            let cache_key = query_hash
                .as_deref()
                .map(|hash| self.query_cache_key(hash, scale));
            let cached = cache_key
                .as_ref()
                .and_then(|(file_id, hash, model)| self.cached_vectors(file_id, hash, model, total));
            if cached.is_some() {
                cached_scales += 1;
            }

            let snapshot = &snapshot;
            let ctx_ref = &ctx;
            let cached_ref = cached.as_ref();
            let outcomes = self.pool.run_ordered(&work, &cancel, ctx.deadline, |item| -> Result<SegmentHits> {
                let vector = match (cached_ref, &item.source) {
                    (Some(vectors), _) => vectors[item.index].clone(),
                    (None, Source::Vector(vector)) => vector.clone(),
                    (None, Source::Audio(segment)) => self.provider.embed(segment, scale)?,
                };
                let probe = Probe {
                    vector: &vector,
                    profile: item.profile.as_ref(),
                };
                let hits = self.optimizer.apply(ctx_ref, snapshot, &probe, k)?;
                Ok(SegmentHits { vector, hits })
            });
            scales_run += 1;

            let mut scale_vectors: Vec<Option<EmbeddingVector>> = vec![None; total];
            for (segment, outcome) in outcomes.into_iter().enumerate() {
                match outcome {
                    TaskOutcome::Done(Ok(found)) => {
                        completed[segment] = true;
                        reweighted += found.hits.iter().filter(|h| h.is_reweighted()).count();
                        if let Some(top) = found.hits.first() {
                            let better = tops[segment]
                                .as_ref()
                                .map_or(true, |current| top.score > current.similarity);
                            if better {
                                tops[segment] = Some(SegmentTop {
                                    track_id: top.track_id.clone(),
                                    similarity: top.score,
                                });
                            }
                        }
                        votes.extend(votes_from_hits(segment, scale_index, &found.hits));
                        scale_vectors[segment] = Some(found.vector);
                    }
                    TaskOutcome::Done(Err(err)) => {
                        failed[segment] = true;
                        tracing::warn!(segment, scale, error = %err, "query segment skipped");
                    }
                    TaskOutcome::TimedOut => timed_out = true,
                    TaskOutcome::Cancelled => {}
                }
            }

            if cached.is_none() && scale_vectors.iter().all(Option::is_some) {
                if let Some((file_id, hash, model)) = &cache_key {
                    self.store_query_vectors(file_id, hash, model, &work, &scale_vectors);
                }
            }
            if scale_index == 0 {
                primary_vectors = scale_vectors.into_iter().flatten().collect();
            }

            let finished: Vec<SegmentTop> = tops.iter().flatten().cloned().collect();
            ctx.confidence = running_confidence(&finished);

            if timed_out {
                break;
            }
            if scale_index + 1 < scales.len()
                && should_terminate_early(&self.config.early_termination, severity, &finished)
            {
                cancel.cancel();
                early_terminated = true;
                tracing::debug!(
                    scales_run,
                    confidence = ctx.confidence,
                    "early termination"
                );
                break;
            }
        }

        let segments_completed = completed.iter().filter(|done| **done).count();
        let segments_failed = failed.iter().filter(|failed| **failed).count();
        if segments_completed == 0 {
            if timed_out {
                return Err(MatchError::QueryTimeout {
                    elapsed_ms: ctx.elapsed().as_millis() as u64,
                });
            }
            return Err(MatchError::EmbeddingUnavailable { segments: total });
        }
        if timed_out {
            tracing::warn!(
                segments_completed,
                segments_total = total,
                "query deadline passed; returning partial results"
            );
        }

        if strategy == SearchStrategy::EmbeddedDeep {
            self.optimizer.temporal_reinforce(&mut votes);
        }
        let candidates = aggregate(&votes);
        let revalidation = Revalidation {
            query_vectors: &primary_vectors,
            source: snapshot.as_ref(),
        };
        let result = self.enforcer.enforce(
            candidates,
            severity,
            options.expected_track_id.as_deref(),
            Some(revalidation),
        );

        let elapsed_ms = ctx.elapsed().as_millis() as u64;
        tracing::info!(
            transform = %transform,
            %severity,
            strategy = strategy.as_str(),
            scales_run,
            segments_completed,
            candidates = result.len(),
            elapsed_ms,
            "query finished"
        );

        Ok(QueryOutcome {
            result,
            elapsed_ms,
            transform,
            severity,
            strategy,
            scales_run,
            segments_total: total,
            segments_completed,
            segments_failed,
            early_terminated,
            timed_out,
            reweighted_hits: reweighted,
            cached_scales,
        })
    }

    fn resolve_transform(
        &self,
        input: &QueryInput,
        options: &QueryOptions,
    ) -> (TransformKind, Option<Severity>) {
        if let Some(kind) = options.transform {
            return (kind, None);
        }
        match input {
            QueryInput::Audio(clip) if self.config.pipeline.auto_detect_transform => self
                .optimizer
                .detect(clip)
                .map(|(kind, severity)| (kind, Some(severity)))
                .unwrap_or((TransformKind::Identity, None)),
            _ => (TransformKind::Identity, None),
        }
    }

    fn query_cache_key(&self, content_hash: &str, scale: f32) -> (String, String, String) {
        (
            format!("{QUERY_TRACK_ID}:{}", &content_hash[..16.min(content_hash.len())]),
            content_hash.to_string(),
            scaled_model_hash(&self.provider.model_hash(), scale),
        )
    }

    fn cached_vectors(
        &self,
        file_id: &str,
        hash: &str,
        model: &str,
        expected: usize,
    ) -> Option<Vec<EmbeddingVector>> {
        if !self.config.pipeline.use_query_cache {
            return None;
        }
        let entry = self.cache.as_ref()?.get(file_id, hash, model)?;
        (entry.vectors.len() == expected).then_some(entry.vectors)
    }

    fn store_query_vectors(
        &self,
        file_id: &str,
        hash: &str,
        model: &str,
        work: &[SegmentWork],
        vectors: &[Option<EmbeddingVector>],
    ) {
        if !self.config.pipeline.use_query_cache {
            return;
        }
        let Some(cache) = &self.cache else {
            return;
        };
        let segments: Vec<SegmentMeta> = work
            .iter()
            .filter_map(|item| match &item.source {
                Source::Audio(segment) => Some(SegmentMeta {
                    segment_index: segment.segment_index,
                    start_offset: segment.start_offset,
                    duration: segment.duration_secs(),
                    profile: item.profile.clone(),
                }),
                Source::Vector(_) => None,
            })
            .collect();
        let vectors: Vec<EmbeddingVector> = vectors.iter().flatten().cloned().collect();
        if let Err(err) = cache.put(file_id, hash, model, &segments, &vectors) {
            tracing::warn!(file_id, error = %err, "failed to cache query embeddings");
        }
    }
}

/// One vote per track: its best-scoring hit for this segment and scale.
fn votes_from_hits(query_segment: usize, scale_index: usize, hits: &[RankedHit]) -> Vec<Vote> {
    let mut seen: HashSet<&str> = HashSet::new();
    hits.iter()
        .filter(|hit| seen.insert(hit.track_id.as_str()))
        .map(|hit| Vote {
            track_id: hit.track_id.clone(),
            query_segment,
            scale_index,
            ref_segment: hit.segment_index,
            score: hit.score,
            raw_score: hit.raw_similarity,
        })
        .collect()
}
