// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference track indexing
//!
//! Tracks are embedded at the primary scale in parallel, with per-file reuse
//! through the embedding cache, and then either built into a fresh
//! [`FingerprintIndex`] or appended to a [`SharedIndex`].

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use super::stats::{duration_to_millis, CacheReuseStats, LastRunStats, RunTimingsMs};
use crate::audio::segment_clip;
use crate::cache::{CacheLookup, EmbeddingCache, MissReason, SegmentMeta};
use crate::config::Config;
use crate::embedding::{embed_segments, EmbeddingProvider};
use crate::errors::{MatchError, Result};
use crate::hashing::{content_hash, scaled_model_hash};
use crate::index::{FingerprintIndex, IndexEntry, IndexKind, SharedIndex};
use crate::query::TransformOptimizer;
use crate::types::{AudioClip, EmbeddingVector};

/// A reference track to index.
#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: String,
    pub clip: AudioClip,
}

impl Track {
    pub fn new(track_id: impl Into<String>, clip: AudioClip) -> Self {
        Self {
            track_id: track_id.into(),
            clip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    #[default]
    Build,
    Incremental,
    Rebuild,
}

impl IndexMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Incremental => "incremental",
            Self::Rebuild => "rebuild",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackFailure {
    pub track_id: String,
    pub reason: String,
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexReport {
    pub mode: IndexMode,
    pub tracks_indexed: usize,
    /// Tracks whose embeddings came from the cache.
    pub tracks_cached: usize,
    /// Tracks already present in the index and left untouched.
    pub tracks_skipped: usize,
    pub tracks_failed: usize,
    pub segments: usize,
    pub failed_segments: usize,
    pub vectors_total: usize,
    pub embed_ms: u64,
    pub index_ms: u64,
    pub failures: Vec<TrackFailure>,
}

impl IndexReport {
    /// Persistable form; `started_at_ms` is the wall clock at run start.
    pub fn to_run_stats(&self, force: bool, started_at_ms: u64, finished_at_ms: u64) -> LastRunStats {
        LastRunStats {
            mode: self.mode.as_str().to_string(),
            force,
            started_at_ms,
            finished_at_ms,
            total_ms: finished_at_ms.saturating_sub(started_at_ms),
            timings_ms: RunTimingsMs {
                scan_ms: None,
                embed_ms: Some(self.embed_ms),
                index_ms: Some(self.index_ms),
                save_ms: None,
            },
            cache_reuse: CacheReuseStats {
                hit: self.tracks_cached as u64,
                miss: (self.tracks_indexed - self.tracks_cached.min(self.tracks_indexed)) as u64,
            },
            indexed_tracks: self.tracks_indexed,
            skipped_tracks: self.tracks_skipped,
            failed_tracks: self.tracks_failed,
            segments: self.segments,
            failed_segments: self.failed_segments,
        }
    }
}

struct EmbeddedTrack {
    track_id: String,
    segments: Vec<SegmentMeta>,
    vectors: Vec<EmbeddingVector>,
    cached: bool,
    failed_segments: usize,
}

impl EmbeddedTrack {
    fn into_items(self) -> Vec<(IndexEntry, EmbeddingVector)> {
        let track_id = self.track_id;
        self.segments
            .into_iter()
            .zip(self.vectors)
            .map(|(meta, vector)| {
                (
                    IndexEntry {
                        track_id: track_id.clone(),
                        segment_index: meta.segment_index,
                        profile: meta.profile,
                    },
                    vector,
                )
            })
            .collect()
    }
}

struct Embedded {
    items: Vec<(IndexEntry, EmbeddingVector)>,
    report: IndexReport,
}

pub struct TrackIndexer {
    config: Config,
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<Arc<EmbeddingCache>>,
    optimizer: TransformOptimizer,
    show_progress: bool,
}

impl TrackIndexer {
    pub fn new(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;
        let optimizer = TransformOptimizer::with_detected_analyzer(
            config.transform.clone(),
            config.embedding.frame_size,
        );
        Ok(Self {
            config,
            provider,
            cache: None,
            optimizer,
            show_progress: false,
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

    /// Draw a progress bar on stderr while embedding.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    /// Full build over `tracks`. Vector ids follow track order.
    pub fn build(&self, tracks: &[Track]) -> Result<(FingerprintIndex, IndexReport)> {
        let embedded = self.embed_tracks(tracks);
        let mut report = embedded.report;

        let started = Instant::now();
        let index = FingerprintIndex::build(embedded.items, &self.config.index)?;
        report.index_ms = duration_to_millis(started.elapsed());
        report.mode = IndexMode::Build;
        report.vectors_total = index.len();
        Ok((index, report))
    }

    /// Append tracks not yet in `shared` without rebuilding.
    ///
    /// Tracks already indexed are skipped; replacing one needs a full build.
    /// IVF indexes return [`MatchError::IncrementalUnsupported`] and stay
    /// unchanged.
    pub fn update(&self, shared: &SharedIndex, tracks: &[Track]) -> Result<IndexReport> {
        let snapshot = shared.snapshot();
        if snapshot.kind() == IndexKind::Ivf {
            return Err(MatchError::IncrementalUnsupported { kind: "ivf" });
        }

        let (fresh, skipped) = partition_new(&snapshot, tracks);
        let embedded = self.embed_tracks(&fresh);
        let mut report = embedded.report;
        report.mode = IndexMode::Incremental;
        report.tracks_skipped = skipped;

        let started = Instant::now();
        if !embedded.items.is_empty() {
            shared.add_incremental(embedded.items)?;
        }
        report.index_ms = duration_to_millis(started.elapsed());
        report.vectors_total = shared.snapshot().len();
        Ok(report)
    }

    /// [`update`](Self::update), falling back to a rebuild that keeps the
    /// current vectors and appends the new tracks.
    pub fn update_or_rebuild(&self, shared: &SharedIndex, tracks: &[Track]) -> Result<IndexReport> {
        match self.update(shared, tracks) {
            Err(MatchError::IncrementalUnsupported { kind }) => {
                tracing::info!(kind, "incremental update unsupported; rebuilding");
                self.rebuild(shared, tracks)
            }
            other => other,
        }
    }

    fn rebuild(&self, shared: &SharedIndex, tracks: &[Track]) -> Result<IndexReport> {
        let snapshot = shared.snapshot();
        let (fresh, skipped) = partition_new(&snapshot, tracks);
        let embedded = self.embed_tracks(&fresh);
        let mut report = embedded.report;
        report.mode = IndexMode::Rebuild;
        report.tracks_skipped = skipped;

        let started = Instant::now();
        let mut items: Vec<(IndexEntry, EmbeddingVector)> = Vec::with_capacity(snapshot.len());
        for vector_id in 0..snapshot.len() {
            if let (Some(entry), Some(vector)) = (snapshot.entry(vector_id), snapshot.vector(vector_id)) {
                items.push((entry.clone(), vector.to_vec()));
            }
        }
        items.extend(embedded.items);

        let next = FingerprintIndex::build_generation(
            items,
            &self.config.index,
            snapshot.generation() + 1,
        )?;
        report.vectors_total = next.len();
        shared.replace(next);
        report.index_ms = duration_to_millis(started.elapsed());
        Ok(report)
    }

    fn embed_tracks(&self, tracks: &[Track]) -> Embedded {
        let started = Instant::now();
        let progress = if self.show_progress {
            let bar = ProgressBar::new(tracks.len() as u64);
            if let Ok(style) =
                ProgressStyle::with_template("{spinner} embedding [{bar:30}] {pos}/{len} {msg}")
            {
                bar.set_style(style.progress_chars("=> "));
            }
            bar
        } else {
            ProgressBar::hidden()
        };

        let outcomes: Vec<std::result::Result<EmbeddedTrack, TrackFailure>> = tracks
            .par_iter()
            .progress_with(progress.clone())
            .map(|track| self.embed_track(track))
            .collect();
        progress.finish_and_clear();

        let mut report = IndexReport::default();
        let mut items = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(track) => {
                    report.tracks_indexed += 1;
                    report.tracks_cached += usize::from(track.cached);
                    report.segments += track.vectors.len();
                    report.failed_segments += track.failed_segments;
                    items.extend(track.into_items());
                }
                Err(failure) => {
                    tracing::warn!(track_id = %failure.track_id, reason = %failure.reason, "track not indexed");
                    report.tracks_failed += 1;
                    report.failures.push(failure);
                }
            }
        }
        report.embed_ms = duration_to_millis(started.elapsed());
        tracing::info!(
            tracks = report.tracks_indexed,
            cached = report.tracks_cached,
            failed = report.tracks_failed,
            segments = report.segments,
            "embedded reference tracks"
        );
        Embedded { items, report }
    }

    fn embed_track(&self, track: &Track) -> std::result::Result<EmbeddedTrack, TrackFailure> {
        let failure = |reason: String| TrackFailure {
            track_id: track.track_id.clone(),
            reason,
        };
        let scale = self.config.pipeline.scales.first().copied().unwrap_or(1.0);
        let hash = content_hash(&track.clip);
        let model = scaled_model_hash(&self.provider.model_hash(), scale);

        if let Some(cache) = &self.cache {
            match cache.lookup(&track.track_id, &hash, &model) {
                CacheLookup::Hit(entry) if entry.vectors.len() == entry.segments.len() => {
                    return Ok(EmbeddedTrack {
                        track_id: track.track_id.clone(),
                        segments: entry.segments,
                        vectors: entry.vectors,
                        cached: true,
                        failed_segments: 0,
                    });
                }
                CacheLookup::Hit(_) => {
                    tracing::warn!(track_id = %track.track_id, "cache entry segment count mismatch; re-embedding");
                }
                CacheLookup::Miss(MissReason::HashMismatch) => {
                    tracing::debug!(track_id = %track.track_id, "track content or model changed since caching");
                }
                CacheLookup::Miss(_) => {}
            }
        }

        let segments = segment_clip(&track.track_id, &track.clip, &self.config.segment);
        if segments.is_empty() {
            return Err(failure("track is shorter than one segment".to_string()));
        }

        let results = embed_segments(self.provider.as_ref(), &segments, scale);
        let mut metas = Vec::with_capacity(segments.len());
        let mut vectors = Vec::with_capacity(segments.len());
        let mut last_error = None;
        for (segment, result) in segments.iter().zip(results) {
            match result {
                Ok(vector) => {
                    metas.push(SegmentMeta {
                        segment_index: segment.segment_index,
                        start_offset: segment.start_offset,
                        duration: segment.duration_secs(),
                        profile: self.optimizer.profile(&segment.samples, segment.sample_rate),
                    });
                    vectors.push(vector);
                }
                Err(err) => {
                    tracing::warn!(
                        track_id = %track.track_id,
                        segment = segment.segment_index,
                        error = %err,
                        "reference segment skipped"
                    );
                    last_error = Some(err);
                }
            }
        }

        let failed_segments = segments.len() - vectors.len();
        if vectors.is_empty() {
            let reason = last_error
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no segment could be embedded".to_string());
            return Err(failure(reason));
        }

        // partial tracks are indexed but never cached, so a later run retries them
        if failed_segments == 0 {
            if let Some(cache) = &self.cache {
                if let Err(err) = cache.put(&track.track_id, &hash, &model, &metas, &vectors) {
                    tracing::warn!(track_id = %track.track_id, error = %err, "failed to cache embeddings");
                }
            }
        }

        Ok(EmbeddedTrack {
            track_id: track.track_id.clone(),
            segments: metas,
            vectors,
            cached: false,
            failed_segments,
        })
    }
}

/// Tracks absent from `index`, plus how many were already present.
fn partition_new(index: &FingerprintIndex, tracks: &[Track]) -> (Vec<Track>, usize) {
    let mut skipped = 0;
    let fresh = tracks
        .iter()
        .filter(|track| {
            let present = index.contains_track(&track.track_id);
            skipped += usize::from(present);
            !present
        })
        .cloned()
        .collect();
    (fresh, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, SegmentConfig, TransformConfig};
    use crate::errors::EmbedError;
    use crate::types::AudioSegment;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Embeds the first three samples of a segment.
    struct HeadProvider {
        calls: AtomicUsize,
    }

    impl HeadProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingProvider for HeadProvider {
        fn model_id(&self) -> &str {
            "head"
        }

        fn config_fingerprint(&self) -> String {
            "3".to_string()
        }

        fn dimension(&self) -> usize {
            3
        }

        fn embed(&self, segment: &AudioSegment, _scale: f32) -> Result<EmbeddingVector, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if segment.samples.iter().take(3).all(|s| *s == 0.0) {
                return Err(EmbedError::Provider("silent segment".to_string()));
            }
            Ok(segment.samples.iter().take(3).copied().collect())
        }
    }

    fn config(kind: IndexKind) -> Config {
        Config {
            segment: SegmentConfig {
                seconds: 1.0,
                min_tail_fraction: 0.5,
            },
            index: IndexConfig {
                kind,
                ..IndexConfig::default()
            },
            ..Config::default()
        }
    }

    fn track(id: &str, seed: f32) -> Track {
        let samples: Vec<f32> = (0..8).map(|i| seed + i as f32).collect();
        Track::new(id, AudioClip::new(4, samples))
    }

    fn indexer(kind: IndexKind, provider: Arc<HeadProvider>) -> TrackIndexer {
        TrackIndexer::new(config(kind), provider).expect("indexer")
    }

    #[test]
    fn build_indexes_every_segment() {
        let provider = Arc::new(HeadProvider::new());
        let (index, report) = indexer(IndexKind::Flat, provider)
            .build(&[track("a", 1.0), track("b", 20.0)])
            .expect("build");
        assert_eq!(index.len(), 4);
        assert_eq!(report.tracks_indexed, 2);
        assert_eq!(report.segments, 4);
        assert_eq!(index.entry(2).map(|e| e.track_id.as_str()), Some("b"));
    }

    #[test]
    fn failing_track_is_reported_not_fatal() {
        let provider = Arc::new(HeadProvider::new());
        let silent = Track::new("silent", AudioClip::new(4, vec![0.0; 8]));
        let (index, report) = indexer(IndexKind::Flat, provider)
            .build(&[track("a", 1.0), silent])
            .expect("build");
        assert_eq!(index.len(), 2);
        assert_eq!(report.tracks_failed, 1);
        assert_eq!(report.failures[0].track_id, "silent");
    }

    #[test]
    fn cache_is_reused_on_second_build() {
        let dir = TempDir::new().expect("tempdir");
        let cache = Arc::new(EmbeddingCache::open(dir.path()).expect("cache"));
        let provider = Arc::new(HeadProvider::new());
        let indexer = indexer(IndexKind::Flat, Arc::clone(&provider))
            .with_optimizer(TransformOptimizer::new(TransformConfig::default(), None))
            .with_cache(cache);

        let tracks = [track("a", 1.0), track("b", 20.0)];
        let (first, _) = indexer.build(&tracks).expect("first");
        let calls = provider.calls.load(Ordering::SeqCst);
        let (second, report) = indexer.build(&tracks).expect("second");

        assert_eq!(provider.calls.load(Ordering::SeqCst), calls);
        assert_eq!(report.tracks_cached, 2);
        assert_eq!(first, second);
    }

    #[test]
    fn incremental_update_matches_full_build() {
        let provider = Arc::new(HeadProvider::new());
        let indexer = indexer(IndexKind::Flat, provider);
        let (base, _) = indexer.build(&[track("a", 1.0)]).expect("base");
        let shared = SharedIndex::new(base);

        let report = indexer
            .update(&shared, &[track("a", 1.0), track("b", 20.0)])
            .expect("update");
        assert_eq!(report.tracks_skipped, 1);
        assert_eq!(report.tracks_indexed, 1);

        let (full, _) = indexer
            .build(&[track("a", 1.0), track("b", 20.0)])
            .expect("full");
        let query = [21.0, 22.0, 23.0];
        assert_eq!(
            shared.snapshot().search(&query, 4).expect("search"),
            full.search(&query, 4).expect("search")
        );
    }

    #[test]
    fn ivf_update_is_rejected_then_rebuilt() {
        let provider = Arc::new(HeadProvider::new());
        let indexer = indexer(IndexKind::Ivf, provider);
        let (base, _) = indexer.build(&[track("a", 1.0)]).expect("base");
        let shared = SharedIndex::new(base);

        let err = indexer
            .update(&shared, &[track("b", 20.0)])
            .expect_err("ivf rejects appends");
        assert!(matches!(err, MatchError::IncrementalUnsupported { .. }));
        assert_eq!(shared.snapshot().len(), 2);

        let report = indexer
            .update_or_rebuild(&shared, &[track("b", 20.0)])
            .expect("rebuild");
        assert_eq!(report.mode, IndexMode::Rebuild);
        let snapshot = shared.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.generation(), 2);
        assert!(snapshot.contains_track("b"));
    }

    #[test]
    fn report_converts_to_run_stats() {
        let report = IndexReport {
            mode: IndexMode::Incremental,
            tracks_indexed: 3,
            tracks_cached: 2,
            segments: 9,
            ..IndexReport::default()
        };
        let stats = report.to_run_stats(false, 1_000, 1_250);
        assert_eq!(stats.mode, "incremental");
        assert_eq!(stats.total_ms, 250);
        assert_eq!(stats.cache_reuse.hit, 2);
        assert_eq!(stats.cache_reuse.miss, 1);
    }
}
