// SPDX-License-Identifier: MIT OR Apache-2.0

use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use super::ivf::IvfTables;
use super::{IndexEntry, IndexKind, SearchHit};
use crate::config::IndexConfig;
use crate::errors::{MatchError, Result};
use crate::types::EmbeddingVector;
use crate::vector::{dot, l2_normalize};

const PARALLEL_CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintIndex {
    /// Resolved structure; never `Auto`.
    pub(crate) kind: IndexKind,
    pub(crate) dimension: usize,
    pub(crate) slab: Vec<f32>,
    pub(crate) entries: Vec<IndexEntry>,
    pub(crate) generation: u64,
    pub(crate) ivf: Option<IvfTables>,
    pub(crate) nprobe: usize,
    pub(crate) parallel_threshold: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub kind: IndexKind,
    pub dimension: usize,
    pub vectors: usize,
    pub tracks: usize,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions: Option<usize>,
}

impl FingerprintIndex {
    /// Full rebuild over `items`; vector ids follow input order.
    pub fn build(items: Vec<(IndexEntry, EmbeddingVector)>, config: &IndexConfig) -> Result<Self> {
        Self::build_generation(items, config, 1)
    }

    pub(crate) fn build_generation(
        items: Vec<(IndexEntry, EmbeddingVector)>,
        config: &IndexConfig,
        generation: u64,
    ) -> Result<Self> {
        let mut index = Self {
            kind: IndexKind::Flat,
            dimension: items.first().map(|(_, v)| v.len()).unwrap_or(0),
            slab: Vec::new(),
            entries: Vec::with_capacity(items.len()),
            generation,
            ivf: None,
            nprobe: config.nprobe,
            parallel_threshold: config.parallel_threshold,
        };
        index.append(items)?;

        index.kind = match config.kind {
            IndexKind::Auto if index.len() >= config.ivf_min_vectors => IndexKind::Ivf,
            IndexKind::Auto => IndexKind::Flat,
            other => other,
        };
        if index.kind == IndexKind::Ivf {
            let nlist = if config.nlist > 0 {
                config.nlist
            } else {
                (index.len() as f64).sqrt().round() as usize
            };
            index.ivf = Some(IvfTables::train(
                &index.slab,
                index.dimension,
                nlist,
                config.kmeans_iterations,
            ));
        }

        tracing::info!(
            kind = %index.kind,
            vectors = index.len(),
            dimension = index.dimension,
            generation,
            "built fingerprint index"
        );
        Ok(index)
    }

    /// Append without rebuilding. Only flat indexes support this.
    pub fn add_incremental(&mut self, items: Vec<(IndexEntry, EmbeddingVector)>) -> Result<()> {
        if self.kind == IndexKind::Ivf {
            return Err(MatchError::IncrementalUnsupported { kind: "ivf" });
        }
        let added = items.len();
        self.append(items)?;
        tracing::debug!(added, total = self.len(), "appended to flat index");
        Ok(())
    }

    fn append(&mut self, items: Vec<(IndexEntry, EmbeddingVector)>) -> Result<()> {
        if self.is_empty() {
            if let Some((_, first)) = items.first() {
                self.dimension = first.len();
            }
        }
        if let Some((_, bad)) = items.iter().find(|(_, v)| v.len() != self.dimension) {
            return Err(MatchError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        self.slab.reserve(items.len() * self.dimension);
        self.entries.reserve(items.len());
        for (entry, mut vector) in items {
            // zero vectors stay zero and never score above 0
            l2_normalize(&mut vector);
            self.slab.extend_from_slice(&vector);
            self.entries.push(entry);
        }
        Ok(())
    }

    /// Top-`k` stored vectors by cosine similarity.
    ///
    /// Ordered by descending similarity, ties by ascending vector id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty() {
            return Err(MatchError::EmptyIndex);
        }
        if query.len() != self.dimension {
            return Err(MatchError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut probe = query.to_vec();
        if !l2_normalize(&mut probe) {
            return Ok(Vec::new());
        }

        let heap = match &self.ivf {
            Some(ivf) => {
                let candidates = ivf.probe(self.dimension, &probe, self.nprobe);
                self.scan(candidates.into_iter(), &probe, k)
            }
            None if self.len() >= self.parallel_threshold => self.scan_parallel(&probe, k),
            None => self.scan(0..self.len(), &probe, k),
        };

        let mut hits: Vec<SearchHit> = heap
            .into_iter()
            .map(|entry| SearchHit {
                vector_id: entry.0.vector_id,
                // rounding can push a unit dot product just past 1
                similarity: entry.0.score.clamp(-1.0, 1.0),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.vector_id.cmp(&b.vector_id))
        });
        Ok(hits)
    }

    fn scan(
        &self,
        ids: impl Iterator<Item = usize>,
        probe: &[f32],
        k: usize,
    ) -> BinaryHeap<std::cmp::Reverse<Scored>> {
        let mut heap = BinaryHeap::with_capacity(k + 1);
        for vector_id in ids {
            push_bounded(
                &mut heap,
                Scored {
                    score: dot(self.row(vector_id), probe),
                    vector_id,
                },
                k,
            );
        }
        heap
    }

    fn scan_parallel(&self, probe: &[f32], k: usize) -> BinaryHeap<std::cmp::Reverse<Scored>> {
        let dimension = self.dimension;
        let partials: Vec<Vec<Scored>> = self
            .slab
            .par_chunks(PARALLEL_CHUNK_SIZE * dimension)
            .enumerate()
            .map(|(chunk_idx, chunk)| {
                let base = chunk_idx * PARALLEL_CHUNK_SIZE;
                let mut local = BinaryHeap::with_capacity(k + 1);
                for (offset, row) in chunk.chunks_exact(dimension).enumerate() {
                    push_bounded(
                        &mut local,
                        Scored {
                            score: dot(row, probe),
                            vector_id: base + offset,
                        },
                        k,
                    );
                }
                local.into_iter().map(|r| r.0).collect()
            })
            .collect();

        let mut heap = BinaryHeap::with_capacity(k + 1);
        for scored in partials.into_iter().flatten() {
            push_bounded(&mut heap, scored, k);
        }
        heap
    }

    fn row(&self, vector_id: usize) -> &[f32] {
        &self.slab[vector_id * self.dimension..(vector_id + 1) * self.dimension]
    }

    pub fn entry(&self, vector_id: usize) -> Option<&IndexEntry> {
        self.entries.get(vector_id)
    }

    /// Stored (normalized) vector by id.
    pub fn vector(&self, vector_id: usize) -> Option<&[f32]> {
        (vector_id < self.len()).then(|| self.row(vector_id))
    }

    /// All stored vectors of one track, ordered by segment index.
    pub fn track_vectors(&self, track_id: &str) -> Vec<EmbeddingVector> {
        let mut rows: Vec<(usize, usize)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.track_id == track_id)
            .map(|(vector_id, entry)| (entry.segment_index, vector_id))
            .collect();
        rows.sort_unstable();
        rows.into_iter()
            .map(|(_, vector_id)| self.row(vector_id).to_vec())
            .collect()
    }

    pub fn contains_track(&self, track_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.track_id == track_id)
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        let tracks: HashSet<&str> = self
            .entries
            .iter()
            .map(|entry| entry.track_id.as_str())
            .collect();
        IndexStats {
            kind: self.kind,
            dimension: self.dimension,
            vectors: self.len(),
            tracks: tracks.len(),
            generation: self.generation,
            partitions: self.ivf.as_ref().map(|ivf| ivf.nlist),
        }
    }
}

fn push_bounded(heap: &mut BinaryHeap<std::cmp::Reverse<Scored>>, scored: Scored, k: usize) {
    heap.push(std::cmp::Reverse(scored));
    if heap.len() > k {
        heap.pop();
    }
}

/// Greater means better: higher score, then lower vector id.
#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f32,
    vector_id: usize,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.vector_id.cmp(&self.vector_id))
    }
}
