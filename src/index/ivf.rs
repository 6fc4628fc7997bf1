// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inverted-file partitions built by deterministic spherical k-means.

use rayon::prelude::*;

use crate::vector::{dot, l2_normalize};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IvfTables {
    pub nlist: usize,
    /// `nlist * dimension`, unit length rows.
    pub centroids: Vec<f32>,
    /// Partition of every vector, by vector id.
    pub assignments: Vec<u32>,
    /// Vector ids per partition, ascending.
    pub lists: Vec<Vec<u32>>,
}

impl IvfTables {
    pub fn train(slab: &[f32], dimension: usize, nlist: usize, iterations: usize) -> Self {
        let count = if dimension == 0 { 0 } else { slab.len() / dimension };
        if count == 0 {
            return Self::from_parts(0, Vec::new(), Vec::new());
        }
        let nlist = nlist.clamp(1, count);

        let mut centroids = seed_centroids(slab, dimension, count, nlist);

        let mut assignments = vec![0u32; count];
        for iteration in 0..iterations.max(1) {
            let next = assign(slab, dimension, count, &centroids);
            let changed = next != assignments;
            assignments = next;
            if iteration > 0 && !changed {
                break;
            }

            let mut sums = vec![0.0f32; nlist * dimension];
            let mut sizes = vec![0usize; nlist];
            for (id, list) in assignments.iter().enumerate() {
                let list = *list as usize;
                sizes[list] += 1;
                for (acc, value) in sums[list * dimension..(list + 1) * dimension]
                    .iter_mut()
                    .zip(row(slab, dimension, id))
                {
                    *acc += value;
                }
            }
            for list in 0..nlist {
                if sizes[list] == 0 {
                    continue;
                }
                let mean = &mut sums[list * dimension..(list + 1) * dimension];
                if l2_normalize(mean) {
                    centroids[list * dimension..(list + 1) * dimension].copy_from_slice(mean);
                }
            }
        }

        // every vector lives in the list of its nearest final centroid
        let assignments = assign(slab, dimension, count, &centroids);
        Self::from_parts(nlist, centroids, assignments)
    }

    pub fn from_parts(nlist: usize, centroids: Vec<f32>, assignments: Vec<u32>) -> Self {
        let mut lists = vec![Vec::new(); nlist];
        for (id, list) in assignments.iter().enumerate() {
            if let Some(members) = lists.get_mut(*list as usize) {
                members.push(id as u32);
            }
        }
        Self {
            nlist,
            centroids,
            assignments,
            lists,
        }
    }

    /// Vector ids in the `nprobe` partitions closest to `query`, ascending.
    pub fn probe(&self, dimension: usize, query: &[f32], nprobe: usize) -> Vec<usize> {
        let mut scored: Vec<(usize, f32)> = (0..self.nlist)
            .map(|list| (list, dot(row(&self.centroids, dimension, list), query)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut ids: Vec<usize> = scored
            .iter()
            .take(nprobe.max(1))
            .flat_map(|(list, _)| self.lists[*list].iter().map(|id| *id as usize))
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Deterministic k-means++ seeding: start from vector 0, then repeatedly take
/// the vector farthest (squared cosine distance) from every chosen seed.
fn seed_centroids(slab: &[f32], dimension: usize, count: usize, nlist: usize) -> Vec<f32> {
    let mut centroids = Vec::with_capacity(nlist * dimension);
    let mut chosen = vec![false; count];
    let mut min_distances = vec![f32::MAX; count];
    let mut last = 0usize;
    centroids.extend_from_slice(row(slab, dimension, last));
    chosen[last] = true;

    for _ in 1..nlist {
        let seed = row(slab, dimension, last);
        min_distances
            .par_iter_mut()
            .enumerate()
            .for_each(|(id, best)| {
                let distance = (1.0 - dot(seed, row(slab, dimension, id))).max(0.0);
                *best = best.min(distance * distance);
            });

        let mut next: Option<(usize, f32)> = None;
        for (id, distance) in min_distances.iter().enumerate() {
            if chosen[id] {
                continue;
            }
            if next.map_or(true, |(_, best)| *distance > best) {
                next = Some((id, *distance));
            }
        }
        let Some((id, _)) = next else { break };
        last = id;
        chosen[id] = true;
        centroids.extend_from_slice(row(slab, dimension, id));
    }
    centroids
}

fn row(slab: &[f32], dimension: usize, id: usize) -> &[f32] {
    &slab[id * dimension..(id + 1) * dimension]
}

fn assign(slab: &[f32], dimension: usize, count: usize, centroids: &[f32]) -> Vec<u32> {
    (0..count)
        .into_par_iter()
        .map(|id| nearest(centroids, dimension, row(slab, dimension, id)))
        .collect()
}

fn nearest(centroids: &[f32], dimension: usize, vector: &[f32]) -> u32 {
    let mut best = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for (list, centroid) in centroids.chunks_exact(dimension.max(1)).enumerate() {
        let score = dot(centroid, vector);
        if score > best_score {
            best = list;
            best_score = score;
        }
    }
    best as u32
}
