// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Arc, RwLock};

use super::{FingerprintIndex, IndexEntry};
use crate::errors::Result;
use crate::types::EmbeddingVector;

/// Read-shared handle over the current index.
///
/// Searches run on an `Arc` snapshot taken under a brief read lock. Updates
/// build the next index off to the side and swap it in under the write lock,
/// so a reader sees either the old or the new index in full.
#[derive(Debug)]
pub struct SharedIndex {
    current: RwLock<Arc<FingerprintIndex>>,
}

impl SharedIndex {
    pub fn new(index: FingerprintIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    pub fn snapshot(&self) -> Arc<FingerprintIndex> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a rebuilt index; returns the previous one.
    pub fn replace(&self, index: FingerprintIndex) -> Arc<FingerprintIndex> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, Arc::new(index))
    }

    /// Append to the current index. On error the current index is untouched.
    pub fn add_incremental(&self, items: Vec<(IndexEntry, EmbeddingVector)>) -> Result<()> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = FingerprintIndex::clone(&guard);
        next.add_incremental(items)?;
        *guard = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::errors::MatchError;
    use crate::index::IndexKind;

    fn entry(track: &str) -> IndexEntry {
        IndexEntry {
            track_id: track.to_string(),
            segment_index: 0,
            profile: None,
        }
    }

    #[test]
    fn snapshots_survive_updates() {
        let index =
            FingerprintIndex::build(vec![(entry("a"), vec![1.0, 0.0])], &IndexConfig::default())
                .expect("build");
        let shared = SharedIndex::new(index);
        let before = shared.snapshot();
        shared
            .add_incremental(vec![(entry("b"), vec![0.0, 1.0])])
            .expect("append");
        assert_eq!(before.len(), 1);
        assert_eq!(shared.snapshot().len(), 2);
    }

    #[test]
    fn failed_update_leaves_index_untouched() {
        let config = IndexConfig {
            kind: IndexKind::Ivf,
            ..IndexConfig::default()
        };
        let index =
            FingerprintIndex::build(vec![(entry("a"), vec![1.0, 0.0])], &config).expect("build");
        let shared = SharedIndex::new(index);
        let err = shared
            .add_incremental(vec![(entry("b"), vec![0.0, 1.0])])
            .expect_err("ivf");
        assert!(matches!(err, MatchError::IncrementalUnsupported { .. }));
        assert_eq!(shared.snapshot().len(), 1);
    }
}
