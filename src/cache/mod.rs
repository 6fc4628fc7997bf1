// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content-addressed embedding cache
//!
//! Entries are keyed by `(file_id, content_hash, model_hash)`. A key fully
//! determines its value, so an entry file is written once and never mutated;
//! a changed file or model produces a new key and the old entry is orphaned.
//!
//! Layout under the cache root:
//!
//! ```text
//! manifest.json          versioned list of live keys
//! entries/<key>.amc      magic, version, header JSON, f32 LE slab
//! ```

mod manifest;

pub(crate) use manifest::atomic_write_bytes;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::audio::BandProfile;
use crate::errors::{MatchError, Result};
use crate::hashing::cache_entry_key;
use crate::types::EmbeddingVector;
use manifest::{load_manifest, write_manifest, Manifest, ManifestEntry};

const ENTRY_MAGIC: &[u8; 4] = b"AMEC";
const ENTRY_VERSION: u32 = 1;
const ENTRY_EXT: &str = "amc";
const ENTRIES_DIR: &str = "entries";

/// Per-segment metadata stored alongside its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub segment_index: usize,
    pub start_offset: f32,
    pub duration: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<BandProfile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub file_id: String,
    pub content_hash: String,
    pub model_hash: String,
    pub dimension: usize,
    pub segments: Vec<SegmentMeta>,
    pub vectors: Vec<EmbeddingVector>,
}

/// Why a lookup did not hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// Nothing cached for this file id.
    Absent,
    /// The file id is cached, but under another content or model hash.
    HashMismatch,
    /// The manifest names an entry file that no longer exists.
    MissingFile,
    /// The entry file exists but cannot be decoded.
    Corrupt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss(MissReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The identical key was already present with its file intact.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub count: usize,
    pub total_size: u64,
}

#[derive(Serialize, Deserialize)]
struct EntryHeader {
    file_id: String,
    content_hash: String,
    model_hash: String,
    dimension: usize,
    segments: Vec<SegmentMeta>,
}

pub struct EmbeddingCache {
    root: PathBuf,
    manifest: RwLock<Manifest>,
}

impl EmbeddingCache {
    /// Open or create a cache rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let entries = root.join(ENTRIES_DIR);
        std::fs::create_dir_all(&entries).map_err(|source| MatchError::io(&entries, source))?;
        let manifest = load_manifest(&root);
        tracing::debug!(root = %root.display(), entries = manifest.entries.len(), "opened embedding cache");
        Ok(Self {
            root,
            manifest: RwLock::new(manifest),
        })
    }

    /// Flush the manifest.
    pub fn close(self) -> Result<()> {
        let manifest = self.read_manifest();
        write_manifest(&self.root, &manifest)
    }

    pub fn lookup(&self, file_id: &str, content_hash: &str, model_hash: &str) -> CacheLookup {
        let key = cache_entry_key(file_id, content_hash, model_hash);
        let record = {
            let manifest = self.read_manifest();
            match manifest.find(&key) {
                Some(record) => record.clone(),
                None if manifest.has_file_id(file_id) => {
                    return CacheLookup::Miss(MissReason::HashMismatch)
                }
                None => return CacheLookup::Miss(MissReason::Absent),
            }
        };

        let path = self.entry_path(&record.entry_file);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(file_id, path = %path.display(), "stale cache record: entry file missing");
                return CacheLookup::Miss(MissReason::MissingFile);
            }
            Err(err) => {
                tracing::warn!(file_id, path = %path.display(), error = %err, "cache entry unreadable");
                return CacheLookup::Miss(MissReason::Corrupt);
            }
        };

        match decode_entry(&path, &bytes) {
            Ok(entry)
                if entry.file_id == file_id
                    && entry.content_hash == content_hash
                    && entry.model_hash == model_hash =>
            {
                CacheLookup::Hit(entry)
            }
            Ok(_) => {
                tracing::warn!(file_id, path = %path.display(), "cache entry header does not match its key");
                CacheLookup::Miss(MissReason::Corrupt)
            }
            Err(err) => {
                tracing::warn!(file_id, error = %err, "corrupt cache entry");
                CacheLookup::Miss(MissReason::Corrupt)
            }
        }
    }

    pub fn get(&self, file_id: &str, content_hash: &str, model_hash: &str) -> Option<CacheEntry> {
        match self.lookup(file_id, content_hash, model_hash) {
            CacheLookup::Hit(entry) => Some(entry),
            CacheLookup::Miss(reason) => {
                tracing::debug!(file_id, ?reason, "cache miss");
                None
            }
        }
    }

    /// Store the vectors of one file. Re-putting an intact key is a no-op.
    pub fn put(
        &self,
        file_id: &str,
        content_hash: &str,
        model_hash: &str,
        segments: &[SegmentMeta],
        vectors: &[EmbeddingVector],
    ) -> Result<PutOutcome> {
        let key = cache_entry_key(file_id, content_hash, model_hash);
        let entry_file = format!("{key}.{ENTRY_EXT}");
        let path = self.entry_path(&entry_file);

        if let Some(record) = self.read_manifest().find(&key) {
            let intact = std::fs::metadata(&path)
                .map(|meta| meta.len() == record.size)
                .unwrap_or(false);
            if intact {
                return Ok(PutOutcome::Unchanged);
            }
        }

        let bytes = encode_entry(&path, file_id, content_hash, model_hash, segments, vectors)?;
        atomic_write_bytes(&path, &bytes)?;

        let record = ManifestEntry {
            key,
            file_id: file_id.to_string(),
            content_hash: content_hash.to_string(),
            model_hash: model_hash.to_string(),
            entry_file,
            size: bytes.len() as u64,
            segments: segments.len(),
        };

        let mut manifest = self.write_manifest_lock();
        manifest.upsert(record);
        write_manifest(&self.root, &manifest)?;
        tracing::debug!(file_id, segments = segments.len(), "cached embeddings");
        Ok(PutOutcome::Stored)
    }

    /// Remove every entry of `file_id`, regardless of hashes.
    pub fn invalidate(&self, file_id: &str) -> Result<usize> {
        let mut manifest = self.write_manifest_lock();
        let removed = manifest.remove_file_id(file_id);
        if removed.is_empty() {
            return Ok(0);
        }
        for record in &removed {
            let path = self.entry_path(&record.entry_file);
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    return Err(MatchError::io(path, err));
                }
            }
        }
        write_manifest(&self.root, &manifest)?;
        tracing::debug!(file_id, removed = removed.len(), "invalidated cache entries");
        Ok(removed.len())
    }

    /// Drop manifest records whose entry file was deleted.
    pub fn prune_stale(&self) -> Result<usize> {
        let mut manifest = self.write_manifest_lock();
        let before = manifest.entries.len();
        let root = self.root.clone();
        manifest
            .entries
            .retain(|record| root.join(ENTRIES_DIR).join(&record.entry_file).is_file());
        let pruned = before - manifest.entries.len();
        if pruned > 0 {
            write_manifest(&self.root, &manifest)?;
            tracing::info!(pruned, "pruned stale cache records");
        }
        Ok(pruned)
    }

    pub fn stats(&self) -> CacheStats {
        let manifest = self.read_manifest();
        CacheStats {
            count: manifest.entries.len(),
            total_size: manifest.entries.iter().map(|record| record.size).sum(),
        }
    }

    fn entry_path(&self, entry_file: &str) -> PathBuf {
        self.root.join(ENTRIES_DIR).join(entry_file)
    }

    fn read_manifest(&self) -> std::sync::RwLockReadGuard<'_, Manifest> {
        self.manifest.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_manifest_lock(&self) -> std::sync::RwLockWriteGuard<'_, Manifest> {
        self.manifest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn encode_entry(
    path: &Path,
    file_id: &str,
    content_hash: &str,
    model_hash: &str,
    segments: &[SegmentMeta],
    vectors: &[EmbeddingVector],
) -> Result<Vec<u8>> {
    if segments.len() != vectors.len() {
        return Err(MatchError::CorruptCache {
            path: path.to_path_buf(),
            reason: format!(
                "{} segments but {} vectors",
                segments.len(),
                vectors.len()
            ),
        });
    }
    let dimension = vectors.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(MatchError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }

    let header = serde_json::to_vec(&EntryHeader {
        file_id: file_id.to_string(),
        content_hash: content_hash.to_string(),
        model_hash: model_hash.to_string(),
        dimension,
        segments: segments.to_vec(),
    })?;

    let mut bytes = Vec::with_capacity(12 + header.len() + vectors.len() * dimension * 4);
    bytes.extend_from_slice(ENTRY_MAGIC);
    bytes.extend_from_slice(&ENTRY_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&header);
    for value in vectors.iter().flatten() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    Ok(bytes)
}

fn decode_entry(path: &Path, bytes: &[u8]) -> Result<CacheEntry> {
    let corrupt = |reason: String| MatchError::CorruptCache {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.len() < 12 || &bytes[..4] != ENTRY_MAGIC {
        return Err(corrupt("bad magic".to_string()));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != ENTRY_VERSION {
        return Err(corrupt(format!("unsupported entry version {version}")));
    }
    let header_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let slab_start = 12 + header_len;
    if bytes.len() < slab_start {
        return Err(corrupt("truncated header".to_string()));
    }
    let header: EntryHeader = serde_json::from_slice(&bytes[12..slab_start])
        .map_err(|e| corrupt(format!("header: {e}")))?;

    let slab = &bytes[slab_start..];
    let expected = header.segments.len() * header.dimension * 4;
    if slab.len() != expected {
        return Err(corrupt(format!(
            "slab holds {} bytes, expected {expected}",
            slab.len()
        )));
    }

    let values: Vec<f32> = slab
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    let vectors = if header.dimension == 0 {
        vec![Vec::new(); header.segments.len()]
    } else {
        values
            .chunks_exact(header.dimension)
            .map(<[f32]>::to_vec)
            .collect()
    };

    Ok(CacheEntry {
        file_id: header.file_id,
        content_hash: header.content_hash,
        model_hash: header.model_hash,
        dimension: header.dimension,
        segments: header.segments,
        vectors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn segments(count: usize) -> Vec<SegmentMeta> {
        (0..count)
            .map(|i| SegmentMeta {
                segment_index: i,
                start_offset: i as f32 * 3.5,
                duration: 3.5,
                profile: None,
            })
            .collect()
    }

    fn vectors(count: usize) -> Vec<EmbeddingVector> {
        (0..count).map(|i| vec![i as f32, 1.0, -0.5]).collect()
    }

    #[test]
    fn put_then_get_returns_vectors() {
        let dir = TempDir::new().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open");
        let outcome = cache
            .put("track", "c1", "m1", &segments(3), &vectors(3))
            .expect("put");
        assert_eq!(outcome, PutOutcome::Stored);

        let entry = cache.get("track", "c1", "m1").expect("hit");
        assert_eq!(entry.vectors, vectors(3));
        assert_eq!(entry.segments, segments(3));
        assert_eq!(entry.dimension, 3);
    }

    #[test]
    fn second_put_is_unchanged() {
        let dir = TempDir::new().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open");
        cache
            .put("track", "c1", "m1", &segments(2), &vectors(2))
            .expect("put");
        let before = cache.stats();
        let outcome = cache
            .put("track", "c1", "m1", &segments(2), &vectors(2))
            .expect("put again");
        assert_eq!(outcome, PutOutcome::Unchanged);
        assert_eq!(cache.stats(), before);
    }

    #[test]
    fn hash_change_is_a_mismatch_miss() {
        let dir = TempDir::new().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open");
        cache
            .put("track", "c1", "m1", &segments(1), &vectors(1))
            .expect("put");
        assert_eq!(
            cache.lookup("track", "c2", "m1"),
            CacheLookup::Miss(MissReason::HashMismatch)
        );
        assert_eq!(
            cache.lookup("track", "c1", "m2"),
            CacheLookup::Miss(MissReason::HashMismatch)
        );
        assert_eq!(
            cache.lookup("other", "c1", "m1"),
            CacheLookup::Miss(MissReason::Absent)
        );
    }

    #[test]
    fn deleted_entry_file_is_a_miss_and_prunable() {
        let dir = TempDir::new().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open");
        cache
            .put("track", "c1", "m1", &segments(1), &vectors(1))
            .expect("put");
        for file in std::fs::read_dir(dir.path().join(ENTRIES_DIR)).expect("read dir") {
            std::fs::remove_file(file.expect("entry").path()).expect("remove");
        }
        assert_eq!(
            cache.lookup("track", "c1", "m1"),
            CacheLookup::Miss(MissReason::MissingFile)
        );
        assert_eq!(cache.prune_stale().expect("prune"), 1);
        assert_eq!(cache.stats().count, 0);
    }

    #[test]
    fn garbage_entry_is_corrupt_miss() {
        let dir = TempDir::new().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open");
        cache
            .put("track", "c1", "m1", &segments(1), &vectors(1))
            .expect("put");
        let key = cache_entry_key("track", "c1", "m1");
        std::fs::write(
            dir.path().join(ENTRIES_DIR).join(format!("{key}.{ENTRY_EXT}")),
            b"not an entry",
        )
        .expect("overwrite");
        assert_eq!(
            cache.lookup("track", "c1", "m1"),
            CacheLookup::Miss(MissReason::Corrupt)
        );
        // a corrupt file is rewritten by the next put
        assert_eq!(
            cache
                .put("track", "c1", "m1", &segments(1), &vectors(1))
                .expect("put"),
            PutOutcome::Stored
        );
        assert!(cache.get("track", "c1", "m1").is_some());
    }

    #[test]
    fn invalidate_removes_all_hashes() {
        let dir = TempDir::new().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open");
        cache
            .put("track", "c1", "m1", &segments(1), &vectors(1))
            .expect("put");
        cache
            .put("track", "c2", "m1", &segments(1), &vectors(1))
            .expect("put");
        cache
            .put("keep", "c1", "m1", &segments(1), &vectors(1))
            .expect("put");
        assert_eq!(cache.invalidate("track").expect("invalidate"), 2);
        assert_eq!(cache.stats().count, 1);
        assert!(cache.get("keep", "c1", "m1").is_some());
    }

    #[test]
    fn reopen_sees_persisted_entries() {
        let dir = TempDir::new().expect("tempdir");
        {
            let cache = EmbeddingCache::open(dir.path()).expect("open");
            cache
                .put("track", "c1", "m1", &segments(2), &vectors(2))
                .expect("put");
            cache.close().expect("close");
        }
        let cache = EmbeddingCache::open(dir.path()).expect("reopen");
        assert_eq!(cache.stats().count, 1);
        assert!(cache.get("track", "c1", "m1").is_some());
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open");
        let err = cache
            .put("track", "c1", "m1", &segments(2), &vectors(1))
            .expect_err("length mismatch");
        assert!(matches!(err, MatchError::CorruptCache { .. }));
    }
}
