// SPDX-License-Identifier: MIT OR Apache-2.0

//! On-disk index format
//!
//! `index.bin` holds the vector slab and IVF tables:
//!
//! ```text
//! magic "AMFI" | version u32 | kind u8 | dim u32 | count u64 | slab f32 LE
//! [ivf only] nlist u32 | centroids f32 LE | assignments u32 LE
//! ```
//!
//! `index.meta.json` maps vector ids to tracks and carries a blake3 checksum
//! of the slab, so a binary without its sidecar is unusable.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::ivf::IvfTables;
use super::{FingerprintIndex, IndexEntry, IndexKind};
use crate::cache::atomic_write_bytes;
use crate::errors::{MatchError, Result};

pub const INDEX_FILE: &str = "index.bin";
pub const INDEX_META_FILE: &str = "index.meta.json";

const INDEX_MAGIC: &[u8; 4] = b"AMFI";
const INDEX_VERSION: u32 = 1;
const KIND_FLAT: u8 = 1;
const KIND_IVF: u8 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct IndexMeta {
    version: u32,
    kind: IndexKind,
    dimension: usize,
    count: usize,
    generation: u64,
    nprobe: usize,
    parallel_threshold: usize,
    checksum: String,
    entries: Vec<IndexEntry>,
}

fn slab_checksum(slab: &[f32]) -> String {
    let mut hasher = blake3::Hasher::new();
    for value in slab {
        hasher.update(&value.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

impl FingerprintIndex {
    pub fn exists(dir: &Path) -> bool {
        dir.join(INDEX_FILE).is_file()
    }

    /// Write the binary first, then the sidecar that validates it.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let mut bytes = Vec::with_capacity(21 + self.slab.len() * 4);
        bytes.extend_from_slice(INDEX_MAGIC);
        bytes.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        bytes.push(match self.kind {
            IndexKind::Ivf => KIND_IVF,
            _ => KIND_FLAT,
        });
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.slab {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        if let Some(ivf) = &self.ivf {
            bytes.extend_from_slice(&(ivf.nlist as u32).to_le_bytes());
            for value in &ivf.centroids {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
            for list in &ivf.assignments {
                bytes.extend_from_slice(&list.to_le_bytes());
            }
        }
        atomic_write_bytes(&dir.join(INDEX_FILE), &bytes)?;

        let meta = IndexMeta {
            version: INDEX_VERSION,
            kind: self.kind,
            dimension: self.dimension,
            count: self.len(),
            generation: self.generation,
            nprobe: self.nprobe,
            parallel_threshold: self.parallel_threshold,
            checksum: slab_checksum(&self.slab),
            entries: self.entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&meta)?;
        atomic_write_bytes(&dir.join(INDEX_META_FILE), &json)?;
        tracing::debug!(dir = %dir.display(), vectors = self.len(), "saved fingerprint index");
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let bin_path = dir.join(INDEX_FILE);
        let meta_path = dir.join(INDEX_META_FILE);
        let bytes = std::fs::read(&bin_path).map_err(|source| MatchError::io(&bin_path, source))?;
        if !meta_path.is_file() {
            return Err(MatchError::IndexMetadataMissing { path: meta_path });
        }
        let meta_bytes =
            std::fs::read(&meta_path).map_err(|source| MatchError::io(&meta_path, source))?;
        let meta: IndexMeta =
            serde_json::from_slice(&meta_bytes).map_err(|e| MatchError::CorruptIndex {
                path: meta_path.clone(),
                reason: format!("sidecar: {e}"),
            })?;

        let mut reader = Reader::new(&bin_path, &bytes);
        if reader.take(4)? != INDEX_MAGIC {
            return Err(reader.corrupt("bad magic"));
        }
        let version = reader.u32()?;
        if version != INDEX_VERSION || meta.version != INDEX_VERSION {
            return Err(reader.corrupt(&format!("unsupported index version {version}")));
        }
        let kind = match reader.u8()? {
            KIND_FLAT => IndexKind::Flat,
            KIND_IVF => IndexKind::Ivf,
            other => return Err(reader.corrupt(&format!("unknown index kind {other}"))),
        };
        let dimension = reader.u32()? as usize;
        let count = reader.u64()? as usize;
        if kind != meta.kind || dimension != meta.dimension || count != meta.count {
            return Err(reader.corrupt("header disagrees with sidecar"));
        }
        if meta.entries.len() != count {
            return Err(reader.corrupt("sidecar entry count disagrees with header"));
        }

        let slab = reader.f32s(count * dimension)?;
        if slab_checksum(&slab) != meta.checksum {
            return Err(reader.corrupt("slab checksum mismatch"));
        }

        let ivf = if kind == IndexKind::Ivf {
            let nlist = reader.u32()? as usize;
            let centroids = reader.f32s(nlist * dimension)?;
            let assignments = reader.u32s(count)?;
            if assignments.iter().any(|list| *list as usize >= nlist) {
                return Err(reader.corrupt("assignment outside partition table"));
            }
            Some(IvfTables::from_parts(nlist, centroids, assignments))
        } else {
            None
        };
        if !reader.is_done() {
            return Err(reader.corrupt("trailing bytes"));
        }

        tracing::debug!(dir = %dir.display(), vectors = count, kind = %kind, "loaded fingerprint index");
        Ok(Self {
            kind,
            dimension,
            slab,
            entries: meta.entries,
            generation: meta.generation,
            ivf,
            nprobe: meta.nprobe,
            parallel_threshold: meta.parallel_threshold,
        })
    }
}

struct Reader<'a> {
    path: PathBuf,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(path: &Path, bytes: &'a [u8]) -> Self {
        Self {
            path: path.to_path_buf(),
            bytes,
            pos: 0,
        }
    }

    fn corrupt(&self, reason: &str) -> MatchError {
        MatchError::CorruptIndex {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| self.corrupt("truncated"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn f32s(&mut self, count: usize) -> Result<Vec<f32>> {
        let len = count
            .checked_mul(4)
            .ok_or_else(|| self.corrupt("size overflow"))?;
        Ok(self
            .take(len)?
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn u32s(&mut self, count: usize) -> Result<Vec<u32>> {
        let len = count
            .checked_mul(4)
            .ok_or_else(|| self.corrupt("size overflow"))?;
        Ok(self
            .take(len)?
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn is_done(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use tempfile::TempDir;

    fn items(count: usize) -> Vec<(IndexEntry, Vec<f32>)> {
        (0..count)
            .map(|i| {
                let angle = i as f32 * 0.37;
                (
                    IndexEntry {
                        track_id: format!("track-{}", i % 5),
                        segment_index: i / 5,
                        profile: None,
                    },
                    vec![angle.cos(), angle.sin(), 0.5],
                )
            })
            .collect()
    }

    #[test]
    fn ivf_roundtrip_preserves_search() {
        let dir = TempDir::new().expect("tempdir");
        let config = IndexConfig {
            kind: IndexKind::Ivf,
            nprobe: 2,
            ..IndexConfig::default()
        };
        let index = FingerprintIndex::build(items(40), &config).expect("build");
        index.save(dir.path()).expect("save");
        let loaded = FingerprintIndex::load(dir.path()).expect("load");
        assert_eq!(loaded, index);
        let query = [0.2, 0.9, 0.4];
        assert_eq!(
            loaded.search(&query, 5).expect("search"),
            index.search(&query, 5).expect("search")
        );
    }

    #[test]
    fn missing_sidecar_is_reported() {
        let dir = TempDir::new().expect("tempdir");
        let index = FingerprintIndex::build(items(4), &IndexConfig::default()).expect("build");
        index.save(dir.path()).expect("save");
        std::fs::remove_file(dir.path().join(INDEX_META_FILE)).expect("remove");
        assert!(matches!(
            FingerprintIndex::load(dir.path()),
            Err(MatchError::IndexMetadataMissing { .. })
        ));
    }

    #[test]
    fn tampered_slab_fails_checksum() {
        let dir = TempDir::new().expect("tempdir");
        let index = FingerprintIndex::build(items(4), &IndexConfig::default()).expect("build");
        index.save(dir.path()).expect("save");
        let path = dir.path().join(INDEX_FILE);
        let mut bytes = std::fs::read(&path).expect("read");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).expect("write");
        assert!(matches!(
            FingerprintIndex::load(dir.path()),
            Err(MatchError::CorruptIndex { .. })
        ));
    }
}
