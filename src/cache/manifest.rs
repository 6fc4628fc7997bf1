// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cache manifest: the versioned list of live entry keys.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::{MatchError, Result};

pub(crate) const MANIFEST_VERSION: u32 = 1;
pub(crate) const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct ManifestEntry {
    pub key: String,
    pub file_id: String,
    pub content_hash: String,
    pub model_hash: String,
    /// File name under `entries/`.
    pub entry_file: String,
    pub size: u64,
    pub segments: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: Vec::new(),
        }
    }
}

impl Manifest {
    pub fn find(&self, key: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn has_file_id(&self, file_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.file_id == file_id)
    }

    /// Insert or replace the record with the same key.
    pub fn upsert(&mut self, record: ManifestEntry) {
        match self.entries.iter_mut().find(|entry| entry.key == record.key) {
            Some(existing) => *existing = record,
            None => self.entries.push(record),
        }
    }

    pub fn remove_file_id(&mut self, file_id: &str) -> Vec<ManifestEntry> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.file_id == file_id);
        self.entries = kept;
        removed
    }
}

/// Load the manifest; a missing, unreadable or foreign-version file starts empty.
pub(crate) fn load_manifest(root: &Path) -> Manifest {
    let path = root.join(MANIFEST_FILE);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Manifest::default();
    };
    match serde_json::from_str::<Manifest>(&content) {
        Ok(manifest) if manifest.version == MANIFEST_VERSION => manifest,
        Ok(manifest) => {
            tracing::warn!(
                path = %path.display(),
                found = manifest.version,
                expected = MANIFEST_VERSION,
                "cache manifest version changed; starting empty"
            );
            Manifest::default()
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "unreadable cache manifest; starting empty");
            Manifest::default()
        }
    }
}

pub(crate) fn write_manifest(root: &Path, manifest: &Manifest) -> Result<()> {
    let mut sorted = manifest.clone();
    sorted.entries.sort_by(|a, b| a.key.cmp(&b.key));
    let content = serde_json::to_string_pretty(&sorted)?;
    atomic_write_bytes(&root.join(MANIFEST_FILE), content.as_bytes())
}

/// Write through a uniquely named temp file in the same directory, then rename.
pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Err(MatchError::io(
            path,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot atomically write a path without parent",
            ),
        ));
    };
    std::fs::create_dir_all(parent).map_err(|source| MatchError::io(parent, source))?;

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let tmp_name = format!(
        ".{}.tmp-{}-{:?}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("audiomatch"),
        std::process::id(),
        std::thread::current().id(),
        nonce
    )
    .replace(['(', ')'], "");
    let tmp_path = parent.join(tmp_name);

    {
        let mut file = File::create(&tmp_path).map_err(|source| MatchError::io(&tmp_path, source))?;
        file.write_all(bytes)
            .map_err(|source| MatchError::io(&tmp_path, source))?;
        file.sync_all()
            .map_err(|source| MatchError::io(&tmp_path, source))?;
    }

    if let Err(err) = std::fs::rename(&tmp_path, path) {
        if path.exists() {
            let _ = std::fs::remove_file(path);
            std::fs::rename(&tmp_path, path).map_err(|source| MatchError::io(path, source))?;
        } else {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(MatchError::io(path, err));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(key: &str, file_id: &str) -> ManifestEntry {
        ManifestEntry {
            key: key.to_string(),
            file_id: file_id.to_string(),
            content_hash: "c".to_string(),
            model_hash: "m".to_string(),
            entry_file: format!("{key}.amc"),
            size: 10,
            segments: 1,
        }
    }

    #[test]
    fn manifest_roundtrip_sorts_by_key() {
        let dir = TempDir::new().expect("tempdir");
        let mut manifest = Manifest::default();
        manifest.upsert(record("b", "x"));
        manifest.upsert(record("a", "y"));
        write_manifest(dir.path(), &manifest).expect("write");

        let loaded = load_manifest(dir.path());
        let keys: Vec<&str> = loaded.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn foreign_version_starts_empty() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"version": 99, "entries": []}"#,
        )
        .expect("write");
        assert!(load_manifest(dir.path()).entries.is_empty());
    }

    #[test]
    fn remove_file_id_takes_every_hash() {
        let mut manifest = Manifest::default();
        manifest.upsert(record("k1", "track"));
        manifest.upsert(record("k2", "track"));
        manifest.upsert(record("k3", "other"));
        assert_eq!(manifest.remove_file_id("track").len(), 2);
        assert_eq!(manifest.entries.len(), 1);
    }

    #[test]
    fn atomic_write_replaces_existing() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("file.bin");
        atomic_write_bytes(&path, b"one").expect("first write");
        atomic_write_bytes(&path, b"two").expect("second write");
        assert_eq!(std::fs::read(&path).expect("read"), b"two");
    }
}
