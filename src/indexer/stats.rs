// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted statistics of the last index run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::atomic_write_bytes;
use crate::errors::Result;

pub const STATS_FILE: &str = "stats.json";
const STATS_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RunTimingsMs {
    pub scan_ms: Option<u64>,
    pub embed_ms: Option<u64>,
    pub index_ms: Option<u64>,
    pub save_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CacheReuseStats {
    pub hit: u64,
    pub miss: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LastRunStats {
    /// `build`, `incremental` or `rebuild`.
    pub mode: String,
    pub force: bool,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub total_ms: u64,
    pub timings_ms: RunTimingsMs,
    pub cache_reuse: CacheReuseStats,
    pub indexed_tracks: usize,
    pub skipped_tracks: usize,
    pub failed_tracks: usize,
    pub segments: usize,
    pub failed_segments: usize,
}

impl Default for LastRunStats {
    fn default() -> Self {
        Self {
            mode: "unknown".to_string(),
            force: false,
            started_at_ms: 0,
            finished_at_ms: 0,
            total_ms: 0,
            timings_ms: RunTimingsMs::default(),
            cache_reuse: CacheReuseStats::default(),
            indexed_tracks: 0,
            skipped_tracks: 0,
            failed_tracks: 0,
            segments: 0,
            failed_segments: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PersistedStats {
    pub schema_version: String,
    pub last_run: Option<LastRunStats>,
}

impl Default for PersistedStats {
    fn default() -> Self {
        Self {
            schema_version: STATS_SCHEMA_VERSION.to_string(),
            last_run: None,
        }
    }
}

pub fn now_epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

pub fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

pub fn stats_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATS_FILE)
}

pub fn load_stats(state_dir: &Path) -> Option<PersistedStats> {
    let raw = std::fs::read_to_string(stats_path(state_dir)).ok()?;
    serde_json::from_str(&raw).ok()
}

pub fn persist_last_run(state_dir: &Path, run: LastRunStats) -> Result<()> {
    let mut state = load_stats(state_dir).unwrap_or_default();
    state.schema_version = STATS_SCHEMA_VERSION.to_string();
    state.last_run = Some(run);

    let bytes = serde_json::to_vec_pretty(&state)?;
    atomic_write_bytes(&stats_path(state_dir), &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn last_run_roundtrips() {
        let dir = TempDir::new().expect("tempdir");
        let run = LastRunStats {
            mode: "build".to_string(),
            indexed_tracks: 3,
            segments: 27,
            cache_reuse: CacheReuseStats { hit: 1, miss: 2 },
            ..LastRunStats::default()
        };
        persist_last_run(dir.path(), run.clone()).expect("persist");
        let loaded = load_stats(dir.path()).expect("stats");
        assert_eq!(loaded.schema_version, STATS_SCHEMA_VERSION);
        assert_eq!(loaded.last_run, Some(run));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(
            stats_path(dir.path()),
            r#"{"last_run": {"mode": "incremental"}}"#,
        )
        .expect("write");
        let loaded = load_stats(dir.path()).expect("stats");
        let run = loaded.last_run.expect("run");
        assert_eq!(run.mode, "incremental");
        assert_eq!(run.indexed_tracks, 0);
    }
}
