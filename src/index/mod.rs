// SPDX-License-Identifier: MIT OR Apache-2.0

//! Approximate-nearest-neighbor fingerprint index
//!
//! Vectors are stored unit-normalized in one contiguous slab, so similarity
//! is a dot product. `Flat` scans everything; `Ivf` probes the closest
//! k-means partitions and re-ranks exactly.

mod fingerprint;
mod ivf;
mod persist;
mod shared;

pub use fingerprint::{FingerprintIndex, IndexStats};
pub use persist::{INDEX_FILE, INDEX_META_FILE};
pub use shared::SharedIndex;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::audio::BandProfile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Flat below `ivf_min_vectors`, IVF above.
    #[default]
    Auto,
    Flat,
    Ivf,
}

impl IndexKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Flat => "flat",
            Self::Ivf => "ivf",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "flat" => Ok(Self::Flat),
            "ivf" => Ok(Self::Ivf),
            other => Err(format!(
                "invalid index kind '{other}'. Expected one of: auto, flat, ivf"
            )),
        }
    }
}

/// What a stored vector belongs to. The vector id is its insertion position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub track_id: String,
    pub segment_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<BandProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub vector_id: usize,
    pub similarity: f32,
}
