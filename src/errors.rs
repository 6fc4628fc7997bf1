// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the matching engine
//!
//! Cache misses and hash mismatches are lookup outcomes, not errors; see
//! [`crate::cache::CacheLookup`].

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline- and storage-level failures surfaced to callers.
#[derive(Debug, Error)]
pub enum MatchError {
    /// The index structure cannot append without a full rebuild.
    #[error("incremental update is not supported by the {kind} index; run a full rebuild")]
    IncrementalUnsupported { kind: &'static str },

    /// Every query segment failed to embed.
    #[error("embedding unavailable: the provider failed for all {segments} query segments")]
    EmbeddingUnavailable { segments: usize },

    /// An index file was found without its id sidecar.
    #[error("index metadata sidecar missing at '{}'\n\nSuggestion: rebuild the index with 'audiomatch index --force'", path.display())]
    IndexMetadataMissing { path: PathBuf },

    /// The query deadline passed before any segment completed.
    #[error("query timed out after {elapsed_ms} ms before any segment completed")]
    QueryTimeout { elapsed_ms: u64 },

    /// The query carried no usable audio or embeddings.
    #[error("query has no usable input: {reason}")]
    EmptyQuery { reason: String },

    /// Searching an index that holds no vectors.
    #[error("fingerprint index is empty\n\nSuggestion: run 'audiomatch index <paths>' first")]
    EmptyIndex,

    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("corrupt index file '{}': {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("corrupt cache entry '{}': {reason}", path.display())]
    CorruptCache { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Embed(#[from] EmbedError),
}

impl MatchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the caller supplied nothing the engine could use, as opposed
    /// to an infrastructure failure.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyQuery { .. } | Self::DimensionMismatch { .. } | Self::InvalidConfig(_)
        )
    }
}

/// Failure reported by an embedding provider for a single segment.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbedError {
    #[error("segment {segment_index} of '{track_id}' is too short to embed ({samples} samples)")]
    SegmentTooShort {
        track_id: String,
        segment_index: usize,
        samples: usize,
    },

    #[error("unsupported scale {0}")]
    InvalidScale(f32),

    #[error("embedding provider failed: {0}")]
    Provider(String),
}

pub type Result<T, E = MatchError> = std::result::Result<T, E>;
