// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content and model fingerprints used as cache invalidation keys.

use crate::types::AudioClip;

const SAMPLE_CHUNK: usize = 16 * 1024;

/// blake3 over the sample rate and the little-endian sample bytes.
pub fn content_hash(clip: &AudioClip) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&clip.sample_rate.to_le_bytes());
    hasher.update(&[0]);
    let mut buf = Vec::with_capacity(SAMPLE_CHUNK * 4);
    for chunk in clip.samples.chunks(SAMPLE_CHUNK) {
        buf.clear();
        for sample in chunk {
            buf.extend_from_slice(&sample.to_le_bytes());
        }
        hasher.update(&buf);
    }
    hasher.finalize().to_hex().to_string()
}

/// Fingerprint of an embedding model identity plus its configuration.
pub fn model_hash(model_id: &str, config_fingerprint: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(config_fingerprint.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Model hash specialized to one resampling scale.
///
/// The scale is part of the processing configuration, so embeddings of the
/// same file at different scales never share a cache key.
pub fn scaled_model_hash(model_hash: &str, scale: f32) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model_hash.as_bytes());
    hasher.update(&[0]);
    hasher.update(&scale.to_bits().to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

/// File-system-safe key of one cache entry.
pub fn cache_entry_key(file_id: &str, content_hash: &str, model_hash: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(file_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(content_hash.as_bytes());
    hasher.update(&[0]);
    hasher.update(model_hash.as_bytes());
    let hex = hasher.finalize().to_hex().to_string();
    hex[..32].to_string()
}
