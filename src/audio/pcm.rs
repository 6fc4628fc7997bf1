// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw mono f32 little-endian PCM files.
//!
//! Decoding and normalization happen upstream; this crate only reads the
//! already-normalized sample stream.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::errors::{MatchError, Result};
use crate::types::AudioClip;

/// Extensions recognized as raw PCM.
pub const PCM_EXTENSIONS: &[&str] = &["f32", "pcm", "raw"];

/// Read a raw f32le file into an in-memory clip. Non-finite samples become
/// silence.
pub fn read_pcm_f32le(path: &Path, sample_rate: u32) -> Result<AudioClip> {
    let bytes = std::fs::read(path).map_err(|source| MatchError::io(path, source))?;
    if bytes.len() % 4 != 0 {
        return Err(MatchError::EmptyQuery {
            reason: format!(
                "'{}' is not f32 PCM: {} bytes is not a multiple of 4",
                path.display(),
                bytes.len()
            ),
        });
    }

    let samples = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .map(|value| if value.is_finite() { value } else { 0.0 })
        .collect();

    Ok(AudioClip::new(sample_rate, samples))
}

pub fn write_pcm_f32le(path: &Path, samples: &[f32]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| MatchError::io(parent, source))?;
    }
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    let mut file = File::create(path).map_err(|source| MatchError::io(path, source))?;
    file.write_all(&bytes)
        .map_err(|source| MatchError::io(path, source))?;
    Ok(())
}

pub fn is_pcm_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_ascii_lowercase();
            PCM_EXTENSIONS.iter().any(|candidate| *candidate == lower)
        })
        .unwrap_or(false)
}
