// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding providers
//!
//! The production model is an external collaborator reached through
//! [`EmbeddingProvider`]. [`SpectralEmbedder`] is the deterministic baseline
//! bundled with the crate.

mod spectral;

pub use spectral::SpectralEmbedder;

use crate::errors::EmbedError;
use crate::hashing;
use crate::types::{AudioSegment, EmbeddingVector};

/// Produces one embedding per segment and scale.
///
/// Implementations must be deterministic for identical input under a fixed
/// model configuration, and must report failures rather than zero-fill.
pub trait EmbeddingProvider: Send + Sync {
    fn model_id(&self) -> &str;

    /// Configuration that affects output; folded into the model hash.
    fn config_fingerprint(&self) -> String;

    fn dimension(&self) -> usize;

    fn embed(&self, segment: &AudioSegment, scale: f32) -> Result<EmbeddingVector, EmbedError>;

    /// Batch size the provider handles efficiently; 1 means no batching.
    fn preferred_batch_size(&self) -> usize {
        1
    }

    fn embed_batch(
        &self,
        segments: &[AudioSegment],
        scale: f32,
    ) -> Result<Vec<EmbeddingVector>, EmbedError> {
        segments.iter().map(|s| self.embed(s, scale)).collect()
    }

    fn model_hash(&self) -> String {
        hashing::model_hash(self.model_id(), &self.config_fingerprint())
    }
}

/// Embed every segment, one result per input in order.
///
/// Batches follow the provider's preferred size; a failed batch is retried
/// segment by segment so one bad segment never poisons its neighbours.
pub fn embed_segments(
    provider: &dyn EmbeddingProvider,
    segments: &[AudioSegment],
    scale: f32,
) -> Vec<Result<EmbeddingVector, EmbedError>> {
    let batch = provider.preferred_batch_size().max(1);
    if batch == 1 {
        return segments.iter().map(|s| provider.embed(s, scale)).collect();
    }

    let mut out = Vec::with_capacity(segments.len());
    for chunk in segments.chunks(batch) {
        match provider.embed_batch(chunk, scale) {
            Ok(vectors) if vectors.len() == chunk.len() => out.extend(vectors.into_iter().map(Ok)),
            Ok(vectors) => {
                tracing::debug!(
                    expected = chunk.len(),
                    got = vectors.len(),
                    "batch size mismatch; embedding individually"
                );
                out.extend(chunk.iter().map(|s| provider.embed(s, scale)));
            }
            Err(err) => {
                tracing::debug!(error = %err, "batch embedding failed; embedding individually");
                out.extend(chunk.iter().map(|s| provider.embed(s, scale)));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct BatchFails {
        single_calls: AtomicUsize,
    }

    impl EmbeddingProvider for BatchFails {
        fn model_id(&self) -> &str {
            "batch-fails"
        }
        fn config_fingerprint(&self) -> String {
            String::new()
        }
        fn dimension(&self) -> usize {
            1
        }
        fn embed(&self, segment: &AudioSegment, _scale: f32) -> Result<EmbeddingVector, EmbedError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![segment.segment_index as f32])
        }
        fn preferred_batch_size(&self) -> usize {
            4
        }
        fn embed_batch(
            &self,
            _segments: &[AudioSegment],
            _scale: f32,
        ) -> Result<Vec<EmbeddingVector>, EmbedError> {
            Err(EmbedError::Provider("accelerator unavailable".to_string()))
        }
    }

    fn segment(index: usize) -> AudioSegment {
        AudioSegment {
            track_id: "t".to_string(),
            segment_index: index,
            start_offset: 0.0,
            sample_rate: 8_000,
            samples: Arc::from(vec![0.0f32; 8]),
        }
    }

    #[test]
    fn failed_batches_degrade_to_single_calls() {
        let provider = BatchFails {
            single_calls: AtomicUsize::new(0),
        };
        let segments: Vec<AudioSegment> = (0..6).map(segment).collect();
        let results = embed_segments(&provider, &segments, 1.0);
        assert_eq!(results.len(), 6);
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 6);
        assert_eq!(results[5].as_ref().expect("ok"), &vec![5.0]);
    }
}
