//! Embedding providers.
//!
//! A provider maps an ordered batch of texts to an ordered batch of
//! unit-norm vectors of its declared dimension. Two implementations exist:
//!
//! - [`local::LocalProvider`] -- ONNX inference on this machine, lazily
//!   loaded and serialized around the model handle.
//! - [`remote::RemoteProvider`] -- HTTP POST to a configured endpoint with
//!   bearer auth.
//!
//! Providers are selected at container creation and immutable for the
//! container's lifetime (`ProviderIdentity`). Calls are synchronous and may
//! block for seconds; async callers dispatch them to the blocking pool.

pub mod local;
pub mod model_manager;
pub mod remote;

use crate::error::FathomResult;
use crate::types::ProviderIdentity;

/// Capability set shared by all embedding backends.
pub trait EmbeddingProvider: Send + Sync {
    /// The identity this provider serves.
    fn identity(&self) -> &ProviderIdentity;

    /// Embed a batch of texts, preserving input order.
    ///
    /// Every returned vector is unit-norm with length equal to
    /// `identity().dimension`. Blocking; call from a worker thread.
    fn embed(&self, texts: &[&str]) -> FathomResult<Vec<Vec<f32>>>;
}

/// Normalize a vector to unit length in place. Zero vectors are left as-is.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity between two equal-length vectors.
///
/// For unit-norm inputs this is the dot product; the denominator guards
/// against vectors that skipped normalization.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let c = [1.0, 0.0];
        assert!((cosine_similarity(&a, &b)).abs() < 1e-6);
        assert!((cosine_similarity(&a, &c) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &a), 0.0);
    }
}
