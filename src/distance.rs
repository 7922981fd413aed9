//! Distance kernels for the HNSW graph
//!
//! simsimd provides SIMD-optimized kernels with automatic CPU feature
//! detection (AVX512, AVX2, SSE, NEON). The kernels match hnswlib's spaces:
//! L2 is the *squared* Euclidean distance, inner-product distance is
//! `1 - <a, b>`.

use simsimd::SpatialSimilarity;

/// Squared Euclidean distance.
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    match f32::sqeuclidean(a, b) {
        Some(d) => d as f32,
        None => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
    }
}

/// Inner-product distance: `1 - <a, b>`.
///
/// For unit-norm inputs this equals the cosine distance.
#[inline]
pub fn inner_product_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let dot = match f32::dot(a, b) {
        Some(d) => d as f32,
        None => a.iter().zip(b).map(|(x, y)| x * y).sum(),
    };
    1.0 - dot
}
