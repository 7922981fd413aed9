//! In-memory ANN index wrapping an `hnsw_rs` graph
//!
//! Labels are `usize` and equal the table rowid. The graph keeps its own
//! copy of every point but does not expose retrieval by label, so the index
//! stores the (possibly normalized) vectors alongside it and answers
//! [`AnnIndex::get_by_label`] from that map.

use std::collections::BTreeMap;

use hnsw_rs::prelude::*;

use crate::distance::{inner_product_distance, squared_l2};
use crate::error::{Error, Result};
use crate::options::IndexOptions;
use crate::space::{DistanceType, VectorSpace};
use crate::vector::Vector;

/// Query-time ef floor, matching hnswlib's default.
const DEFAULT_EF_SEARCH: usize = 10;
/// Layer cap of the graph.
const NB_LAYER: usize = 16;

/// Squared Euclidean distance, the semantics of hnswlib's L2Space.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistSquaredL2;

impl Distance<f32> for DistSquaredL2 {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        squared_l2(va, vb)
    }
}

/// Inner-product distance `1 - <a, b>`, the semantics of hnswlib's
/// InnerProductSpace. Cosine uses the same kernel over unit-norm vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistInnerProduct;

impl Distance<f32> for DistInnerProduct {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        inner_product_distance(va, vb)
    }
}

enum Graph {
    L2(Hnsw<'static, f32, DistSquaredL2>),
    Ip(Hnsw<'static, f32, DistInnerProduct>),
}

/// HNSW index over integer labels.
pub struct AnnIndex {
    dim: usize,
    options: IndexOptions,
    graph: Graph,
    vectors: BTreeMap<usize, Vec<f32>>,
}

impl AnnIndex {
    /// Build an empty index for the given space. Normalization of inserted
    /// and query vectors is the caller's concern; for cosine (and for IP
    /// with normalization) the caller passes unit-norm vectors and the
    /// inner-product kernel yields the intended distances.
    pub fn new(space: &VectorSpace, options: &IndexOptions) -> Self {
        let graph = match space.distance_type {
            DistanceType::L2 => Graph::L2(Hnsw::new(
                options.m,
                options.max_elements,
                NB_LAYER,
                options.ef_construction,
                DistSquaredL2,
            )),
            DistanceType::InnerProduct | DistanceType::Cosine => Graph::Ip(Hnsw::new(
                options.m,
                options.max_elements,
                NB_LAYER,
                options.ef_construction,
                DistInnerProduct,
            )),
        };

        AnnIndex {
            dim: space.dim,
            options: *options,
            graph,
            vectors: BTreeMap::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Insert a point under `label`. Fails on a duplicate label or when the
    /// index already holds `max_elements` points; the index is unchanged on
    /// failure.
    pub fn add(&mut self, label: usize, vector: &[f32]) -> Result<()> {
        assert_eq!(vector.len(), self.dim);

        if self.vectors.contains_key(&label) {
            return Err(Error::DuplicateRowid(label as i64));
        }
        if self.vectors.len() >= self.options.max_elements {
            return Err(Error::CapacityExceeded {
                max_elements: self.options.max_elements,
            });
        }

        let owned = vector.to_vec();
        match &self.graph {
            Graph::L2(hnsw) => hnsw.insert((&owned, label)),
            Graph::Ip(hnsw) => hnsw.insert((&owned, label)),
        }
        self.vectors.insert(label, owned);
        Ok(())
    }

    /// k nearest neighbors of `query`, closest first. Returns fewer than `k`
    /// entries when the index holds fewer points.
    pub fn search_knn(&self, query: &[f32], k: usize) -> Vec<(f32, usize)> {
        assert_eq!(query.len(), self.dim);

        if k == 0 || self.vectors.is_empty() {
            return Vec::new();
        }

        let ef = k.max(DEFAULT_EF_SEARCH);
        let neighbours = match &self.graph {
            Graph::L2(hnsw) => hnsw.search(query, k, ef),
            Graph::Ip(hnsw) => hnsw.search(query, k, ef),
        };

        let mut result: Vec<(f32, usize)> = neighbours
            .into_iter()
            .map(|n| (n.distance, n.d_id))
            .collect();
        result.sort_by(|a, b| a.0.total_cmp(&b.0));
        result
    }

    /// Fetch the stored (possibly normalized) vector for `label`.
    pub fn get_by_label(&self, label: usize) -> Result<Vector> {
        self.vectors
            .get(&label)
            .map(|v| Vector::new(v.clone()))
            .ok_or(Error::NotFound(label as i64))
    }
}
