//! Multimedia similarity index: a thin wrapper around [`RTreeIndex`] keyed by
//! a pre-computed descriptor vector.
//!
//! The original `multimedia_inverted.py` / `multimedia_base.py` extract
//! descriptors from image files themselves (SIFT-style feature extraction,
//! k-means codebooks, histogram building via a process pool). That pipeline
//! is out of scope here; this index takes the descriptor vector as given and
//! only does the nearest-neighbour part, reusing the spatial index's
//! Euclidean distance.

use std::path::Path;

use crate::error::Result;
use crate::perf::OperationResult;
use crate::record::IndexRecord;
use crate::schema::Value;
use crate::secondary::rtree::RTreeIndex;

pub struct MultimediaIndex {
    inner: RTreeIndex,
}

impl MultimediaIndex {
    pub fn new(path: impl AsRef<Path>, dim: usize) -> Self {
        Self { inner: RTreeIndex::new(path, dim) }
    }

    pub fn index_vector(&self, primary_key: i32, descriptor: Vec<f32>) -> Result<OperationResult<bool>> {
        self.inner.insert(IndexRecord::new(Value::Array(descriptor), primary_key))
    }

    pub fn remove_vector(&self, primary_key: i32, descriptor: &[f32]) -> Result<OperationResult<bool>> {
        self.inner.delete_one(&Value::Array(descriptor.to_vec()), primary_key)
    }

    /// The `k` primary keys whose descriptors are closest to `query`.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<OperationResult<Vec<i32>>> {
        self.inner.knn_search(&Value::Array(query.to_vec()), k)
    }

    pub fn scan_all(&self) -> Result<OperationResult<Vec<IndexRecord>>> {
        self.inner.scan_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn nearest_finds_the_closest_descriptor() {
        let dir = tempdir().unwrap();
        let idx = MultimediaIndex::new(dir.path().join("mm.dat"), 3);
        idx.index_vector(1, vec![0.0, 0.0, 0.0]).unwrap();
        idx.index_vector(2, vec![1.0, 1.0, 1.0]).unwrap();
        idx.index_vector(3, vec![5.0, 5.0, 5.0]).unwrap();

        let hits = idx.nearest(&[0.1, 0.1, 0.1], 1).unwrap().data;
        assert_eq!(hits, vec![1]);
    }

    #[test]
    fn remove_vector_drops_it_from_future_queries() {
        let dir = tempdir().unwrap();
        let idx = MultimediaIndex::new(dir.path().join("mm.dat"), 2);
        idx.index_vector(1, vec![0.0, 0.0]).unwrap();
        idx.remove_vector(1, &[0.0, 0.0]).unwrap();
        assert!(idx.scan_all().unwrap().data.is_empty());
    }
}
