//! Spatial secondary index over `ARRAY[FLOAT, d]` keys.
//!
//! Per spec.md §1 this boundary is "library-grade work, not the hard part of
//! this repo": rather than a balanced R-tree with minimum bounding
//! rectangles, entries are kept in a flat, tombstoned slot file and every
//! spatial query does a linear scan computing Euclidean distance. This keeps
//! the coordinator's `radius`/`knn` contract (spec.md §4.7) real without the
//! tree-balancing machinery.

use std::path::{Path, PathBuf};

use crate::pagefile::PageFile;
use crate::perf::{OperationResult, PerformanceTracker};
use crate::record::IndexRecord;
use crate::schema::{Type, Value};
use crate::secondary::SecondaryIndex;

/// Euclidean distance between two points of equal dimension.
pub fn distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

fn as_point(value: &Value) -> &[f32] {
    match value {
        Value::Array(v) => v,
        _ => panic!("spatial index requires an ARRAY[FLOAT, d] value"),
    }
}

pub struct RTreeIndex {
    path: PathBuf,
    dim: usize,
    slot_size: usize,
}

impl RTreeIndex {
    pub fn new(path: impl AsRef<Path>, dim: usize) -> Self {
        let slot_size = IndexRecord::size(Type::Array(dim));
        Self { path: path.as_ref().to_path_buf(), dim, slot_size }
    }

    fn file(&self) -> crate::error::Result<PageFile> {
        PageFile::open(&self.path, self.slot_size)
    }

    fn read_all(&self, file: &mut PageFile, tracker: &mut PerformanceTracker) -> crate::error::Result<Vec<(usize, Option<IndexRecord>)>> {
        let total = file.block_count()? as usize;
        let mut out = Vec::with_capacity(total);
        for i in 0..total {
            let buf = file.read_block(i, tracker)?;
            let entry = if buf.iter().all(|&b| b == 0) {
                None
            } else {
                Some(IndexRecord::unpack_from(&buf, 0, Type::Array(self.dim)))
            };
            out.push((i, entry));
        }
        Ok(out)
    }

    fn write_slot(&self, file: &mut PageFile, i: usize, entry: Option<&IndexRecord>, tracker: &mut PerformanceTracker) -> crate::error::Result<()> {
        let mut buf = vec![0u8; self.slot_size];
        if let Some(e) = entry {
            e.pack_into(&mut buf, 0, Type::Array(self.dim))?;
        }
        file.write_block(i, &buf, tracker)
    }

    pub fn insert(&self, entry: IndexRecord) -> crate::error::Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let slots = self.read_all(&mut file, &mut tracker)?;
        for (i, existing) in &slots {
            if let Some(e) = existing {
                if e.value == entry.value && e.primary_key == entry.primary_key {
                    return Ok(tracker.end_operation(true, false));
                }
                let _ = i;
            }
        }
        let free_slot = slots.iter().find(|(_, e)| e.is_none()).map(|(i, _)| *i);
        let target = free_slot.unwrap_or(slots.len());
        self.write_slot(&mut file, target, Some(&entry), &mut tracker)?;
        Ok(tracker.end_operation(true, false))
    }

    pub fn search(&self, value: &Value) -> crate::error::Result<OperationResult<Vec<i32>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let slots = self.read_all(&mut file, &mut tracker)?;
        let out = slots
            .into_iter()
            .filter_map(|(_, e)| e)
            .filter(|e| &e.value == value)
            .map(|e| e.primary_key)
            .collect();
        Ok(tracker.end_operation(out, false))
    }

    pub fn delete_one(&self, value: &Value, primary_key: i32) -> crate::error::Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let slots = self.read_all(&mut file, &mut tracker)?;
        for (i, existing) in slots {
            if let Some(e) = existing {
                if &e.value == value && e.primary_key == primary_key {
                    self.write_slot(&mut file, i, None, &mut tracker)?;
                    return Ok(tracker.end_operation(true, false));
                }
            }
        }
        Ok(tracker.end_operation(false, false))
    }

    pub fn delete_all(&self, value: &Value) -> crate::error::Result<OperationResult<Vec<i32>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let slots = self.read_all(&mut file, &mut tracker)?;
        let mut removed = Vec::new();
        for (i, existing) in slots {
            if let Some(e) = existing {
                if &e.value == value {
                    self.write_slot(&mut file, i, None, &mut tracker)?;
                    removed.push(e.primary_key);
                }
            }
        }
        Ok(tracker.end_operation(removed, false))
    }

    pub fn scan_all(&self) -> crate::error::Result<OperationResult<Vec<IndexRecord>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let slots = self.read_all(&mut file, &mut tracker)?;
        let out = slots.into_iter().filter_map(|(_, e)| e).collect();
        Ok(tracker.end_operation(out, false))
    }

    /// Every primary key whose point lies within `radius` of `center`.
    pub fn radius_search(&self, center: &Value, radius: f32) -> crate::error::Result<OperationResult<Vec<i32>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let slots = self.read_all(&mut file, &mut tracker)?;
        let point = as_point(center);
        let out = slots
            .into_iter()
            .filter_map(|(_, e)| e)
            .filter(|e| distance(as_point(&e.value), point) <= radius)
            .map(|e| e.primary_key)
            .collect();
        Ok(tracker.end_operation(out, false))
    }

    /// The `k` primary keys whose points are nearest to `center`.
    pub fn knn_search(&self, center: &Value, k: usize) -> crate::error::Result<OperationResult<Vec<i32>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let slots = self.read_all(&mut file, &mut tracker)?;
        let point = as_point(center);
        let mut ranked: Vec<(f32, i32)> = slots
            .into_iter()
            .filter_map(|(_, e)| e)
            .map(|e| (distance(as_point(&e.value), point), e.primary_key))
            .collect();
        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);
        Ok(tracker.end_operation(ranked.into_iter().map(|(_, pk)| pk).collect(), false))
    }

    pub fn range_search(&self, _lo: &Value, _hi: &Value) -> crate::error::Result<OperationResult<Vec<i32>>> {
        Err(crate::error::Error::UnsupportedPredicate(
            "spatial index serves radius/knn queries, not a scalar range".into(),
        ))
    }
}

impl SecondaryIndex for RTreeIndex {
    fn insert(&mut self, entry: IndexRecord) -> crate::error::Result<OperationResult<bool>> {
        RTreeIndex::insert(self, entry)
    }
    fn delete_one(&mut self, value: &Value, primary_key: i32) -> crate::error::Result<OperationResult<bool>> {
        RTreeIndex::delete_one(self, value, primary_key)
    }
    fn delete_all(&mut self, value: &Value) -> crate::error::Result<OperationResult<Vec<i32>>> {
        RTreeIndex::delete_all(self, value)
    }
    fn search(&mut self, value: &Value) -> crate::error::Result<OperationResult<Vec<i32>>> {
        RTreeIndex::search(self, value)
    }
    fn range_search(&mut self, lo: &Value, hi: &Value) -> crate::error::Result<OperationResult<Vec<i32>>> {
        RTreeIndex::range_search(self, lo, hi)
    }
    fn scan_all(&mut self) -> crate::error::Result<OperationResult<Vec<IndexRecord>>> {
        RTreeIndex::scan_all(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn idx(dir: &Path) -> RTreeIndex {
        RTreeIndex::new(dir.join("spatial.dat"), 2)
    }

    fn pt(x: f32, y: f32, pk: i32) -> IndexRecord {
        IndexRecord::new(Value::Array(vec![x, y]), pk)
    }

    #[test]
    fn radius_search_finds_nearby_points_only() {
        let dir = tempdir().unwrap();
        let t = idx(dir.path());
        t.insert(pt(0.0, 0.0, 1)).unwrap();
        t.insert(pt(1.0, 0.0, 2)).unwrap();
        t.insert(pt(10.0, 10.0, 3)).unwrap();
        let mut hits = t.radius_search(&Value::Array(vec![0.0, 0.0]), 2.0).unwrap().data;
        hits.sort();
        assert_eq!(hits, vec![1, 2]);
    }

    #[test]
    fn knn_search_returns_closest_k_in_order() {
        let dir = tempdir().unwrap();
        let t = idx(dir.path());
        t.insert(pt(5.0, 0.0, 1)).unwrap();
        t.insert(pt(1.0, 0.0, 2)).unwrap();
        t.insert(pt(3.0, 0.0, 3)).unwrap();
        let hits = t.knn_search(&Value::Array(vec![0.0, 0.0]), 2).unwrap().data;
        assert_eq!(hits, vec![2, 3]);
    }

    #[test]
    fn delete_then_insert_reuses_a_tombstoned_slot() {
        let dir = tempdir().unwrap();
        let t = idx(dir.path());
        t.insert(pt(0.0, 0.0, 1)).unwrap();
        assert!(t.delete_one(&Value::Array(vec![0.0, 0.0]), 1).unwrap().data);
        t.insert(pt(2.0, 2.0, 2)).unwrap();
        let scan = t.scan_all().unwrap().data;
        assert_eq!(scan.len(), 1);
        assert_eq!(scan[0].primary_key, 2);
    }
}
