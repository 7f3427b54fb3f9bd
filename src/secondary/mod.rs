//! Unclustered secondary indexes: B+ tree, extendible hash, R-tree, and
//! inverted-text, all speaking the same `(value, primary_key)` contract so
//! the coordinator can treat them uniformly.

pub mod bptree;
pub mod fulltext;
pub mod hash;
pub mod multimedia;
pub mod rtree;

use crate::error::Result;
use crate::perf::OperationResult;
use crate::record::IndexRecord;
use crate::schema::Value;

/// Contract shared by every unclustered secondary index.
///
/// `range_search` is not implemented by every index (hash has no useful key
/// order); those implementations return `Error::UnsupportedPredicate`.
pub trait SecondaryIndex {
    fn insert(&mut self, entry: IndexRecord) -> Result<OperationResult<bool>>;
    /// Remove exactly the `(value, primary_key)` pair.
    fn delete_one(&mut self, value: &Value, primary_key: i32) -> Result<OperationResult<bool>>;
    /// Remove every entry for `value`, returning the primary keys removed.
    fn delete_all(&mut self, value: &Value) -> Result<OperationResult<Vec<i32>>>;
    fn search(&mut self, value: &Value) -> Result<OperationResult<Vec<i32>>>;
    fn range_search(&mut self, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<i32>>>;
    fn scan_all(&mut self) -> Result<OperationResult<Vec<IndexRecord>>>;
}
