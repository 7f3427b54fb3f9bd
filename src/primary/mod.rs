//! Clustered primary index implementations: ISAM, Sequential File, and the
//! clustered B+ tree. A table has exactly one primary index, chosen at
//! `CREATE TABLE` time.

pub mod bptree;
pub mod isam;
pub mod seqfile;

use crate::error::Result;
use crate::perf::OperationResult;
use crate::record::Record;
use crate::schema::Value;

/// Contract every clustered primary index satisfies. Leaf payload is always
/// the full record.
pub trait PrimaryIndex {
    /// Insert a record. `data = false` means the key already existed and the
    /// page was left unchanged — a [`crate::error::Error::DuplicateKey`]-shaped
    /// outcome encoded as data, per §7.
    fn insert(&mut self, record: Record) -> Result<OperationResult<bool>>;

    /// Delete by primary key. `data = false` means the key was not found.
    fn delete(&mut self, key: &Value) -> Result<OperationResult<bool>>;

    fn search(&mut self, key: &Value) -> Result<OperationResult<Option<Record>>>;

    /// Inclusive range scan, sorted by key ascending.
    fn range_search(&mut self, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<Record>>>;

    /// Every active record, in file/key order.
    fn scan_all(&mut self) -> Result<OperationResult<Vec<Record>>>;
}
