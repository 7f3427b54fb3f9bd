//! Sequential-File primary index: a sorted `main.dat` plus an unsorted,
//! append-only `aux.dat` absorbing recent inserts until the next rebuild.
//!
//! Both files store the table's schema plus one trailing `active: BOOL`
//! field per record — deletion flips that bit in place rather than moving
//! bytes, keeping `main.dat`'s sort order intact without a rewrite.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pagefile::PageFile;
use crate::perf::{OperationResult, PerformanceTracker};
use crate::primary::PrimaryIndex;
use crate::record::{column_layout, Record};
use crate::schema::{Column, TableSchema, Type, Value};

const ACTIVE_COLUMN: &str = "__active";
/// Tombstone fraction of (main + aux) that triggers a rebuild.
const TOMBSTONE_REBUILD_RATIO: f64 = 0.10;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SeqFileOptions {}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SeqFileMeta {
    main_count: usize,
    aux_count: usize,
    tombstone_count: usize,
    k: usize,
}

impl SeqFileMeta {
    fn fresh() -> Self {
        Self {
            main_count: 0,
            aux_count: 0,
            tombstone_count: 0,
            k: 1,
        }
    }
}

pub struct SequentialFilePrimaryIndex {
    dir: PathBuf,
    layout: Vec<(Type, usize)>,
    key_index: usize,
    active_index: usize,
    record_size: usize,
}

impl SequentialFilePrimaryIndex {
    pub fn new(dir: impl AsRef<Path>, schema: TableSchema, _options: SeqFileOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let extended = schema.with_extra_column(Column::new(ACTIVE_COLUMN, Type::Bool))?;
        let layout = column_layout(extended.columns());
        let key_index = schema.key_index();
        let active_index = extended.columns().len() - 1;
        let record_size = extended.record_size();

        let index = Self {
            dir,
            layout,
            key_index,
            active_index,
            record_size,
        };
        if !index.meta_path().exists() {
            index.save_meta(&SeqFileMeta::fresh())?;
        }
        Ok(index)
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join("seqfile_meta.json")
    }
    fn main_path(&self) -> PathBuf {
        self.dir.join("main.dat")
    }
    fn aux_path(&self) -> PathBuf {
        self.dir.join("aux.dat")
    }

    fn load_meta(&self) -> Result<SeqFileMeta> {
        let bytes = std::fs::read(self.meta_path())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save_meta(&self, meta: &SeqFileMeta) -> Result<()> {
        std::fs::write(self.meta_path(), serde_json::to_vec_pretty(meta)?)?;
        Ok(())
    }

    fn main_file(&self) -> Result<PageFile> {
        PageFile::open(&self.main_path(), self.record_size)
    }
    fn aux_file(&self) -> Result<PageFile> {
        PageFile::open(&self.aux_path(), self.record_size)
    }

    fn record_key<'a>(&self, r: &'a Record) -> &'a Value {
        r.get(self.key_index)
    }

    fn is_active(&self, r: &Record) -> bool {
        matches!(r.get(self.active_index), Value::Bool(true))
    }

    fn with_active(&self, mut fields: Vec<Value>, active: bool) -> Record {
        fields.push(Value::Bool(active));
        Record::new(fields)
    }

    fn read_main_slot(&self, file: &mut PageFile, i: usize, tracker: &mut PerformanceTracker) -> Result<Record> {
        let buf = file.read_block(i, tracker)?;
        Ok(Record::unpack_from(&buf, 0, &self.layout))
    }

    fn write_main_slot(&self, file: &mut PageFile, i: usize, record: &Record, tracker: &mut PerformanceTracker) -> Result<()> {
        let mut buf = vec![0u8; self.record_size];
        record.pack_into(&mut buf, 0, &self.layout)?;
        file.write_block(i, &buf, tracker)
    }

    /// Binary search `main.dat` for `key`, returning the slot index regardless
    /// of whether that slot is still active.
    fn binary_search_main(&self, file: &mut PageFile, meta: &SeqFileMeta, key: &Value, tracker: &mut PerformanceTracker) -> Result<Option<usize>> {
        let (mut lo, mut hi) = (0i64, meta.main_count as i64 - 1);
        while lo <= hi {
            let mid = (lo + hi) / 2;
            let record = self.read_main_slot(file, mid as usize, tracker)?;
            match self.record_key(&record).key_cmp(key) {
                Ordering::Equal => return Ok(Some(mid as usize)),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid - 1,
            }
        }
        Ok(None)
    }

    fn scan_aux(&self, file: &mut PageFile, meta: &SeqFileMeta, tracker: &mut PerformanceTracker) -> Result<Vec<(usize, Record)>> {
        let mut out = Vec::with_capacity(meta.aux_count);
        for i in 0..meta.aux_count {
            out.push((i, self.read_main_slot(file, i, tracker)?));
        }
        Ok(out)
    }

    pub fn insert(&self, record: Record) -> Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut meta = self.load_meta()?;
        let key = self.record_key(&record).clone();

        let mut main_file = self.main_file()?;
        if let Some(slot) = self.binary_search_main(&mut main_file, &meta, &key, &mut tracker)? {
            let existing = self.read_main_slot(&mut main_file, slot, &mut tracker)?;
            if self.is_active(&existing) {
                return Ok(tracker.end_operation(false, false));
            }
        }
        let mut aux_file = self.aux_file()?;
        for (_, r) in self.scan_aux(&mut aux_file, &meta, &mut tracker)? {
            if self.is_active(&r) && self.record_key(&r).key_cmp(&key) == Ordering::Equal {
                return Ok(tracker.end_operation(false, false));
            }
        }

        let with_flag = self.with_active(record.fields, true);
        self.write_main_slot(&mut aux_file, meta.aux_count, &with_flag, &mut tracker)?;
        meta.aux_count += 1;

        let rebuilt = if meta.aux_count > meta.k {
            self.rebuild(&mut meta, &mut tracker)?;
            true
        } else {
            false
        };
        self.save_meta(&meta)?;
        Ok(tracker.end_operation(true, rebuilt))
    }

    pub fn search(&self, key: &Value) -> Result<OperationResult<Option<Record>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let meta = self.load_meta()?;
        let mut main_file = self.main_file()?;
        if let Some(slot) = self.binary_search_main(&mut main_file, &meta, key, &mut tracker)? {
            let record = self.read_main_slot(&mut main_file, slot, &mut tracker)?;
            if self.is_active(&record) {
                return Ok(tracker.end_operation(Some(record), false));
            }
        }
        let mut aux_file = self.aux_file()?;
        for (_, r) in self.scan_aux(&mut aux_file, &meta, &mut tracker)? {
            if self.is_active(&r) && self.record_key(&r).key_cmp(key) == Ordering::Equal {
                return Ok(tracker.end_operation(Some(r), false));
            }
        }
        Ok(tracker.end_operation(None, false))
    }

    pub fn delete(&self, key: &Value) -> Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut meta = self.load_meta()?;

        let mut main_file = self.main_file()?;
        if let Some(slot) = self.binary_search_main(&mut main_file, &meta, key, &mut tracker)? {
            let mut record = self.read_main_slot(&mut main_file, slot, &mut tracker)?;
            if self.is_active(&record) {
                record.fields[self.active_index] = Value::Bool(false);
                self.write_main_slot(&mut main_file, slot, &record, &mut tracker)?;
                meta.tombstone_count += 1;
                let rebuilt = self.maybe_rebuild(&mut meta, &mut tracker)?;
                self.save_meta(&meta)?;
                return Ok(tracker.end_operation(true, rebuilt));
            }
        }

        let mut aux_file = self.aux_file()?;
        for (i, mut r) in self.scan_aux(&mut aux_file, &meta, &mut tracker)? {
            if self.is_active(&r) && self.record_key(&r).key_cmp(key) == Ordering::Equal {
                r.fields[self.active_index] = Value::Bool(false);
                self.write_main_slot(&mut aux_file, i, &r, &mut tracker)?;
                meta.tombstone_count += 1;
                let rebuilt = self.maybe_rebuild(&mut meta, &mut tracker)?;
                self.save_meta(&meta)?;
                return Ok(tracker.end_operation(true, rebuilt));
            }
        }
        Ok(tracker.end_operation(false, false))
    }

    fn maybe_rebuild(&self, meta: &mut SeqFileMeta, tracker: &mut PerformanceTracker) -> Result<bool> {
        let total = (meta.main_count + meta.aux_count).max(1) as f64;
        if meta.tombstone_count as f64 / total > TOMBSTONE_REBUILD_RATIO {
            self.rebuild(meta, tracker)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn rebuild(&self, meta: &mut SeqFileMeta, tracker: &mut PerformanceTracker) -> Result<()> {
        log::info!("sequential file: rebuild triggered");
        let mut all = self.scan_all_with(meta, tracker)?;
        all.sort_by(|a, b| self.record_key(a).key_cmp(self.record_key(b)));

        let mut main_file = self.main_file()?;
        for (i, r) in all.iter().enumerate() {
            let with_flag = self.with_active(r.fields.clone(), true);
            self.write_main_slot(&mut main_file, i, &with_flag, tracker)?;
        }
        std::fs::write(self.aux_path(), [])?;

        meta.main_count = all.len();
        meta.aux_count = 0;
        meta.tombstone_count = 0;
        meta.k = ((meta.main_count as f64).log2().floor() as i64).max(1) as usize;
        Ok(())
    }

    fn scan_all_with(&self, meta: &SeqFileMeta, tracker: &mut PerformanceTracker) -> Result<Vec<Record>> {
        let mut main_file = self.main_file()?;
        let mut out = Vec::new();
        for i in 0..meta.main_count {
            let r = self.read_main_slot(&mut main_file, i, tracker)?;
            if self.is_active(&r) {
                out.push(r);
            }
        }
        let mut aux_file = self.aux_file()?;
        for (_, r) in self.scan_aux(&mut aux_file, meta, tracker)? {
            if self.is_active(&r) {
                out.push(r);
            }
        }
        Ok(out)
    }

    pub fn range_search(&self, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<Record>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let meta = self.load_meta()?;
        let mut out = self.scan_all_with(&meta, &mut tracker)?;
        out.retain(|r| {
            let k = self.record_key(r);
            k.key_cmp(lo) != Ordering::Less && k.key_cmp(hi) != Ordering::Greater
        });
        out.sort_by(|a, b| self.record_key(a).key_cmp(self.record_key(b)));
        Ok(tracker.end_operation(out, false))
    }

    pub fn scan_all(&self) -> Result<OperationResult<Vec<Record>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let meta = self.load_meta()?;
        let mut out = self.scan_all_with(&meta, &mut tracker)?;
        out.sort_by(|a, b| self.record_key(a).key_cmp(self.record_key(b)));
        Ok(tracker.end_operation(out, false))
    }
}

impl PrimaryIndex for SequentialFilePrimaryIndex {
    fn insert(&mut self, record: Record) -> Result<OperationResult<bool>> {
        SequentialFilePrimaryIndex::insert(self, record)
    }
    fn delete(&mut self, key: &Value) -> Result<OperationResult<bool>> {
        SequentialFilePrimaryIndex::delete(self, key)
    }
    fn search(&mut self, key: &Value) -> Result<OperationResult<Option<Record>>> {
        SequentialFilePrimaryIndex::search(self, key)
    }
    fn range_search(&mut self, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<Record>>> {
        SequentialFilePrimaryIndex::range_search(self, lo, hi)
    }
    fn scan_all(&mut self) -> Result<OperationResult<Vec<Record>>> {
        SequentialFilePrimaryIndex::scan_all(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column as Col, Schema};
    use tempfile::tempdir;

    fn index(dir: &Path) -> SequentialFilePrimaryIndex {
        let schema = TableSchema::new(Schema {
            columns: vec![Col::new("id", Type::Int), Col::new("v", Type::Char(4))],
            key_field: "id".into(),
        })
        .unwrap();
        SequentialFilePrimaryIndex::new(dir, schema, SeqFileOptions::default()).unwrap()
    }

    fn rec(id: i32) -> Record {
        Record::new(vec![Value::Int(id), Value::Char("x".into())])
    }

    #[test]
    fn insert_then_search_across_main_and_aux() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path());
        assert!(idx.insert(rec(1)).unwrap().data);
        assert!(idx.search(&Value::Int(1)).unwrap().data.is_some());
        assert!(idx.search(&Value::Int(2)).unwrap().data.is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path());
        assert!(idx.insert(rec(1)).unwrap().data);
        assert!(!idx.insert(rec(1)).unwrap().data);
    }

    #[test]
    fn delete_then_reinsert_is_allowed() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path());
        idx.insert(rec(1)).unwrap();
        assert!(idx.delete(&Value::Int(1)).unwrap().data);
        assert!(idx.search(&Value::Int(1)).unwrap().data.is_none());
        assert!(idx.insert(rec(1)).unwrap().data);
        assert!(idx.search(&Value::Int(1)).unwrap().data.is_some());
    }

    #[test]
    fn aux_overflow_triggers_rebuild_and_preserves_all_records() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path());
        let mut rebuilt = false;
        for id in 0..40 {
            let result = idx.insert(rec(id)).unwrap();
            rebuilt |= result.rebuild_triggered;
        }
        assert!(rebuilt);
        for id in 0..40 {
            assert!(idx.search(&Value::Int(id)).unwrap().data.is_some());
        }
        let scan = idx.scan_all().unwrap().data;
        assert_eq!(scan.len(), 40);
    }

    #[test]
    fn range_search_is_sorted() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path());
        for id in (0..15).rev() {
            idx.insert(rec(id)).unwrap();
        }
        let range = idx.range_search(&Value::Int(3), &Value::Int(7)).unwrap().data;
        let keys: Vec<i32> = range
            .iter()
            .map(|r| match r.get(0) {
                Value::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![3, 4, 5, 6, 7]);
    }
}
