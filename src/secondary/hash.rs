//! Extendible hash secondary index: a directory of bucket pointers indexed
//! by a hash prefix, with bucket splits, directory doubling, bounded
//! overflow chains, a free-list, and overflow-to-main compaction (§4.6).
//!
//! Two files: `<name>.dir` (the directory, rewritten whole on every change
//! since it is small) and `<name>.bkt` (fixed-size buckets, block-addressed
//! through [`PageFile`] like every other index).

use md5::{Digest, Md5};

use std::path::{Path, PathBuf};

use crate::config::{HASH_BLOCK_FACTOR, HASH_MAX_OVERFLOW, HASH_MIN_N};
use crate::error::Result;
use crate::pagefile::PageFile;
use crate::perf::{OperationResult, PerformanceTracker};
use crate::record::IndexRecord;
use crate::schema::{Type, Value};
use crate::secondary::SecondaryIndex;

const NO_BUCKET: i32 = -1;
const BUCKET_HEADER_SIZE: usize = 4 + 4 + 4 + 4; // local_depth, record_count, next_overflow, pad

fn hash_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::Int(v) => v.to_le_bytes().to_vec(),
        Value::Float(v) => v.to_le_bytes().to_vec(),
        Value::Bool(v) => vec![*v as u8],
        Value::Char(s) => Value::normalize_char(s).as_bytes().to_vec(),
        Value::Array(v) => v.iter().flat_map(|f| f.to_le_bytes()).collect(),
    }
}

/// Stable 128-bit digest of `value`, reduced to a `u64` prefix so directory
/// indices and local-depth bit tests can work with plain integers.
fn hash_u64(value: &Value) -> u64 {
    let mut hasher = Md5::new();
    hasher.update(hash_bytes(value));
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[0..8].try_into().unwrap())
}

struct Directory {
    global_depth: u32,
    free_head: i32,
    pointers: Vec<i32>,
}

impl Directory {
    fn fresh() -> Self {
        Self { global_depth: 0, free_head: NO_BUCKET, pointers: vec![NO_BUCKET] }
    }

    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::fresh());
        }
        let bytes = std::fs::read(path)?;
        if bytes.len() < 8 {
            return Ok(Self::fresh());
        }
        let global_depth = i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as u32;
        let free_head = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let n = 1usize << global_depth;
        let mut pointers = Vec::with_capacity(n);
        for i in 0..n {
            let off = 8 + i * 4;
            pointers.push(i32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()));
        }
        Ok(Self { global_depth, free_head, pointers })
    }

    fn save(&self, path: &Path) -> Result<()> {
        let mut buf = vec![0u8; 8 + self.pointers.len() * 4];
        buf[0..4].copy_from_slice(&(self.global_depth as i32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.free_head.to_le_bytes());
        for (i, p) in self.pointers.iter().enumerate() {
            let off = 8 + i * 4;
            buf[off..off + 4].copy_from_slice(&p.to_le_bytes());
        }
        std::fs::write(path, buf)?;
        Ok(())
    }

    fn index_for(&self, value: &Value) -> usize {
        if self.global_depth == 0 {
            0
        } else {
            (hash_u64(value) & ((1u64 << self.global_depth) - 1)) as usize
        }
    }

    fn double(&mut self) {
        let old = self.pointers.clone();
        self.pointers = old.iter().chain(old.iter()).copied().collect();
        self.global_depth += 1;
    }
}

#[derive(Clone)]
struct Bucket {
    id: i32,
    local_depth: u32,
    next_overflow: i32,
    slots: Vec<Option<IndexRecord>>,
}

impl Bucket {
    fn empty(id: i32, local_depth: u32, capacity: usize) -> Self {
        Self { id, local_depth, next_overflow: NO_BUCKET, slots: vec![None; capacity] }
    }

    fn record_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn first_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }
}

pub struct ExtendibleHashIndex {
    dir_path: PathBuf,
    bkt_path: PathBuf,
    value_type: Type,
    block_factor: usize,
    max_overflow: usize,
    min_n: usize,
    bucket_size: usize,
}

impl ExtendibleHashIndex {
    pub fn new(dir: impl AsRef<Path>, name: &str, value_type: Type) -> Self {
        let dir = dir.as_ref();
        let block_factor = HASH_BLOCK_FACTOR;
        let entry_size = IndexRecord::size(value_type);
        let bucket_size = BUCKET_HEADER_SIZE + block_factor * entry_size;
        Self {
            dir_path: dir.join(format!("{name}.dir")),
            bkt_path: dir.join(format!("{name}.bkt")),
            value_type,
            block_factor,
            max_overflow: HASH_MAX_OVERFLOW,
            min_n: HASH_MIN_N,
            bucket_size,
        }
    }

    fn bucket_file(&self) -> Result<PageFile> {
        PageFile::open(&self.bkt_path, self.bucket_size)
    }

    fn load_directory(&self) -> Result<Directory> {
        Directory::load(&self.dir_path)
    }

    fn save_directory(&self, dir: &Directory) -> Result<()> {
        dir.save(&self.dir_path)
    }

    fn read_bucket(&self, file: &mut PageFile, id: i32, tracker: &mut PerformanceTracker) -> Result<Bucket> {
        let buf = file.read_block(id as usize, tracker)?;
        let local_depth = i32::from_le_bytes(buf[0..4].try_into().unwrap()) as u32;
        let next_overflow = i32::from_le_bytes(buf[8..12].try_into().unwrap());
        let entry_size = IndexRecord::size(self.value_type);
        let mut slots = Vec::with_capacity(self.block_factor);
        for i in 0..self.block_factor {
            let off = BUCKET_HEADER_SIZE + i * entry_size;
            let slot = &buf[off..off + entry_size];
            if slot.iter().all(|&b| b == 0) {
                slots.push(None);
            } else {
                slots.push(Some(IndexRecord::unpack_from(&buf, off, self.value_type)));
            }
        }
        Ok(Bucket { id, local_depth, next_overflow, slots })
    }

    fn write_bucket(&self, file: &mut PageFile, bucket: &Bucket, tracker: &mut PerformanceTracker) -> Result<()> {
        let mut buf = vec![0u8; self.bucket_size];
        buf[0..4].copy_from_slice(&(bucket.local_depth as i32).to_le_bytes());
        buf[4..8].copy_from_slice(&(bucket.record_count() as i32).to_le_bytes());
        buf[8..12].copy_from_slice(&bucket.next_overflow.to_le_bytes());
        let entry_size = IndexRecord::size(self.value_type);
        for (i, slot) in bucket.slots.iter().enumerate() {
            if let Some(entry) = slot {
                let off = BUCKET_HEADER_SIZE + i * entry_size;
                entry.pack_into(&mut buf, off, self.value_type)?;
            }
        }
        file.write_block(bucket.id as usize, &buf, tracker)
    }

    /// Pop a free bucket id, or allocate one past the current end of file.
    fn alloc_bucket(&self, file: &mut PageFile, dir: &mut Directory, local_depth: u32, tracker: &mut PerformanceTracker) -> Result<Bucket> {
        if dir.free_head != NO_BUCKET {
            let id = dir.free_head;
            let freed = self.read_bucket(file, id, tracker)?;
            dir.free_head = freed.next_overflow;
            return Ok(Bucket::empty(id, local_depth, self.block_factor));
        }
        let id = file.block_count()? as i32;
        Ok(Bucket::empty(id, local_depth, self.block_factor))
    }

    fn free_bucket(&self, file: &mut PageFile, dir: &mut Directory, id: i32, tracker: &mut PerformanceTracker) -> Result<()> {
        let freed = Bucket { id, local_depth: 0, next_overflow: dir.free_head, slots: vec![None; self.block_factor] };
        self.write_bucket(file, &freed, tracker)?;
        dir.free_head = id;
        Ok(())
    }

    /// Every bucket id in the chain starting at `main_id`, main bucket first.
    fn chain_ids(&self, file: &mut PageFile, main_id: i32, tracker: &mut PerformanceTracker) -> Result<Vec<i32>> {
        let mut ids = vec![main_id];
        let mut cur = self.read_bucket(file, main_id, tracker)?.next_overflow;
        while cur != NO_BUCKET {
            ids.push(cur);
            cur = self.read_bucket(file, cur, tracker)?.next_overflow;
        }
        Ok(ids)
    }

    pub fn insert(&self, entry: IndexRecord) -> Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.bucket_file()?;
        let mut dir = self.load_directory()?;

        if dir.pointers[0] == NO_BUCKET {
            let root = self.alloc_bucket(&mut file, &mut dir, 0, &mut tracker)?;
            self.write_bucket(&mut file, &root, &mut tracker)?;
            for p in dir.pointers.iter_mut() {
                *p = root.id;
            }
        }

        let rebuilt = self.insert_inner(&mut file, &mut dir, entry, &mut tracker)?;
        self.save_directory(&dir)?;
        Ok(tracker.end_operation(true, rebuilt))
    }

    fn insert_inner(&self, file: &mut PageFile, dir: &mut Directory, entry: IndexRecord, tracker: &mut PerformanceTracker) -> Result<bool> {
        let idx = dir.index_for(&entry.value);
        let main_id = dir.pointers[idx];
        let chain = self.chain_ids(file, main_id, tracker)?;

        for &id in &chain {
            let bucket = self.read_bucket(file, id, tracker)?;
            if bucket.slots.iter().any(|s| matches!(s, Some(e) if e.value == entry.value && e.primary_key == entry.primary_key)) {
                return Ok(false);
            }
        }

        for &id in &chain {
            let mut bucket = self.read_bucket(file, id, tracker)?;
            if let Some(slot) = bucket.first_free_slot() {
                bucket.slots[slot] = Some(entry);
                self.write_bucket(file, &bucket, tracker)?;
                return Ok(false);
            }
        }

        let main = self.read_bucket(file, main_id, tracker)?;
        if main.local_depth < dir.global_depth {
            self.split_bucket(file, dir, main_id, entry, tracker)?;
            return Ok(true);
        }
        if chain.len() - 1 < self.max_overflow {
            self.append_overflow(file, dir, &chain, entry, tracker)?;
            return Ok(false);
        }
        dir.double();
        self.split_bucket(file, dir, main_id, entry, tracker)?;
        Ok(true)
    }

    fn append_overflow(&self, file: &mut PageFile, dir: &mut Directory, chain: &[i32], entry: IndexRecord, tracker: &mut PerformanceTracker) -> Result<()> {
        let tail_id = *chain.last().unwrap();
        let mut tail = self.read_bucket(file, tail_id, tracker)?;
        let mut new_bucket = self.alloc_bucket(file, dir, tail.local_depth, tracker)?;
        new_bucket.slots[0] = Some(entry);
        tail.next_overflow = new_bucket.id;
        self.write_bucket(file, &new_bucket, tracker)?;
        self.write_bucket(file, &tail, tracker)
    }

    /// Split bucket `old_id`, redistribute its chain's records plus the
    /// pending `entry` by the new bit, and repoint the directory.
    fn split_bucket(&self, file: &mut PageFile, dir: &mut Directory, old_id: i32, entry: IndexRecord, tracker: &mut PerformanceTracker) -> Result<()> {
        let chain = self.chain_ids(file, old_id, tracker)?;
        let old_local_depth = self.read_bucket(file, old_id, tracker)?.local_depth;
        let new_local_depth = old_local_depth + 1;

        let mut gathered = vec![entry];
        for &id in &chain {
            let bucket = self.read_bucket(file, id, tracker)?;
            gathered.extend(bucket.slots.into_iter().flatten());
        }
        for &id in chain.iter().skip(1) {
            self.free_bucket(file, dir, id, tracker)?;
        }

        let mut sibling_bucket = self.alloc_bucket(file, dir, new_local_depth, tracker)?;
        let sibling_id = sibling_bucket.id;
        let mut main_bucket = Bucket::empty(old_id, new_local_depth, self.block_factor);

        for rec in gathered {
            let bit = (hash_u64(&rec.value) >> old_local_depth) & 1;
            let target = if bit == 0 { &mut main_bucket } else { &mut sibling_bucket };
            match target.first_free_slot() {
                Some(slot) => target.slots[slot] = Some(rec),
                None => {
                    // Rare: redistribution overflowed one side. Chain another
                    // overflow bucket rather than recursing into another split.
                    let mut chain_tail_id = target.id;
                    loop {
                        let mut tail = self.read_bucket(file, chain_tail_id, tracker)?;
                        if let Some(slot) = tail.first_free_slot() {
                            tail.slots[slot] = Some(rec);
                            self.write_bucket(file, &tail, tracker)?;
                            break;
                        }
                        if tail.next_overflow == NO_BUCKET {
                            let mut fresh = self.alloc_bucket(file, dir, new_local_depth, tracker)?;
                            fresh.slots[0] = Some(rec);
                            tail.next_overflow = fresh.id;
                            self.write_bucket(file, &fresh, tracker)?;
                            self.write_bucket(file, &tail, tracker)?;
                            break;
                        }
                        chain_tail_id = tail.next_overflow;
                    }
                }
            }
        }
        self.write_bucket(file, &main_bucket, tracker)?;
        self.write_bucket(file, &sibling_bucket, tracker)?;

        for i in 0..dir.pointers.len() {
            if dir.pointers[i] == old_id {
                let bit = (i as u64 >> old_local_depth) & 1;
                if bit == 1 {
                    dir.pointers[i] = sibling_id;
                }
            }
        }
        Ok(())
    }

    pub fn search(&self, value: &Value) -> Result<OperationResult<Vec<i32>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.bucket_file()?;
        let dir = self.load_directory()?;
        let mut out = Vec::new();
        if !dir.pointers.is_empty() && dir.pointers[dir.index_for(value)] != NO_BUCKET {
            let main_id = dir.pointers[dir.index_for(value)];
            for id in self.chain_ids(&mut file, main_id, &mut tracker)? {
                let bucket = self.read_bucket(&mut file, id, &mut tracker)?;
                for slot in bucket.slots.iter().flatten() {
                    if slot.value == *value {
                        out.push(slot.primary_key);
                    }
                }
            }
        }
        Ok(tracker.end_operation(out, false))
    }

    pub fn scan_all(&self) -> Result<OperationResult<Vec<IndexRecord>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.bucket_file()?;
        let total = file.block_count()? as i32;
        let mut out = Vec::new();
        for id in 0..total {
            let bucket = self.read_bucket(&mut file, id, &mut tracker)?;
            out.extend(bucket.slots.into_iter().flatten());
        }
        Ok(tracker.end_operation(out, false))
    }

    pub fn delete_one(&self, value: &Value, primary_key: i32) -> Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.bucket_file()?;
        let mut dir = self.load_directory()?;
        if dir.pointers.is_empty() || dir.pointers[dir.index_for(value)] == NO_BUCKET {
            return Ok(tracker.end_operation(false, false));
        }
        let idx = dir.index_for(value);
        let main_id = dir.pointers[idx];
        let chain = self.chain_ids(&mut file, main_id, &mut tracker)?;
        let mut removed = false;
        for &id in &chain {
            let mut bucket = self.read_bucket(&mut file, id, &mut tracker)?;
            if let Some(pos) = bucket.slots.iter().position(|s| matches!(s, Some(e) if e.value == *value && e.primary_key == primary_key)) {
                bucket.slots[pos] = None;
                self.write_bucket(&mut file, &bucket, &mut tracker)?;
                removed = true;
                break;
            }
        }
        if removed {
            self.maybe_compact(&mut file, &mut dir, main_id, &mut tracker)?;
            self.save_directory(&dir)?;
        }
        Ok(tracker.end_operation(removed, false))
    }

    pub fn delete_all(&self, value: &Value) -> Result<OperationResult<Vec<i32>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.bucket_file()?;
        let mut dir = self.load_directory()?;
        let mut removed = Vec::new();
        if !dir.pointers.is_empty() && dir.pointers[dir.index_for(value)] != NO_BUCKET {
            let idx = dir.index_for(value);
            let main_id = dir.pointers[idx];
            let chain = self.chain_ids(&mut file, main_id, &mut tracker)?;
            for &id in &chain {
                let mut bucket = self.read_bucket(&mut file, id, &mut tracker)?;
                let mut changed = false;
                for slot in bucket.slots.iter_mut() {
                    if matches!(slot, Some(e) if e.value == *value) {
                        removed.push(slot.take().unwrap().primary_key);
                        changed = true;
                    }
                }
                if changed {
                    self.write_bucket(&mut file, &bucket, &mut tracker)?;
                }
            }
            if !removed.is_empty() {
                self.maybe_compact(&mut file, &mut dir, main_id, &mut tracker)?;
                self.save_directory(&dir)?;
            }
        }
        Ok(tracker.end_operation(removed, false))
    }

    /// Overflow-to-main compaction and empty-bucket buddy redirect (§4.6).
    fn maybe_compact(&self, file: &mut PageFile, dir: &mut Directory, main_id: i32, tracker: &mut PerformanceTracker) -> Result<()> {
        let chain = self.chain_ids(file, main_id, tracker)?;
        let main_count = self.read_bucket(file, main_id, tracker)?.record_count();

        if main_count <= self.min_n && chain.len() > 1 {
            let mut drained = Vec::new();
            for &id in chain.iter().skip(1) {
                let bucket = self.read_bucket(file, id, tracker)?;
                drained.extend(bucket.slots.into_iter().flatten());
                self.free_bucket(file, dir, id, tracker)?;
            }
            let mut main = self.read_bucket(file, main_id, tracker)?;
            main.next_overflow = NO_BUCKET;
            let mut leftover = Vec::new();
            for rec in drained {
                match main.first_free_slot() {
                    Some(slot) => main.slots[slot] = Some(rec),
                    None => leftover.push(rec),
                }
            }
            // Commit the drained-into-main state before re-chaining whatever
            // didn't fit, so insert_inner sees an accurate on-disk bucket.
            self.write_bucket(file, &main, tracker)?;
            for rec in leftover {
                self.insert_inner(file, dir, rec, tracker)?;
            }
        }

        let main = self.read_bucket(file, main_id, tracker)?;
        if main.record_count() == 0 && main.next_overflow == NO_BUCKET && main.local_depth > 0 {
            self.buddy_redirect(file, dir, main_id, tracker)?;
        }
        Ok(())
    }

    fn buddy_redirect(&self, file: &mut PageFile, dir: &mut Directory, bucket_id: i32, tracker: &mut PerformanceTracker) -> Result<()> {
        let bucket = self.read_bucket(file, bucket_id, tracker)?;
        let depth = bucket.local_depth;
        let Some(idx) = dir.pointers.iter().position(|&p| p == bucket_id) else {
            return Ok(());
        };
        let buddy_idx = idx ^ (1usize << (depth - 1));
        let buddy_id = dir.pointers[buddy_idx];
        if buddy_id == NO_BUCKET || buddy_id == bucket_id {
            return Ok(());
        }
        let mut buddy = self.read_bucket(file, buddy_id, tracker)?;

        for p in dir.pointers.iter_mut() {
            if *p == bucket_id {
                *p = buddy_id;
            }
        }
        if buddy.local_depth == depth {
            buddy.local_depth = depth - 1;
            self.write_bucket(file, &buddy, tracker)?;
        }
        self.free_bucket(file, dir, bucket_id, tracker)
    }

    pub fn range_search(&self, _lo: &Value, _hi: &Value) -> Result<OperationResult<Vec<i32>>> {
        Err(crate::error::Error::UnsupportedPredicate("hash index has no key order, cannot range scan".into()))
    }
}

impl SecondaryIndex for ExtendibleHashIndex {
    fn insert(&mut self, entry: IndexRecord) -> Result<OperationResult<bool>> {
        ExtendibleHashIndex::insert(self, entry)
    }
    fn delete_one(&mut self, value: &Value, primary_key: i32) -> Result<OperationResult<bool>> {
        ExtendibleHashIndex::delete_one(self, value, primary_key)
    }
    fn delete_all(&mut self, value: &Value) -> Result<OperationResult<Vec<i32>>> {
        ExtendibleHashIndex::delete_all(self, value)
    }
    fn search(&mut self, value: &Value) -> Result<OperationResult<Vec<i32>>> {
        ExtendibleHashIndex::search(self, value)
    }
    fn range_search(&mut self, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<i32>>> {
        ExtendibleHashIndex::range_search(self, lo, hi)
    }
    fn scan_all(&mut self) -> Result<OperationResult<Vec<IndexRecord>>> {
        ExtendibleHashIndex::scan_all(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hash(dir: &Path) -> ExtendibleHashIndex {
        ExtendibleHashIndex::new(dir, "city", Type::Int)
    }

    #[test]
    fn insert_then_search_round_trips() {
        let dir = tempdir().unwrap();
        let h = hash(dir.path());
        h.insert(IndexRecord::new(Value::Int(1), 100)).unwrap();
        h.insert(IndexRecord::new(Value::Int(1), 101)).unwrap();
        let mut hits = h.search(&Value::Int(1)).unwrap().data;
        hits.sort();
        assert_eq!(hits, vec![100, 101]);
    }

    #[test]
    fn delete_one_removes_a_single_pair() {
        let dir = tempdir().unwrap();
        let h = hash(dir.path());
        h.insert(IndexRecord::new(Value::Int(5), 1)).unwrap();
        h.insert(IndexRecord::new(Value::Int(5), 2)).unwrap();
        assert!(h.delete_one(&Value::Int(5), 1).unwrap().data);
        assert_eq!(h.search(&Value::Int(5)).unwrap().data, vec![2]);
    }

    #[test]
    fn directory_doubles_under_collision_pressure_and_all_records_stay_findable() {
        let dir = tempdir().unwrap();
        let h = hash(dir.path());
        for pk in 0..200 {
            h.insert(IndexRecord::new(Value::Int(pk % 3), pk)).unwrap();
        }
        for v in 0..3 {
            let hits = h.search(&Value::Int(v)).unwrap().data;
            assert!(!hits.is_empty());
            for pk in hits {
                assert_eq!(pk % 3, v);
            }
        }
        let scan = h.scan_all().unwrap().data;
        assert_eq!(scan.len(), 200);
    }

    #[test]
    fn delete_all_removes_every_matching_entry() {
        let dir = tempdir().unwrap();
        let h = hash(dir.path());
        for pk in 0..30 {
            h.insert(IndexRecord::new(Value::Int(pk % 2), pk)).unwrap();
        }
        let removed = h.delete_all(&Value::Int(0)).unwrap().data;
        assert_eq!(removed.len(), 15);
        assert!(h.search(&Value::Int(0)).unwrap().data.is_empty());
    }

    #[test]
    fn range_search_is_unsupported() {
        let dir = tempdir().unwrap();
        let h = hash(dir.path());
        assert!(h.range_search(&Value::Int(0), &Value::Int(10)).is_err());
    }
}
