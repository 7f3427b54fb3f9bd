//! ISAM primary index: a static three-level structure (root index → leaf
//! index → data pages), each data page optionally starting a singly linked
//! overflow chain.
//!
//! Unlike the clustered B+ tree, pages freed by a merge or a rebuild are
//! pushed onto [`FreeList`] rather than tombstoned in place, since ISAM churn
//! under sustained inserts is high enough that reuse matters (see the
//! rebuild predicate below).

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{
    ISAM_BLOCK_FACTOR, ISAM_FREE_RATIO_THRESHOLD, ISAM_LEAF_INDEX_BLOCK_FACTOR,
    ISAM_MAX_BLOCK_FACTOR, ISAM_MAX_OVERFLOW, ISAM_MEAN_OVERFLOW_THRESHOLD, ISAM_REBUILD_GROWTH,
    ISAM_ROOT_INDEX_BLOCK_FACTOR,
};
use crate::error::Result;
use crate::freelist::FreeList;
use crate::page::Page;
use crate::pagefile::PageFile;
use crate::perf::{OperationResult, PerformanceTracker};
use crate::primary::PrimaryIndex;
use crate::record::{column_layout, Record};
use crate::schema::{TableSchema, Type, Value};

const CONSOLIDATION_DIVISOR: usize = 3;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct IsamOptions {
    pub block_factor: usize,
    pub root_block_factor: usize,
    pub leaf_block_factor: usize,
    pub max_overflow: usize,
    pub rebuild_growth: f64,
    pub max_block_factor: usize,
    pub free_ratio_threshold: f64,
    pub mean_overflow_threshold: f64,
}

impl Default for IsamOptions {
    fn default() -> Self {
        Self {
            block_factor: ISAM_BLOCK_FACTOR,
            root_block_factor: ISAM_ROOT_INDEX_BLOCK_FACTOR,
            leaf_block_factor: ISAM_LEAF_INDEX_BLOCK_FACTOR,
            max_overflow: ISAM_MAX_OVERFLOW,
            rebuild_growth: ISAM_REBUILD_GROWTH,
            max_block_factor: ISAM_MAX_BLOCK_FACTOR,
            free_ratio_threshold: ISAM_FREE_RATIO_THRESHOLD,
            mean_overflow_threshold: ISAM_MEAN_OVERFLOW_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct IsamMeta {
    options: IsamOptions,
    next_leaf_page_id: i32,
    next_data_page_id: i32,
    /// Slots actually allocated for the root page on disk. Normally equal to
    /// `options.root_block_factor`, but the root is allowed to grow past its
    /// nominal capacity (the structure is "static" only between rebuilds);
    /// this tracks the real on-disk block size so `load_root` stays in sync
    /// with whatever `save_root` last wrote.
    root_capacity: usize,
}

pub struct IsamPrimaryIndex {
    dir: PathBuf,
    layout: Vec<(Type, usize)>,
    key_index: usize,
    key_type: Type,
    record_size: usize,
}

fn index_entry_size(key_type: Type) -> usize {
    key_type.size() + 4
}

fn index_page_size(key_type: Type, capacity: usize) -> usize {
    4 + capacity * index_entry_size(key_type)
}

fn pack_index_page(entries: &[(Value, i32)], key_type: Type, capacity: usize) -> Vec<u8> {
    let entry_size = index_entry_size(key_type);
    let mut buf = vec![0u8; index_page_size(key_type, capacity)];
    buf[0..4].copy_from_slice(&(entries.len() as i32).to_le_bytes());
    let layout = [(key_type, 0usize)];
    for (i, (key, child)) in entries.iter().enumerate() {
        let offset = 4 + i * entry_size;
        Record::new(vec![key.clone()])
            .pack_into(&mut buf, offset, &layout)
            .expect("index key matches key type");
        let child_offset = offset + key_type.size();
        buf[child_offset..child_offset + 4].copy_from_slice(&child.to_le_bytes());
    }
    buf
}

fn unpack_index_page(buf: &[u8], key_type: Type) -> Vec<(Value, i32)> {
    let count = i32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let entry_size = index_entry_size(key_type);
    let layout = [(key_type, 0usize)];
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let offset = 4 + i * entry_size;
        let rec = Record::unpack_from(buf, offset, &layout);
        let child_offset = offset + key_type.size();
        let child = i32::from_le_bytes(buf[child_offset..child_offset + 4].try_into().unwrap());
        out.push((rec.fields[0].clone(), child));
    }
    out
}

/// Index of the entry that should be descended into for `key`: the last
/// entry whose key is `<= key`, or 0 if `key` is smaller than everything.
fn descend_pos(entries: &[(Value, i32)], key: &Value) -> usize {
    let pos = entries.partition_point(|(k, _)| k.key_cmp(key) != Ordering::Greater);
    pos.saturating_sub(1)
}

impl IsamPrimaryIndex {
    pub fn new(dir: impl AsRef<Path>, schema: TableSchema, options: IsamOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let layout = column_layout(schema.columns());
        let key_index = schema.key_index();
        let key_type = schema.key_type();
        let record_size = schema.record_size();
        let index = Self {
            dir,
            layout,
            key_index,
            key_type,
            record_size,
        };
        if !index.meta_path().exists() {
            index.save_meta(&IsamMeta {
                root_capacity: options.root_block_factor,
                options,
                next_leaf_page_id: 0,
                next_data_page_id: 0,
            })?;
        }
        Ok(index)
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join("isam_meta.json")
    }
    fn root_path(&self) -> PathBuf {
        self.dir.join("root_index.dat")
    }
    fn leaf_path(&self) -> PathBuf {
        self.dir.join("leaf_index.dat")
    }
    fn data_path(&self) -> PathBuf {
        self.dir.join("datos.dat")
    }
    fn free_path(&self) -> PathBuf {
        self.dir.join("free_list.dat")
    }

    fn load_meta(&self) -> Result<IsamMeta> {
        let bytes = std::fs::read(self.meta_path())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save_meta(&self, meta: &IsamMeta) -> Result<()> {
        std::fs::write(self.meta_path(), serde_json::to_vec_pretty(meta)?)?;
        Ok(())
    }

    fn load_root(&self, meta: &IsamMeta, tracker: &mut PerformanceTracker) -> Result<Vec<(Value, i32)>> {
        let size = index_page_size(self.key_type, meta.root_capacity);
        let mut file = PageFile::open(&self.root_path(), size)?;
        let buf = file.read_block(0, tracker)?;
        Ok(unpack_index_page(&buf, self.key_type))
    }

    fn save_root(&self, meta: &mut IsamMeta, entries: &[(Value, i32)], tracker: &mut PerformanceTracker) -> Result<()> {
        let capacity = meta.options.root_block_factor.max(entries.len());
        let size = index_page_size(self.key_type, capacity);
        let mut file = PageFile::open(&self.root_path(), size)?;
        let buf = pack_index_page(entries, self.key_type, capacity);
        file.write_block(0, &buf, tracker)?;
        meta.root_capacity = capacity;
        Ok(())
    }

    fn leaf_page_size(&self, meta: &IsamMeta) -> usize {
        index_page_size(self.key_type, meta.options.leaf_block_factor)
    }

    fn load_leaf(&self, meta: &IsamMeta, id: i32, tracker: &mut PerformanceTracker) -> Result<Vec<(Value, i32)>> {
        let mut file = PageFile::open(&self.leaf_path(), self.leaf_page_size(meta))?;
        let buf = file.read_block(id as usize, tracker)?;
        Ok(unpack_index_page(&buf, self.key_type))
    }

    fn save_leaf(&self, meta: &IsamMeta, id: i32, entries: &[(Value, i32)], tracker: &mut PerformanceTracker) -> Result<()> {
        let mut file = PageFile::open(&self.leaf_path(), self.leaf_page_size(meta))?;
        let buf = pack_index_page(entries, self.key_type, meta.options.leaf_block_factor.max(entries.len()));
        file.write_block(id as usize, &buf, tracker)
    }

    fn data_page_size(&self, meta: &IsamMeta) -> usize {
        Page::page_size(meta.options.block_factor, self.record_size)
    }

    fn load_data(&self, meta: &IsamMeta, id: i32, tracker: &mut PerformanceTracker) -> Result<Page> {
        let mut file = PageFile::open(&self.data_path(), self.data_page_size(meta))?;
        let buf = file.read_block(id as usize, tracker)?;
        Ok(Page::unpack_with(&buf, meta.options.block_factor, self.record_size, &self.layout))
    }

    fn save_data(&self, meta: &IsamMeta, id: i32, page: &Page, tracker: &mut PerformanceTracker) -> Result<()> {
        let mut file = PageFile::open(&self.data_path(), self.data_page_size(meta))?;
        file.write_block(id as usize, &page.pack_with(&self.layout), tracker)
    }

    fn alloc_data_page(&self, meta: &mut IsamMeta, free: &mut FreeList) -> i32 {
        match free.pop() {
            Some(id) => id as i32,
            None => {
                let id = meta.next_data_page_id;
                meta.next_data_page_id += 1;
                id
            }
        }
    }

    fn alloc_leaf_page(&self, meta: &mut IsamMeta) -> i32 {
        let id = meta.next_leaf_page_id;
        meta.next_leaf_page_id += 1;
        id
    }

    fn record_key<'a>(&self, r: &'a Record) -> &'a Value {
        r.get(self.key_index)
    }

    /// Walk the overflow chain starting at `main_id`, returning every page
    /// visited in chain order (main page first).
    fn load_chain(&self, meta: &IsamMeta, main_id: i32, tracker: &mut PerformanceTracker) -> Result<Vec<(i32, Page)>> {
        let mut chain = Vec::new();
        let mut id = main_id;
        loop {
            let page = self.load_data(meta, id, tracker)?;
            let next = page.next_overflow_page;
            chain.push((id, page));
            if next < 0 {
                break;
            }
            id = next;
        }
        Ok(chain)
    }

    fn find_in_chain(&self, chain: &[(i32, Page)], key: &Value) -> Option<(usize, usize)> {
        for (ci, (_, page)) in chain.iter().enumerate() {
            if let Some(pos) = page
                .records
                .iter()
                .position(|r| self.record_key(r).key_cmp(key) == Ordering::Equal)
            {
                return Some((ci, pos));
            }
        }
        None
    }

    pub fn insert(&self, record: Record) -> Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut meta = self.load_meta()?;
        let key = self.record_key(&record).clone();

        let mut root = self.load_root(&meta, &mut tracker)?;
        if root.is_empty() {
            let leaf_id = self.alloc_leaf_page(&mut meta);
            let data_id = self.alloc_data_page(&mut meta, &mut FreeList::load(&self.free_path(), &mut tracker)?);
            self.save_leaf(&meta, leaf_id, &[(key.clone(), data_id)], &mut tracker)?;
            let mut page = Page::empty(meta.options.block_factor, self.record_size);
            page.insert_sorted(record, self.key_index);
            self.save_data(&meta, data_id, &page, &mut tracker)?;
            root.push((key, leaf_id));
            self.save_root(&mut meta, &root, &mut tracker)?;
            self.save_meta(&meta)?;
            log::info!("isam: created first data page for new table");
            return Ok(tracker.end_operation(true, false));
        }

        let leaf_pos = descend_pos(&root, &key);
        let leaf_id = root[leaf_pos].1;
        let mut leaf = self.load_leaf(&meta, leaf_id, &mut tracker)?;
        let data_pos = descend_pos(&leaf, &key);
        let main_id = leaf[data_pos].1;

        let chain = self.load_chain(&meta, main_id, &mut tracker)?;
        if self.find_in_chain(&chain, &key).is_some() {
            return Ok(tracker.end_operation(false, false));
        }

        let main_page = &chain[0].1;
        if main_page.len() < meta.options.block_factor {
            let mut page = main_page.clone();
            page.insert_sorted(record, self.key_index);
            self.save_data(&meta, main_id, &page, &mut tracker)?;
            self.save_meta(&meta)?;
            return Ok(tracker.end_operation(true, false));
        }

        let overflow_len = chain.len() - 1;
        let mut rebuild = false;
        if overflow_len < meta.options.max_overflow {
            self.append_overflow(&mut meta, &chain, record, &mut tracker)?;
        } else if leaf.len() < meta.options.leaf_block_factor {
            self.split_data_only(&mut meta, &mut leaf, data_pos, chain, record, &mut tracker)?;
            self.save_leaf(&meta, leaf_id, &leaf, &mut tracker)?;
        } else {
            self.split_leaf_and_data(&mut meta, &mut root, leaf_pos, leaf, data_pos, chain, record, &mut tracker)?;
            self.save_root(&mut meta, &root, &mut tracker)?;
        }

        if self.rebuild_needed(&meta, &mut tracker)? {
            self.rebuild(&mut meta, &mut tracker)?;
            rebuild = true;
        }
        self.save_meta(&meta)?;
        Ok(tracker.end_operation(true, rebuild))
    }

    fn append_overflow(&self, meta: &mut IsamMeta, chain: &[(i32, Page)], record: Record, tracker: &mut PerformanceTracker) -> Result<()> {
        let mut free = FreeList::load(&self.free_path(), tracker)?;
        let (tail_id, tail_page) = chain.last().unwrap();
        let mut tail_page = tail_page.clone();
        let new_id = self.alloc_data_page(meta, &mut free);
        let mut new_page = Page::empty(meta.options.block_factor, self.record_size);
        new_page.insert_sorted(record, self.key_index);
        tail_page.next_overflow_page = new_id;
        self.save_data(meta, *tail_id, &tail_page, tracker)?;
        self.save_data(meta, new_id, &new_page, tracker)?;
        free.save(&self.free_path(), tracker)?;
        Ok(())
    }

    /// Redistribute all records in `chain` plus `new_record` across two main
    /// pages, freeing the old overflow pages. Inserts the new separator into
    /// `leaf` in place (caller guarantees room).
    fn split_data_only(
        &self,
        meta: &mut IsamMeta,
        leaf: &mut Vec<(Value, i32)>,
        data_pos: usize,
        chain: Vec<(i32, Page)>,
        new_record: Record,
        tracker: &mut PerformanceTracker,
    ) -> Result<()> {
        let main_id = chain[0].0;
        let mut free = FreeList::load(&self.free_path(), tracker)?;
        let mut all: Vec<Record> = chain.iter().flat_map(|(_, p)| p.records.clone()).collect();
        for (id, _) in chain.iter().skip(1) {
            free.push(*id as i64);
        }
        all.push(new_record);
        all.sort_by(|a, b| self.record_key(a).key_cmp(self.record_key(b)));

        let mid = all.len() / 2;
        let right_records = all.split_off(mid);
        let right_key = self.record_key(&right_records[0]).clone();

        let right_id = self.alloc_data_page(meta, &mut free);
        let mut left_page = Page::empty(meta.options.block_factor, self.record_size);
        for r in all {
            left_page.insert_sorted(r, self.key_index);
        }
        let mut right_page = Page::empty(meta.options.block_factor, self.record_size);
        for r in right_records {
            right_page.insert_sorted(r, self.key_index);
        }
        self.save_data(meta, main_id, &left_page, tracker)?;
        self.save_data(meta, right_id, &right_page, tracker)?;
        free.save(&self.free_path(), tracker)?;

        leaf.insert(data_pos + 1, (right_key, right_id));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn split_leaf_and_data(
        &self,
        meta: &mut IsamMeta,
        root: &mut Vec<(Value, i32)>,
        leaf_pos: usize,
        mut leaf: Vec<(Value, i32)>,
        data_pos: usize,
        chain: Vec<(i32, Page)>,
        new_record: Record,
        tracker: &mut PerformanceTracker,
    ) -> Result<()> {
        let leaf_id = root[leaf_pos].1;
        self.split_data_only(meta, &mut leaf, data_pos, chain, new_record, tracker)?;

        let mid = leaf.len() / 2;
        let right_entries = leaf.split_off(mid);
        let right_key = right_entries[0].0.clone();
        let right_leaf_id = self.alloc_leaf_page(meta);

        self.save_leaf(meta, leaf_id, &leaf, tracker)?;
        self.save_leaf(meta, right_leaf_id, &right_entries, tracker)?;

        root.insert(leaf_pos + 1, (right_key, right_leaf_id));
        log::info!("isam: leaf index page split, root now has {} entries", root.len());
        Ok(())
    }

    pub fn search(&self, key: &Value) -> Result<OperationResult<Option<Record>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let meta = self.load_meta()?;
        let root = self.load_root(&meta, &mut tracker)?;
        if root.is_empty() {
            return Ok(tracker.end_operation(None, false));
        }
        let leaf_id = root[descend_pos(&root, key)].1;
        let leaf = self.load_leaf(&meta, leaf_id, &mut tracker)?;
        let main_id = leaf[descend_pos(&leaf, key)].1;
        let chain = self.load_chain(&meta, main_id, &mut tracker)?;
        let found = self
            .find_in_chain(&chain, key)
            .map(|(ci, pos)| chain[ci].1.records[pos].clone());
        Ok(tracker.end_operation(found, false))
    }

    pub fn delete(&self, key: &Value) -> Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut meta = self.load_meta()?;
        let root = self.load_root(&meta, &mut tracker)?;
        if root.is_empty() {
            return Ok(tracker.end_operation(false, false));
        }
        let leaf_id = root[descend_pos(&root, key)].1;
        let leaf = self.load_leaf(&meta, leaf_id, &mut tracker)?;
        let main_id = leaf[descend_pos(&leaf, key)].1;
        let mut chain = self.load_chain(&meta, main_id, &mut tracker)?;

        let Some((ci, pos)) = self.find_in_chain(&chain, key) else {
            return Ok(tracker.end_operation(false, false));
        };
        chain[ci].1.records.remove(pos);

        let mut free = FreeList::load(&self.free_path(), &mut tracker)?;
        if ci == 0 {
            let threshold = meta.options.block_factor / CONSOLIDATION_DIVISOR;
            if chain[0].1.len() < threshold && chain.len() > 1 {
                let overflow_id = chain[1].0;
                let overflow_page = chain[1].1.clone();
                if chain[0].1.can_merge_with(&overflow_page) {
                    chain[0].1.merge_with(&overflow_page, self.key_index);
                    chain[0].1.next_overflow_page = overflow_page.next_overflow_page;
                    free.push(overflow_id as i64);
                    chain.remove(1);
                }
            }
        } else if chain[ci].1.is_empty() {
            let freed_id = chain[ci].0;
            let prev_next = chain.get(ci + 1).map(|(id, _)| *id).unwrap_or(-1);
            chain[ci - 1].1.next_overflow_page = prev_next;
            free.push(freed_id as i64);
            chain.remove(ci);
        }

        for (id, page) in &chain {
            self.save_data(&meta, *id, page, &mut tracker)?;
        }
        free.save(&self.free_path(), &mut tracker)?;

        let rebuilt = if self.rebuild_needed(&meta, &mut tracker)? {
            self.rebuild(&mut meta, &mut tracker)?;
            true
        } else {
            false
        };
        self.save_meta(&meta)?;
        Ok(tracker.end_operation(true, rebuilt))
    }

    fn rebuild_needed(&self, meta: &IsamMeta, tracker: &mut PerformanceTracker) -> Result<bool> {
        let free = FreeList::load(&self.free_path(), tracker)?;
        let total_pages = meta.next_data_page_id.max(1) as f64;
        let free_ratio = free.len() as f64 / total_pages;
        if free_ratio > meta.options.free_ratio_threshold {
            return Ok(true);
        }

        let root = self.load_root(meta, tracker)?;
        let mut main_page_count = 0usize;
        let mut overflow_total = 0usize;
        for (_, leaf_id) in &root {
            let leaf = self.load_leaf(meta, *leaf_id, tracker)?;
            for (_, main_id) in &leaf {
                main_page_count += 1;
                let page = self.load_data(meta, *main_id, tracker)?;
                overflow_total += self.chain_len_from(meta, page.next_overflow_page, tracker)?;
            }
        }
        if main_page_count == 0 {
            return Ok(false);
        }
        let mean_overflow = overflow_total as f64 / main_page_count as f64;
        Ok(mean_overflow > meta.options.mean_overflow_threshold)
    }

    fn chain_len_from(&self, meta: &IsamMeta, mut next: i32, tracker: &mut PerformanceTracker) -> Result<usize> {
        let mut len = 0;
        while next >= 0 {
            len += 1;
            let page = self.load_data(meta, next, tracker)?;
            next = page.next_overflow_page;
        }
        Ok(len)
    }

    fn rebuild(&self, meta: &mut IsamMeta, tracker: &mut PerformanceTracker) -> Result<()> {
        log::info!("isam: rebuild triggered");
        let all = self.scan_all_with(meta, tracker)?;

        let grow = |n: usize| -> usize {
            ((n as f64 * meta.options.rebuild_growth).ceil() as usize).min(meta.options.max_block_factor)
        };
        meta.options.block_factor = grow(meta.options.block_factor).max(1);
        meta.options.leaf_block_factor = grow(meta.options.leaf_block_factor).max(1);
        meta.options.root_block_factor = grow(meta.options.root_block_factor).max(1);
        meta.next_data_page_id = 0;
        meta.next_leaf_page_id = 0;

        std::fs::write(self.data_path(), [])?;
        std::fs::write(self.leaf_path(), [])?;
        std::fs::write(self.root_path(), [])?;
        let mut free = FreeList::load(&self.free_path(), tracker)?;
        free.clear();
        free.save(&self.free_path(), tracker)?;

        let mut root: Vec<(Value, i32)> = Vec::new();
        let mut leaf_entries: Vec<(Value, i32)> = Vec::new();

        let mut chunks = all.chunks(meta.options.block_factor).peekable();
        while let Some(chunk) = chunks.next() {
            let data_id = meta.next_data_page_id;
            meta.next_data_page_id += 1;
            let mut page = Page::empty(meta.options.block_factor, self.record_size);
            for r in chunk {
                page.insert_sorted(r.clone(), self.key_index);
            }
            self.save_data(meta, data_id, &page, tracker)?;
            leaf_entries.push((self.record_key(&chunk[0]).clone(), data_id));

            if leaf_entries.len() == meta.options.leaf_block_factor || chunks.peek().is_none() {
                let leaf_id = meta.next_leaf_page_id;
                meta.next_leaf_page_id += 1;
                root.push((leaf_entries[0].0.clone(), leaf_id));
                self.save_leaf(meta, leaf_id, &leaf_entries, tracker)?;
                leaf_entries.clear();
            }
        }
        self.save_root(meta, &root, tracker)?;
        Ok(())
    }

    fn scan_all_with(&self, meta: &IsamMeta, tracker: &mut PerformanceTracker) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        let root = self.load_root(meta, tracker)?;
        for (_, leaf_id) in &root {
            let leaf = self.load_leaf(meta, *leaf_id, tracker)?;
            for (_, main_id) in &leaf {
                let chain = self.load_chain(meta, *main_id, tracker)?;
                for (_, page) in chain {
                    out.extend(page.records);
                }
            }
        }
        out.sort_by(|a, b| self.record_key(a).key_cmp(self.record_key(b)));
        Ok(out)
    }

    pub fn range_search(&self, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<Record>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let meta = self.load_meta()?;
        let all = self.scan_all_with(&meta, &mut tracker)?;
        let out: Vec<Record> = all
            .into_iter()
            .filter(|r| {
                let k = self.record_key(r);
                k.key_cmp(lo) != Ordering::Less && k.key_cmp(hi) != Ordering::Greater
            })
            .collect();
        Ok(tracker.end_operation(out, false))
    }

    pub fn scan_all(&self) -> Result<OperationResult<Vec<Record>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let meta = self.load_meta()?;
        let out = self.scan_all_with(&meta, &mut tracker)?;
        Ok(tracker.end_operation(out, false))
    }
}

impl PrimaryIndex for IsamPrimaryIndex {
    fn insert(&mut self, record: Record) -> Result<OperationResult<bool>> {
        IsamPrimaryIndex::insert(self, record)
    }
    fn delete(&mut self, key: &Value) -> Result<OperationResult<bool>> {
        IsamPrimaryIndex::delete(self, key)
    }
    fn search(&mut self, key: &Value) -> Result<OperationResult<Option<Record>>> {
        IsamPrimaryIndex::search(self, key)
    }
    fn range_search(&mut self, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<Record>>> {
        IsamPrimaryIndex::range_search(self, lo, hi)
    }
    fn scan_all(&mut self) -> Result<OperationResult<Vec<Record>>> {
        IsamPrimaryIndex::scan_all(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Schema};
    use tempfile::tempdir;

    fn index(dir: &Path, opts: IsamOptions) -> IsamPrimaryIndex {
        let schema = TableSchema::new(Schema {
            columns: vec![Column::new("id", Type::Int), Column::new("v", Type::Char(4))],
            key_field: "id".into(),
        })
        .unwrap();
        IsamPrimaryIndex::new(dir, schema, opts).unwrap()
    }

    fn rec(id: i32) -> Record {
        Record::new(vec![Value::Int(id), Value::Char("x".into())])
    }

    fn tiny_opts() -> IsamOptions {
        IsamOptions {
            block_factor: 4,
            root_block_factor: 4,
            leaf_block_factor: 4,
            max_overflow: 2,
            rebuild_growth: 1.5,
            max_block_factor: 64,
            free_ratio_threshold: 0.9,
            mean_overflow_threshold: 100.0,
        }
    }

    #[test]
    fn insert_search_within_one_page() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path(), tiny_opts());
        for id in [3, 1, 2] {
            assert!(idx.insert(rec(id)).unwrap().data);
        }
        assert!(idx.search(&Value::Int(2)).unwrap().data.is_some());
        assert!(idx.search(&Value::Int(99)).unwrap().data.is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path(), tiny_opts());
        assert!(idx.insert(rec(1)).unwrap().data);
        assert!(!idx.insert(rec(1)).unwrap().data);
    }

    #[test]
    fn overflow_chain_then_split_keeps_all_records_reachable() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path(), tiny_opts());
        for id in 0..30 {
            assert!(idx.insert(rec(id)).unwrap().data);
        }
        for id in 0..30 {
            assert!(idx.search(&Value::Int(id)).unwrap().data.is_some(), "missing {id}");
        }
        let scan = idx.scan_all().unwrap().data;
        assert_eq!(scan.len(), 30);
    }

    #[test]
    fn delete_then_search_misses_and_others_survive() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path(), tiny_opts());
        for id in 0..10 {
            idx.insert(rec(id)).unwrap();
        }
        assert!(idx.delete(&Value::Int(5)).unwrap().data);
        assert!(!idx.delete(&Value::Int(5)).unwrap().data);
        assert!(idx.search(&Value::Int(5)).unwrap().data.is_none());
        for id in 0..10 {
            if id != 5 {
                assert!(idx.search(&Value::Int(id)).unwrap().data.is_some());
            }
        }
    }

    #[test]
    fn range_search_returns_sorted_matches() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path(), tiny_opts());
        for id in (0..20).rev() {
            idx.insert(rec(id)).unwrap();
        }
        let range = idx.range_search(&Value::Int(5), &Value::Int(9)).unwrap().data;
        let keys: Vec<i32> = range
            .iter()
            .map(|r| match r.get(0) {
                Value::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn heavy_load_triggers_a_rebuild() {
        let dir = tempdir().unwrap();
        let mut opts = tiny_opts();
        opts.mean_overflow_threshold = 1.0;
        let idx = index(dir.path(), opts);
        let mut rebuilt = false;
        for id in 0..60 {
            let result = idx.insert(rec(id)).unwrap();
            rebuilt |= result.rebuild_triggered;
        }
        assert!(rebuilt);
        for id in 0..60 {
            assert!(idx.search(&Value::Int(id)).unwrap().data.is_some());
        }
    }
}
