//! Fixed-size disk block holding up to `block_factor` records.
//!
//! Layout: `(active_count: i32, next_overflow_page: i32)` header, followed by
//! `block_factor` fixed-width record slots. Active records always occupy the
//! first `active_count` slots in ascending key order; everything past that
//! is zeroed padding. This mirrors the source engine's ISAM `Page`, which
//! keeps a plain sorted `Vec` of records and pads the rest with `\x00` on
//! pack — equivalent to a tombstone, but derived from the explicit count
//! rather than scanned for, since an all-zero slot is not otherwise
//! distinguishable from a valid all-zero record.

use crate::record::Record;
use crate::schema::Type;

pub const HEADER_SIZE: usize = 8;

#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub next_overflow_page: i32,
    block_factor: usize,
    record_size: usize,
}

impl Page {
    pub fn empty(block_factor: usize, record_size: usize) -> Self {
        Self {
            records: Vec::new(),
            next_overflow_page: -1,
            block_factor,
            record_size,
        }
    }

    pub fn block_factor(&self) -> usize {
        self.block_factor
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.block_factor
    }

    pub fn page_size(block_factor: usize, record_size: usize) -> usize {
        HEADER_SIZE + block_factor * record_size
    }

    /// Pack using an explicit column layout (records don't carry their own schema).
    pub fn pack_with(&self, layout: &[(Type, usize)]) -> Vec<u8> {
        let mut buf = vec![0u8; Self::page_size(self.block_factor, self.record_size)];
        buf[0..4].copy_from_slice(&(self.records.len() as i32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.next_overflow_page.to_le_bytes());
        for (i, record) in self.records.iter().enumerate() {
            let offset = HEADER_SIZE + i * self.record_size;
            record
                .pack_into(&mut buf, offset, layout)
                .expect("page record matches schema layout");
        }
        buf
    }

    pub fn unpack_with(
        buf: &[u8],
        block_factor: usize,
        record_size: usize,
        layout: &[(Type, usize)],
    ) -> Self {
        let active_count = i32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        let next_overflow_page = i32::from_le_bytes(buf[4..8].try_into().unwrap());
        let mut records = Vec::with_capacity(active_count);
        for i in 0..active_count {
            let offset = HEADER_SIZE + i * record_size;
            records.push(Record::unpack_from(buf, offset, layout));
        }
        Self {
            records,
            next_overflow_page,
            block_factor,
            record_size,
        }
    }

    /// Insert keeping `records` sorted by `key_index`. Returns `false` if the
    /// key is already present in this page (the page is left unchanged).
    pub fn insert_sorted(&mut self, record: Record, key_index: usize) -> bool {
        let key = record.get(key_index).clone();
        let pos = self
            .records
            .partition_point(|r| r.get(key_index).key_cmp(&key) == std::cmp::Ordering::Less);
        if pos < self.records.len() && self.records[pos].get(key_index).key_cmp(&key) == std::cmp::Ordering::Equal {
            return false;
        }
        self.records.insert(pos, record);
        true
    }

    /// Remove the record with the given key, if present.
    pub fn remove_record(&mut self, key: &crate::schema::Value, key_index: usize) -> bool {
        if let Ok(pos) = self
            .records
            .binary_search_by(|r| r.get(key_index).key_cmp(key))
        {
            self.records.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn find(&self, key: &crate::schema::Value, key_index: usize) -> Option<&Record> {
        self.records
            .binary_search_by(|r| r.get(key_index).key_cmp(key))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn can_merge_with(&self, other: &Page) -> bool {
        self.records.len() + other.records.len() <= self.block_factor
    }

    pub fn merge_with(&mut self, other: &Page, key_index: usize) {
        self.records.extend(other.records.iter().cloned());
        self.records
            .sort_by(|a, b| a.get(key_index).key_cmp(b.get(key_index)));
    }

    pub fn min_key(&self, key_index: usize) -> Option<&crate::schema::Value> {
        self.records.first().map(|r| r.get(key_index))
    }

    pub fn max_key(&self, key_index: usize) -> Option<&crate::schema::Value> {
        self.records.last().map(|r| r.get(key_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::column_layout;
    use crate::schema::{Column, Value};

    fn layout() -> Vec<(Type, usize)> {
        column_layout(&[Column::new("id", Type::Int), Column::new("v", Type::Char(4))])
    }

    fn rec(id: i32) -> Record {
        Record::new(vec![Value::Int(id), Value::Char("x".into())])
    }

    #[test]
    fn page_round_trips_through_pack_unpack() {
        let layout = layout();
        let mut page = Page::empty(4, 8);
        for id in [3, 1, 2] {
            assert!(page.insert_sorted(rec(id), 0));
        }
        assert_eq!(
            page.records.iter().map(|r| r.get(0).clone()).collect::<Vec<_>>(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );

        let packed = page.pack_with(&layout);
        let back = Page::unpack_with(&packed, 4, 8, &layout);
        assert_eq!(page, back);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut page = Page::empty(4, 8);
        assert!(page.insert_sorted(rec(1), 0));
        assert!(!page.insert_sorted(rec(1), 0));
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn merge_requires_combined_size_within_block_factor() {
        let mut a = Page::empty(4, 8);
        let mut b = Page::empty(4, 8);
        a.insert_sorted(rec(1), 0);
        a.insert_sorted(rec(2), 0);
        b.insert_sorted(rec(3), 0);
        b.insert_sorted(rec(4), 0);
        assert!(a.can_merge_with(&b));
        a.merge_with(&b, 0);
        assert_eq!(a.len(), 4);

        let mut c = Page::empty(4, 8);
        c.insert_sorted(rec(5), 0);
        assert!(!a.can_merge_with(&c));
    }
}
