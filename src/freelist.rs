//! LIFO free-page/free-bucket stack, shared by ISAM and the extendible hash.
//!
//! On-disk layout: `(count: i32, [offset: i32; count])`. A freed slot is
//! pushed; the next allocation pops, giving amortised-constant reuse without
//! compaction between rebuilds.

use std::path::Path;

use crate::error::Result;
use crate::pagefile::PageFile;
use crate::perf::PerformanceTracker;

pub struct FreeList {
    entries: Vec<i64>,
}

impl FreeList {
    pub fn load(path: &Path, tracker: &mut PerformanceTracker) -> Result<Self> {
        if !path.exists() {
            return Ok(Self { entries: Vec::new() });
        }
        let bytes = std::fs::read(path)?;
        tracker.track_read();
        if bytes.len() < 4 {
            return Ok(Self { entries: Vec::new() });
        }
        let count = i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let mut entries = Vec::with_capacity(count);
        let mut offset = 4;
        for _ in 0..count {
            entries.push(i64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap()));
            offset += 8;
        }
        Ok(Self { entries })
    }

    pub fn save(&self, path: &Path, tracker: &mut PerformanceTracker) -> Result<()> {
        let mut buf = Vec::with_capacity(4 + self.entries.len() * 8);
        buf.extend_from_slice(&(self.entries.len() as i32).to_le_bytes());
        for e in &self.entries {
            buf.extend_from_slice(&e.to_le_bytes());
        }
        std::fs::write(path, buf)?;
        tracker.track_write();
        Ok(())
    }

    pub fn push(&mut self, offset: i64) {
        self.entries.push(offset);
    }

    pub fn pop(&mut self) -> Option<i64> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Truncate the data file referenced by free-list offsets back to nothing,
/// used by a rebuild that rewrites the whole owning index from scratch.
pub fn reset_backing_file(path: &Path) -> Result<()> {
    let _ = PageFile::open(path, 1)?; // ensure exists
    std::fs::write(path, [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn push_pop_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("free.bin");
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();

        let mut list = FreeList::load(&path, &mut tracker).unwrap();
        assert!(list.is_empty());
        list.push(10);
        list.push(20);
        list.save(&path, &mut tracker).unwrap();

        let mut list2 = FreeList::load(&path, &mut tracker).unwrap();
        assert_eq!(list2.pop(), Some(20));
        assert_eq!(list2.pop(), Some(10));
        assert_eq!(list2.pop(), None);
    }
}
