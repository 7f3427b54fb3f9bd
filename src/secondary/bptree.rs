//! Unclustered B+ tree: leaves store `(secondary_value, primary_key)` index
//! records rather than full records, and duplicate secondary values are
//! expected — ties are broken by ascending `primary_key`, which is what
//! makes point lookups deterministic and range scans stable (§4.5).
//!
//! Node format and split/borrow/merge cascades mirror
//! [`crate::primary::bptree`]; the two trees don't share code beyond
//! [`crate::bptree_common`] because their leaf payload types differ.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::bptree_common::{node_size_for, NodeHeader, TreeMetadata, LEAF_HEADER_SIZE, NODE_HEADER_SIZE, NO_ID};
use crate::config::BPTREE_ORDER;
use crate::error::Result;
use crate::pagefile::PageFile;
use crate::perf::{OperationResult, PerformanceTracker};
use crate::record::IndexRecord;
use crate::schema::{Type, Value};
use crate::secondary::SecondaryIndex;

enum Body {
    Internal { keys: Vec<Value>, children: Vec<i32> },
    Leaf { entries: Vec<IndexRecord>, prev: i32, next: i32 },
}

struct Node {
    id: i32,
    parent: i32,
    body: Body,
}

pub struct UnclusteredBPlusTree {
    path: PathBuf,
    value_type: Type,
    order: usize,
    max_keys: usize,
    min_keys: usize,
    node_size: usize,
    entry_size: usize,
    key_size: usize,
}

/// Ordering used throughout this tree: by value, ties broken by primary key.
fn entry_cmp(a: &IndexRecord, b: &IndexRecord) -> Ordering {
    a.value.key_cmp(&b.value).then(a.primary_key.cmp(&b.primary_key))
}

impl UnclusteredBPlusTree {
    pub fn new(path: impl AsRef<Path>, value_type: Type, order: usize) -> Self {
        let key_size = value_type.size();
        let entry_size = IndexRecord::size(value_type);
        let max_keys = order - 1;
        let min_keys = (order + 1).div_ceil(2) - 1;

        let internal_body = max_keys * key_size + (max_keys + 1) * 4;
        let leaf_body = max_keys * entry_size;
        let node_size = node_size_for((NODE_HEADER_SIZE + internal_body).max(LEAF_HEADER_SIZE + leaf_body));

        Self {
            path: path.as_ref().to_path_buf(),
            value_type,
            order,
            max_keys,
            min_keys,
            node_size,
            entry_size,
            key_size,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    fn file(&self) -> Result<PageFile> {
        PageFile::open(&self.path, self.node_size)
    }

    fn load_metadata(&self, file: &mut PageFile, tracker: &mut PerformanceTracker) -> Result<TreeMetadata> {
        let buf = file.read_block(0, tracker)?;
        Ok(TreeMetadata::try_unpack_from(&buf).unwrap_or_else(|| TreeMetadata::fresh(self.order, self.value_type)))
    }

    fn save_metadata(&self, file: &mut PageFile, meta: &TreeMetadata, tracker: &mut PerformanceTracker) -> Result<()> {
        let mut buf = vec![0u8; self.node_size];
        meta.pack_into(&mut buf);
        file.write_block(0, &buf, tracker)
    }

    fn read_node(&self, file: &mut PageFile, id: i32, tracker: &mut PerformanceTracker) -> Result<Node> {
        let buf = file.read_block(id as usize, tracker)?;
        let header = NodeHeader::unpack_from(&buf);
        let body = if header.is_leaf {
            let prev = i32::from_le_bytes(buf[NODE_HEADER_SIZE..NODE_HEADER_SIZE + 4].try_into().unwrap());
            let next = i32::from_le_bytes(buf[NODE_HEADER_SIZE + 4..NODE_HEADER_SIZE + 8].try_into().unwrap());
            let mut entries = Vec::with_capacity(header.num_keys);
            for i in 0..header.num_keys {
                let offset = LEAF_HEADER_SIZE + i * self.entry_size;
                entries.push(IndexRecord::unpack_from(&buf, offset, self.value_type));
            }
            Body::Leaf { entries, prev, next }
        } else {
            let mut keys = Vec::with_capacity(header.num_keys);
            let mut children = Vec::with_capacity(header.num_keys + 1);
            let key_layout = [(self.value_type, 0)];
            for i in 0..header.num_keys {
                let offset = NODE_HEADER_SIZE + i * self.key_size;
                keys.push(crate::record::Record::unpack_from(&buf, offset, &key_layout).fields.remove(0));
            }
            let children_offset = NODE_HEADER_SIZE + self.max_keys * self.key_size;
            for i in 0..=header.num_keys {
                let off = children_offset + i * 4;
                children.push(i32::from_le_bytes(buf[off..off + 4].try_into().unwrap()));
            }
            Body::Internal { keys, children }
        };
        Ok(Node { id, parent: header.parent_id, body })
    }

    fn write_node(&self, file: &mut PageFile, node: &Node, tracker: &mut PerformanceTracker) -> Result<()> {
        let mut buf = vec![0u8; self.node_size];
        let is_leaf = matches!(node.body, Body::Leaf { .. });
        let num_keys = match &node.body {
            Body::Internal { keys, .. } => keys.len(),
            Body::Leaf { entries, .. } => entries.len(),
        };
        NodeHeader {
            is_leaf,
            num_keys,
            node_id: node.id,
            parent_id: node.parent,
        }
        .pack_into(&mut buf);

        match &node.body {
            Body::Leaf { entries, prev, next } => {
                buf[NODE_HEADER_SIZE..NODE_HEADER_SIZE + 4].copy_from_slice(&prev.to_le_bytes());
                buf[NODE_HEADER_SIZE + 4..NODE_HEADER_SIZE + 8].copy_from_slice(&next.to_le_bytes());
                for (i, entry) in entries.iter().enumerate() {
                    let offset = LEAF_HEADER_SIZE + i * self.entry_size;
                    entry.pack_into(&mut buf, offset, self.value_type)?;
                }
            }
            Body::Internal { keys, children } => {
                let key_layout = [(self.value_type, 0)];
                for (i, key) in keys.iter().enumerate() {
                    let offset = NODE_HEADER_SIZE + i * self.key_size;
                    crate::record::Record::new(vec![key.clone()]).pack_into(&mut buf, offset, &key_layout)?;
                }
                let children_offset = NODE_HEADER_SIZE + self.max_keys * self.key_size;
                for (i, child) in children.iter().enumerate() {
                    let off = children_offset + i * 4;
                    buf[off..off + 4].copy_from_slice(&child.to_le_bytes());
                }
            }
        }
        file.write_block(node.id as usize, &buf, tracker)
    }

    fn find_leaf(&self, file: &mut PageFile, meta: &TreeMetadata, value: &Value, tracker: &mut PerformanceTracker) -> Result<Node> {
        let mut node = self.read_node(file, meta.root_node_id, tracker)?;
        loop {
            match &node.body {
                Body::Leaf { .. } => return Ok(node),
                Body::Internal { keys, children } => {
                    let pos = keys.partition_point(|k| k.key_cmp(value) != Ordering::Greater);
                    node = self.read_node(file, children[pos], tracker)?;
                }
            }
        }
    }

    pub fn insert(&self, entry: IndexRecord) -> Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let mut meta = self.load_metadata(&mut file, &mut tracker)?;

        if meta.root_node_id == NO_ID {
            let root_id = meta.allocate_node_id();
            let root = Node {
                id: root_id,
                parent: NO_ID,
                body: Body::Leaf { entries: vec![], prev: NO_ID, next: NO_ID },
            };
            self.write_node(&mut file, &root, &mut tracker)?;
            meta.root_node_id = root_id;
        }

        let mut leaf = self.find_leaf(&mut file, &meta, &entry.value, &mut tracker)?;
        let entries = match &mut leaf.body {
            Body::Leaf { entries, .. } => entries,
            Body::Internal { .. } => unreachable!(),
        };

        let pos = entries.partition_point(|e| entry_cmp(e, &entry) == Ordering::Less);
        if pos < entries.len() && entries[pos].value == entry.value && entries[pos].primary_key == entry.primary_key {
            return Ok(tracker.end_operation(true, false));
        }
        entries.insert(pos, entry);
        let overflow = entries.len() > self.max_keys;

        if !overflow {
            self.write_node(&mut file, &leaf, &mut tracker)?;
            self.save_metadata(&mut file, &meta, &mut tracker)?;
            return Ok(tracker.end_operation(true, false));
        }

        self.split_leaf_and_propagate(&mut file, &mut meta, leaf, &mut tracker)?;
        self.save_metadata(&mut file, &meta, &mut tracker)?;
        Ok(tracker.end_operation(true, false))
    }

    fn split_leaf_and_propagate(&self, file: &mut PageFile, meta: &mut TreeMetadata, mut leaf: Node, tracker: &mut PerformanceTracker) -> Result<()> {
        let (entries, next) = match &mut leaf.body {
            Body::Leaf { entries, next, .. } => (entries, *next),
            Body::Internal { .. } => unreachable!(),
        };
        let mid = entries.len().div_ceil(2);
        let right_entries: Vec<IndexRecord> = entries.split_off(mid);
        let separator = right_entries[0].value.clone();

        let new_id = meta.allocate_node_id();
        let new_leaf = Node {
            id: new_id,
            parent: leaf.parent,
            body: Body::Leaf { entries: right_entries, prev: leaf.id, next },
        };

        if next != NO_ID {
            let mut next_node = self.read_node(file, next, tracker)?;
            if let Body::Leaf { prev, .. } = &mut next_node.body {
                *prev = new_id;
            }
            self.write_node(file, &next_node, tracker)?;
        }
        if let Body::Leaf { next: leaf_next, .. } = &mut leaf.body {
            *leaf_next = new_id;
        }

        self.write_node(file, &leaf, tracker)?;
        self.write_node(file, &new_leaf, tracker)?;
        self.insert_into_parent(file, meta, leaf.id, separator, new_id, tracker)
    }

    fn insert_into_parent(&self, file: &mut PageFile, meta: &mut TreeMetadata, left_id: i32, separator: Value, right_id: i32, tracker: &mut PerformanceTracker) -> Result<()> {
        let left = self.read_node(file, left_id, tracker)?;
        if left.parent == NO_ID {
            let new_root_id = meta.allocate_node_id();
            let new_root = Node {
                id: new_root_id,
                parent: NO_ID,
                body: Body::Internal { keys: vec![separator], children: vec![left_id, right_id] },
            };
            self.write_node(file, &new_root, tracker)?;

            let mut left = left;
            left.parent = new_root_id;
            self.write_node(file, &left, tracker)?;
            let mut right = self.read_node(file, right_id, tracker)?;
            right.parent = new_root_id;
            self.write_node(file, &right, tracker)?;

            meta.root_node_id = new_root_id;
            return Ok(());
        }

        let parent_id = left.parent;
        let mut parent = self.read_node(file, parent_id, tracker)?;
        if let Body::Internal { keys, children } = &mut parent.body {
            let pos = children.iter().position(|&c| c == left_id).expect("left must be a child of its parent");
            keys.insert(pos, separator);
            children.insert(pos + 1, right_id);

            let mut right = self.read_node(file, right_id, tracker)?;
            right.parent = parent_id;
            self.write_node(file, &right, tracker)?;

            if keys.len() <= self.max_keys {
                self.write_node(file, &parent, tracker)?;
                return Ok(());
            }

            let mid = keys.len() / 2;
            let promoted = keys[mid].clone();
            let right_keys = keys.split_off(mid + 1);
            keys.pop();
            let right_children = children.split_off(mid + 1);

            let new_internal_id = meta.allocate_node_id();
            let new_internal = Node {
                id: new_internal_id,
                parent: parent.parent,
                body: Body::Internal { keys: right_keys, children: right_children.clone() },
            };
            for child_id in &right_children {
                let mut child = self.read_node(file, *child_id, tracker)?;
                child.parent = new_internal_id;
                self.write_node(file, &child, tracker)?;
            }
            self.write_node(file, &new_internal, tracker)?;
            self.write_node(file, &parent, tracker)?;

            self.insert_into_parent(file, meta, parent_id, promoted, new_internal_id, tracker)
        } else {
            unreachable!("parent must be internal")
        }
    }

    /// Every primary key for `value`, walking forward while leaf keys equal
    /// the query and stopping at the first strictly-greater key or chain end.
    pub fn search(&self, value: &Value) -> Result<OperationResult<Vec<i32>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let meta = self.load_metadata(&mut file, &mut tracker)?;
        let mut out = Vec::new();
        if meta.root_node_id != NO_ID {
            let mut leaf = self.find_leaf(&mut file, &meta, value, &mut tracker)?;
            'outer: loop {
                let (entries, next) = match &leaf.body {
                    Body::Leaf { entries, next, .. } => (entries, *next),
                    _ => unreachable!(),
                };
                for e in entries {
                    match e.value.key_cmp(value) {
                        Ordering::Equal => out.push(e.primary_key),
                        Ordering::Greater => break 'outer,
                        Ordering::Less => {}
                    }
                }
                if next == NO_ID {
                    break;
                }
                leaf = self.read_node(&mut file, next, &mut tracker)?;
            }
        }
        Ok(tracker.end_operation(out, false))
    }

    pub fn range_search(&self, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<i32>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let meta = self.load_metadata(&mut file, &mut tracker)?;
        let mut out = Vec::new();
        if meta.root_node_id != NO_ID {
            let mut leaf = self.find_leaf(&mut file, &meta, lo, &mut tracker)?;
            loop {
                let (entries, next) = match &leaf.body {
                    Body::Leaf { entries, next, .. } => (entries, *next),
                    _ => unreachable!(),
                };
                for e in entries {
                    if e.value.key_cmp(lo) != Ordering::Less && e.value.key_cmp(hi) != Ordering::Greater {
                        out.push(e.primary_key);
                    }
                }
                if next == NO_ID || entries.last().map(|e| e.value.key_cmp(hi) == Ordering::Greater).unwrap_or(false) {
                    break;
                }
                leaf = self.read_node(&mut file, next, &mut tracker)?;
            }
        }
        Ok(tracker.end_operation(out, false))
    }

    pub fn scan_all(&self) -> Result<OperationResult<Vec<IndexRecord>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let meta = self.load_metadata(&mut file, &mut tracker)?;
        let mut out = Vec::new();
        if meta.root_node_id != NO_ID {
            let mut node = self.read_node(&mut file, meta.root_node_id, &mut tracker)?;
            loop {
                match &node.body {
                    Body::Leaf { .. } => break,
                    Body::Internal { children, .. } => {
                        node = self.read_node(&mut file, children[0], &mut tracker)?;
                    }
                }
            }
            loop {
                let (entries, next) = match &node.body {
                    Body::Leaf { entries, next, .. } => (entries.clone(), *next),
                    _ => unreachable!(),
                };
                out.extend(entries);
                if next == NO_ID {
                    break;
                }
                node = self.read_node(&mut file, next, &mut tracker)?;
            }
        }
        Ok(tracker.end_operation(out, false))
    }

    pub fn delete_one(&self, value: &Value, primary_key: i32) -> Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let mut meta = self.load_metadata(&mut file, &mut tracker)?;
        if meta.root_node_id == NO_ID {
            return Ok(tracker.end_operation(false, false));
        }
        let mut leaf = self.find_leaf(&mut file, &meta, value, &mut tracker)?;
        let removed = match &mut leaf.body {
            Body::Leaf { entries, .. } => {
                if let Some(pos) = entries.iter().position(|e| &e.value == value && e.primary_key == primary_key) {
                    entries.remove(pos);
                    true
                } else {
                    false
                }
            }
            _ => unreachable!(),
        };
        if !removed {
            return Ok(tracker.end_operation(false, false));
        }
        self.finish_delete(&mut file, &mut meta, leaf, &mut tracker)?;
        Ok(tracker.end_operation(true, false))
    }

    pub fn delete_all(&self, value: &Value) -> Result<OperationResult<Vec<i32>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut removed_keys = Vec::new();
        loop {
            let mut file = self.file()?;
            let mut meta = self.load_metadata(&mut file, &mut tracker)?;
            if meta.root_node_id == NO_ID {
                break;
            }
            let mut leaf = self.find_leaf(&mut file, &meta, value, &mut tracker)?;
            let hit = match &mut leaf.body {
                Body::Leaf { entries, .. } => entries.iter().position(|e| &e.value == value).map(|pos| entries.remove(pos)),
                _ => unreachable!(),
            };
            match hit {
                None => break,
                Some(e) => {
                    removed_keys.push(e.primary_key);
                    self.finish_delete(&mut file, &mut meta, leaf, &mut tracker)?;
                }
            }
        }
        Ok(tracker.end_operation(removed_keys, false))
    }

    fn finish_delete(&self, file: &mut PageFile, meta: &mut TreeMetadata, leaf: Node, tracker: &mut PerformanceTracker) -> Result<()> {
        let is_root = leaf.parent == NO_ID;
        let underflow = match &leaf.body {
            Body::Leaf { entries, .. } => entries.len() < self.min_keys,
            _ => false,
        };
        if is_root || !underflow {
            self.write_node(file, &leaf, tracker)?;
            self.save_metadata(file, meta, tracker)?;
            return Ok(());
        }
        self.fix_leaf_underflow(file, meta, leaf, tracker)?;
        self.save_metadata(file, meta, tracker)
    }

    fn fix_leaf_underflow(&self, file: &mut PageFile, meta: &mut TreeMetadata, leaf: Node, tracker: &mut PerformanceTracker) -> Result<()> {
        let parent_id = leaf.parent;
        let mut parent = self.read_node(file, parent_id, tracker)?;
        let (keys, children) = match &mut parent.body {
            Body::Internal { keys, children } => (keys, children),
            _ => unreachable!(),
        };
        let pos = children.iter().position(|&c| c == leaf.id).unwrap();

        if pos > 0 {
            let left_id = children[pos - 1];
            let mut left = self.read_node(file, left_id, tracker)?;
            if let Body::Leaf { entries: left_entries, .. } = &mut left.body {
                if left_entries.len() > self.min_keys {
                    let borrowed = left_entries.pop().unwrap();
                    let mut leaf = leaf;
                    if let Body::Leaf { entries, .. } = &mut leaf.body {
                        entries.insert(0, borrowed.clone());
                    }
                    keys[pos - 1] = borrowed.value.clone();
                    self.write_node(file, &left, tracker)?;
                    self.write_node(file, &leaf, tracker)?;
                    self.write_node(file, &parent, tracker)?;
                    return Ok(());
                }
            }
        }
        if pos + 1 < children.len() {
            let right_id = children[pos + 1];
            let mut right = self.read_node(file, right_id, tracker)?;
            if let Body::Leaf { entries: right_entries, .. } = &mut right.body {
                if right_entries.len() > self.min_keys {
                    let borrowed = right_entries.remove(0);
                    let mut leaf = leaf;
                    if let Body::Leaf { entries, .. } = &mut leaf.body {
                        entries.push(borrowed);
                    }
                    keys[pos] = right_entries[0].value.clone();
                    self.write_node(file, &right, tracker)?;
                    self.write_node(file, &leaf, tracker)?;
                    self.write_node(file, &parent, tracker)?;
                    return Ok(());
                }
            }
        }

        if pos > 0 {
            let left_id = children[pos - 1];
            let mut left = self.read_node(file, left_id, tracker)?;
            self.merge_leaves(file, &mut left, &leaf, tracker)?;
            keys.remove(pos - 1);
            children.remove(pos);
            self.write_node(file, &left, tracker)?;
        } else {
            let right_id = children[pos + 1];
            let right = self.read_node(file, right_id, tracker)?;
            let mut leaf = leaf;
            self.merge_leaves(file, &mut leaf, &right, tracker)?;
            keys.remove(pos);
            children.remove(pos + 1);
            self.write_node(file, &leaf, tracker)?;
        }

        if keys.len() < self.min_keys && parent_id != meta.root_node_id {
            self.fix_internal_underflow(file, meta, parent, tracker)
        } else if parent_id == meta.root_node_id && keys.is_empty() {
            meta.root_node_id = children[0];
            let mut new_root = self.read_node(file, children[0], tracker)?;
            new_root.parent = NO_ID;
            self.write_node(file, &new_root, tracker)
        } else {
            self.write_node(file, &parent, tracker)
        }
    }

    fn merge_leaves(&self, file: &mut PageFile, left: &mut Node, right: &Node, tracker: &mut PerformanceTracker) -> Result<()> {
        let right_next = match &right.body {
            Body::Leaf { next, .. } => *next,
            _ => unreachable!(),
        };
        let right_entries = match &right.body {
            Body::Leaf { entries, .. } => entries.clone(),
            _ => unreachable!(),
        };
        if let Body::Leaf { entries, next, .. } = &mut left.body {
            entries.extend(right_entries);
            *next = right_next;
        }
        if right_next != NO_ID {
            let mut next_node = self.read_node(file, right_next, tracker)?;
            if let Body::Leaf { prev, .. } = &mut next_node.body {
                *prev = left.id;
            }
            self.write_node(file, &next_node, tracker)?;
        }
        Ok(())
    }

    fn fix_internal_underflow(&self, file: &mut PageFile, meta: &mut TreeMetadata, node: Node, tracker: &mut PerformanceTracker) -> Result<()> {
        let parent_id = node.parent;
        if parent_id == NO_ID {
            return Ok(());
        }
        let mut parent = self.read_node(file, parent_id, tracker)?;
        let (pkeys, pchildren) = match &mut parent.body {
            Body::Internal { keys, children } => (keys, children),
            _ => unreachable!(),
        };
        let pos = pchildren.iter().position(|&c| c == node.id).unwrap();

        if pos > 0 {
            let left_id = pchildren[pos - 1];
            let mut left = self.read_node(file, left_id, tracker)?;
            if let Body::Internal { keys: lkeys, children: lchildren } = &mut left.body {
                if lkeys.len() > self.min_keys {
                    let mut node = node;
                    let borrowed_key = lkeys.pop().unwrap();
                    let borrowed_child = lchildren.pop().unwrap();
                    if let Body::Internal { keys, children } = &mut node.body {
                        keys.insert(0, pkeys[pos - 1].clone());
                        children.insert(0, borrowed_child);
                    }
                    pkeys[pos - 1] = borrowed_key;
                    let mut moved = self.read_node(file, borrowed_child, tracker)?;
                    moved.parent = node.id;
                    self.write_node(file, &moved, tracker)?;
                    self.write_node(file, &left, tracker)?;
                    self.write_node(file, &node, tracker)?;
                    self.write_node(file, &parent, tracker)?;
                    return Ok(());
                }
            }
        }

        if pos > 0 {
            let left_id = pchildren[pos - 1];
            let mut left = self.read_node(file, left_id, tracker)?;
            let separator = pkeys[pos - 1].clone();
            self.merge_internal(file, &mut left, &node, separator, tracker)?;
            pkeys.remove(pos - 1);
            pchildren.remove(pos);
            self.write_node(file, &left, tracker)?;
        } else {
            let right_id = pchildren[pos + 1];
            let right = self.read_node(file, right_id, tracker)?;
            let mut node = node;
            let separator = pkeys[pos].clone();
            self.merge_internal(file, &mut node, &right, separator, tracker)?;
            pkeys.remove(pos);
            pchildren.remove(pos + 1);
            self.write_node(file, &node, tracker)?;
        }

        if pkeys.len() < self.min_keys && parent_id != meta.root_node_id {
            self.fix_internal_underflow(file, meta, parent, tracker)
        } else if parent_id == meta.root_node_id && pkeys.is_empty() {
            meta.root_node_id = pchildren[0];
            let mut new_root = self.read_node(file, pchildren[0], tracker)?;
            new_root.parent = NO_ID;
            self.write_node(file, &new_root, tracker)
        } else {
            self.write_node(file, &parent, tracker)
        }
    }

    fn merge_internal(&self, file: &mut PageFile, left: &mut Node, right: &Node, separator: Value, tracker: &mut PerformanceTracker) -> Result<()> {
        let (rkeys, rchildren) = match &right.body {
            Body::Internal { keys, children } => (keys.clone(), children.clone()),
            _ => unreachable!(),
        };
        if let Body::Internal { keys, children } = &mut left.body {
            keys.push(separator);
            keys.extend(rkeys);
            children.extend(rchildren.clone());
        }
        for child_id in rchildren {
            let mut child = self.read_node(file, child_id, tracker)?;
            child.parent = left.id;
            self.write_node(file, &child, tracker)?;
        }
        Ok(())
    }

    /// Re-thread the leaf chain by collecting every leaf in DFS order and
    /// rewriting `prev`/`next`, sorted by each leaf's minimum entry. Guards
    /// against drift left by a borrow/merge cascade gone wrong (§4.5).
    pub fn warm_up(&self) -> Result<()> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let meta = self.load_metadata(&mut file, &mut tracker)?;
        if meta.root_node_id == NO_ID {
            tracker.end_operation((), false);
            return Ok(());
        }

        let mut leaves = Vec::new();
        self.collect_leaves(&mut file, meta.root_node_id, &mut leaves, &mut tracker)?;
        leaves.sort_by(|a, b| {
            let ka = match &a.body {
                Body::Leaf { entries, .. } => entries.first().map(|e| e.value.clone()),
                _ => None,
            };
            let kb = match &b.body {
                Body::Leaf { entries, .. } => entries.first().map(|e| e.value.clone()),
                _ => None,
            };
            match (ka, kb) {
                (Some(x), Some(y)) => x.key_cmp(&y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });

        let ids: Vec<i32> = leaves.iter().map(|n| n.id).collect();
        for (i, leaf) in leaves.iter_mut().enumerate() {
            let prev = if i == 0 { NO_ID } else { ids[i - 1] };
            let next = if i + 1 == ids.len() { NO_ID } else { ids[i + 1] };
            if let Body::Leaf { prev: p, next: n, .. } = &mut leaf.body {
                *p = prev;
                *n = next;
            }
        }
        for leaf in &leaves {
            self.write_node(&mut file, leaf, &mut tracker)?;
        }
        tracker.end_operation((), false);
        Ok(())
    }

    fn collect_leaves(&self, file: &mut PageFile, id: i32, out: &mut Vec<Node>, tracker: &mut PerformanceTracker) -> Result<()> {
        let node = self.read_node(file, id, tracker)?;
        match &node.body {
            Body::Leaf { .. } => out.push(node),
            Body::Internal { children, .. } => {
                let children = children.clone();
                for c in children {
                    self.collect_leaves(file, c, out, tracker)?;
                }
            }
        }
        Ok(())
    }
}

impl SecondaryIndex for UnclusteredBPlusTree {
    fn insert(&mut self, entry: IndexRecord) -> Result<OperationResult<bool>> {
        UnclusteredBPlusTree::insert(self, entry)
    }
    fn delete_one(&mut self, value: &Value, primary_key: i32) -> Result<OperationResult<bool>> {
        UnclusteredBPlusTree::delete_one(self, value, primary_key)
    }
    fn delete_all(&mut self, value: &Value) -> Result<OperationResult<Vec<i32>>> {
        UnclusteredBPlusTree::delete_all(self, value)
    }
    fn search(&mut self, value: &Value) -> Result<OperationResult<Vec<i32>>> {
        UnclusteredBPlusTree::search(self, value)
    }
    fn range_search(&mut self, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<i32>>> {
        UnclusteredBPlusTree::range_search(self, lo, hi)
    }
    fn scan_all(&mut self) -> Result<OperationResult<Vec<IndexRecord>>> {
        UnclusteredBPlusTree::scan_all(self)
    }
}

pub fn default_order() -> usize {
    BPTREE_ORDER
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tree(dir: &Path, order: usize) -> UnclusteredBPlusTree {
        UnclusteredBPlusTree::new(dir.join("tree.dat"), Type::Int, order)
    }

    #[test]
    fn duplicate_secondary_values_are_allowed_ordered_by_primary_key() {
        let dir = tempdir().unwrap();
        let t = tree(dir.path(), 4);
        t.insert(IndexRecord::new(Value::Int(7), 3)).unwrap();
        t.insert(IndexRecord::new(Value::Int(7), 1)).unwrap();
        t.insert(IndexRecord::new(Value::Int(7), 2)).unwrap();
        let mut hits = t.search(&Value::Int(7)).unwrap().data;
        hits.sort();
        assert_eq!(hits, vec![1, 2, 3]);
    }

    #[test]
    fn delete_one_removes_exactly_that_pair() {
        let dir = tempdir().unwrap();
        let t = tree(dir.path(), 4);
        t.insert(IndexRecord::new(Value::Int(7), 1)).unwrap();
        t.insert(IndexRecord::new(Value::Int(7), 2)).unwrap();
        assert!(t.delete_one(&Value::Int(7), 1).unwrap().data);
        assert_eq!(t.search(&Value::Int(7)).unwrap().data, vec![2]);
    }

    #[test]
    fn delete_all_removes_every_entry_for_a_value() {
        let dir = tempdir().unwrap();
        let t = tree(dir.path(), 4);
        for pk in 0..10 {
            t.insert(IndexRecord::new(Value::Int(pk % 2), pk)).unwrap();
        }
        let removed = t.delete_all(&Value::Int(0)).unwrap().data;
        assert_eq!(removed.len(), 5);
        assert!(t.search(&Value::Int(0)).unwrap().data.is_empty());
        assert_eq!(t.search(&Value::Int(1)).unwrap().data.len(), 5);
    }

    #[test]
    fn range_search_collects_primary_keys_in_value_order() {
        let dir = tempdir().unwrap();
        let t = tree(dir.path(), 4);
        for v in 0..20 {
            t.insert(IndexRecord::new(Value::Int(v), v)).unwrap();
        }
        let hits = t.range_search(&Value::Int(5), &Value::Int(9)).unwrap().data;
        assert_eq!(hits, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn warm_up_repairs_a_leaf_chain_after_heavy_churn() {
        let dir = tempdir().unwrap();
        let t = tree(dir.path(), 4);
        for v in (0..40).rev() {
            t.insert(IndexRecord::new(Value::Int(v), v)).unwrap();
        }
        for v in 0..20 {
            t.delete_one(&Value::Int(v), v).unwrap();
        }
        t.warm_up().unwrap();
        let scan = t.scan_all().unwrap().data;
        assert_eq!(scan.len(), 20);
    }
}
