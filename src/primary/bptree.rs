//! Clustered B+ tree: leaves store full records in key order.
//!
//! Order `m` gives `max_keys = m - 1` and `min_keys = ceil((m+1)/2) - 1`.
//! Node 0 is the metadata block; node ids are drawn from a monotonic counter
//! there. There is no free-list for this tree — deletions tombstone a node
//! (written as an all-zero block) rather than reuse the slot, because churn
//! here is far lower than in ISAM (§4.4 of the storage spec).

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::bptree_common::{node_size_for, NodeHeader, TreeMetadata, LEAF_HEADER_SIZE, NODE_HEADER_SIZE, NO_ID};
use crate::config::BPTREE_ORDER;
use crate::error::{Error, Result};
use crate::pagefile::PageFile;
use crate::perf::{OperationResult, PerformanceTracker};
use crate::primary::PrimaryIndex;
use crate::record::{column_layout, Record};
use crate::schema::{TableSchema, Type, Value};

enum Body {
    Internal { keys: Vec<Value>, children: Vec<i32> },
    Leaf { records: Vec<Record>, prev: i32, next: i32 },
}

struct Node {
    id: i32,
    parent: i32,
    body: Body,
}

pub struct ClusteredBPlusTree {
    path: PathBuf,
    schema: TableSchema,
    layout: Vec<(Type, usize)>,
    key_index: usize,
    order: usize,
    max_keys: usize,
    min_keys: usize,
    node_size: usize,
    record_size: usize,
    key_size: usize,
}

impl ClusteredBPlusTree {
    pub fn new(path: impl AsRef<Path>, schema: TableSchema, order: usize) -> Self {
        let key_index = schema.key_index();
        let key_size = schema.key_type().size();
        let record_size = schema.record_size();
        let layout = column_layout(schema.columns());
        let max_keys = order - 1;
        let min_keys = (order + 1).div_ceil(2) - 1;

        let internal_body = max_keys * key_size + (max_keys + 1) * 4;
        let leaf_body = max_keys * record_size;
        let node_size = node_size_for(
            (NODE_HEADER_SIZE + internal_body).max(LEAF_HEADER_SIZE + leaf_body),
        );

        Self {
            path: path.as_ref().to_path_buf(),
            schema,
            layout,
            key_index,
            order,
            max_keys,
            min_keys,
            node_size,
            record_size,
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
        Ok(TreeMetadata::try_unpack_from(&buf).unwrap_or_else(|| TreeMetadata::fresh(self.order, self.schema.key_type())))
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
            let mut records = Vec::with_capacity(header.num_keys);
            for i in 0..header.num_keys {
                let offset = LEAF_HEADER_SIZE + i * self.record_size;
                records.push(Record::unpack_from(&buf, offset, &self.layout));
            }
            Body::Leaf { records, prev, next }
        } else {
            let mut keys = Vec::with_capacity(header.num_keys);
            let mut children = Vec::with_capacity(header.num_keys + 1);
            let key_layout = [(self.schema.key_type(), 0)];
            for i in 0..header.num_keys {
                let offset = NODE_HEADER_SIZE + i * self.key_size;
                keys.push(Record::unpack_from(&buf, offset, &key_layout).fields.remove(0));
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
            Body::Leaf { records, .. } => records.len(),
        };
        NodeHeader {
            is_leaf,
            num_keys,
            node_id: node.id,
            parent_id: node.parent,
        }
        .pack_into(&mut buf);

        match &node.body {
            Body::Leaf { records, prev, next } => {
                buf[NODE_HEADER_SIZE..NODE_HEADER_SIZE + 4].copy_from_slice(&prev.to_le_bytes());
                buf[NODE_HEADER_SIZE + 4..NODE_HEADER_SIZE + 8].copy_from_slice(&next.to_le_bytes());
                for (i, record) in records.iter().enumerate() {
                    let offset = LEAF_HEADER_SIZE + i * self.record_size;
                    record.pack_into(&mut buf, offset, &self.layout)?;
                }
            }
            Body::Internal { keys, children } => {
                let key_layout = [(self.schema.key_type(), 0)];
                for (i, key) in keys.iter().enumerate() {
                    let offset = NODE_HEADER_SIZE + i * self.key_size;
                    Record::new(vec![key.clone()]).pack_into(&mut buf, offset, &key_layout)?;
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

    fn key_cmp(&self, a: &Value, b: &Value) -> Ordering {
        a.key_cmp(b)
    }

    /// Descend from the root to the leaf that would contain `key`.
    fn find_leaf(&self, file: &mut PageFile, meta: &TreeMetadata, key: &Value, tracker: &mut PerformanceTracker) -> Result<Node> {
        let mut node = self.read_node(file, meta.root_node_id, tracker)?;
        loop {
            match &node.body {
                Body::Leaf { .. } => return Ok(node),
                Body::Internal { keys, children } => {
                    // bisect_right: first index whose key > target, child at that index
                    let pos = keys.partition_point(|k| self.key_cmp(k, key) != Ordering::Greater);
                    let child_id = children[pos];
                    node = self.read_node(file, child_id, tracker)?;
                }
            }
        }
    }

    fn record_key<'a>(&self, r: &'a Record) -> &'a Value {
        r.get(self.key_index)
    }

    pub fn insert(&self, record: Record) -> Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let mut meta = self.load_metadata(&mut file, &mut tracker)?;

        if meta.root_node_id == NO_ID {
            let root_id = meta.allocate_node_id();
            let root = Node {
                id: root_id,
                parent: NO_ID,
                body: Body::Leaf { records: vec![], prev: NO_ID, next: NO_ID },
            };
            self.write_node(&mut file, &root, &mut tracker)?;
            meta.root_node_id = root_id;
        }

        let key = self.record_key(&record).clone();
        let mut leaf = self.find_leaf(&mut file, &meta, &key, &mut tracker)?;

        let (records, prev, next) = match &mut leaf.body {
            Body::Leaf { records, prev, next } => (records, *prev, *next),
            Body::Internal { .. } => unreachable!(),
        };

        let pos = records.partition_point(|r| self.key_cmp(self.record_key(r), &key) == Ordering::Less);
        if pos < records.len() && self.key_cmp(self.record_key(&records[pos]), &key) == Ordering::Equal {
            let result = tracker.end_operation(false, false);
            return Ok(result);
        }
        records.insert(pos, record);
        let overflow = records.len() > self.max_keys;
        let _ = (prev, next);

        if !overflow {
            self.write_node(&mut file, &leaf, &mut tracker)?;
            self.save_metadata(&mut file, &meta, &mut tracker)?;
            return Ok(tracker.end_operation(true, false));
        }

        self.split_leaf_and_propagate(&mut file, &mut meta, leaf, &mut tracker)?;
        self.save_metadata(&mut file, &meta, &mut tracker)?;
        Ok(tracker.end_operation(true, false))
    }

    fn split_leaf_and_propagate(
        &self,
        file: &mut PageFile,
        meta: &mut TreeMetadata,
        mut leaf: Node,
        tracker: &mut PerformanceTracker,
    ) -> Result<()> {
        let (records, prev, next) = match &mut leaf.body {
            Body::Leaf { records, prev, next } => (records, *prev, *next),
            Body::Internal { .. } => unreachable!(),
        };
        let mid = records.len().div_ceil(2);
        let right_records: Vec<Record> = records.split_off(mid);
        let separator = self.record_key(&right_records[0]).clone();

        let new_id = meta.allocate_node_id();
        let new_leaf = Node {
            id: new_id,
            parent: leaf.parent,
            body: Body::Leaf { records: right_records, prev: leaf.id, next },
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
        let _ = prev;

        self.write_node(file, &leaf, tracker)?;
        self.write_node(file, &new_leaf, tracker)?;

        self.insert_into_parent(file, meta, leaf.id, separator, new_id, tracker)
    }

    /// Insert `separator` into `left`'s parent, pointing at `right` on its
    /// right side. Allocates a new root if `left` had none.
    fn insert_into_parent(
        &self,
        file: &mut PageFile,
        meta: &mut TreeMetadata,
        left_id: i32,
        separator: Value,
        right_id: i32,
        tracker: &mut PerformanceTracker,
    ) -> Result<()> {
        let left = self.read_node(file, left_id, tracker)?;
        if left.parent == NO_ID {
            let new_root_id = meta.allocate_node_id();
            let new_root = Node {
                id: new_root_id,
                parent: NO_ID,
                body: Body::Internal {
                    keys: vec![separator],
                    children: vec![left_id, right_id],
                },
            };
            self.write_node(file, &new_root, tracker)?;

            let mut left = left;
            self.set_parent(&mut left, new_root_id);
            self.write_node(file, &left, tracker)?;
            let mut right = self.read_node(file, right_id, tracker)?;
            self.set_parent(&mut right, new_root_id);
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
            self.set_parent(&mut right, parent_id);
            self.write_node(file, &right, tracker)?;

            if keys.len() <= self.max_keys {
                self.write_node(file, &parent, tracker)?;
                return Ok(());
            }

            // Internal node overflow: split and promote the middle key.
            let mid = keys.len() / 2;
            let promoted = keys[mid].clone();
            let right_keys = keys.split_off(mid + 1);
            keys.pop(); // drop the promoted key from the left side
            let right_children = children.split_off(mid + 1);

            let new_internal_id = meta.allocate_node_id();
            let new_internal = Node {
                id: new_internal_id,
                parent: parent.parent,
                body: Body::Internal { keys: right_keys, children: right_children.clone() },
            };
            for child_id in &right_children {
                let mut child = self.read_node(file, *child_id, tracker)?;
                self.set_parent(&mut child, new_internal_id);
                self.write_node(file, &child, tracker)?;
            }
            self.write_node(file, &new_internal, tracker)?;
            self.write_node(file, &parent, tracker)?;

            self.insert_into_parent(file, meta, parent_id, promoted, new_internal_id, tracker)
        } else {
            unreachable!("parent must be internal")
        }
    }

    fn set_parent(&self, node: &mut Node, parent: i32) {
        node.parent = parent;
    }

    pub fn search(&self, key: &Value) -> Result<OperationResult<Option<Record>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let meta = self.load_metadata(&mut file, &mut tracker)?;
        if meta.root_node_id == NO_ID {
            return Ok(tracker.end_operation(None, false));
        }
        let leaf = self.find_leaf(&mut file, &meta, key, &mut tracker)?;
        let found = match &leaf.body {
            Body::Leaf { records, .. } => records
                .iter()
                .find(|r| self.key_cmp(self.record_key(r), key) == Ordering::Equal)
                .cloned(),
            _ => None,
        };
        Ok(tracker.end_operation(found, false))
    }

    pub fn range_search(&self, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<Record>>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let meta = self.load_metadata(&mut file, &mut tracker)?;
        let mut out = Vec::new();
        if meta.root_node_id != NO_ID {
            let mut leaf = self.find_leaf(&mut file, &meta, lo, &mut tracker)?;
            loop {
                let (records, next) = match &leaf.body {
                    Body::Leaf { records, next, .. } => (records, *next),
                    _ => unreachable!(),
                };
                for r in records {
                    let k = self.record_key(r);
                    if self.key_cmp(k, lo) != Ordering::Less && self.key_cmp(k, hi) != Ordering::Greater {
                        out.push(r.clone());
                    }
                }
                if next == NO_ID || records.last().map(|r| self.key_cmp(self.record_key(r), hi) == Ordering::Greater).unwrap_or(false) {
                    break;
                }
                leaf = self.read_node(&mut file, next, &mut tracker)?;
            }
        }
        Ok(tracker.end_operation(out, false))
    }

    pub fn scan_all(&self) -> Result<OperationResult<Vec<Record>>> {
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
                let (records, next) = match &node.body {
                    Body::Leaf { records, next, .. } => (records.clone(), *next),
                    _ => unreachable!(),
                };
                out.extend(records);
                if next == NO_ID {
                    break;
                }
                node = self.read_node(&mut file, next, &mut tracker)?;
            }
        }
        Ok(tracker.end_operation(out, false))
    }

    pub fn delete(&self, key: &Value) -> Result<OperationResult<bool>> {
        let mut tracker = PerformanceTracker::new();
        tracker.start_operation();
        let mut file = self.file()?;
        let mut meta = self.load_metadata(&mut file, &mut tracker)?;
        if meta.root_node_id == NO_ID {
            return Ok(tracker.end_operation(false, false));
        }
        let mut leaf = self.find_leaf(&mut file, &meta, key, &mut tracker)?;
        let removed = match &mut leaf.body {
            Body::Leaf { records, .. } => {
                if let Some(pos) = records.iter().position(|r| self.key_cmp(self.record_key(r), key) == Ordering::Equal) {
                    records.remove(pos);
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

        let is_root = leaf.parent == NO_ID;
        let underflow = match &leaf.body {
            Body::Leaf { records, .. } => records.len() < self.min_keys,
            _ => false,
        };

        if is_root || !underflow {
            self.write_node(&mut file, &leaf, &mut tracker)?;
            self.save_metadata(&mut file, &meta, &mut tracker)?;
            return Ok(tracker.end_operation(true, false));
        }

        self.fix_leaf_underflow(&mut file, &mut meta, leaf, &mut tracker)?;
        self.save_metadata(&mut file, &meta, &mut tracker)?;
        Ok(tracker.end_operation(true, false))
    }

    fn fix_leaf_underflow(
        &self,
        file: &mut PageFile,
        meta: &mut TreeMetadata,
        leaf: Node,
        tracker: &mut PerformanceTracker,
    ) -> Result<()> {
        let parent_id = leaf.parent;
        let mut parent = self.read_node(file, parent_id, tracker)?;
        let (keys, children) = match &mut parent.body {
            Body::Internal { keys, children } => (keys, children),
            _ => unreachable!(),
        };
        let pos = children.iter().position(|&c| c == leaf.id).unwrap();

        // Try borrowing from the left sibling first, then the right.
        if pos > 0 {
            let left_id = children[pos - 1];
            let mut left = self.read_node(file, left_id, tracker)?;
            if let Body::Leaf { records: left_records, .. } = &mut left.body {
                if left_records.len() > self.min_keys {
                    let borrowed = left_records.pop().unwrap();
                    let mut leaf = leaf;
                    if let Body::Leaf { records, .. } = &mut leaf.body {
                        records.insert(0, borrowed.clone());
                    }
                    keys[pos - 1] = self.record_key(&borrowed).clone();
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
            if let Body::Leaf { records: right_records, .. } = &mut right.body {
                if right_records.len() > self.min_keys {
                    let borrowed = right_records.remove(0);
                    let mut leaf = leaf;
                    if let Body::Leaf { records, .. } = &mut leaf.body {
                        records.push(borrowed);
                    }
                    keys[pos] = self.record_key(&right.body_first_record()).clone();
                    self.write_node(file, &right, tracker)?;
                    self.write_node(file, &leaf, tracker)?;
                    self.write_node(file, &parent, tracker)?;
                    return Ok(());
                }
            }
        }

        // Merge with left if possible, else with right.
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
            self.fix_internal_underflow(file, meta, parent, tracker)?;
        } else if parent_id == meta.root_node_id && keys.is_empty() {
            meta.root_node_id = children[0];
            let mut new_root = self.read_node(file, children[0], tracker)?;
            self.set_parent(&mut new_root, NO_ID);
            self.write_node(file, &new_root, tracker)?;
        } else {
            self.write_node(file, &parent, tracker)?;
        }
        Ok(())
    }

    fn merge_leaves(&self, file: &mut PageFile, left: &mut Node, right: &Node, tracker: &mut PerformanceTracker) -> Result<()> {
        let right_next = match &right.body {
            Body::Leaf { next, .. } => *next,
            _ => unreachable!(),
        };
        let right_records = match &right.body {
            Body::Leaf { records, .. } => records.clone(),
            _ => unreachable!(),
        };
        if let Body::Leaf { records, next, .. } = &mut left.body {
            records.extend(right_records);
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

    fn fix_internal_underflow(
        &self,
        file: &mut PageFile,
        meta: &mut TreeMetadata,
        node: Node,
        tracker: &mut PerformanceTracker,
    ) -> Result<()> {
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
                    self.set_parent(&mut moved, node.id);
                    self.write_node(file, &moved, tracker)?;
                    self.write_node(file, &left, tracker)?;
                    self.write_node(file, &node, tracker)?;
                    self.write_node(file, &parent, tracker)?;
                    return Ok(());
                }
            }
        }

        if pos > 0 {
            // merge with left
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
            self.set_parent(&mut new_root, NO_ID);
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
            self.set_parent(&mut child, left.id);
            self.write_node(file, &child, tracker)?;
        }
        Ok(())
    }
}

impl Node {
    fn body_first_record(&self) -> Record {
        match &self.body {
            Body::Leaf { records, .. } => records[0].clone(),
            _ => unreachable!(),
        }
    }
}

impl PrimaryIndex for ClusteredBPlusTree {
    fn insert(&mut self, record: Record) -> Result<OperationResult<bool>> {
        ClusteredBPlusTree::insert(self, record)
    }

    fn delete(&mut self, key: &Value) -> Result<OperationResult<bool>> {
        ClusteredBPlusTree::delete(self, key)
    }

    fn search(&mut self, key: &Value) -> Result<OperationResult<Option<Record>>> {
        ClusteredBPlusTree::search(self, key)
    }

    fn range_search(&mut self, lo: &Value, hi: &Value) -> Result<OperationResult<Vec<Record>>> {
        ClusteredBPlusTree::range_search(self, lo, hi)
    }

    fn scan_all(&mut self) -> Result<OperationResult<Vec<Record>>> {
        ClusteredBPlusTree::scan_all(self)
    }
}

pub fn default_order() -> usize {
    BPTREE_ORDER
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Schema};
    use tempfile::tempdir;

    fn tree(dir: &Path, order: usize) -> ClusteredBPlusTree {
        let schema = TableSchema::new(Schema {
            columns: vec![Column::new("id", Type::Int), Column::new("v", Type::Char(4))],
            key_field: "id".into(),
        })
        .unwrap();
        ClusteredBPlusTree::new(dir.join("tree.dat"), schema, order)
    }

    fn rec(id: i32) -> Record {
        Record::new(vec![Value::Int(id), Value::Char("x".into())])
    }

    #[test]
    fn split_creates_a_root_with_one_key_and_two_children() {
        let dir = tempdir().unwrap();
        let t = tree(dir.path(), 4);
        for id in [10, 20, 30] {
            assert!(t.insert(rec(id)).unwrap().data);
        }
        let scan = t.scan_all().unwrap().data;
        assert_eq!(scan.len(), 3);

        assert!(t.insert(rec(40)).unwrap().data);

        let found = t.search(&Value::Int(10)).unwrap().data;
        assert!(found.is_some());

        let range = t.range_search(&Value::Int(15), &Value::Int(35)).unwrap().data;
        let keys: Vec<i32> = range
            .iter()
            .map(|r| match r.get(0) {
                Value::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![20, 30]);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let dir = tempdir().unwrap();
        let t = tree(dir.path(), 4);
        assert!(t.insert(rec(1)).unwrap().data);
        assert!(!t.insert(rec(1)).unwrap().data);
    }

    #[test]
    fn insert_delete_search_round_trip() {
        let dir = tempdir().unwrap();
        let t = tree(dir.path(), 4);
        for id in 0..20 {
            t.insert(rec(id)).unwrap();
        }
        assert!(t.delete(&Value::Int(5)).unwrap().data);
        assert!(t.search(&Value::Int(5)).unwrap().data.is_none());
        for id in 0..20 {
            if id != 5 {
                assert!(t.search(&Value::Int(id)).unwrap().data.is_some());
            }
        }
    }

    #[test]
    fn leaf_chain_is_sorted_end_to_end() {
        let dir = tempdir().unwrap();
        let t = tree(dir.path(), 4);
        let mut ids: Vec<i32> = (0..50).collect();
        // Insert out of order to exercise splits along different paths.
        let mut shuffled = ids.clone();
        shuffled.rotate_left(17);
        for id in shuffled {
            t.insert(rec(id)).unwrap();
        }
        let scan = t.scan_all().unwrap().data;
        let keys: Vec<i32> = scan
            .iter()
            .map(|r| match r.get(0) {
                Value::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        ids.sort();
        assert_eq!(keys, ids);
    }
}
