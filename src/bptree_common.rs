//! Shared binary layout for B+ tree node 0 (the metadata block) and the
//! per-node header, used by both the clustered (primary) and unclustered
//! (secondary) trees. Everything below node 0 is tree-specific because the
//! two trees' leaf payloads differ (full record vs. `IndexRecord`) — which
//! matches the source engine, where `bplus_tree_clustered.py` and
//! `bplus_tree_unclustered.py` are independent ~1000-line modules with
//! parallel but non-shared node classes.

use crate::config::{BPTREE_MAGIC, BPTREE_NODE_ALIGN, BPTREE_VERSION};
use crate::error::{Error, Result};
use crate::schema::Type;

pub const NO_ID: i32 = -1;

/// Round `size` up to the next multiple of [`BPTREE_NODE_ALIGN`].
pub fn node_size_for(size: usize) -> usize {
    let align = BPTREE_NODE_ALIGN;
    size.div_ceil(align) * align
}

/// Node header common to every non-metadata node: `(is_leaf, num_keys,
/// node_id, parent_id)`.
pub const NODE_HEADER_SIZE: usize = 1 + 3 + 4 + 4 + 4; // is_leaf + pad + num_keys + node_id + parent_id
pub const LEAF_HEADER_SIZE: usize = NODE_HEADER_SIZE + 4 + 4; // + prev_leaf_id + next_leaf_id

pub struct NodeHeader {
    pub is_leaf: bool,
    pub num_keys: usize,
    pub node_id: i32,
    pub parent_id: i32,
}

impl NodeHeader {
    pub fn pack_into(&self, buf: &mut [u8]) {
        buf[0] = self.is_leaf as u8;
        buf[4..8].copy_from_slice(&(self.num_keys as i32).to_le_bytes());
        buf[8..12].copy_from_slice(&self.node_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.parent_id.to_le_bytes());
    }

    pub fn unpack_from(buf: &[u8]) -> Self {
        Self {
            is_leaf: buf[0] != 0,
            num_keys: i32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize,
            node_id: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            parent_id: i32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }
}

/// The tree's node-0 metadata block.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeMetadata {
    pub root_node_id: i32,
    pub next_node_id: i32,
    pub order: usize,
    pub key_type: Type,
    pub dirty: bool,
}

const META_BASE_SIZE: usize = 4 + 4 + 4 + 4 + 4 + 4 + 4; // magic+version+root+next+order+key_tag+key_width

impl TreeMetadata {
    pub fn fresh(order: usize, key_type: Type) -> Self {
        Self {
            root_node_id: NO_ID,
            next_node_id: 1, // node 0 reserved for metadata
            order,
            key_type,
            dirty: true,
        }
    }

    fn key_tag(t: Type) -> i32 {
        match t {
            Type::Int => 0,
            Type::Float => 1,
            Type::Char(_) => 2,
            Type::Bool => 3,
            Type::Array(_) => 4,
        }
    }

    fn key_from_tag(tag: i32, width: usize) -> Result<Type> {
        Ok(match tag {
            0 => Type::Int,
            1 => Type::Float,
            2 => Type::Char(width),
            3 => Type::Bool,
            4 => Type::Array(width / 4),
            _ => return Err(Error::CorruptMetadata("unknown key type tag".into())),
        })
    }

    pub fn pack_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(BPTREE_MAGIC);
        buf[4..8].copy_from_slice(&BPTREE_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.root_node_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.next_node_id.to_le_bytes());
        buf[16..20].copy_from_slice(&(self.order as i32).to_le_bytes());
        buf[20..24].copy_from_slice(&Self::key_tag(self.key_type).to_le_bytes());
        buf[24..28].copy_from_slice(&(self.key_type.size() as i32).to_le_bytes());
    }

    /// Parse node 0. Per §7 *CorruptMetadata*: a bad magic means "fresh file",
    /// not a hard error — the caller should reinitialise rather than guess at
    /// a tolerant parse of an old layout.
    pub fn try_unpack_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < META_BASE_SIZE || &buf[0..4] != BPTREE_MAGIC {
            return None;
        }
        let root_node_id = i32::from_le_bytes(buf[8..12].try_into().unwrap());
        let next_node_id = i32::from_le_bytes(buf[12..16].try_into().unwrap());
        let order = i32::from_le_bytes(buf[16..20].try_into().unwrap()) as usize;
        let tag = i32::from_le_bytes(buf[20..24].try_into().unwrap());
        let width = i32::from_le_bytes(buf[24..28].try_into().unwrap()) as usize;
        let key_type = Self::key_from_tag(tag, width).ok()?;
        Some(Self {
            root_node_id,
            next_node_id,
            order,
            key_type,
            dirty: false,
        })
    }

    pub fn allocate_node_id(&mut self) -> i32 {
        let id = self.next_node_id;
        self.next_node_id += 1;
        self.dirty = true;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips() {
        let meta = TreeMetadata::fresh(50, Type::Int);
        let mut buf = vec![0u8; node_size_for(META_BASE_SIZE)];
        meta.pack_into(&mut buf);
        let back = TreeMetadata::try_unpack_from(&buf).unwrap();
        assert_eq!(back.root_node_id, NO_ID);
        assert_eq!(back.order, 50);
        assert_eq!(back.key_type, Type::Int);
    }

    #[test]
    fn bad_magic_is_treated_as_absent_rather_than_an_error() {
        let buf = vec![0u8; 64];
        assert!(TreeMetadata::try_unpack_from(&buf).is_none());
    }
}
