//! Tunable constants and command line arguments.

use clap::{Parser, Subcommand};

/// Size of a data page / bucket block, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Default block factor (records per page) for a freshly created ISAM index.
pub const ISAM_BLOCK_FACTOR: usize = 30;
/// Default number of entries in an ISAM root index page.
pub const ISAM_ROOT_INDEX_BLOCK_FACTOR: usize = 50;
/// Default number of entries in an ISAM leaf index page.
pub const ISAM_LEAF_INDEX_BLOCK_FACTOR: usize = 50;
/// Max overflow pages chained off a single ISAM main page before a split is forced.
pub const ISAM_MAX_OVERFLOW: usize = 4;
/// Rebuild growth factor applied to block factors on each ISAM rebuild.
pub const ISAM_REBUILD_GROWTH: f64 = 1.4;
/// Hard cap on block factor growth so repeated rebuilds cannot grow without bound.
pub const ISAM_MAX_BLOCK_FACTOR: usize = 4096;
/// Fraction of free pages over total pages that triggers an ISAM rebuild.
pub const ISAM_FREE_RATIO_THRESHOLD: f64 = 0.40;
/// Mean overflow chain length that triggers an ISAM rebuild.
pub const ISAM_MEAN_OVERFLOW_THRESHOLD: f64 = 4.0;

/// Default B+ tree order (max children of an internal node).
pub const BPTREE_ORDER: usize = 50;
/// B+ tree node size is rounded up to this multiple of bytes.
pub const BPTREE_NODE_ALIGN: usize = 512;
/// Magic bytes identifying an initialised B+ tree metadata block.
pub const BPTREE_MAGIC: &[u8; 4] = b"BPT+";
/// Current on-disk format version of the B+ tree metadata block.
pub const BPTREE_VERSION: u32 = 1;

/// Records per extendible-hash bucket.
pub const HASH_BLOCK_FACTOR: usize = 20;
/// Overflow buckets tolerated per chain before the directory is doubled.
pub const HASH_MAX_OVERFLOW: usize = 2;
/// Minimum record count below which a bucket is a compaction candidate.
pub const HASH_MIN_N: usize = HASH_BLOCK_FACTOR / 2;

/// Command line arguments for the demo CLI.
#[derive(Parser, Debug)]
#[clap(
    author = "relstore",
    about = "relstore, a single-writer storage and indexing engine."
)]
pub struct Config {
    /// Path to the database directory.
    #[clap(short, long, default_value = "data/db")]
    pub path: std::path::PathBuf,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a table from a column spec string, e.g. "id:INT,name:CHAR16".
    CreateTable {
        table: String,
        columns: String,
        key_field: String,
        #[clap(long, value_enum, default_value = "isam")]
        primary: PrimaryKind,
    },
    /// Create a secondary index on a field.
    CreateIndex {
        table: String,
        field: String,
        #[clap(long, value_enum, default_value = "btree")]
        kind: SecondaryKind,
    },
    /// Insert one record given as comma-separated field values.
    Insert { table: String, values: String },
    /// Point lookup by primary key.
    Get { table: String, key: String },
    /// Range scan [lo, hi] by primary key.
    Range { table: String, lo: String, hi: String },
    /// Full scan of a table.
    Scan { table: String },
    /// Delete a record by primary key.
    Delete { table: String, key: String },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PrimaryKind {
    Isam,
    Sequential,
    Btree,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SecondaryKind {
    Btree,
    Hash,
    Rtree,
    Fulltext,
    Multimedia,
}
