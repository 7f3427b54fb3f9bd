//! Error definitions.
//!
//! Recoverable outcomes (duplicate key, not found) travel inside
//! [`crate::perf::OperationResult::data`], not through this enum. `Error`
//! covers structural or programming failures only: I/O, schema mismatches,
//! corrupt metadata, and predicate/index-type incompatibilities.

use std::io::Error as IOError;
use std::result;

use serde_json::Error as SerdeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database `{0}` already exists")]
    DatabaseExists(String),
    #[error("Database `{0}` not found")]
    DatabaseNotFound(String),

    #[error("Table `{0}` already exists")]
    TableExists(String),
    #[error("Table `{0}` not found")]
    TableNotFound(String),
    #[error("Column `{0}` not found")]
    ColumnNotFound(String),
    #[error("Index on `{0}` not found")]
    IndexNotFound(String),
    #[error("Index on `{0}` already exists")]
    IndexExists(String),

    #[error("Field count mismatch: {0} provided but {1} expected")]
    FieldCountMismatch(usize, usize),
    #[error("Value does not match type of field `{0}`")]
    TypeMismatch(String),

    #[error("Index type `{0:?}` cannot be used as a primary index")]
    UnsupportedPrimaryIndex(crate::config::PrimaryKind),
    #[error("Index type `{0:?}` cannot be used as a secondary index")]
    UnsupportedSecondaryIndex(crate::config::SecondaryKind),
    #[error("Secondary index on `{0}` cannot serve this predicate")]
    UnsupportedPredicate(String),
    #[error("Cannot create a secondary index on the primary key field `{0}`")]
    SecondaryOnPrimaryKey(String),
    #[error("Field `{0}` has a type incompatible with index type `{1:?}`")]
    SchemaMismatch(String, crate::config::SecondaryKind),

    #[error("IO error: {0}")]
    IO(#[from] IOError),
    #[error("Serialization error: {0}")]
    Serde(#[from] SerdeError),

    #[error("Corrupt metadata block: {0}")]
    CorruptMetadata(String),
}

pub type Result<T> = result::Result<T, Error>;
