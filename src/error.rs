//! Error types for the archive store

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === STREAM (fatal, aborts the run) ===

    #[error("No extension on archive file name: {0:?}")]
    MissingExtension(PathBuf),

    #[error("Extension '{extension}' not recognized for decompression: {path:?}")]
    UnsupportedCompression { path: PathBuf, extension: String },

    #[error("Batch size must be positive")]
    InvalidBatchSize,

    // === RECORD (recovered locally by the loader) ===

    #[error("Malformed record: {0}")]
    Parse(String),

    // === KIND (fatal at index-build stage) ===

    #[error("'RS' or 'RC' should start the file name: {0:?}")]
    UnrecognizedKind(PathBuf),

    #[error("No archive files given")]
    NoArchives,

    #[error("Archives of different kinds in one load: {first:?} and {second:?}")]
    MixedKinds { first: PathBuf, second: PathBuf },

    // === PRECONDITIONS (fatal, reported before any mutation) ===

    #[error("{field} index not present on collection '{collection}'")]
    MissingIndex { collection: String, field: String },

    #[error("Collection '{0}' already exists")]
    CollectionExists(String),

    #[error("Collection '{0}' does not exist")]
    MissingCollection(String),

    // === STORE ===

    #[error("Insert into '{collection}' stopped after {inserted} records: {reason}")]
    PartialInsertFailure {
        collection: String,
        inserted: usize,
        reason: String,
    },

    #[error("Invalid collection name: {0:?}")]
    InvalidCollectionName(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Time bounds out of order: {start} is after {end}")]
    InvalidTimeBounds { start: String, end: String },

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Aggregation exceeded {limit} in-memory groups and disk use is not allowed")]
    AggregationMemoryLimit { limit: usize },

    #[error("Corrupt document in '{collection}': {reason}")]
    CorruptDocument { collection: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
}

impl Error {
    /// Per-record faults the loader absorbs instead of aborting the batch
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Parse(_))
    }

    /// Unsupported or missing archive compression
    pub fn is_stream_error(&self) -> bool {
        matches!(
            self,
            Error::MissingExtension(_) | Error::UnsupportedCompression { .. }
        )
    }
}
