//! Record store API and the sled-backed implementation
//!
//! Components take a store handle (`&S where S: RecordStore`) instead of
//! reaching for a shared global client. The trait covers exactly what the
//! loader, catalog builder, query engine and tree reconstructor consume:
//! unordered bulk insert, indexed find with projection/limit, index creation,
//! grouping aggregation with output-to-collection, single-document `$set`
//! updates, and collection/index introspection.

pub mod aggregate;
pub mod filter;
pub mod keys;
pub mod sled_store;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::Result;

pub use aggregate::{Accumulator, AggregateOutput, GroupStage, Pipeline, Stage};
pub use filter::{Constraint, FieldSchema, FieldType, Filter, Projection};
pub use sled_store::SledStore;

/// One submission, comment or catalog entry
pub type Record = serde_json::Map<String, Value>;

/// Store identity key of every document
pub const ID_FIELD: &str = "_id";

/// Index name for a single ascending field index (`subreddit_id` -> `subreddit_id_1`)
pub fn index_name(field: &str) -> String {
    format!("{}_1", field)
}

/// A single record the store refused during a bulk insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFailure {
    /// Position of the record inside the submitted batch
    pub position: usize,
    pub reason: String,
}

/// Outcome of `insert_many`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertReport {
    pub inserted: usize,
    pub failures: Vec<WriteFailure>,
}

impl InsertReport {
    /// Some records were rejected while their siblings went in
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: usize,
    pub modified: usize,
}

/// Lazy, finite stream of documents returned by `find`
///
/// Owns its underlying store iterator; dropping the cursor early releases it.
pub struct Cursor {
    inner: Box<dyn Iterator<Item = Result<Record>> + Send>,
}

impl Cursor {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<Record>> + Send + 'static,
    {
        Self { inner: Box::new(iter) }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Drain into memory, stopping at the first store error
    pub fn collect_records(self) -> Result<Vec<Record>> {
        self.collect()
    }
}

impl Iterator for Cursor {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").finish_non_exhaustive()
    }
}

/// Document store consumed by the ingest, catalog and retrieval layers
pub trait RecordStore {
    // === INTROSPECTION ===

    /// Names of all existing collections
    fn collection_names(&self) -> Result<Vec<String>>;

    /// Names of all indexes on a collection (`<field>_1`)
    fn index_names(&self, collection: &str) -> Result<Vec<String>>;

    fn has_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.collection_names()?.iter().any(|c| c == collection))
    }

    fn has_index(&self, collection: &str, field: &str) -> Result<bool> {
        let wanted = index_name(field);
        Ok(self.index_names(collection)?.iter().any(|i| *i == wanted))
    }

    // === WRITES ===

    /// Insert a batch. Unordered inserts attempt every record and report the
    /// rejected ones; ordered inserts stop at the first rejection with
    /// `Error::PartialInsertFailure`.
    fn insert_many(&self, collection: &str, records: Vec<Record>, ordered: bool) -> Result<InsertReport>;

    /// Apply `$set` of `fields` to the first document matching `filter`
    fn update_one(&self, collection: &str, filter: &Filter, fields: Record) -> Result<UpdateResult>;

    /// Build (or find existing) single-field index, returns its name
    fn create_index(&self, collection: &str, field: &str) -> Result<String>;

    /// Remove a collection and its indexes; false when it did not exist
    fn drop_collection(&self, collection: &str) -> Result<bool>;

    // === READS ===

    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
        limit: Option<usize>,
    ) -> Result<Cursor>;

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let mut total = 0;
        for record in self.find(collection, filter, None, None)? {
            record?;
            total += 1;
        }
        Ok(total)
    }

    /// Run a grouping pipeline, optionally materializing into a collection
    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<AggregateOutput>;

    /// Persist buffered writes
    fn flush(&self) -> Result<()>;
}
