//! redstore - disk-backed document store for compressed Reddit archives
//!
//! # Architecture
//!
//! - **Record store**: sled trees per collection, JSON documents keyed by `_id`,
//!   one sled tree per secondary index (multikey for arrays)
//! - **Ingest**: `.bz2`/`.zst` archives -> fixed-size line batches -> unordered
//!   bulk inserts -> per-kind secondary indexes
//! - **Catalog**: `subreddit_id` -> display names + submission/comment counts,
//!   materialized with a grouping aggregation that spills to disk
//! - **Retrieval**: filtered, time-bounded, chunked queries and level-by-level
//!   comment-tree reconstruction
//!
//! # Usage example
//!
//! ```no_run
//! use redstore::{BulkLoader, CatalogBuilder, LoaderConfig, SledStore, StoreConfig, TreeReconstructor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SledStore::open(StoreConfig::at("./reddit.db"))?;
//!
//! let loader = BulkLoader::new(&store, LoaderConfig::with_batch_size(10_000));
//! loader.load("Submission", &["RS_2011-03.bz2"])?;
//! loader.load("Comment", &["RC_2011-03.bz2"])?;
//!
//! CatalogBuilder::new(&store).catalog_subreddits("Submission", "Comment", "SubredIdMap")?;
//!
//! let tree = TreeReconstructor::new(&store, "Comment").comment_tree("t3_g0bmw", Some(3))?;
//! println!("{} levels, {} replies", tree.depth(), tree.edge_count());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod ingest;
pub mod query;
pub mod store;
pub mod tree;

pub use catalog::{CatalogBuilder, CatalogEntry, Preconditions, PreconditionViolation, DEFAULT_CATALOG};
pub use config::{Config, LoaderConfig, StoreConfig};
pub use error::{Error, Result};
pub use ingest::{ingest_and_catalog, BulkLoader, IngestTargets, LoadReport, RecordKind};
pub use query::{QueryEngine, QueryOutput, RecordQuery, TimeBounds};
pub use store::{Constraint, FieldSchema, Filter, Projection, Record, RecordStore, SledStore};
pub use tree::{CommentTree, Edge, FrontierStrategy, TreeReconstructor};
