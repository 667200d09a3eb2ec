//! Archive ingestion: stream batching, bulk loading, kind inference

pub mod batcher;
pub mod kind;
pub mod loader;

use std::path::Path;
use crate::catalog::{BuildReport, CatalogBuilder, EnrichReport};
use crate::config::LoaderConfig;
use crate::error::Result;
use crate::store::RecordStore;

pub use batcher::{open_archive, Compression, LineBatches};
pub use kind::RecordKind;
pub use loader::{normalize_created_utc, parse_record, BulkLoader, FileReport, LoadReport, CREATED_UTC, FULLNAME};

/// Collections touched by [`ingest_and_catalog`]
#[derive(Debug, Clone)]
pub struct IngestTargets<'p, P> {
    pub submissions: &'p str,
    pub comments: &'p str,
    pub catalog: &'p str,
    pub submission_files: &'p [P],
    pub comment_files: &'p [P],
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub submissions: LoadReport,
    pub comments: LoadReport,
    pub catalog: BuildReport,
    pub enrichment: EnrichReport,
}

/// Load submission and comment archives, then build and enrich the catalog
pub fn ingest_and_catalog<S, P>(store: &S, config: &LoaderConfig, targets: &IngestTargets<'_, P>) -> Result<IngestReport>
where
    S: RecordStore + Sync,
    P: AsRef<Path>,
{
    let loader = BulkLoader::new(store, config.clone());
    let submissions = loader.load(targets.submissions, targets.submission_files)?;
    let comments = loader.load(targets.comments, targets.comment_files)?;

    let builder = CatalogBuilder::new(store);
    let (catalog, enrichment) = builder.catalog_subreddits(targets.submissions, targets.comments, targets.catalog)?;
    store.flush()?;

    Ok(IngestReport {
        submissions,
        comments,
        catalog,
        enrichment,
    })
}
