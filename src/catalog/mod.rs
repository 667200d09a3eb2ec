//! Subreddit catalog: `subreddit_id` -> display names and activity counts
//!
//! Built in two phases:
//! 1. group the submission collection by `subreddit_id` and materialize the
//!    groups as a new collection (`$out`), then index the display names;
//! 2. group the comment collection the same way and `$set` `comment_count`
//!    on every catalog entry that has comment activity.
//!
//! Phase 2 only sets values, so re-running it alone is safe. Entries without
//! comments keep no `comment_count` field at all; absence is not zero.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::{Error, Result};
use crate::store::{AggregateOutput, Constraint, GroupStage, Pipeline, Record, RecordStore, ID_FIELD};

/// Default name of the catalog collection
pub const DEFAULT_CATALOG: &str = "SubredIdMap";

pub const FOREIGN_KEY: &str = "subreddit_id";
pub const DISPLAY_NAME: &str = "subreddit";
pub const SUBMISSION_COUNT: &str = "submission_count";
pub const COMMENT_COUNT: &str = "comment_count";

/// Why a catalog phase may not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionViolation {
    MissingIndex { collection: String, field: String },
    CollectionExists(String),
    MissingCollection(String),
}

impl From<PreconditionViolation> for Error {
    fn from(v: PreconditionViolation) -> Self {
        match v {
            PreconditionViolation::MissingIndex { collection, field } => Error::MissingIndex { collection, field },
            PreconditionViolation::CollectionExists(name) => Error::CollectionExists(name),
            PreconditionViolation::MissingCollection(name) => Error::MissingCollection(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preconditions {
    Satisfied,
    Violated(PreconditionViolation),
}

impl Preconditions {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Preconditions::Satisfied)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Preconditions::Satisfied => Ok(()),
            Preconditions::Violated(v) => Err(v.into()),
        }
    }
}

/// One catalog document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "_id")]
    pub subreddit_id: Option<String>,
    /// Every display name seen for this id
    #[serde(rename = "subreddit")]
    pub subreddits: Vec<String>,
    pub submission_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<i64>,
}

impl CatalogEntry {
    pub fn from_record(record: Record) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(record))?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub catalog: String,
    pub entries: usize,
    pub index: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichReport {
    /// Catalog entries that have comment activity
    pub matched: usize,
    /// Entries whose `comment_count` actually changed
    pub modified: usize,
    /// Comment `subreddit_id`s with no catalog entry (skipped)
    pub orphaned: usize,
}

pub struct CatalogBuilder<'a, S> {
    store: &'a S,
}

impl<'a, S: RecordStore> CatalogBuilder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Phase 1 needs an indexed primary collection and a fresh catalog name
    pub fn check_build(&self, primary: &str, catalog: &str) -> Result<Preconditions> {
        if self.store.has_collection(catalog)? {
            return Ok(Preconditions::Violated(PreconditionViolation::CollectionExists(catalog.to_string())));
        }
        if !self.store.has_index(primary, FOREIGN_KEY)? {
            return Ok(Preconditions::Violated(PreconditionViolation::MissingIndex {
                collection: primary.to_string(),
                field: FOREIGN_KEY.to_string(),
            }));
        }
        Ok(Preconditions::Satisfied)
    }

    /// Phase 2 needs an existing catalog and an indexed secondary collection
    pub fn check_enrich(&self, catalog: &str, secondary: &str) -> Result<Preconditions> {
        if !self.store.has_collection(catalog)? {
            return Ok(Preconditions::Violated(PreconditionViolation::MissingCollection(catalog.to_string())));
        }
        if !self.store.has_index(secondary, FOREIGN_KEY)? {
            return Ok(Preconditions::Violated(PreconditionViolation::MissingIndex {
                collection: secondary.to_string(),
                field: FOREIGN_KEY.to_string(),
            }));
        }
        Ok(Preconditions::Satisfied)
    }

    /// Phase 1: materialize one entry per distinct `subreddit_id` of `primary`
    pub fn build(&self, primary: &str, catalog: &str) -> Result<BuildReport> {
        self.check_build(primary, catalog)?.into_result()?;

        let pipeline = Pipeline::new()
            .group(
                GroupStage::by(FOREIGN_KEY)
                    .add_to_set(DISPLAY_NAME, DISPLAY_NAME)
                    .count(SUBMISSION_COUNT),
            )
            .out(catalog)
            .allow_disk_use(true);

        let entries = match self.store.aggregate(primary, &pipeline)? {
            AggregateOutput::Written { count, .. } => count,
            AggregateOutput::Records(records) => records.len(),
        };
        let index = self.store.create_index(catalog, DISPLAY_NAME)?;

        tracing::info!("Cataloged {} subreddits from '{}' into '{}'", entries, primary, catalog);
        Ok(BuildReport {
            catalog: catalog.to_string(),
            entries,
            index,
        })
    }

    /// Phase 2: merge per-id comment counts of `secondary` into the catalog
    pub fn enrich(&self, catalog: &str, secondary: &str) -> Result<EnrichReport> {
        self.check_enrich(catalog, secondary)?.into_result()?;

        let pipeline = Pipeline::new()
            .group(GroupStage::by(FOREIGN_KEY).count(COMMENT_COUNT))
            .allow_disk_use(true);
        let groups = match self.store.aggregate(secondary, &pipeline)? {
            AggregateOutput::Records(records) => records,
            AggregateOutput::Written { .. } => Vec::new(),
        };

        let mut report = EnrichReport::default();
        for mut group in groups {
            let key = group.remove(ID_FIELD).unwrap_or(Value::Null);
            let count = group.remove(COMMENT_COUNT).unwrap_or(Value::from(0));

            let mut fields = Record::new();
            fields.insert(COMMENT_COUNT.to_string(), count);
            let updated = self
                .store
                .update_one(catalog, &Constraint::eq(ID_FIELD, key.clone()).into(), fields)?;

            if updated.matched == 0 {
                report.orphaned += 1;
                tracing::debug!("No catalog entry for comment subreddit_id {}", key);
            }
            report.matched += updated.matched;
            report.modified += updated.modified;
        }

        tracing::info!(
            "Enriched '{}' from '{}': {} entries with comments, {} orphaned ids",
            catalog,
            secondary,
            report.matched,
            report.orphaned
        );
        Ok(report)
    }

    /// Both phases
    pub fn catalog_subreddits(&self, primary: &str, secondary: &str, catalog: &str) -> Result<(BuildReport, EnrichReport)> {
        let built = self.build(primary, catalog)?;
        let enriched = self.enrich(catalog, secondary)?;
        Ok((built, enriched))
    }
}
