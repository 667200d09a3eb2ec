//! Bulk loader: archive batches -> unordered inserts -> secondary indexes

use std::path::{Path, PathBuf};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use crate::config::LoaderConfig;
use crate::error::{Error, Result};
use crate::store::{Record, RecordStore, ID_FIELD};
use super::batcher::{open_archive, Compression, Line};
use super::kind::RecordKind;

pub const CREATED_UTC: &str = "created_utc";
pub const FULLNAME: &str = "name";

/// Parse one archive line into a record
pub fn parse_record(line: &[u8]) -> Result<Record> {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(other) => Err(Error::Parse(format!("expected a JSON object, got {}", json_kind(&other)))),
        Err(e) => Err(Error::Parse(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Rewrite `created_utc` as integer epoch seconds.
///
/// Comment dumps carry it as a string, submission dumps as a number.
pub fn normalize_created_utc(record: &mut Record) -> Result<()> {
    let value = record
        .get(CREATED_UTC)
        .ok_or_else(|| Error::Parse(format!("missing {}", CREATED_UTC)))?;

    let ts = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::Parse(format!("{} is not an integer: {}", CREATED_UTC, value)))?;

    record.insert(CREATED_UTC.to_string(), Value::from(ts));
    Ok(())
}

/// Counters for one archive file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub batches: usize,
    pub lines: usize,
    pub blank: usize,
    /// Lines skipped because they did not parse
    pub malformed: usize,
    pub inserted: usize,
    /// Records the store refused (e.g. duplicate identity)
    pub rejected: usize,
}

/// Outcome of loading a set of archives into one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub collection: String,
    pub kind: RecordKind,
    pub files: Vec<FileReport>,
    pub indexes: Vec<String>,
}

impl LoadReport {
    pub fn inserted(&self) -> usize {
        self.files.iter().map(|f| f.inserted).sum()
    }

    pub fn malformed(&self) -> usize {
        self.files.iter().map(|f| f.malformed).sum()
    }

    pub fn rejected(&self) -> usize {
        self.files.iter().map(|f| f.rejected).sum()
    }
}

/// Loads compressed archives into a collection of the store
pub struct BulkLoader<'a, S> {
    store: &'a S,
    config: LoaderConfig,
}

impl<'a, S: RecordStore + Sync> BulkLoader<'a, S> {
    pub fn new(store: &'a S, config: LoaderConfig) -> Self {
        Self { store, config }
    }

    /// Load every archive, then index the collection for the archives' kind.
    ///
    /// Extensions and kind prefixes of all paths are checked before the first
    /// insert, so a bad file name never leaves a half-loaded collection.
    pub fn load<P: AsRef<Path>>(&self, collection: &str, paths: &[P]) -> Result<LoadReport> {
        let paths: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        if self.config.batch_size == 0 {
            return Err(Error::InvalidBatchSize);
        }
        for path in &paths {
            Compression::from_path(path)?;
        }
        let kind = RecordKind::of_all(&paths)?;

        let files = if self.config.parallel_files {
            paths
                .par_iter()
                .map(|path| self.load_file(collection, path))
                .collect::<Result<Vec<_>>>()?
        } else {
            paths
                .iter()
                .map(|path| self.load_file(collection, path))
                .collect::<Result<Vec<_>>>()?
        };

        let indexes = kind
            .index_fields()
            .iter()
            .map(|field| self.store.create_index(collection, field))
            .collect::<Result<Vec<_>>>()?;

        let report = LoadReport {
            collection: collection.to_string(),
            kind,
            files,
            indexes,
        };
        tracing::info!(
            "Loaded {} {:?} records into '{}' ({} malformed, {} rejected)",
            report.inserted(),
            kind,
            collection,
            report.malformed(),
            report.rejected()
        );
        Ok(report)
    }

    /// Stream one archive into the collection, batch by batch
    pub fn load_file(&self, collection: &str, path: &Path) -> Result<FileReport> {
        tracing::info!("Loading {:?} into '{}'", path, collection);
        let mut report = FileReport {
            path: path.to_path_buf(),
            ..FileReport::default()
        };

        for batch in open_archive(path, self.config.batch_size)? {
            let batch = batch?;
            report.batches += 1;
            report.lines += batch.len();

            let records = self.parse_batch(batch, &mut report);
            if records.is_empty() {
                continue;
            }

            let inserted = self.store.insert_many(collection, records, false)?;
            report.inserted += inserted.inserted;
            report.rejected += inserted.failures.len();
            if let Some(first) = inserted.failures.first() {
                tracing::warn!(
                    "Batch {} of {:?}: {} records rejected (first: {})",
                    report.batches,
                    path,
                    inserted.failures.len(),
                    first.reason
                );
            }
            tracing::debug!("Batch {} of {:?}: {} inserted", report.batches, path, inserted.inserted);
        }

        if report.malformed > 0 {
            tracing::warn!("Skipped {} malformed lines in {:?}", report.malformed, path);
        }
        Ok(report)
    }

    /// Parse a batch, skipping and counting lines that fail
    fn parse_batch(&self, batch: Vec<Line>, report: &mut FileReport) -> Vec<Record> {
        let mut records = Vec::with_capacity(batch.len());
        for line in batch {
            if line.iter().all(u8::is_ascii_whitespace) {
                report.blank += 1;
                continue;
            }
            match self.prepare(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    report.malformed += 1;
                    tracing::debug!("Skipping line in {:?}: {}", report.path, e);
                }
            }
        }
        records
    }

    fn prepare(&self, line: &[u8]) -> Result<Record> {
        let mut record = parse_record(line)?;
        normalize_created_utc(&mut record)?;
        if self.config.key_by_fullname && !record.contains_key(ID_FIELD) {
            if let Some(name) = record.get(FULLNAME).cloned() {
                record.insert(ID_FIELD.to_string(), name);
            }
        }
        Ok(record)
    }
}
