//! Filtered, optionally time-bounded and chunked record retrieval

use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;
use crate::catalog::{CatalogEntry, DISPLAY_NAME};
use crate::error::{Error, Result};
use crate::ingest::{RecordKind, CREATED_UTC};
use crate::store::{Constraint, Cursor, FieldSchema, Filter, Projection, Record, RecordStore, ID_FIELD};

/// Calendar-day window: `start` inclusive, `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeBounds {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidTimeBounds {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` dates, e.g. `("2011-03-01", "2011-04-01")`
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start_epoch(&self) -> i64 {
        midnight_utc(self.start)
    }

    pub fn end_epoch(&self) -> i64 {
        midnight_utc(self.end)
    }
}

/// Leading `Y-M-D` components of an ISO date; anything after the day is ignored
fn parse_date(text: &str) -> Result<NaiveDate> {
    let invalid = || Error::InvalidDate(text.to_string());
    let mut parts = text.trim().splitn(3, '-');
    let year: i32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let month: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let day: u32 = parts
        .next()
        .map(|p| p.split(|c: char| !c.is_ascii_digit()).next().unwrap_or(p))
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

fn midnight_utc(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// What to fetch: field equalities, an optional time window, and shaping
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub fields: Vec<(String, Value)>,
    pub time_bounds: Option<TimeBounds>,
    pub projection: Option<Projection>,
    pub chunk_size: Option<usize>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn between(mut self, bounds: TimeBounds) -> Self {
        self.time_bounds = Some(bounds);
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn chunked(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Groups a fallible stream into vectors of `size` (the last may be short)
pub struct Chunks<I> {
    inner: I,
    size: usize,
    done: bool,
}

impl<I> Chunks<I> {
    pub fn new(inner: I, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidBatchSize);
        }
        Ok(Self { inner, size, done: false })
    }
}

impl<I, T> Iterator for Chunks<I>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut chunk = Vec::with_capacity(self.size);
        while chunk.len() < self.size {
            match self.inner.next() {
                Some(Ok(item)) => chunk.push(item),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

/// Query results, one record at a time or in fixed-size chunks.
///
/// Lazy and single-use; running the query again re-executes it.
pub enum QueryOutput {
    Records(Cursor),
    Chunks(Chunks<Cursor>),
}

impl QueryOutput {
    /// Flatten into memory regardless of chunking
    pub fn into_records(self) -> Result<Vec<Record>> {
        match self {
            QueryOutput::Records(cursor) => cursor.collect(),
            QueryOutput::Chunks(chunks) => {
                let mut out = Vec::new();
                for chunk in chunks {
                    out.extend(chunk?);
                }
                Ok(out)
            }
        }
    }
}

pub struct QueryEngine<'a, S> {
    store: &'a S,
    schema: FieldSchema,
}

impl<'a, S: RecordStore> QueryEngine<'a, S> {
    pub fn new(store: &'a S, schema: FieldSchema) -> Self {
        Self { store, schema }
    }

    pub fn for_kind(store: &'a S, kind: RecordKind) -> Self {
        Self::new(store, kind.schema())
    }

    /// Field equalities plus `created_utc` in `[start, end)`, as one conjunction
    pub fn build_filter(&self, query: &RecordQuery) -> Result<Filter> {
        let mut constraints = Vec::with_capacity(query.fields.len() + 2);
        for (field, value) in &query.fields {
            constraints.push(self.schema.eq(field, value.clone())?);
        }
        if let Some(bounds) = &query.time_bounds {
            constraints.push(self.schema.gte(CREATED_UTC, bounds.start_epoch())?);
            constraints.push(self.schema.lt(CREATED_UTC, bounds.end_epoch())?);
        }
        Ok(Filter::and(constraints))
    }

    pub fn get_records(&self, collection: &str, query: &RecordQuery) -> Result<QueryOutput> {
        let filter = self.build_filter(query)?;
        tracing::debug!("Querying '{}' with {:?}", collection, filter);

        let cursor = self
            .store
            .find(collection, &filter, query.projection.as_ref(), query.limit)?;
        // chunk size 0 means unchunked
        match query.chunk_size.filter(|n| *n > 0) {
            Some(size) => Ok(QueryOutput::Chunks(Chunks::new(cursor, size)?)),
            None => Ok(QueryOutput::Records(cursor)),
        }
    }

    /// Every `subreddit_id` that has ever carried display name `name`
    pub fn subreddit_ids_for_name(&self, catalog: &str, name: &str) -> Result<Vec<String>> {
        let filter = Filter::from(FieldSchema::catalog().eq(DISPLAY_NAME, name)?);
        let projection = Projection::include(Vec::<String>::new());
        self.store
            .find(catalog, &filter, Some(&projection), None)?
            .filter_map(|record| match record {
                Ok(r) => r.get(ID_FIELD).and_then(Value::as_str).map(|id| Ok(id.to_string())),
                Err(e) => Some(Err(e)),
            })
            .collect()
    }

    pub fn catalog_entry(&self, catalog: &str, subreddit_id: &str) -> Result<Option<CatalogEntry>> {
        let filter = Filter::from(Constraint::eq(ID_FIELD, subreddit_id));
        match self.store.find(catalog, &filter, None, Some(1))?.next() {
            Some(record) => Ok(Some(CatalogEntry::from_record(record?)?)),
            None => Ok(None),
        }
    }
}
