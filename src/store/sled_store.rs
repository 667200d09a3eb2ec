//! Disk-backed document store on sled
//!
//! Layout:
//! - `coll:<name>`          encoded `_id` -> JSON document
//! - `idx:<name>:<field>`   index entry (see [`super::keys`]) -> empty
//! - `__meta`               index tree name -> marker, written once its backfill finished
//! - `__out:<id>`           `$out` documents staged until the pipeline succeeds

use std::collections::HashSet;
use serde_json::Value;
use sled::{Db, Tree};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use super::aggregate::{AggregateOutput, GroupTable, Pipeline};
use super::filter::{Constraint, Filter, Projection};
use super::keys::{doc_key_of_entry, encode_value, index_entry, indexed_values, value_prefix};
use super::{index_name, Cursor, InsertReport, Record, RecordStore, UpdateResult, WriteFailure, ID_FIELD};

const COLLECTION_PREFIX: &str = "coll:";
const INDEX_PREFIX: &str = "idx:";

const META_TREE: &str = "__meta";
const OUT_PREFIX: &str = "__out:";
const AGG_PREFIX: &str = "__agg:";
const INDEX_READY: &[u8] = b"ready";

fn collection_tree_name(collection: &str) -> String {
    format!("{}{}", COLLECTION_PREFIX, collection)
}

fn index_tree_prefix(collection: &str) -> String {
    format!("{}{}:", INDEX_PREFIX, collection)
}

fn index_tree_name(collection: &str, field: &str) -> String {
    format!("{}{}", index_tree_prefix(collection), field)
}

fn decode(collection: &str, bytes: &[u8]) -> Result<Record> {
    serde_json::from_slice(bytes).map_err(|e| Error::CorruptDocument {
        collection: collection.to_string(),
        reason: e.to_string(),
    })
}

/// Fetch a document by key; a stale index entry yields `None`
fn load(docs: &Tree, collection: &str, key: &[u8]) -> Result<Option<Record>> {
    match docs.get(key)? {
        Some(bytes) => decode(collection, &bytes).map(Some),
        None => Ok(None),
    }
}

fn add_entries(index: &Tree, value: Option<&Value>, doc_key: &[u8]) -> Result<usize> {
    let values = indexed_values(value);
    for v in &values {
        index.insert(index_entry(v, doc_key), &[] as &[u8])?;
    }
    Ok(values.len())
}

fn remove_entries(index: &Tree, value: Option<&Value>, doc_key: &[u8]) -> Result<()> {
    for v in indexed_values(value) {
        index.remove(index_entry(v, doc_key))?;
    }
    Ok(())
}

/// Scratch tree collecting `$out` documents; removed on drop.
///
/// The destination only changes when [`SledStore::publish`] copies the
/// finished buffer over in one batch.
struct OutBuffer {
    db: Db,
    tree: Tree,
    dest: String,
    written: usize,
}

impl OutBuffer {
    fn new(db: &Db, dest: &str) -> Result<Self> {
        let tree = db.open_tree(format!("{}{}", OUT_PREFIX, db.generate_id()?))?;
        Ok(Self {
            db: db.clone(),
            tree,
            dest: dest.to_string(),
            written: 0,
        })
    }

    /// Same identity rules as an ordered `insert_many`
    fn push(&mut self, mut doc: Record) -> Result<()> {
        let id = match doc.get(ID_FIELD) {
            Some(id) => id.clone(),
            None => {
                let id = Value::from(self.db.generate_id()?);
                doc.insert(ID_FIELD.to_string(), id.clone());
                id
            }
        };
        let failure = |reason: String| Error::PartialInsertFailure {
            collection: self.dest.clone(),
            inserted: self.written,
            reason,
        };
        if id.is_array() {
            return Err(failure(format!("_id cannot be an array: {}", id)));
        }

        let key = encode_value(&id);
        match self.tree.compare_and_swap(&key, None as Option<&[u8]>, Some(serde_json::to_vec(&doc)?))? {
            Ok(()) => {
                self.written += 1;
                Ok(())
            }
            Err(_) => Err(failure(format!("duplicate key: {}", id))),
        }
    }
}

impl Drop for OutBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.db.drop_tree(self.tree.name()) {
            tracing::warn!("Failed to drop $out scratch tree: {}", e);
        }
    }
}

/// How `find` reaches candidate documents
enum Plan {
    Scan,
    /// Direct `_id` lookups
    Keys(Vec<Vec<u8>>),
    Index { tree: Tree, values: Vec<Value> },
}

pub struct SledStore {
    db: Db,
    config: StoreConfig,
}

impl SledStore {
    pub fn open(config: StoreConfig) -> Result<Self> {
        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity)
            .flush_every_ms(config.flush_every_ms)
            .open()?;

        let store = Self { db, config };
        store.drop_scratch_trees()?;
        tracing::info!("Opened record store at {:?}", store.config.path);
        Ok(store)
    }

    /// Store that lives only as long as the handle
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db, config: StoreConfig::default() })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Scratch trees left behind by an interrupted aggregation
    fn drop_scratch_trees(&self) -> Result<()> {
        for name in self.tree_names() {
            if name.starts_with(OUT_PREFIX) || name.starts_with(AGG_PREFIX) {
                tracing::warn!("Dropping leftover scratch tree '{}'", name);
                self.db.drop_tree(name.as_bytes())?;
            }
        }
        Ok(())
    }

    fn validate_name(collection: &str) -> Result<()> {
        if collection.is_empty() || collection.contains(':') || collection.starts_with("__") {
            return Err(Error::InvalidCollectionName(collection.to_string()));
        }
        Ok(())
    }

    fn tree_names(&self) -> Vec<String> {
        self.db
            .tree_names()
            .into_iter()
            .filter_map(|name| String::from_utf8(name.to_vec()).ok())
            .collect()
    }

    fn collection_tree(&self, collection: &str) -> Result<Tree> {
        Self::validate_name(collection)?;
        Ok(self.db.open_tree(collection_tree_name(collection))?)
    }

    /// Open a collection only if it exists; reads never create collections
    fn existing_collection(&self, collection: &str) -> Result<Option<Tree>> {
        Self::validate_name(collection)?;
        let name = collection_tree_name(collection);
        if self.tree_names().contains(&name) {
            Ok(Some(self.db.open_tree(name)?))
        } else {
            Ok(None)
        }
    }

    /// Every index tree of a collection, finished or not; all are maintained on writes
    fn indexed_fields(&self, collection: &str) -> Vec<String> {
        let prefix = index_tree_prefix(collection);
        self.tree_names()
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Indexes whose backfill completed; only these answer queries
    fn ready_fields(&self, collection: &str) -> Result<Vec<String>> {
        let meta = self.db.open_tree(META_TREE)?;
        let mut ready = Vec::new();
        for field in self.indexed_fields(collection) {
            if meta.contains_key(index_tree_name(collection, &field))? {
                ready.push(field);
            }
        }
        Ok(ready)
    }

    fn index_trees(&self, collection: &str) -> Result<Vec<(String, Tree)>> {
        self.indexed_fields(collection)
            .into_iter()
            .map(|field| {
                let tree = self.db.open_tree(index_tree_name(collection, &field))?;
                Ok((field, tree))
            })
            .collect()
    }

    fn plan(&self, collection: &str, filter: &Filter) -> Result<Plan> {
        let indexed = self.ready_fields(collection)?;
        let usable = |v: &Value| !v.is_null() && !v.is_array();

        for constraint in filter.constraints() {
            match constraint {
                Constraint::Eq { field, value } if field == ID_FIELD && usable(value) => {
                    return Ok(Plan::Keys(vec![encode_value(value)]));
                }
                Constraint::In { field, values } if field == ID_FIELD && values.iter().all(usable) => {
                    let mut keys: Vec<Vec<u8>> = Vec::with_capacity(values.len());
                    for key in values.iter().map(encode_value) {
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                    return Ok(Plan::Keys(keys));
                }
                _ => {}
            }
        }

        for constraint in filter.constraints() {
            let (field, values) = match constraint {
                Constraint::Eq { field, value } if usable(value) => (field, vec![value.clone()]),
                Constraint::In { field, values } if values.iter().all(usable) => (field, values.clone()),
                _ => continue,
            };
            if indexed.iter().any(|f| f == field) {
                let tree = self.db.open_tree(index_tree_name(collection, field))?;
                return Ok(Plan::Index { tree, values });
            }
        }
        Ok(Plan::Scan)
    }

    /// Replace `buffer.dest` with the staged documents in one batch.
    ///
    /// The previous destination and its indexes are dropped; a failure
    /// before this point leaves the destination untouched.
    fn publish(&self, buffer: OutBuffer) -> Result<usize> {
        let mut batch = sled::Batch::default();
        for item in buffer.tree.iter() {
            let (key, bytes) = item?;
            batch.insert(key, bytes);
        }

        if self.drop_collection(&buffer.dest)? {
            tracing::info!("Replacing collection '{}'", buffer.dest);
        }
        // created even for an empty result
        self.collection_tree(&buffer.dest)?.apply_batch(batch)?;
        Ok(buffer.written)
    }
}

impl RecordStore for SledStore {
    fn collection_names(&self) -> Result<Vec<String>> {
        Ok(self
            .tree_names()
            .into_iter()
            .filter_map(|name| name.strip_prefix(COLLECTION_PREFIX).map(str::to_string))
            .collect())
    }

    fn index_names(&self, collection: &str) -> Result<Vec<String>> {
        Self::validate_name(collection)?;
        Ok(self.ready_fields(collection)?.iter().map(|f| index_name(f)).collect())
    }

    fn insert_many(&self, collection: &str, records: Vec<Record>, ordered: bool) -> Result<InsertReport> {
        let docs = self.collection_tree(collection)?;
        let indexes = self.index_trees(collection)?;
        let mut report = InsertReport::default();

        for (position, mut record) in records.into_iter().enumerate() {
            let id = match record.get(ID_FIELD) {
                Some(id) => id.clone(),
                None => {
                    let id = Value::from(self.db.generate_id()?);
                    record.insert(ID_FIELD.to_string(), id.clone());
                    id
                }
            };

            let rejected = if id.is_array() {
                Some(format!("_id cannot be an array: {}", id))
            } else {
                let key = encode_value(&id);
                let bytes = serde_json::to_vec(&record)?;
                match docs.compare_and_swap(&key, None as Option<&[u8]>, Some(bytes))? {
                    Ok(()) => {
                        for (field, index) in &indexes {
                            add_entries(index, record.get(field), &key)?;
                        }
                        None
                    }
                    Err(_) => Some(format!("duplicate key: {}", id)),
                }
            };

            match rejected {
                None => report.inserted += 1,
                Some(reason) if ordered => {
                    return Err(Error::PartialInsertFailure {
                        collection: collection.to_string(),
                        inserted: report.inserted,
                        reason,
                    });
                }
                Some(reason) => report.failures.push(WriteFailure { position, reason }),
            }
        }

        Ok(report)
    }

    fn update_one(&self, collection: &str, filter: &Filter, fields: Record) -> Result<UpdateResult> {
        if fields.contains_key(ID_FIELD) {
            return Err(Error::InvalidFilter("_id is immutable".into()));
        }
        let Some(docs) = self.existing_collection(collection)? else {
            return Ok(UpdateResult::default());
        };

        let old = match self.find(collection, filter, None, Some(1))?.next() {
            Some(record) => record?,
            None => return Ok(UpdateResult::default()),
        };
        let id = old.get(ID_FIELD).cloned().ok_or_else(|| Error::CorruptDocument {
            collection: collection.to_string(),
            reason: "document without _id".into(),
        })?;
        let key = encode_value(&id);

        let mut new = old.clone();
        for (field, value) in fields {
            new.insert(field, value);
        }
        if new == old {
            return Ok(UpdateResult { matched: 1, modified: 0 });
        }

        docs.insert(&key, serde_json::to_vec(&new)?)?;
        for (field, index) in self.index_trees(collection)? {
            let (before, after) = (old.get(&field), new.get(&field));
            if before != after {
                remove_entries(&index, before, &key)?;
                add_entries(&index, after, &key)?;
            }
        }

        Ok(UpdateResult { matched: 1, modified: 1 })
    }

    fn create_index(&self, collection: &str, field: &str) -> Result<String> {
        let docs = self.collection_tree(collection)?;
        let name = index_name(field);
        let tree_name = index_tree_name(collection, field);
        let meta = self.db.open_tree(META_TREE)?;
        if meta.contains_key(&tree_name)? {
            return Ok(name);
        }
        if self.tree_names().contains(&tree_name) {
            tracing::warn!("Rebuilding unfinished index {} on '{}'", name, collection);
            self.db.drop_tree(&tree_name)?;
        }

        let index = self.db.open_tree(&tree_name)?;
        let mut entries = 0;
        for item in docs.iter() {
            let (key, bytes) = item?;
            let record = decode(collection, &bytes)?;
            entries += add_entries(&index, record.get(field), &key)?;
        }
        meta.insert(&tree_name, INDEX_READY)?;

        tracing::info!("Built index {} on '{}' ({} entries)", name, collection, entries);
        Ok(name)
    }

    fn drop_collection(&self, collection: &str) -> Result<bool> {
        Self::validate_name(collection)?;
        let meta = self.db.open_tree(META_TREE)?;
        for field in self.indexed_fields(collection) {
            let tree_name = index_tree_name(collection, &field);
            meta.remove(&tree_name)?;
            self.db.drop_tree(&tree_name)?;
        }
        Ok(self.db.drop_tree(collection_tree_name(collection))?)
    }

    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
        limit: Option<usize>,
    ) -> Result<Cursor> {
        let Some(docs) = self.existing_collection(collection)? else {
            return Ok(Cursor::empty());
        };
        let name = collection.to_string();

        let candidates: Box<dyn Iterator<Item = Result<Record>> + Send> = match self.plan(collection, filter)? {
            Plan::Scan => Box::new(docs.iter().values().map(move |bytes| decode(&name, &bytes?))),
            Plan::Keys(keys) => Box::new(keys.into_iter().filter_map(move |key| load(&docs, &name, &key).transpose())),
            Plan::Index { tree, values } if values.len() == 1 => {
                let prefix = value_prefix(&values[0]);
                Box::new(tree.scan_prefix(prefix).keys().filter_map(move |entry| {
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => return Some(Err(e.into())),
                    };
                    let key = doc_key_of_entry(&entry)?;
                    load(&docs, &name, key).transpose()
                }))
            }
            Plan::Index { tree, values } => {
                // a document may match several values; keep first-seen order
                let mut seen = HashSet::new();
                let mut keys = Vec::new();
                for value in &values {
                    for entry in tree.scan_prefix(value_prefix(value)).keys() {
                        let entry = entry?;
                        if let Some(key) = doc_key_of_entry(&entry) {
                            if seen.insert(key.to_vec()) {
                                keys.push(key.to_vec());
                            }
                        }
                    }
                }
                Box::new(keys.into_iter().filter_map(move |key| load(&docs, &name, &key).transpose()))
            }
        };

        let filter = filter.clone();
        let projection = projection.cloned();
        // limit 0 means no limit
        let limit = limit.filter(|n| *n > 0).unwrap_or(usize::MAX);

        Ok(Cursor::new(
            candidates
                .filter(move |item| match item {
                    Ok(record) => filter.matches(record),
                    Err(_) => true,
                })
                .map(move |item| match &projection {
                    Some(p) => item.map(|record| p.apply(record)),
                    None => item,
                })
                .take(limit),
        ))
    }

    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<AggregateOutput> {
        pipeline.validate(collection)?;
        let (filter, group, out) = pipeline.plan();
        let source = self.find(collection, &filter, None, None)?;

        let mut buffer = match out {
            Some(dest) => {
                Self::validate_name(dest)?;
                Some(OutBuffer::new(&self.db, dest)?)
            }
            None => None,
        };
        let mut records = Vec::new();
        let mut sink = |doc: Record| -> Result<()> {
            match buffer.as_mut() {
                Some(buffer) => buffer.push(doc),
                None => {
                    records.push(doc);
                    Ok(())
                }
            }
        };

        let groups = match group {
            Some(stage) => {
                let mut table = GroupTable::new(
                    stage,
                    self.db.clone(),
                    self.config.max_groups_in_memory,
                    pipeline.allow_disk_use,
                );
                for record in source {
                    table.accumulate(&record?)?;
                }
                table.drain(&mut sink)?
            }
            None => {
                let mut n = 0;
                for record in source {
                    sink(record?)?;
                    n += 1;
                }
                n
            }
        };

        match buffer {
            Some(buffer) => {
                let dest = buffer.dest.clone();
                let count = self.publish(buffer)?;
                tracing::info!("Aggregated {} groups from '{}' into '{}'", groups, collection, dest);
                Ok(AggregateOutput::Written { collection: dest, count })
            }
            None => Ok(AggregateOutput::Records(records)),
        }
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::GroupStage;
    use serde_json::json;
    use tempfile::tempdir;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn names(cursor: Cursor) -> Vec<String> {
        cursor
            .map(|r| r.unwrap()["name"].as_str().unwrap().to_string())
            .collect()
    }

    fn seeded() -> SledStore {
        let store = SledStore::temporary().unwrap();
        store
            .insert_many(
                "Comment",
                vec![
                    rec(json!({"name": "t1_a", "parent_id": "t3_r", "created_utc": 10})),
                    rec(json!({"name": "t1_b", "parent_id": "t3_r", "created_utc": 20})),
                    rec(json!({"name": "t1_c", "parent_id": "t1_a", "created_utc": 30})),
                ],
                false,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_reads_do_not_create_collections() {
        let store = SledStore::temporary().unwrap();
        let found = store.find("Missing", &Filter::All, None, None).unwrap();
        assert_eq!(found.count(), 0);
        assert!(!store.has_collection("Missing").unwrap());
    }

    #[test]
    fn test_invalid_collection_name() {
        let store = SledStore::temporary().unwrap();
        assert!(matches!(
            store.insert_many("a:b", vec![], false),
            Err(Error::InvalidCollectionName(_))
        ));
    }

    #[test]
    fn test_scan_and_index_agree() {
        let store = seeded();
        let filter = Filter::from(Constraint::eq("parent_id", "t3_r"));

        let scanned = names(store.find("Comment", &filter, None, None).unwrap());
        assert_eq!(store.create_index("Comment", "parent_id").unwrap(), "parent_id_1");
        let indexed = names(store.find("Comment", &filter, None, None).unwrap());

        assert_eq!(scanned.len(), 2);
        let mut a = scanned.clone();
        let mut b = indexed.clone();
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert!(store.has_index("Comment", "parent_id").unwrap());
    }

    #[test]
    fn test_index_maintained_on_insert_and_in_lookup() {
        let store = seeded();
        store.create_index("Comment", "parent_id").unwrap();
        store
            .insert_many("Comment", vec![rec(json!({"name": "t1_d", "parent_id": "t1_c"}))], false)
            .unwrap();

        let filter = Filter::from(Constraint::is_in("parent_id", ["t1_a", "t1_c"]));
        let mut found = names(store.find("Comment", &filter, None, None).unwrap());
        found.sort();
        assert_eq!(found, vec!["t1_c", "t1_d"]);
    }

    #[test]
    fn test_unordered_insert_keeps_siblings_of_duplicate() {
        let store = SledStore::temporary().unwrap();
        store.insert_many("S", vec![rec(json!({"_id": "x"}))], false).unwrap();

        let report = store
            .insert_many(
                "S",
                vec![rec(json!({"_id": "a"})), rec(json!({"_id": "x"})), rec(json!({"_id": "b"}))],
                false,
            )
            .unwrap();

        assert_eq!(report.inserted, 2);
        assert!(report.is_partial());
        assert_eq!(report.failures[0].position, 1);
        assert_eq!(store.count("S", &Filter::All).unwrap(), 3);
    }

    #[test]
    fn test_ordered_insert_stops_at_duplicate() {
        let store = SledStore::temporary().unwrap();
        let result = store.insert_many(
            "S",
            vec![rec(json!({"_id": 1})), rec(json!({"_id": 1})), rec(json!({"_id": 2}))],
            true,
        );
        assert!(matches!(result, Err(Error::PartialInsertFailure { inserted: 1, .. })));
        assert_eq!(store.count("S", &Filter::All).unwrap(), 1);
    }

    #[test]
    fn test_projection_and_limit() {
        let store = seeded();
        let projection = Projection::include(["name"]).without_id();
        let out: Vec<Record> = store
            .find("Comment", &Filter::All, Some(&projection), Some(2))
            .unwrap()
            .collect_records()
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.len() == 1 && r.contains_key("name")));
    }

    #[test]
    fn test_update_one_moves_index_entries() {
        let store = seeded();
        store.create_index("Comment", "parent_id").unwrap();

        let result = store
            .update_one(
                "Comment",
                &Filter::from(Constraint::eq("name", "t1_c")),
                rec(json!({"parent_id": "t1_b"})),
            )
            .unwrap();
        assert_eq!(result, UpdateResult { matched: 1, modified: 1 });

        let under_a = store.find("Comment", &Constraint::eq("parent_id", "t1_a").into(), None, None).unwrap();
        assert_eq!(under_a.count(), 0);
        let under_b = names(store.find("Comment", &Constraint::eq("parent_id", "t1_b").into(), None, None).unwrap());
        assert_eq!(under_b, vec!["t1_c"]);

        let again = store
            .update_one(
                "Comment",
                &Filter::from(Constraint::eq("name", "t1_c")),
                rec(json!({"parent_id": "t1_b"})),
            )
            .unwrap();
        assert_eq!(again, UpdateResult { matched: 1, modified: 0 });
    }

    #[test]
    fn test_id_lookup_applies_residual_filter() {
        let store = SledStore::temporary().unwrap();
        store
            .insert_many("S", vec![rec(json!({"_id": "a", "n": 1})), rec(json!({"_id": 2, "n": 2}))], false)
            .unwrap();

        assert_eq!(store.count("S", &Constraint::eq(ID_FIELD, 2.0).into()).unwrap(), 1);
        assert_eq!(store.count("S", &Constraint::is_in(ID_FIELD, [json!("a"), json!(2), json!("a")]).into()).unwrap(), 2);
        let both = Filter::and(vec![Constraint::eq(ID_FIELD, "a"), Constraint::eq("n", 2)]);
        assert_eq!(store.count("S", &both).unwrap(), 0);
        assert_eq!(store.count("S", &Constraint::eq(ID_FIELD, "zzz").into()).unwrap(), 0);
    }

    #[test]
    fn test_update_rejects_id_change() {
        let store = seeded();
        let result = store.update_one("Comment", &Filter::All, rec(json!({"_id": 5})));
        assert!(matches!(result, Err(Error::InvalidFilter(_))));
    }

    #[test]
    fn test_aggregate_out_replaces_destination() {
        let store = SledStore::temporary().unwrap();
        store
            .insert_many(
                "Submission",
                vec![
                    rec(json!({"subreddit_id": "t5_a", "subreddit": "pics"})),
                    rec(json!({"subreddit_id": "t5_a", "subreddit": "Pics"})),
                    rec(json!({"subreddit_id": "t5_b", "subreddit": "funny"})),
                ],
                false,
            )
            .unwrap();
        store.insert_many("Map", vec![rec(json!({"_id": "stale"}))], false).unwrap();

        let pipeline = Pipeline::new()
            .group(GroupStage::by("subreddit_id").add_to_set("subreddit", "subreddit").count("n"))
            .out("Map")
            .allow_disk_use(true);
        let output = store.aggregate("Submission", &pipeline).unwrap();
        assert_eq!(output, AggregateOutput::Written { collection: "Map".into(), count: 2 });

        let a = store
            .find("Map", &Constraint::eq(ID_FIELD, "t5_a").into(), None, None)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(a["subreddit"], json!(["pics", "Pics"]));
        assert_eq!(a["n"], json!(2));
        assert_eq!(store.count("Map", &Constraint::eq(ID_FIELD, "stale").into()).unwrap(), 0);
    }

    #[test]
    fn test_aggregate_with_match_returns_records() {
        let store = seeded();
        let pipeline = Pipeline::new()
            .matching(Constraint::gte("created_utc", 20).into())
            .group(GroupStage::by("parent_id").count("replies"));
        let AggregateOutput::Records(groups) = store.aggregate("Comment", &pipeline).unwrap() else {
            panic!("expected records");
        };
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g["replies"] == json!(1)));
    }

    fn scratch_trees(store: &SledStore) -> Vec<String> {
        store
            .tree_names()
            .into_iter()
            .filter(|n| n.starts_with(OUT_PREFIX) || n.starts_with(AGG_PREFIX))
            .collect()
    }

    #[test]
    fn test_failed_out_leaves_destination_untouched() {
        let store = SledStore::temporary().unwrap();
        store
            .insert_many(
                "Submission",
                vec![rec(json!({"subreddit_id": "A"})), rec(json!({"subreddit_id": ["X", "Y"]}))],
                false,
            )
            .unwrap();
        let pipeline = Pipeline::new()
            .group(GroupStage::by("subreddit_id").count("n"))
            .out("Map")
            .allow_disk_use(true);

        // array group key becomes an array _id
        let result = store.aggregate("Submission", &pipeline);
        assert!(matches!(result, Err(Error::PartialInsertFailure { .. })));
        assert!(!store.has_collection("Map").unwrap());
        assert!(scratch_trees(&store).is_empty());

        // an existing destination survives the failure as it was
        store.insert_many("Map", vec![rec(json!({"_id": "old"}))], false).unwrap();
        assert!(store.aggregate("Submission", &pipeline).is_err());
        assert_eq!(store.count("Map", &Filter::All).unwrap(), 1);
        assert_eq!(store.count("Map", &Constraint::eq(ID_FIELD, "old").into()).unwrap(), 1);
    }

    #[test]
    fn test_empty_out_still_creates_destination() {
        let store = seeded();
        let pipeline = Pipeline::new()
            .matching(Constraint::eq("name", "nobody").into())
            .group(GroupStage::by("parent_id").count("n"))
            .out("Empty");
        let output = store.aggregate("Comment", &pipeline).unwrap();
        assert_eq!(output, AggregateOutput::Written { collection: "Empty".into(), count: 0 });
        assert!(store.has_collection("Empty").unwrap());
        assert!(scratch_trees(&store).is_empty());
    }

    #[test]
    fn test_unfinished_index_is_rebuilt() {
        let store = seeded();
        // index tree present but its backfill never completed
        store.db.open_tree(index_tree_name("Comment", "parent_id")).unwrap();
        assert!(!store.has_index("Comment", "parent_id").unwrap());

        let filter = Filter::from(Constraint::eq("parent_id", "t3_r"));
        assert_eq!(store.count("Comment", &filter).unwrap(), 2);

        store.create_index("Comment", "parent_id").unwrap();
        assert!(store.has_index("Comment", "parent_id").unwrap());
        assert!(matches!(store.plan("Comment", &filter).unwrap(), Plan::Index { .. }));
        assert_eq!(store.count("Comment", &filter).unwrap(), 2);
    }

    #[test]
    fn test_dropped_collection_forgets_index() {
        let store = seeded();
        store.create_index("Comment", "parent_id").unwrap();
        assert!(store.drop_collection("Comment").unwrap());

        store.insert_many("Comment", vec![rec(json!({"name": "t1_z", "parent_id": "t3_r"}))], false).unwrap();
        assert!(store.index_names("Comment").unwrap().is_empty());
    }

    #[test]
    fn test_open_drops_leftover_scratch_trees() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::at(dir.path().join("db"));
        {
            let store = SledStore::open(config.clone()).unwrap();
            store.db.open_tree(format!("{}7", OUT_PREFIX)).unwrap();
            store.db.open_tree(format!("{}8", AGG_PREFIX)).unwrap();
            store.flush().unwrap();
        }

        let store = SledStore::open(config).unwrap();
        assert!(scratch_trees(&store).is_empty());
        assert!(store.collection_names().unwrap().is_empty());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::at(dir.path().join("db"));
        {
            let store = SledStore::open(config.clone()).unwrap();
            store.insert_many("S", vec![rec(json!({"name": "t3_x"}))], false).unwrap();
            store.create_index("S", "name").unwrap();
            store.flush().unwrap();
        }

        let store = SledStore::open(config).unwrap();
        assert_eq!(store.collection_names().unwrap(), vec!["S".to_string()]);
        assert_eq!(store.index_names("S").unwrap(), vec!["name_1".to_string()]);
        assert_eq!(store.count("S", &Constraint::eq("name", "t3_x").into()).unwrap(), 1);
    }
}
