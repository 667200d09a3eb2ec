//! Grouping aggregation pipelines with disk spill
//!
//! A pipeline is `[Match*] [Group] [Out]`. Group state lives in a hash map
//! until it holds more than `max_groups_in_memory` keys; past that, with
//! `allow_disk_use`, the partial state is merged into a scratch sled tree
//! and the map starts over. The scratch tree is dropped with the table.

use std::collections::HashMap;
use serde_json::Value;
use crate::error::{Error, Result};
use super::filter::{values_equal, Filter};
use super::keys::encode_value;
use super::{Record, ID_FIELD};

/// Per-group output field
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Distinct values of a source field (missing values are ignored)
    AddToSet(String),
    /// Number of documents in the group
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupStage {
    /// Source field whose value becomes the group `_id`
    pub key: String,
    pub fields: Vec<(String, Accumulator)>,
}

impl GroupStage {
    pub fn by(key: impl Into<String>) -> Self {
        Self { key: key.into(), fields: Vec::new() }
    }

    pub fn add_to_set(mut self, output: impl Into<String>, source: impl Into<String>) -> Self {
        self.fields.push((output.into(), Accumulator::AddToSet(source.into())));
        self
    }

    pub fn count(mut self, output: impl Into<String>) -> Self {
        self.fields.push((output.into(), Accumulator::Count));
        self
    }

    fn initial_state(&self, key: Value) -> Record {
        let mut state = Record::new();
        state.insert(ID_FIELD.to_string(), key);
        for (output, acc) in &self.fields {
            let init = match acc {
                Accumulator::AddToSet(_) => Value::Array(Vec::new()),
                Accumulator::Count => Value::from(0),
            };
            state.insert(output.clone(), init);
        }
        state
    }

    fn apply(&self, state: &mut Record, record: &Record) {
        for (output, acc) in &self.fields {
            match acc {
                Accumulator::AddToSet(source) => {
                    if let (Some(value), Some(Value::Array(set))) = (record.get(source), state.get_mut(output)) {
                        if !set.iter().any(|v| values_equal(v, value)) {
                            set.push(value.clone());
                        }
                    }
                }
                Accumulator::Count => {
                    let n = state.get(output).and_then(Value::as_i64).unwrap_or(0);
                    state.insert(output.clone(), Value::from(n + 1));
                }
            }
        }
    }

    fn merge(&self, into: &mut Record, from: Record) {
        for (output, acc) in &self.fields {
            match acc {
                Accumulator::AddToSet(_) => {
                    let incoming = match from.get(output) {
                        Some(Value::Array(items)) => items.clone(),
                        _ => continue,
                    };
                    if let Some(Value::Array(set)) = into.get_mut(output) {
                        for value in incoming {
                            if !set.iter().any(|v| values_equal(v, &value)) {
                                set.push(value);
                            }
                        }
                    }
                }
                Accumulator::Count => {
                    let a = into.get(output).and_then(Value::as_i64).unwrap_or(0);
                    let b = from.get(output).and_then(Value::as_i64).unwrap_or(0);
                    into.insert(output.clone(), Value::from(a + b));
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Group(GroupStage),
    /// Replace the named collection with the pipeline output
    Out(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub allow_disk_use: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching(mut self, filter: Filter) -> Self {
        self.stages.push(Stage::Match(filter));
        self
    }

    pub fn group(mut self, stage: GroupStage) -> Self {
        self.stages.push(Stage::Group(stage));
        self
    }

    pub fn out(mut self, collection: impl Into<String>) -> Self {
        self.stages.push(Stage::Out(collection.into()));
        self
    }

    pub fn allow_disk_use(mut self, allow: bool) -> Self {
        self.allow_disk_use = allow;
        self
    }

    /// Check stage order against the supported shape
    pub fn validate(&self, source: &str) -> Result<()> {
        let mut seen_group = false;
        for (i, stage) in self.stages.iter().enumerate() {
            match stage {
                Stage::Match(_) if seen_group => {
                    return Err(Error::InvalidPipeline("$match after $group is not supported".into()));
                }
                Stage::Match(_) => {}
                Stage::Group(_) if seen_group => {
                    return Err(Error::InvalidPipeline("only one $group stage is supported".into()));
                }
                Stage::Group(_) => seen_group = true,
                Stage::Out(_) if i + 1 != self.stages.len() => {
                    return Err(Error::InvalidPipeline("$out must be the last stage".into()));
                }
                Stage::Out(dest) if dest == source => {
                    return Err(Error::InvalidPipeline(format!("$out cannot replace the source collection '{}'", dest)));
                }
                Stage::Out(_) => {}
            }
        }
        Ok(())
    }

    /// Source filter, group stage and output collection of a validated pipeline
    pub(crate) fn plan(&self) -> (Filter, Option<&GroupStage>, Option<&str>) {
        let mut filter = Filter::All;
        let mut group = None;
        let mut out = None;
        for stage in &self.stages {
            match stage {
                Stage::Match(f) => filter = filter.combine(f.clone()),
                Stage::Group(g) => group = Some(g),
                Stage::Out(dest) => out = Some(dest.as_str()),
            }
        }
        (filter, group, out)
    }
}

/// Result of `RecordStore::aggregate`
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutput {
    Records(Vec<Record>),
    /// Output materialized into a collection
    Written { collection: String, count: usize },
}

/// Hash-grouped state with overflow into a scratch sled tree
pub(crate) struct GroupTable<'a> {
    stage: &'a GroupStage,
    groups: HashMap<Vec<u8>, Record>,
    max_in_memory: usize,
    allow_disk_use: bool,
    db: sled::Db,
    spill: Option<sled::Tree>,
}

impl<'a> GroupTable<'a> {
    pub fn new(stage: &'a GroupStage, db: sled::Db, max_in_memory: usize, allow_disk_use: bool) -> Self {
        Self {
            stage,
            groups: HashMap::new(),
            max_in_memory: max_in_memory.max(1),
            allow_disk_use,
            db,
            spill: None,
        }
    }

    pub fn accumulate(&mut self, record: &Record) -> Result<()> {
        let stage = self.stage;
        let key = record.get(&stage.key).cloned().unwrap_or(Value::Null);
        let state = self
            .groups
            .entry(encode_value(&key))
            .or_insert_with(|| stage.initial_state(key));
        stage.apply(state, record);

        if self.groups.len() > self.max_in_memory {
            if !self.allow_disk_use {
                return Err(Error::AggregationMemoryLimit { limit: self.max_in_memory });
            }
            self.spill_groups()?;
        }
        Ok(())
    }

    fn spill_groups(&mut self) -> Result<()> {
        let tree = match &self.spill {
            Some(tree) => tree.clone(),
            None => {
                let name = format!("__agg:{}", self.db.generate_id()?);
                let tree = self.db.open_tree(name)?;
                self.spill = Some(tree.clone());
                tree
            }
        };

        let count = self.groups.len();
        for (key, state) in self.groups.drain() {
            let merged = match tree.get(&key)? {
                Some(bytes) => {
                    let mut existing: Record = serde_json::from_slice(&bytes)?;
                    self.stage.merge(&mut existing, state);
                    existing
                }
                None => state,
            };
            tree.insert(key, serde_json::to_vec(&merged)?)?;
        }
        tracing::debug!("Spilled {} groups to disk", count);
        Ok(())
    }

    /// Hand every finished group to `sink` in key order; returns the group count
    pub fn drain<F>(mut self, mut sink: F) -> Result<usize>
    where
        F: FnMut(Record) -> Result<()>,
    {
        let mut emitted = 0;
        if self.spill.is_some() {
            self.spill_groups()?;
        }

        if let Some(tree) = &self.spill {
            for item in tree.iter() {
                let (_, bytes) = item?;
                sink(serde_json::from_slice(&bytes)?)?;
                emitted += 1;
            }
        } else {
            let mut groups: Vec<(Vec<u8>, Record)> = std::mem::take(&mut self.groups).into_iter().collect();
            groups.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, state) in groups {
                sink(state)?;
                emitted += 1;
            }
        }
        Ok(emitted)
    }
}

impl Drop for GroupTable<'_> {
    fn drop(&mut self) {
        if let Some(tree) = self.spill.take() {
            if let Err(e) = self.db.drop_tree(tree.name()) {
                tracing::warn!("Failed to drop aggregation scratch tree: {}", e);
            }
        }
    }
}
