//! Comment-tree reconstruction over `parent_id` pointers

pub mod traversal;

use std::collections::HashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::Result;
use crate::ingest::FULLNAME;
use crate::store::{Constraint, Filter, Projection, Record, RecordStore};

pub const PARENT_ID: &str = "parent_id";

/// `(parent fullname, child fullname)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge(pub String, pub String);

impl Edge {
    pub fn parent(&self) -> &str {
        &self.0
    }

    pub fn child(&self) -> &str {
        &self.1
    }
}

/// Reply tree of a root, as edges grouped by depth (level 0 = root's children)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentTree {
    pub root: String,
    pub depth_edges: Vec<Vec<Edge>>,
}

impl CommentTree {
    pub fn depth(&self) -> usize {
        self.depth_edges.len()
    }

    pub fn edge_count(&self) -> usize {
        self.depth_edges.iter().map(Vec::len).sum()
    }
}

/// How the children of one frontier are fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontierStrategy {
    /// One `parent_id IN frontier` query per level
    #[default]
    SetMembership,
    /// One `parent_id == node` query per frontier node, run on the rayon pool
    PerNode,
}

pub struct TreeReconstructor<'a, S> {
    store: &'a S,
    collection: String,
    strategy: FrontierStrategy,
}

impl<'a, S: RecordStore + Sync> TreeReconstructor<'a, S> {
    pub fn new(store: &'a S, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            strategy: FrontierStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: FrontierStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Edges by depth below `root` (a submission `t3_*` or comment `t1_*`
    /// fullname), searching at most `max_depth` levels
    pub fn comment_tree(&self, root: &str, max_depth: Option<usize>) -> Result<CommentTree> {
        let levels = traversal::level_edges(root.to_string(), max_depth, |frontier| {
            let edges = self.children_of(frontier)?;
            tracing::debug!("Frontier of {} nodes has {} children", frontier.len(), edges.len());
            Ok(edges)
        })?;

        let depth_edges: Vec<Vec<Edge>> = levels
            .into_iter()
            .map(|level| level.into_iter().map(|(p, c)| Edge(p, c)).collect())
            .collect();
        tracing::debug!("Tree of {} has {} levels", root, depth_edges.len());

        Ok(CommentTree {
            root: root.to_string(),
            depth_edges,
        })
    }

    /// Edges from every frontier node to its children, in frontier order
    fn children_of(&self, frontier: &[String]) -> Result<Vec<(String, String)>> {
        match self.strategy {
            FrontierStrategy::SetMembership => {
                let filter = Filter::from(Constraint::is_in(PARENT_ID, frontier.iter().cloned()));
                let mut by_parent: HashMap<String, Vec<String>> = HashMap::new();
                for record in self.store.find(&self.collection, &filter, Some(&link_projection()), None)? {
                    if let Some((parent, child)) = link(&record?) {
                        by_parent.entry(parent).or_default().push(child);
                    }
                }
                Ok(frontier
                    .iter()
                    .flat_map(|parent| {
                        by_parent
                            .remove(parent)
                            .unwrap_or_default()
                            .into_iter()
                            .map(move |child| (parent.clone(), child))
                    })
                    .collect())
            }
            FrontierStrategy::PerNode => {
                let per_node: Vec<Vec<(String, String)>> = frontier
                    .par_iter()
                    .map(|parent| -> Result<Vec<(String, String)>> {
                        let filter = Filter::from(Constraint::eq(PARENT_ID, parent.as_str()));
                        let mut edges = Vec::new();
                        for record in self.store.find(&self.collection, &filter, Some(&link_projection()), None)? {
                            if let Some((_, child)) = link(&record?) {
                                edges.push((parent.clone(), child));
                            }
                        }
                        Ok(edges)
                    })
                    .collect::<Result<_>>()?;
                Ok(per_node.into_iter().flatten().collect())
            }
        }
    }
}

fn link_projection() -> Projection {
    Projection::include([PARENT_ID, FULLNAME]).without_id()
}

fn link(record: &Record) -> Option<(String, String)> {
    let parent = record.get(PARENT_ID).and_then(Value::as_str)?;
    let child = record.get(FULLNAME).and_then(Value::as_str)?;
    Some((parent.to_string(), child.to_string()))
}
