//! Typed query constraints, field schemas and projections

use std::cmp::Ordering;
use serde_json::Value;
use crate::error::{Error, Result};
use super::{Record, ID_FIELD};

/// Compare two JSON values of the same kind. Values of different kinds are
/// unordered, so range constraints never match across types.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match compare_values(a, b) {
        Some(ord) => ord == Ordering::Equal,
        None => a == b,
    }
}

/// Single-field predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Field equals value; on an array field, the array contains it
    Eq { field: String, value: Value },
    /// Field >= value
    Gte { field: String, value: Value },
    /// Field < value
    Lt { field: String, value: Value },
    /// Field equals any of the values
    In { field: String, values: Vec<Value> },
}

impl Constraint {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Constraint::Eq { field: field.into(), value: value.into() }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Constraint::Gte { field: field.into(), value: value.into() }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Constraint::Lt { field: field.into(), value: value.into() }
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Constraint::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Constraint::Eq { field, .. }
            | Constraint::Gte { field, .. }
            | Constraint::Lt { field, .. }
            | Constraint::In { field, .. } => field,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(self.field());
        match self {
            Constraint::Eq { value, .. } => eq_matches(actual, value),
            Constraint::In { values, .. } => values.iter().any(|v| eq_matches(actual, v)),
            Constraint::Gte { value, .. } => range_matches(actual, |a| {
                matches!(compare_values(a, value), Some(Ordering::Greater | Ordering::Equal))
            }),
            Constraint::Lt { value, .. } => range_matches(actual, |a| {
                compare_values(a, value) == Some(Ordering::Less)
            }),
        }
    }
}

fn eq_matches(actual: Option<&Value>, wanted: &Value) -> bool {
    match actual {
        // A missing field compares equal to null
        None => wanted.is_null(),
        Some(Value::Array(items)) if !wanted.is_array() => {
            items.iter().any(|item| values_equal(item, wanted))
        }
        Some(v) => values_equal(v, wanted),
    }
}

fn range_matches<F: Fn(&Value) -> bool>(actual: Option<&Value>, test: F) -> bool {
    match actual {
        None => false,
        Some(Value::Array(items)) => items.iter().any(&test),
        Some(v) => test(v),
    }
}

/// Conjunction of constraints
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// Matches every document
    #[default]
    All,
    /// Exactly one constraint, kept without a conjunction wrapper
    Single(Constraint),
    And(Vec<Constraint>),
}

impl Filter {
    pub fn and(mut constraints: Vec<Constraint>) -> Self {
        match constraints.len() {
            0 => Filter::All,
            1 => Filter::Single(constraints.remove(0)),
            _ => Filter::And(constraints),
        }
    }

    pub fn constraints(&self) -> &[Constraint] {
        match self {
            Filter::All => &[],
            Filter::Single(c) => std::slice::from_ref(c),
            Filter::And(cs) => cs,
        }
    }

    /// Conjunction of both filters
    pub fn combine(self, other: Filter) -> Filter {
        let mut all = self.constraints().to_vec();
        all.extend_from_slice(other.constraints());
        Filter::and(all)
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.constraints().iter().all(|c| c.matches(record))
    }
}

impl From<Constraint> for Filter {
    fn from(c: Constraint) -> Self {
        Filter::Single(c)
    }
}

/// Expected JSON type of a known field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Any,
}

impl FieldType {
    fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.as_i64().is_some(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Any => true,
        }
    }
}

/// Known fields of a collection, used to reject malformed constraints
/// when they are built rather than when the store runs them
#[derive(Debug, Clone)]
pub struct FieldSchema {
    name: &'static str,
    fields: Vec<(&'static str, FieldType)>,
    open: bool,
}

const COMMON_FIELDS: &[(&str, FieldType)] = &[
    (ID_FIELD, FieldType::Any),
    ("id", FieldType::String),
    ("name", FieldType::String),
    ("author", FieldType::String),
    ("subreddit", FieldType::String),
    ("subreddit_id", FieldType::String),
    ("created_utc", FieldType::Integer),
    ("score", FieldType::Integer),
    ("ups", FieldType::Integer),
    ("downs", FieldType::Integer),
    ("gilded", FieldType::Integer),
    ("distinguished", FieldType::String),
    ("edited", FieldType::Any),
    ("retrieved_on", FieldType::Integer),
    ("author_flair_text", FieldType::String),
    ("author_flair_css_class", FieldType::String),
];

impl FieldSchema {
    pub fn submissions() -> Self {
        let mut fields = COMMON_FIELDS.to_vec();
        fields.extend_from_slice(&[
            ("title", FieldType::String),
            ("selftext", FieldType::String),
            ("url", FieldType::String),
            ("domain", FieldType::String),
            ("permalink", FieldType::String),
            ("num_comments", FieldType::Integer),
            ("over_18", FieldType::Boolean),
            ("is_self", FieldType::Boolean),
            ("stickied", FieldType::Boolean),
            ("thumbnail", FieldType::String),
        ]);
        Self { name: "submission", fields, open: false }
    }

    pub fn comments() -> Self {
        let mut fields = COMMON_FIELDS.to_vec();
        fields.extend_from_slice(&[
            ("parent_id", FieldType::String),
            ("link_id", FieldType::String),
            ("body", FieldType::String),
            ("controversiality", FieldType::Integer),
            ("score_hidden", FieldType::Boolean),
            ("archived", FieldType::Boolean),
        ]);
        Self { name: "comment", fields, open: false }
    }

    /// Derived subreddit catalog
    pub fn catalog() -> Self {
        Self {
            name: "catalog",
            fields: vec![
                (ID_FIELD, FieldType::String),
                ("subreddit", FieldType::String),
                ("submission_count", FieldType::Integer),
                ("comment_count", FieldType::Integer),
            ],
            open: false,
        }
    }

    /// Accepts any field and value
    pub fn open() -> Self {
        Self { name: "open", fields: Vec::new(), open: true }
    }

    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        if self.open {
            return Some(FieldType::Any);
        }
        self.fields.iter().find(|(f, _)| *f == field).map(|(_, t)| *t)
    }

    pub fn check(&self, field: &str, value: &Value) -> Result<()> {
        let ty = self.field_type(field).ok_or_else(|| {
            Error::InvalidFilter(format!("unknown {} field '{}'", self.name, field))
        })?;
        if !ty.accepts(value) {
            return Err(Error::InvalidFilter(format!(
                "{} field '{}' expects {:?}, got {}",
                self.name, field, ty, value
            )));
        }
        Ok(())
    }

    pub fn eq(&self, field: &str, value: impl Into<Value>) -> Result<Constraint> {
        let value = value.into();
        self.check(field, &value)?;
        Ok(Constraint::eq(field, value))
    }

    pub fn gte(&self, field: &str, value: impl Into<Value>) -> Result<Constraint> {
        let value = value.into();
        self.check(field, &value)?;
        Ok(Constraint::gte(field, value))
    }

    pub fn lt(&self, field: &str, value: impl Into<Value>) -> Result<Constraint> {
        let value = value.into();
        self.check(field, &value)?;
        Ok(Constraint::lt(field, value))
    }

    pub fn is_in<I, V>(&self, field: &str, values: I) -> Result<Constraint>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        for value in &values {
            self.check(field, value)?;
        }
        Ok(Constraint::In { field: field.to_string(), values })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProjectionMode {
    Include(Vec<String>),
    Exclude(Vec<String>),
}

/// Fields returned by `find`. `_id` comes back unless explicitly excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    mode: ProjectionMode,
    include_id: bool,
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: ProjectionMode::Include(fields.into_iter().map(Into::into).collect()),
            include_id: true,
        }
    }

    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: ProjectionMode::Exclude(fields.into_iter().map(Into::into).collect()),
            include_id: true,
        }
    }

    pub fn without_id(mut self) -> Self {
        self.include_id = false;
        self
    }

    pub fn apply(&self, mut record: Record) -> Record {
        let id = if self.include_id { record.remove(ID_FIELD) } else { None };
        let mut out = match &self.mode {
            ProjectionMode::Include(fields) => {
                let mut kept = Record::new();
                for field in fields {
                    if let Some(v) = record.remove(field.as_str()) {
                        kept.insert(field.clone(), v);
                    }
                }
                kept
            }
            ProjectionMode::Exclude(fields) => {
                for field in fields {
                    record.remove(field.as_str());
                }
                record.remove(ID_FIELD);
                record
            }
        };
        if let Some(id) = id {
            out.insert(ID_FIELD.to_string(), id);
        }
        out
    }
}
